//! Glob resolution.
//!
//! Expands entrypoint patterns into the concrete files they match. A
//! pattern prefixed with `!` excludes whatever it matches from the set.
//!
//! Each pattern is split into a literal base directory and a glob tail.
//! Only the base is walked, and the tail is matched against the path
//! relative to it, so absolute patterns, relative patterns and patterns
//! reaching outside the working directory all behave the same way.
//!
//! Extglob groups are rewritten before compiling: `@(a|b)` matches one
//! alternative, `?(a|b)` at most one, and `!(a|b)` anything except the
//! alternatives. `+(...)` and `*(...)` are rejected.

use crate::error::{GlobError, Result};
use crate::paths::{absolutize, normalize_path, to_slash};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

const NEGATION: char = '!';
const GLOB_META: &[char] = &['*', '?', '[', ']', '{', '}'];
const EXTGLOB_PREFIXES: &[char] = &['!', '@', '?', '+', '*'];

/// A single compiled pattern.
#[derive(Debug, Clone)]
struct CompiledPattern {
    raw: String,
    negated: bool,
    /// Absolute literal prefix of the pattern.
    base: PathBuf,
    /// Glob for the remainder. `None` when the whole pattern is a literal path.
    tail: Option<GlobSet>,
    /// Paths the tail matches that a `!(...)` group rules out.
    except: Option<GlobSet>,
    /// Whether the tail can match below the first directory level.
    deep: bool,
}

impl CompiledPattern {
    fn compile(raw: &str, cwd: &Path) -> Result<Self> {
        let (negated, body) = match raw.strip_prefix(NEGATION) {
            Some(rest) if !rest.starts_with('(') => (true, rest),
            _ => (false, raw),
        };
        let body = body.replace('\\', "/");

        let mut literal = Vec::new();
        let mut rest = Vec::new();
        for segment in body.split('/') {
            if rest.is_empty() && !is_glob_segment(segment) {
                literal.push(segment);
            } else {
                rest.push(segment);
            }
        }

        // Keep the root when the pattern is absolute.
        let literal = literal.join("/");
        let literal = if literal.is_empty() && body.starts_with('/') {
            "/".to_string()
        } else {
            literal
        };
        let base = absolutize(&literal, cwd);

        let (tail, except) = if rest.is_empty() {
            (None, None)
        } else {
            let expanded = expand_extglobs(&rest.join("/"), raw)?;
            let except = if expanded.exclude.is_empty() {
                None
            } else {
                Some(build_set(&expanded.exclude, raw)?)
            };
            (Some(build_set(&expanded.include, raw)?), except)
        };

        Ok(Self {
            raw: raw.to_string(),
            negated,
            base,
            deep: rest.len() > 1 || rest.iter().any(|s| s.contains("**")),
            tail,
            except,
        })
    }

    fn matches(&self, absolute: &Path) -> bool {
        let Ok(rel) = absolute.strip_prefix(&self.base) else {
            return false;
        };
        match &self.tail {
            None => rel.as_os_str().is_empty(),
            Some(glob) => {
                let rel = to_slash(rel);
                !rel.is_empty()
                    && glob.is_match(&rel)
                    && !self.except.as_ref().is_some_and(|e| e.is_match(&rel))
            }
        }
    }
}

fn is_glob_segment(segment: &str) -> bool {
    segment.contains(GLOB_META) || find_extglob(segment).is_some()
}

/// Position of the first `X(` extglob opener.
fn find_extglob(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    (0..bytes.len().saturating_sub(1))
        .find(|&i| EXTGLOB_PREFIXES.contains(&(bytes[i] as char)) && bytes[i + 1] == b'(')
}

fn build_set(globs: &[String], raw: &str) -> Result<GlobSet> {
    let invalid = |source| GlobError::InvalidPattern {
        pattern: raw.to_string(),
        source,
    };

    let mut builder = GlobSetBuilder::new();
    for glob in globs {
        builder.add(
            GlobBuilder::new(glob)
                .literal_separator(true)
                .build()
                .map_err(invalid)?,
        );
    }
    builder.build().map_err(invalid)
}

/// Plain globs equivalent to a tail that may contain extglob groups.
#[derive(Debug, Default, PartialEq)]
struct Expanded {
    include: Vec<String>,
    /// Empty unless the tail had a `!(...)` group.
    exclude: Vec<String>,
}

fn expand_extglobs(tail: &str, raw: &str) -> Result<Expanded> {
    let unsupported = |reason: &str| GlobError::UnsupportedPattern {
        pattern: raw.to_string(),
        reason: reason.to_string(),
    };

    // Each piece lists its alternatives on the include and exclude side.
    let mut pieces: Vec<(Vec<String>, Vec<String>)> = Vec::new();
    let mut negations = 0;
    let mut rest = tail;

    while let Some(start) = find_extglob(rest) {
        if start > 0 {
            let text = rest[..start].to_string();
            pieces.push((vec![text.clone()], vec![text]));
        }
        let kind = rest.as_bytes()[start] as char;
        let body = &rest[start + 2..];
        let close = body
            .find(')')
            .ok_or_else(|| unsupported("unclosed extglob group"))?;
        let inner = &body[..close];
        if inner.contains('(') {
            return Err(unsupported("nested extglob groups"));
        }
        let group = braces(inner);

        match kind {
            '@' => pieces.push((vec![group.clone()], vec![group])),
            '?' => pieces.push((vec![group.clone(), String::new()], vec![group, String::new()])),
            '!' => {
                negations += 1;
                pieces.push((vec!["*".to_string()], vec![group]));
            }
            _ => return Err(unsupported("repeating extglob groups are not supported")),
        }
        rest = &body[close + 1..];
    }
    if !rest.is_empty() {
        pieces.push((vec![rest.to_string()], vec![rest.to_string()]));
    }

    if negations > 1 {
        return Err(unsupported("more than one !(...) group"));
    }

    let include = product(pieces.iter().map(|(inc, _)| inc));
    let exclude = match negations {
        0 => Vec::new(),
        _ => product(pieces.iter().map(|(_, exc)| exc)),
    };
    Ok(Expanded { include, exclude })
}

fn braces(alternatives: &str) -> String {
    if alternatives.contains('|') {
        format!("{{{}}}", alternatives.replace('|', ","))
    } else {
        alternatives.to_string()
    }
}

fn product<'a>(pieces: impl Iterator<Item = &'a Vec<String>>) -> Vec<String> {
    let mut out = vec![String::new()];
    for alternatives in pieces {
        out = out
            .iter()
            .flat_map(|prefix| alternatives.iter().map(move |alt| format!("{prefix}{alt}")))
            .collect();
    }
    out.sort();
    out.dedup();
    out
}

/// A directory that has to be observed to see every file a pattern can match.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct WatchRoot {
    pub path: PathBuf,
    pub recursive: bool,
}

/// A compiled list of include and exclude patterns anchored at a working directory.
#[derive(Debug, Clone)]
pub struct PatternSet {
    patterns: Vec<CompiledPattern>,
    cwd: PathBuf,
}

impl PatternSet {
    /// Compiles the patterns. Fails on the first pattern that isn't a valid glob.
    pub fn new<S: AsRef<str>>(patterns: &[S], cwd: &Path) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| CompiledPattern::compile(p.as_ref(), cwd))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            patterns,
            cwd: cwd.to_path_buf(),
        })
    }

    /// The working directory relative patterns are anchored at.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// The patterns as they were written.
    pub fn raw_patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|p| p.raw.as_str())
    }

    /// True when there is nothing to include, only exclusions or nothing at all.
    pub fn is_empty(&self) -> bool {
        !self.patterns.iter().any(|p| !p.negated)
    }

    /// True when the path matches a positive pattern and no negated one.
    ///
    /// Accepts paths relative to the working directory or absolute paths.
    pub fn is_match(&self, path: impl AsRef<Path>) -> bool {
        let absolute = absolutize(path, &self.cwd);
        let mut included = false;
        for pattern in &self.patterns {
            if pattern.matches(&absolute) {
                if pattern.negated {
                    return false;
                }
                included = true;
            }
        }
        included
    }

    /// Directories a watcher needs to observe to catch new matches.
    pub fn watch_roots(&self) -> Vec<WatchRoot> {
        let roots: BTreeSet<WatchRoot> = self
            .patterns
            .iter()
            .filter(|p| !p.negated)
            .map(|p| match p.tail {
                // Literal paths: watch the containing directory.
                None => WatchRoot {
                    path: p
                        .base
                        .parent()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| p.base.clone()),
                    recursive: false,
                },
                Some(_) => WatchRoot {
                    path: p.base.clone(),
                    recursive: p.deep,
                },
            })
            .collect();
        roots.into_iter().collect()
    }

    /// Expands the patterns into existing files.
    ///
    /// Paths come back normalized (relative to the working directory when
    /// inside it), sorted and deduplicated. Patterns matching nothing
    /// contribute nothing.
    pub fn resolve(&self) -> Result<Vec<PathBuf>> {
        let mut found = BTreeSet::new();

        for pattern in self.patterns.iter().filter(|p| !p.negated) {
            let meta = match std::fs::metadata(&pattern.base) {
                Ok(meta) => meta,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!("Pattern base {} does not exist", pattern.base.display());
                    continue;
                }
                Err(e) => return Err(GlobError::io(&pattern.base, e)),
            };

            if pattern.tail.is_none() {
                if meta.is_file() && self.is_match(&pattern.base) {
                    found.insert(normalize_path(&pattern.base, &self.cwd));
                }
                continue;
            }

            if !meta.is_dir() {
                continue;
            }

            let walker = WalkDir::new(&pattern.base).follow_links(false);
            let walker = if pattern.deep {
                walker
            } else {
                walker.max_depth(1)
            };

            for entry in walker.into_iter().filter_map(|e| e.ok()) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = entry.path();
                if pattern.matches(path) && self.is_match(path) {
                    found.insert(normalize_path(path, &self.cwd));
                }
            }
        }

        debug!("Resolved {} file(s) from {} pattern(s)", found.len(), self.patterns.len());

        Ok(found.into_iter().collect())
    }
}

/// Expands glob patterns against a working directory.
///
/// # Example
///
/// ```no_run
/// use globwatch_core::resolve;
/// use std::path::Path;
///
/// let files = resolve(&["src/**/*.ts", "!src/**/*.test.ts"], Path::new("/project")).unwrap();
/// for file in files {
///     println!("{}", file.display());
/// }
/// ```
pub fn resolve<S: AsRef<str>>(patterns: &[S], cwd: &Path) -> Result<Vec<PathBuf>> {
    PatternSet::new(patterns, cwd)?.resolve()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "export {}").unwrap();
    }

    #[test]
    fn test_resolve_single_star_stays_in_directory() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "src/a.entry.ts");
        touch(dir.path(), "src/b.entry.ts");
        touch(dir.path(), "src/c.ignored.ts");
        touch(dir.path(), "src/nested/d.entry.ts");

        let files = resolve(&["src/*.entry.ts"], dir.path()).unwrap();
        assert_eq!(
            files,
            vec![
                PathBuf::from("src/a.entry.ts"),
                PathBuf::from("src/b.entry.ts")
            ]
        );
    }

    #[test]
    fn test_resolve_double_star_and_negation() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "src/a.ts");
        touch(dir.path(), "src/deep/b.ts");
        touch(dir.path(), "src/deep/b.test.ts");

        let files = resolve(&["src/**/*.ts", "!**/*.test.ts"], dir.path()).unwrap();
        assert_eq!(
            files,
            vec![PathBuf::from("src/a.ts"), PathBuf::from("src/deep/b.ts")]
        );
    }

    #[test]
    fn test_resolve_braces_and_dedup() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "src/a.ts");
        touch(dir.path(), "src/b.tsx");
        touch(dir.path(), "src/c.js");

        let files = resolve(&["src/*.{ts,tsx}", "src/a.ts"], dir.path()).unwrap();
        assert_eq!(
            files,
            vec![PathBuf::from("src/a.ts"), PathBuf::from("src/b.tsx")]
        );
    }

    #[test]
    fn test_resolve_absolute_pattern() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "input/x.ts");
        let pattern = format!("{}/input/**/*", to_slash(dir.path()));

        let files = resolve(&[pattern], dir.path()).unwrap();
        assert_eq!(files, vec![PathBuf::from("input/x.ts")]);
    }

    #[test]
    fn test_resolve_no_matches_is_empty() {
        let dir = tempdir().unwrap();
        let files = resolve(&["missing/**/*.ts"], dir.path()).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_resolve_extglob_negation_group() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "input/a.ts");
        touch(dir.path(), "input/b.ts");
        touch(dir.path(), "input/skip.ts");
        touch(dir.path(), "input/a.js");

        let files = resolve(&["input/!(skip).ts"], dir.path()).unwrap();
        assert_eq!(
            files,
            vec![PathBuf::from("input/a.ts"), PathBuf::from("input/b.ts")]
        );

        let files = resolve(&["input/!(skip|b).ts"], dir.path()).unwrap();
        assert_eq!(files, vec![PathBuf::from("input/a.ts")]);
    }

    #[test]
    fn test_resolve_extglob_alternatives() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "src/a.ts");
        touch(dir.path(), "src/a.test.ts");
        touch(dir.path(), "src/b.ts");
        touch(dir.path(), "src/c.ts");

        let files = resolve(&["src/@(a|b).ts"], dir.path()).unwrap();
        assert_eq!(
            files,
            vec![PathBuf::from("src/a.ts"), PathBuf::from("src/b.ts")]
        );

        let files = resolve(&["src/a?(.test).ts"], dir.path()).unwrap();
        assert_eq!(
            files,
            vec![PathBuf::from("src/a.test.ts"), PathBuf::from("src/a.ts")]
        );
    }

    #[test]
    fn test_extglob_expansion() {
        let expanded = expand_extglobs("!(skip|b).ts", "raw").unwrap();
        assert_eq!(expanded.include, vec!["*.ts"]);
        assert_eq!(expanded.exclude, vec!["{skip,b}.ts"]);

        let expanded = expand_extglobs("x?(y).ts", "raw").unwrap();
        assert_eq!(expanded.include, vec!["x.ts", "xy.ts"]);
        assert!(expanded.exclude.is_empty());
    }

    #[test]
    fn test_unsupported_extglob_is_error() {
        let dir = tempdir().unwrap();
        for pattern in ["src/+(a|b).ts", "src/*(a).ts", "src/!(a)!(b).ts", "src/@(a.ts"] {
            let err = PatternSet::new(&[pattern], dir.path()).unwrap_err();
            assert!(
                matches!(err, GlobError::UnsupportedPattern { .. }),
                "{pattern}: {err}"
            );
        }
    }

    #[test]
    fn test_negated_extglob_pattern_excludes() {
        let cwd = Path::new("/project");
        let set = PatternSet::new(&["src/*.ts", "!src/@(gen|tmp).ts"], cwd).unwrap();
        assert!(set.is_match("src/keep.ts"));
        assert!(!set.is_match("src/gen.ts"));
        assert!(!set.is_match("src/tmp.ts"));
        assert!(!set.is_empty());
        assert_eq!(
            set.raw_patterns().collect::<Vec<_>>(),
            vec!["src/*.ts", "!src/@(gen|tmp).ts"]
        );

        let only_exclusions = PatternSet::new(&["!src/*.ts"], cwd).unwrap();
        assert!(only_exclusions.is_empty());
    }

    #[test]
    fn test_invalid_pattern_is_error() {
        let dir = tempdir().unwrap();
        let err = PatternSet::new(&["src/[a.ts"], dir.path()).unwrap_err();
        assert!(matches!(err, GlobError::InvalidPattern { .. }));
    }

    #[test]
    fn test_is_match_respects_negation() {
        let cwd = Path::new("/project");
        let set = PatternSet::new(&["src/*.ts", "!src/skip.ts"], cwd).unwrap();
        assert!(set.is_match("src/keep.ts"));
        assert!(set.is_match("/project/src/keep.ts"));
        assert!(!set.is_match("src/skip.ts"));
        assert!(!set.is_match("src/nested/keep.ts"));
        assert!(!set.is_match("lib/keep.ts"));
    }

    #[test]
    fn test_watch_roots() {
        let cwd = Path::new("/project");
        let set = PatternSet::new(&["src/*.ts", "pages/**/*.tsx", "extra/one.ts", "!x/**"], cwd)
            .unwrap();
        assert_eq!(
            set.watch_roots(),
            vec![
                WatchRoot {
                    path: PathBuf::from("/project/extra"),
                    recursive: false
                },
                WatchRoot {
                    path: PathBuf::from("/project/pages"),
                    recursive: true
                },
                WatchRoot {
                    path: PathBuf::from("/project/src"),
                    recursive: false
                },
            ]
        );
    }
}
