//! Path normalization.
//!
//! Bundlers, watchers and glob expansion all hand us paths in slightly
//! different shapes. Everything the registry stores goes through
//! [`normalize_path`] first so lookups compare like with like.

use std::path::{Component, Path, PathBuf};

/// Directory name marking third-party code. Inputs under it are never watched.
pub const VENDOR_DIR: &str = "node_modules";

/// Normalizes a path reported by a collaborator.
///
/// - strips a leading bundler namespace such as `file:` or `ns:`
/// - resolves relative paths against `cwd`
/// - collapses `.` and `..` components
/// - returns paths under `cwd` relative to it, anything else absolute
pub fn normalize_path(path: impl AsRef<Path>, cwd: &Path) -> PathBuf {
    let path = strip_namespace(path.as_ref());
    let absolute = if path.is_absolute() {
        clean(&path)
    } else {
        clean(&cwd.join(&path))
    };

    match absolute.strip_prefix(clean(cwd)) {
        Ok(rel) if rel.as_os_str().is_empty() => PathBuf::from("."),
        Ok(rel) => rel.to_path_buf(),
        Err(_) => absolute,
    }
}

/// Resolves a normalized path back to an absolute one.
pub fn absolutize(path: impl AsRef<Path>, cwd: &Path) -> PathBuf {
    let path = path.as_ref();
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        clean(&cwd.join(path))
    }
}

/// True when the path goes through a vendored dependency directory.
pub fn is_vendored(path: &Path) -> bool {
    path.components()
        .any(|c| matches!(c, Component::Normal(name) if name == VENDOR_DIR))
}

/// Finds the deepest directory containing every path.
///
/// Used to pin the bundler's output base so that building a single entry
/// lays out its output the same way a build of all entries would.
/// Returns `None` for an empty list.
pub fn lowest_common_ancestor<P: AsRef<Path>>(paths: &[P], cwd: &Path) -> Option<PathBuf> {
    let mut iter = paths.iter().map(|p| absolutize(p, cwd));
    let first = iter.next()?;
    let mut ancestor = first.parent().map(Path::to_path_buf).unwrap_or(first);

    for path in iter {
        while !path.starts_with(&ancestor) {
            match ancestor.parent() {
                Some(parent) => ancestor = parent.to_path_buf(),
                None => break,
            }
        }
    }

    Some(ancestor)
}

/// Turns a path into the `/`-separated form glob patterns are written in.
pub fn to_slash(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn strip_namespace(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match raw.split_once(':') {
        // One-letter prefixes are Windows drive letters, not namespaces.
        Some((ns, rest))
            if ns.len() > 1 && ns.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') =>
        {
            PathBuf::from(rest)
        }
        _ => path.to_path_buf(),
    }
}

fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
