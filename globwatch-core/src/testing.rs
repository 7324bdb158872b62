//! A tiny bundler for tests.
//!
//! [`CopyBundler`] "bundles" an entry by concatenating it with every file
//! it imports (`import ... from "./dep.ts"`) and writing the result to
//! `outdir/<entry stem>.js`. Entries containing `SYNTAX ERROR` fail to
//! build. That's enough to drive the watch logic end to end.

use crate::bundler::{BuildOptions, BuildResult, Bundler, EntryPoints};
use crate::error::{BuildFailure, Message};
use crate::metafile::{Metafile, MetafileInput, MetafileOutput, OutputInput};
use crate::paths::{absolutize, normalize_path, to_slash};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Marker that makes an entry fail to build.
pub const SYNTAX_ERROR: &str = "SYNTAX ERROR";

/// Rebuild handle: the options of the build to repeat.
#[derive(Debug, Clone)]
pub struct CopyHandle {
    pub options: BuildOptions,
}

#[derive(Debug, Default)]
pub struct CopyBundler {
    builds: AtomicUsize,
    rebuilds: AtomicUsize,
    delay: Option<Duration>,
}

impl CopyBundler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every build sleep first, to keep builds in flight.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn rebuilds(&self) -> usize {
        self.rebuilds.load(Ordering::SeqCst)
    }

    async fn run(&self, options: &BuildOptions) -> Result<BuildResult<CopyHandle>, BuildFailure> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let cwd = options
            .working_dir()
            .map_err(|e| BuildFailure::new(vec![Message::new(e.to_string())]))?;
        let entries = match &options.entry_points {
            Some(EntryPoints::List(list)) => list.clone(),
            Some(EntryPoints::Map(map)) => map.values().cloned().collect(),
            None => Vec::new(),
        };
        let outdir = options
            .outdir
            .as_ref()
            .map(|d| absolutize(d, &cwd))
            .unwrap_or_else(|| cwd.clone());

        let mut metafile = Metafile::default();
        for entry in &entries {
            let entry_path = absolutize(entry, &cwd);
            let mut sources = Vec::new();
            collect_sources(&entry_path, &mut sources)?;

            let bundled: String = sources
                .iter()
                .map(|(_, contents)| contents.as_str())
                .collect::<Vec<_>>()
                .join("\n");

            let stem = entry_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let out_path = outdir.join(format!("{stem}.js"));

            if options.write {
                if let Some(parent) = out_path.parent() {
                    std::fs::create_dir_all(parent).map_err(io_failure)?;
                }
                std::fs::write(&out_path, &bundled).map_err(io_failure)?;
            }

            let mut inputs = BTreeMap::new();
            for (path, contents) in &sources {
                let key = key_for(path, &cwd);
                metafile.inputs.insert(
                    key.clone(),
                    MetafileInput {
                        bytes: contents.len() as u64,
                        imports: Vec::new(),
                    },
                );
                inputs.insert(
                    key,
                    OutputInput {
                        bytes_in_output: contents.len() as u64,
                    },
                );
            }

            metafile.outputs.insert(
                key_for(&out_path, &cwd),
                MetafileOutput {
                    bytes: bundled.len() as u64,
                    inputs,
                    entry_point: Some(key_for(&entry_path, &cwd)),
                },
            );
        }

        let handle = options.incremental.then(|| CopyHandle {
            options: options.clone(),
        });
        let metafile = options.metafile.then_some(metafile);
        Ok(BuildResult::new(metafile, handle))
    }
}

#[async_trait]
impl Bundler for CopyBundler {
    type Handle = CopyHandle;

    async fn build(&self, options: &BuildOptions) -> Result<BuildResult<CopyHandle>, BuildFailure> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        self.run(options).await
    }

    async fn rebuild(&self, handle: &CopyHandle) -> Result<BuildResult<CopyHandle>, BuildFailure> {
        self.rebuilds.fetch_add(1, Ordering::SeqCst);
        self.run(&handle.options).await
    }
}

fn collect_sources(path: &Path, out: &mut Vec<(PathBuf, String)>) -> Result<(), BuildFailure> {
    if out.iter().any(|(seen, _)| seen == path) {
        return Ok(());
    }

    let contents = std::fs::read_to_string(path).map_err(|e| {
        BuildFailure::new(vec![Message::new(format!(
            "Could not read \"{}\": {}",
            path.display(),
            e
        ))])
    })?;

    if let Some(line) = contents.lines().position(|l| l.contains(SYNTAX_ERROR)) {
        return Err(BuildFailure::new(vec![Message::new("Unexpected token").at(
            to_slash(path),
            line as u32 + 1,
            0,
        )]));
    }

    let imports: Vec<PathBuf> = contents
        .lines()
        .filter(|l| l.trim_start().starts_with("import "))
        .filter_map(|l| l.split(['"', '\'']).nth(1))
        .map(|specifier| {
            let base = path.parent().unwrap_or(Path::new("."));
            absolutize(specifier, base)
        })
        .collect();

    out.push((path.to_path_buf(), contents));
    for import in imports {
        collect_sources(&import, out)?;
    }
    Ok(())
}

fn key_for(path: &Path, cwd: &Path) -> String {
    to_slash(&normalize_path(path, cwd))
}

fn io_failure(e: std::io::Error) -> BuildFailure {
    BuildFailure::new(vec![Message::new(e.to_string())])
}
