//! Build invocation.
//!
//! Wraps the bundler so the controller only ever sees normalized input
//! and output paths, whether an entry is being built for the first time
//! or rebuilt incrementally.

use crate::error::InvokeError;
use globwatch_core::paths::absolutize;
use globwatch_core::{
    is_vendored, lowest_common_ancestor, normalize_path, BuildOptions, BuildResult, Bundler,
    EntryPoints, Message, Metafile, WatchMode,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// A build the bundler finished and reported on in full.
#[derive(Debug)]
pub struct BuildOutcome<H> {
    pub handle: H,
    /// First-party source files that fed an entry output.
    pub inputs: Vec<PathBuf>,
    /// Every artifact written (or that would have been written).
    pub outputs: Vec<PathBuf>,
    pub metafile: Metafile,
    pub warnings: Vec<Message>,
}

/// Runs builds with the options shared by every build in a watch session.
pub struct BuildInvoker<B: Bundler> {
    bundler: Arc<B>,
    shared: BuildOptions,
    cwd: PathBuf,
}

impl<B: Bundler> BuildInvoker<B> {
    /// Derives the shared options from the host's configuration.
    ///
    /// Incremental builds and metafiles are always switched on, the host's
    /// own watch mode is switched off, and unless the host pinned one the
    /// output base is set to the deepest directory containing every
    /// initially resolved entry. Without that, a single-entry build would
    /// flatten its output next to the entry's own directory.
    pub fn new(bundler: Arc<B>, host: &BuildOptions, cwd: &Path, resolved: &[PathBuf]) -> Self {
        let outbase = host
            .outbase
            .clone()
            .or_else(|| lowest_common_ancestor(resolved, cwd));

        let shared = BuildOptions {
            entry_points: None,
            abs_working_dir: Some(cwd.to_path_buf()),
            watch: WatchMode::Disabled,
            outbase,
            incremental: true,
            metafile: true,
            ..host.clone()
        };

        Self {
            bundler,
            shared,
            cwd: cwd.to_path_buf(),
        }
    }

    pub fn options(&self) -> &BuildOptions {
        &self.shared
    }

    /// Whether builds write their outputs to disk.
    pub fn writes_outputs(&self) -> bool {
        self.shared.write
    }

    /// True when `path` lies inside the output directory.
    ///
    /// An output directory that is the working directory itself, or one of
    /// its parents, says nothing about a path and never matches.
    pub fn is_in_outdir(&self, path: &Path) -> bool {
        let Some(outdir) = &self.shared.outdir else {
            return false;
        };
        let outdir = absolutize(outdir, &self.cwd);
        if self.cwd.starts_with(&outdir) {
            return false;
        }
        absolutize(path, &self.cwd).starts_with(&outdir)
    }

    /// Builds the given entries from scratch.
    pub async fn build_fresh(&self, entries: &[PathBuf]) -> Result<BuildOutcome<B::Handle>, InvokeError> {
        let options = BuildOptions {
            entry_points: Some(EntryPoints::from_paths(entries.iter().cloned())),
            ..self.shared.clone()
        };
        let result = self.bundler.build(&options).await?;
        self.outcome(result)
    }

    /// Rebuilds from a handle returned by an earlier build.
    pub async fn rebuild(&self, handle: &B::Handle) -> Result<BuildOutcome<B::Handle>, InvokeError> {
        let result = self.bundler.rebuild(handle).await?;
        self.outcome(result)
    }

    fn outcome(&self, result: BuildResult<B::Handle>) -> Result<BuildOutcome<B::Handle>, InvokeError> {
        let metafile = result.metafile.ok_or(InvokeError::MissingMetafile)?;
        let handle = result.rebuild.ok_or(InvokeError::MissingHandle)?;

        let outputs: Vec<PathBuf> = metafile
            .output_paths()
            .map(|p| normalize_path(p, &self.cwd))
            .collect();

        let mut inputs: Vec<PathBuf> = metafile
            .entry_inputs()
            .map(Path::new)
            .filter(|p| !is_vendored(p))
            .map(|p| normalize_path(p, &self.cwd))
            .collect();
        inputs.sort();
        inputs.dedup();

        debug!(
            "Build reported {} input(s), {} output(s)",
            inputs.len(),
            outputs.len()
        );

        Ok(BuildOutcome {
            handle,
            inputs,
            outputs,
            metafile,
            warnings: result.warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use globwatch_core::BuildFailure;
    use std::sync::Mutex;

    /// Replays canned results and remembers the options it was given.
    #[derive(Default)]
    struct CannedBundler {
        metafile: Option<Metafile>,
        incremental: bool,
        warnings: Vec<Message>,
        seen: Mutex<Vec<BuildOptions>>,
    }

    #[async_trait]
    impl Bundler for CannedBundler {
        type Handle = u32;

        async fn build(&self, options: &BuildOptions) -> Result<BuildResult<u32>, BuildFailure> {
            self.seen.lock().unwrap().push(options.clone());
            let mut result = BuildResult::new(self.metafile.clone(), self.incremental.then_some(1));
            result.warnings = self.warnings.clone();
            Ok(result)
        }

        async fn rebuild(&self, handle: &u32) -> Result<BuildResult<u32>, BuildFailure> {
            Ok(BuildResult::new(self.metafile.clone(), Some(handle + 1)))
        }
    }

    fn sample_metafile() -> Metafile {
        Metafile::from_json(
            r#"{
                "outputs": {
                    "out/a.js": {
                        "entryPoint": "src/a.ts",
                        "inputs": {
                            "src/a.ts": {},
                            "file:src/dep.ts": {},
                            "node_modules/lib/index.js": {}
                        }
                    },
                    "out/chunk-1.js": { "inputs": { "src/chunk-only.ts": {} } }
                }
            }"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_build_fresh_normalizes_outcome() {
        let bundler = Arc::new(CannedBundler {
            metafile: Some(sample_metafile()),
            incremental: true,
            ..Default::default()
        });
        let cwd = Path::new("/project");
        let host = BuildOptions {
            outdir: Some(PathBuf::from("out")),
            ..Default::default()
        };
        let resolved = vec![PathBuf::from("src/a.ts"), PathBuf::from("src/pages/b.ts")];
        let invoker = BuildInvoker::new(Arc::clone(&bundler), &host, cwd, &resolved);

        let outcome = invoker
            .build_fresh(&[PathBuf::from("src/a.ts")])
            .await
            .unwrap();

        assert_eq!(
            outcome.inputs,
            vec![PathBuf::from("src/a.ts"), PathBuf::from("src/dep.ts")]
        );
        assert_eq!(
            outcome.outputs,
            vec![PathBuf::from("out/a.js"), PathBuf::from("out/chunk-1.js")]
        );
        assert_eq!(outcome.handle, 1);

        let seen = bundler.seen.lock().unwrap();
        let options = &seen[0];
        assert!(options.incremental);
        assert!(options.metafile);
        assert!(!options.watch.is_enabled());
        assert_eq!(options.outbase, Some(PathBuf::from("/project/src")));
        assert_eq!(
            options.entry_points,
            Some(EntryPoints::List(vec!["src/a.ts".to_string()]))
        );
    }

    #[tokio::test]
    async fn test_outcome_carries_bundler_warnings() {
        let bundler = Arc::new(CannedBundler {
            metafile: Some(sample_metafile()),
            incremental: true,
            warnings: vec![Message::new("unused import").at("src/a.ts", 1, 0)],
            ..Default::default()
        });
        let invoker = BuildInvoker::new(bundler, &BuildOptions::default(), Path::new("/project"), &[]);
        let outcome = invoker.build_fresh(&[PathBuf::from("src/a.ts")]).await.unwrap();
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].to_string(), "src/a.ts:1:0: unused import");
    }

    #[test]
    fn test_is_in_outdir() {
        let host = BuildOptions {
            outdir: Some(PathBuf::from("out")),
            ..Default::default()
        };
        let cwd = Path::new("/project");
        let invoker = BuildInvoker::new(Arc::new(CannedBundler::default()), &host, cwd, &[]);
        assert!(invoker.is_in_outdir(Path::new("out/a.js")));
        assert!(invoker.is_in_outdir(Path::new("/project/out/nested/b.ts")));
        assert!(!invoker.is_in_outdir(Path::new("src/a.ts")));
        assert!(!invoker.is_in_outdir(Path::new("outside/a.ts")));

        let into_cwd = BuildOptions {
            outdir: Some(PathBuf::from(".")),
            ..Default::default()
        };
        let invoker = BuildInvoker::new(Arc::new(CannedBundler::default()), &into_cwd, cwd, &[]);
        assert!(!invoker.is_in_outdir(Path::new("src/a.ts")));

        let invoker = BuildInvoker::new(
            Arc::new(CannedBundler::default()),
            &BuildOptions::default(),
            cwd,
            &[],
        );
        assert!(!invoker.is_in_outdir(Path::new("out/a.js")));
    }

    #[tokio::test]
    async fn test_host_outbase_wins() {
        let bundler = Arc::new(CannedBundler::default());
        let host = BuildOptions {
            outbase: Some(PathBuf::from("custom")),
            ..Default::default()
        };
        let invoker = BuildInvoker::new(bundler, &host, Path::new("/p"), &[PathBuf::from("a/b.ts")]);
        assert_eq!(invoker.options().outbase, Some(PathBuf::from("custom")));
    }

    #[tokio::test]
    async fn test_missing_metadata_is_contract_violation() {
        let no_meta = Arc::new(CannedBundler {
            incremental: true,
            ..Default::default()
        });
        let invoker = BuildInvoker::new(no_meta, &BuildOptions::default(), Path::new("/p"), &[]);
        let err = invoker.build_fresh(&[PathBuf::from("a.ts")]).await.unwrap_err();
        assert!(matches!(err, InvokeError::MissingMetafile));

        let no_handle = Arc::new(CannedBundler {
            metafile: Some(sample_metafile()),
            ..Default::default()
        });
        let invoker = BuildInvoker::new(no_handle, &BuildOptions::default(), Path::new("/p"), &[]);
        let err = invoker.build_fresh(&[PathBuf::from("a.ts")]).await.unwrap_err();
        assert!(matches!(err, InvokeError::MissingHandle));
    }

    #[tokio::test]
    async fn test_rebuild_uses_handle() {
        let bundler = Arc::new(CannedBundler {
            metafile: Some(sample_metafile()),
            incremental: true,
            ..Default::default()
        });
        let invoker = BuildInvoker::new(bundler, &BuildOptions::default(), Path::new("/project"), &[]);
        let outcome = invoker.rebuild(&41).await.unwrap();
        assert_eq!(outcome.handle, 42);
    }
}
