//! The bundler seam.
//!
//! Globwatch never bundles anything itself. It hands entrypoints to a
//! [`Bundler`] and reads back what the bundler reports through its
//! metafile. The options here are the subset of the host configuration
//! the plugin reads or rewrites; everything else rides along in
//! [`BuildOptions::settings`].

use crate::error::BuildFailure;
use crate::metafile::Metafile;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// How the host lists its entrypoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryPoints {
    /// Glob patterns or literal paths.
    List(Vec<String>),
    /// Output name to input path. Not supported by the glob plugin.
    Map(BTreeMap<String, String>),
}

impl EntryPoints {
    pub fn from_paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self::List(
            paths
                .into_iter()
                .map(|p| p.into().to_string_lossy().into_owned())
                .collect(),
        )
    }
}

/// Called after every build the plugin runs while watching.
pub type RebuildCallback = Arc<dyn Fn(Result<&Metafile, &BuildFailure>) + Send + Sync>;

/// Whether the host asked for continuous rebuilding.
#[derive(Clone, Default)]
pub enum WatchMode {
    #[default]
    Disabled,
    Enabled {
        on_rebuild: Option<RebuildCallback>,
    },
}

impl WatchMode {
    pub fn enabled() -> Self {
        Self::Enabled { on_rebuild: None }
    }

    pub fn with_callback(
        callback: impl Fn(Result<&Metafile, &BuildFailure>) + Send + Sync + 'static,
    ) -> Self {
        Self::Enabled {
            on_rebuild: Some(Arc::new(callback)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled { .. })
    }

    pub fn on_rebuild(&self) -> Option<RebuildCallback> {
        match self {
            Self::Enabled { on_rebuild } => on_rebuild.clone(),
            Self::Disabled => None,
        }
    }
}

impl fmt::Debug for WatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => f.write_str("Disabled"),
            Self::Enabled { on_rebuild } => f
                .debug_struct("Enabled")
                .field("on_rebuild", &on_rebuild.is_some())
                .finish(),
        }
    }
}

/// Host build configuration.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// `None` means there is nothing for the host to build.
    pub entry_points: Option<EntryPoints>,

    /// Directory relative paths are resolved against. Defaults to the
    /// process working directory when unset.
    pub abs_working_dir: Option<PathBuf>,

    pub watch: WatchMode,

    /// When false the bundler computes outputs without writing them.
    pub write: bool,

    pub outdir: Option<PathBuf>,

    /// Directory the output tree mirrors.
    pub outbase: Option<PathBuf>,

    /// Ask for a rebuild handle in the result.
    pub incremental: bool,

    /// Ask for a metafile in the result.
    pub metafile: bool,

    /// Bundler-specific options passed through untouched.
    pub settings: serde_json::Map<String, serde_json::Value>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            entry_points: None,
            abs_working_dir: None,
            watch: WatchMode::Disabled,
            write: true,
            outdir: None,
            outbase: None,
            incremental: false,
            metafile: false,
            settings: serde_json::Map::new(),
        }
    }
}

impl BuildOptions {
    /// The working directory, falling back to the process's.
    pub fn working_dir(&self) -> std::io::Result<PathBuf> {
        match &self.abs_working_dir {
            Some(dir) => Ok(dir.clone()),
            None => std::env::current_dir(),
        }
    }
}

/// What a successful build hands back.
#[derive(Debug)]
pub struct BuildResult<H> {
    /// Present when `metafile` was requested.
    pub metafile: Option<Metafile>,
    /// Present when `incremental` was requested.
    pub rebuild: Option<H>,
    pub warnings: Vec<crate::error::Message>,
}

impl<H> BuildResult<H> {
    pub fn new(metafile: Option<Metafile>, rebuild: Option<H>) -> Self {
        Self {
            metafile,
            rebuild,
            warnings: Vec::new(),
        }
    }
}

/// An external bundler.
///
/// `Handle` is whatever the bundler needs to redo a previous build
/// incrementally. The plugin stores it per entry and never looks inside.
#[async_trait]
pub trait Bundler: Send + Sync + 'static {
    type Handle: Send + Sync + 'static;

    /// Runs a build with the given options.
    async fn build(
        &self,
        options: &BuildOptions,
    ) -> Result<BuildResult<Self::Handle>, BuildFailure>;

    /// Repeats the build that produced `handle`, picking up file changes.
    async fn rebuild(
        &self,
        handle: &Self::Handle,
    ) -> Result<BuildResult<Self::Handle>, BuildFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_points_from_paths() {
        let eps = EntryPoints::from_paths(vec![PathBuf::from("src/a.ts"), PathBuf::from("b.ts")]);
        assert_eq!(
            eps,
            EntryPoints::List(vec!["src/a.ts".to_string(), "b.ts".to_string()])
        );
    }

    #[test]
    fn test_watch_mode_callback() {
        let mode = WatchMode::with_callback(|_| {});
        assert!(mode.is_enabled());
        assert!(mode.on_rebuild().is_some());
        assert!(WatchMode::enabled().on_rebuild().is_none());
        assert!(!WatchMode::default().is_enabled());
    }

    #[test]
    fn test_defaults_write_outputs() {
        let options = BuildOptions::default();
        assert!(options.write);
        assert!(!options.incremental);
        assert!(options.entry_points.is_none());
    }
}
