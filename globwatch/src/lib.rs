//! Globwatch - glob entrypoints and watch-mode rebuilds for bundlers
//!
//! Lets a bundler take entry points like `src/pages/**/*.ts`. In a single
//! run the globs are expanded before the build starts. In watch mode every
//! matching file becomes its own incrementally rebuilt entry: new files are
//! built as they appear, edits to an entry or any of its dependencies
//! rebuild it, and deleting an entry removes its outputs.
//!
//! # Example
//!
//! ```no_run
//! use globwatch::{glob_plugin_with_controls, BuildOptions, Bundler, EntryPoints,
//!     GlobPluginOptions, PluginBuild, WatchMode};
//! use std::sync::Arc;
//!
//! async fn watch<B: Bundler>(bundler: Arc<B>) -> globwatch::Result<()> {
//!     let (plugin, controls) = glob_plugin_with_controls(GlobPluginOptions::default());
//!     let options = BuildOptions {
//!         entry_points: Some(EntryPoints::List(vec!["src/*.entry.ts".into()])),
//!         outdir: Some("dist".into()),
//!         watch: WatchMode::enabled(),
//!         ..Default::default()
//!     };
//!
//!     let mut build = PluginBuild::new(options, bundler);
//!     plugin.setup(&mut build).await?;
//!
//!     // ... later
//!     controls.stop_watching().await;
//!     Ok(())
//! }
//! ```

mod error;
mod plugin;

pub use error::{PluginError, Result};
pub use plugin::{
    glob_plugin, glob_plugin_with_controls, GlobPlugin, GlobPluginControls, GlobPluginOptions,
    PluginBuild,
};

pub use globwatch_core::{
    resolve, BuildFailure, BuildOptions, BuildResult, Bundler, EntryPoints, Message, Metafile,
    RebuildCallback, WatchMode,
};
pub use globwatch_watcher::{WatchOptions, WatchState, DEFAULT_DEBOUNCE_MS};
