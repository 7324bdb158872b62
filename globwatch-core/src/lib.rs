//! Globwatch Core - glob resolution and the bundler seam
//!
//! This crate holds the pieces every other globwatch crate leans on:
//! expanding entrypoint globs into files, normalizing the paths that
//! bundlers and watchers report, and the [`Bundler`] trait the plugin
//! drives.
//!
//! # Example
//!
//! ```no_run
//! use globwatch_core::resolve;
//! use std::path::Path;
//!
//! let entries = resolve(&["src/*.entry.ts"], Path::new(".")).unwrap();
//! for entry in entries {
//!     println!("{}", entry.display());
//! }
//! ```

pub mod bundler;
pub mod error;
pub mod glob;
pub mod metafile;
pub mod paths;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use bundler::{BuildOptions, BuildResult, Bundler, EntryPoints, RebuildCallback, WatchMode};
pub use error::{BuildFailure, GlobError, Location, Message, Result};
pub use glob::{resolve, PatternSet, WatchRoot};
pub use metafile::{Metafile, MetafileOutput};
pub use paths::{is_vendored, lowest_common_ancestor, normalize_path};
