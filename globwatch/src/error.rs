//! Errors that can abort plugin setup.
//!
//! These are the only failures that reach the host. Once a watch session
//! is running, build and cleanup problems are logged instead.

use globwatch_core::GlobError;
use globwatch_watcher::WatchError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PluginError>;

#[derive(Error, Debug)]
pub enum PluginError {
    /// Entry points were missing or given as a name-to-path map.
    #[error("glob plugin currently only supports array entrypoints")]
    UnsupportedEntryPoints,

    #[error("failed to determine working directory: {0}")]
    WorkingDir(#[source] std::io::Error),

    /// A pattern didn't compile, or expanding it hit an I/O error.
    #[error(transparent)]
    Glob(#[from] GlobError),

    #[error("failed to start watching: {0}")]
    Watch(#[from] WatchError),
}
