//! Error types for watching and building.

use globwatch_core::{BuildFailure, GlobError};
use thiserror::Error;

/// Setting up or extending a watch failed.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("file watcher error: {0}")]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Glob(#[from] GlobError),
}

/// A single build attempt failed.
///
/// None of these end a watch session. Build failures come from the
/// bundler's diagnostics; the other two mean the bundler broke its
/// contract and returned less than was asked for.
#[derive(Error, Debug)]
pub enum InvokeError {
    #[error(transparent)]
    Build(#[from] BuildFailure),

    #[error("expected the bundler to return a metafile")]
    MissingMetafile,

    #[error("expected all build results to be incremental")]
    MissingHandle,
}

impl InvokeError {
    /// Diagnostics to forward to the host, when the bundler produced any.
    pub fn failure(&self) -> Option<&BuildFailure> {
        match self {
            Self::Build(failure) => Some(failure),
            _ => None,
        }
    }
}
