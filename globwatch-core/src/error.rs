//! Error types for glob resolution and bundler results.
//!
//! We keep errors simple and actionable. Each variant tells you
//! exactly what went wrong and (usually) which path or pattern caused it.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Convenience type for functions that can fail while resolving globs.
pub type Result<T> = std::result::Result<T, GlobError>;

/// Things that can go wrong when compiling or expanding glob patterns.
#[derive(Error, Debug)]
pub enum GlobError {
    /// The pattern couldn't be compiled. This is a configuration
    /// mistake, so it's reported before any watching starts.
    #[error("invalid glob pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    /// The pattern uses glob syntax we can't express, such as a
    /// repeating `+(...)` group.
    #[error("unsupported glob pattern '{pattern}': {reason}")]
    UnsupportedPattern { pattern: String, reason: String },

    /// Walking a directory failed somewhere other than a missing root.
    #[error("failed to read '{path}': {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl GlobError {
    /// Creates an IO error with the path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoError {
            path: path.into(),
            source,
        }
    }
}

/// Where in a source file a diagnostic points.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Location {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

/// A single diagnostic reported by the bundler.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

impl Message {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            location: None,
        }
    }

    pub fn at(mut self, file: impl Into<String>, line: u32, column: u32) -> Self {
        self.location = Some(Location {
            file: file.into(),
            line,
            column,
        });
        self
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "{}:{}:{}: {}", loc.file, loc.line, loc.column, self.text),
            None => f.write_str(&self.text),
        }
    }
}

/// The bundler rejected a build. Carries its diagnostics verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("build failed with {} error(s){}", .errors.len(), first_error(.errors))]
pub struct BuildFailure {
    pub errors: Vec<Message>,
    pub warnings: Vec<Message>,
}

impl BuildFailure {
    pub fn new(errors: Vec<Message>) -> Self {
        Self {
            errors,
            warnings: Vec::new(),
        }
    }
}

fn first_error(errors: &[Message]) -> String {
    errors
        .first()
        .map(|m| format!(": {}", m))
        .unwrap_or_default()
}
