//! Globwatch Watcher - file watching and incremental rebuilds
//!
//! This crate handles the watch-mode side of things:
//! - Subscribing to filesystem events for the entry patterns
//! - Tracking which inputs feed which entries, and what they produced
//! - Building new entries, rebuilding changed ones, cleaning up removed ones
//!
//! A failed build never ends a session; the previous outputs stay put
//! until the next successful build replaces them.

mod controller;
mod error;
mod invoker;
mod registry;
mod watcher;

pub use controller::{ControllerOptions, SessionHandle, WatchController, WatchState};
pub use error::{InvokeError, WatchError};
pub use invoker::{BuildInvoker, BuildOutcome};
pub use registry::{Entry, EntryRegistry};
pub use watcher::{FileEvent, FileEventKind, WatchOptions, WatchSubscription, DEFAULT_DEBOUNCE_MS};
