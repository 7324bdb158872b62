//! File watcher for entry globs and their dependencies.
//!
//! Uses the notify crate to observe the directories the entry patterns
//! live in, plus the directories of every input file discovered by a
//! build. Events are debounced, narrowed to the paths we care about and
//! turned into one add/change/unlink event per path and batch.

use crate::error::WatchError;
use globwatch_core::{normalize_path, PatternSet};
use notify::event::{CreateKind, MetadataKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Config, Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_full::{
    new_debouncer_opt, DebounceEventResult, DebouncedEvent, Debouncer, FileIdMap,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

/// Options handed to the underlying watcher.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WatchOptions {
    /// Poll the filesystem instead of using native notifications.
    /// Useful on network mounts and in some containers.
    pub use_polling: bool,

    /// Poll interval in milliseconds. Only used when polling.
    pub poll_interval_ms: Option<u64>,

    /// Don't report files that already exist when watching starts.
    pub ignore_initial: bool,

    /// How long to wait for a burst of events on a path to settle, in
    /// milliseconds. Defaults to [`DEFAULT_DEBOUNCE_MS`].
    pub debounce_ms: Option<u64>,
}

pub const DEFAULT_DEBOUNCE_MS: u64 = 100;

impl WatchOptions {
    fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS))
    }
}

/// What happened to a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileEventKind {
    Add,
    Change,
    Unlink,
}

/// A filtered filesystem event. The path is normalized against the
/// working directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileEvent {
    pub kind: FileEventKind,
    pub path: PathBuf,
}

/// Paths a subscription reports events for.
#[derive(Debug)]
struct WatchSet {
    patterns: PatternSet,
    /// Absolute paths of explicitly added files.
    files: HashSet<PathBuf>,
}

impl WatchSet {
    fn contains(&self, absolute: &Path) -> bool {
        self.files.contains(absolute) || self.patterns.is_match(absolute)
    }
}

/// Native or polling watcher behind a debouncer.
enum Backend {
    Native(Debouncer<RecommendedWatcher, FileIdMap>),
    Polling(Debouncer<PollWatcher, FileIdMap>),
}

impl Backend {
    fn watch(&mut self, path: &Path, mode: RecursiveMode) -> notify::Result<()> {
        match self {
            Self::Native(debouncer) => {
                debouncer.watcher().watch(path, mode)?;
                debouncer.cache().add_root(path, mode);
            }
            Self::Polling(debouncer) => {
                debouncer.watcher().watch(path, mode)?;
                debouncer.cache().add_root(path, mode);
            }
        }
        Ok(())
    }
}

/// A live watch over a set of patterns and files.
///
/// Dropping the subscription (or calling [`close`](Self::close)) stops the
/// underlying watcher and ends the event stream.
pub struct WatchSubscription {
    backend: Backend,
    set: Arc<RwLock<WatchSet>>,
    cwd: PathBuf,
    recursive_dirs: Vec<PathBuf>,
    flat_dirs: HashSet<PathBuf>,
}

impl WatchSubscription {
    /// Starts watching the directories the patterns can match in.
    ///
    /// Returns the subscription together with the receiving end of its
    /// event stream. Must be called from within a tokio runtime only if
    /// the receiver is awaited there; the watcher itself runs on its own
    /// thread.
    pub fn new(
        patterns: PatternSet,
        options: &WatchOptions,
    ) -> Result<(Self, UnboundedReceiver<FileEvent>), WatchError> {
        let (tx, rx) = unbounded_channel();
        let cwd = patterns.cwd().to_path_buf();
        let roots = patterns.watch_roots();
        debug!(
            "Subscribing to {}",
            patterns.raw_patterns().collect::<Vec<_>>().join(", ")
        );

        let set = Arc::new(RwLock::new(WatchSet {
            patterns,
            files: HashSet::new(),
        }));

        let handler = event_handler(Arc::clone(&set), cwd.clone(), tx);
        let debounce = options.debounce();
        let backend = if options.use_polling {
            let mut config = Config::default();
            if let Some(ms) = options.poll_interval_ms {
                config = config.with_poll_interval(Duration::from_millis(ms));
            }
            Backend::Polling(new_debouncer_opt::<_, PollWatcher, FileIdMap>(
                debounce,
                None,
                handler,
                FileIdMap::new(),
                config,
            )?)
        } else {
            Backend::Native(new_debouncer_opt::<_, RecommendedWatcher, FileIdMap>(
                debounce,
                None,
                handler,
                FileIdMap::new(),
                Config::default(),
            )?)
        };

        let mut subscription = Self {
            backend,
            set,
            cwd,
            recursive_dirs: Vec::new(),
            flat_dirs: HashSet::new(),
        };

        for root in roots {
            subscription.watch_dir(&root.path, root.recursive)?;
        }

        info!("Watching {} for changes", subscription.cwd.display());

        Ok((subscription, rx))
    }

    /// Adds files to the watch. Already covered files are skipped.
    pub fn add<I, P>(&mut self, paths: I) -> Result<(), WatchError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        for path in paths {
            let absolute = globwatch_core::paths::absolutize(path, &self.cwd);

            let newly_added = write_lock(&self.set).files.insert(absolute.clone());
            if !newly_added {
                continue;
            }

            let Some(parent) = absolute.parent() else {
                continue;
            };
            if !self.is_covered(parent) {
                self.watch_dir(parent, false)?;
            }
        }
        Ok(())
    }

    /// Stops reporting events for files added through [`add`](Self::add).
    ///
    /// Paths that also match an entry pattern keep being reported.
    pub fn remove<I, P>(&mut self, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut set = write_lock(&self.set);
        for path in paths {
            let absolute = globwatch_core::paths::absolutize(path, &self.cwd);
            set.files.remove(&absolute);
        }
    }

    /// Explicitly added files, normalized and sorted.
    pub fn watched_files(&self) -> Vec<PathBuf> {
        let set = self.set.read().unwrap_or_else(PoisonError::into_inner);
        let mut files: Vec<_> = set
            .files
            .iter()
            .map(|p| normalize_path(p, &self.cwd))
            .collect();
        files.sort();
        files
    }

    /// True when events for `path` would be reported.
    pub fn is_watching(&self, path: impl AsRef<Path>) -> bool {
        let absolute = globwatch_core::paths::absolutize(path, &self.cwd);
        self.set
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&absolute)
    }

    /// Stops the watcher. Pending events already queued are still
    /// delivered; the stream ends after them.
    pub async fn close(self) {
        let backend = self.backend;
        // Tearing down native watchers joins their thread.
        if let Err(e) = tokio::task::spawn_blocking(move || drop(backend)).await {
            warn!("Failed to shut down file watcher: {}", e);
        }
        debug!("Closed watch on {}", self.cwd.display());
    }

    fn is_covered(&self, dir: &Path) -> bool {
        self.flat_dirs.contains(dir) || self.recursive_dirs.iter().any(|r| dir.starts_with(r))
    }

    fn watch_dir(&mut self, dir: &Path, recursive: bool) -> Result<(), WatchError> {
        // A pattern's base may not exist yet. Watch the nearest existing
        // ancestor recursively so its creation is seen.
        let mut target = dir.to_path_buf();
        let mut recursive = recursive;
        while !target.is_dir() {
            match target.parent() {
                Some(parent) => {
                    target = parent.to_path_buf();
                    recursive = true;
                }
                None => return Ok(()),
            }
        }

        let covered_recursively = self.recursive_dirs.iter().any(|r| target.starts_with(r));
        if covered_recursively || (!recursive && self.flat_dirs.contains(&target)) {
            return Ok(());
        }

        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        self.backend.watch(&target, mode)?;
        debug!("Watching directory {} ({:?})", target.display(), mode);

        if recursive {
            self.recursive_dirs.push(target);
        } else {
            self.flat_dirs.insert(target);
        }
        Ok(())
    }
}

fn write_lock(set: &RwLock<WatchSet>) -> std::sync::RwLockWriteGuard<'_, WatchSet> {
    set.write().unwrap_or_else(PoisonError::into_inner)
}

fn event_handler(
    set: Arc<RwLock<WatchSet>>,
    cwd: PathBuf,
    tx: UnboundedSender<FileEvent>,
) -> impl FnMut(DebounceEventResult) + Send + 'static {
    move |res: DebounceEventResult| match res {
        Ok(events) => {
            let set = set.read().unwrap_or_else(PoisonError::into_inner);
            let changes = events.iter().flat_map(|e: &DebouncedEvent| translate(&e.event));
            for (kind, path) in coalesce(changes) {
                if !set.contains(&path) {
                    continue;
                }

                let path = normalize_path(&path, &cwd);
                debug!("{:?}: {}", kind, path.display());
                if tx.send(FileEvent { kind, path }).is_err() {
                    debug!("Event stream closed, dropping file event");
                }
            }
        }
        Err(errors) => {
            for e in errors {
                warn!("Watch error: {}", e);
            }
        }
    }
}

/// Folds a batch of events into one event per path, in first-seen order.
///
/// Repeated writes collapse into a single change. When a path was created
/// or removed during the batch, what is on disk now decides: a file that
/// was replaced (removed and recreated, or renamed over) is an add, and
/// the controller treats an add of a tracked input as a change.
fn coalesce(changes: impl IntoIterator<Item = (FileEventKind, PathBuf)>) -> Vec<(FileEventKind, PathBuf)> {
    let mut order = Vec::new();
    let mut seen: HashMap<PathBuf, bool> = HashMap::new();

    for (kind, path) in changes {
        let structural = kind != FileEventKind::Change;
        match seen.get_mut(&path) {
            Some(flag) => *flag |= structural,
            None => {
                seen.insert(path.clone(), structural);
                order.push(path);
            }
        }
    }

    order
        .into_iter()
        .map(|path| {
            let kind = match seen[&path] {
                false => FileEventKind::Change,
                true if path.exists() => FileEventKind::Add,
                true => FileEventKind::Unlink,
            };
            (kind, path)
        })
        .collect()
}

/// Maps a notify event onto add/change/unlink for each path it carries.
fn translate(event: &Event) -> Vec<(FileEventKind, PathBuf)> {
    use FileEventKind::*;

    let each = |kind: FileEventKind| -> Vec<(FileEventKind, PathBuf)> {
        event.paths.iter().map(|p| (kind, p.clone())).collect()
    };

    let changes = match event.kind {
        EventKind::Create(CreateKind::Folder) => Vec::new(),
        EventKind::Create(_) => each(Add),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => each(Unlink),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => each(Add),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut out = Vec::new();
            if let Some(from) = event.paths.first() {
                out.push((Unlink, from.clone()));
            }
            if let Some(to) = event.paths.get(1) {
                out.push((Add, to.clone()));
            }
            out
        }
        // Platforms that can't tell which side of a rename this is.
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|p| (if p.exists() { Add } else { Unlink }, p.clone()))
            .collect(),
        EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime | MetadataKind::Any)) => {
            each(Change)
        }
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => each(Change),
        EventKind::Remove(RemoveKind::Folder) => Vec::new(),
        EventKind::Remove(_) => each(Unlink),
        _ => Vec::new(),
    };

    changes
        .into_iter()
        .filter(|(kind, path)| *kind == Unlink || !path.is_dir())
        .collect()
}
