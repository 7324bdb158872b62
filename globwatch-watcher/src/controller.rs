//! Watch controller.
//!
//! Turns filesystem events into builds:
//!
//! - `add` of a file matching the entry patterns builds it as a new entry
//! - `change` of any tracked input rebuilds every entry depending on it
//! - `unlink` of an entry file deletes its outputs and forgets the entry
//!
//! Each event is handled on its own task, so rebuilds of different entries
//! overlap freely. Builds of the same entry are serialized.

use crate::error::{InvokeError, WatchError};
use crate::invoker::{BuildInvoker, BuildOutcome};
use crate::registry::EntryRegistry;
use crate::watcher::{FileEvent, FileEventKind, WatchOptions, WatchSubscription};
use globwatch_core::paths::absolutize;
use globwatch_core::{Bundler, PatternSet, RebuildCallback};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, warn};

/// Where a controller is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// Not watching. Either never started or stopped.
    Idle,
    Watching,
}

/// Settings for a watch session.
#[derive(Clone, Default)]
pub struct ControllerOptions {
    pub watch: WatchOptions,
    /// Suppress the per-event log lines.
    pub silent: bool,
    /// Called after every build attempt.
    pub on_rebuild: Option<RebuildCallback>,
}

/// Read access to the entries of a session, whatever the bundler's handle type.
trait EntryView: Send + Sync {
    fn entry_ids(&self) -> Vec<PathBuf>;
    fn outputs_for(&self, entry: &Path) -> Option<BTreeSet<PathBuf>>;
    fn inputs_for(&self, entry: &Path) -> Option<BTreeSet<PathBuf>>;
}

impl<H: Send + Sync> EntryView for Mutex<EntryRegistry<H>> {
    fn entry_ids(&self) -> Vec<PathBuf> {
        lock(self).entry_ids()
    }

    fn outputs_for(&self, entry: &Path) -> Option<BTreeSet<PathBuf>> {
        lock(self).outputs_for(entry).cloned()
    }

    fn inputs_for(&self, entry: &Path) -> Option<BTreeSet<PathBuf>> {
        lock(self).inputs_for(entry).cloned()
    }
}

/// A handle on a running session: its state, its entries, and a way to
/// stop it. Cheap to clone and independent of the bundler type.
#[derive(Clone)]
pub struct SessionHandle {
    closed: Arc<AtomicBool>,
    subscription: Arc<Mutex<Option<WatchSubscription>>>,
    entries: Arc<dyn EntryView>,
}

impl SessionHandle {
    /// Closes the subscription. Builds already running finish, but their
    /// results are thrown away. Calling this twice is a no-op.
    pub async fn stop(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let subscription = lock(&self.subscription).take();
        if let Some(subscription) = subscription {
            subscription.close().await;
        }
        info!("Stopped watching");
    }

    pub fn is_stopped(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> WatchState {
        if self.is_stopped() {
            WatchState::Idle
        } else {
            WatchState::Watching
        }
    }

    /// Entries built so far, sorted.
    pub fn entries(&self) -> Vec<PathBuf> {
        self.entries.entry_ids()
    }

    pub fn outputs_for(&self, entry: impl AsRef<Path>) -> Option<BTreeSet<PathBuf>> {
        self.entries.outputs_for(entry.as_ref())
    }

    pub fn inputs_for(&self, entry: impl AsRef<Path>) -> Option<BTreeSet<PathBuf>> {
        self.entries.inputs_for(entry.as_ref())
    }
}

/// A running watch session.
pub struct WatchController<B: Bundler> {
    inner: Arc<Inner<B>>,
}

impl<B: Bundler> WatchController<B> {
    /// Subscribes to the patterns and starts handling events.
    ///
    /// Unless `ignore_initial` is set, every file the patterns currently
    /// match is built right away. Must be called within a tokio runtime.
    pub fn start(
        invoker: BuildInvoker<B>,
        patterns: PatternSet,
        options: ControllerOptions,
    ) -> Result<Self, WatchError> {
        let initial = if options.watch.ignore_initial {
            Vec::new()
        } else {
            patterns.resolve()?
        };

        let (inner, events) = Inner::new(invoker, patterns, options)?;
        let inner = Arc::new(inner);

        tokio::spawn(run(Arc::clone(&inner), events));

        for path in initial {
            let inner = Arc::clone(&inner);
            tokio::spawn(async move {
                inner
                    .handle(FileEvent {
                        kind: FileEventKind::Add,
                        path,
                    })
                    .await
            });
        }

        Ok(Self { inner })
    }

    pub fn session(&self) -> SessionHandle {
        self.inner.session.clone()
    }

    pub fn state(&self) -> WatchState {
        self.inner.session.state()
    }

    pub async fn stop(&self) {
        self.inner.session.stop().await
    }
}

async fn run<B: Bundler>(inner: Arc<Inner<B>>, mut events: UnboundedReceiver<FileEvent>) {
    while let Some(event) = events.recv().await {
        if inner.is_closed() {
            break;
        }
        let inner = Arc::clone(&inner);
        tokio::spawn(async move { inner.handle(event).await });
    }
    debug!("Watch event loop finished");
}

/// Per-entry build coordination.
#[derive(Default)]
struct EntrySlot {
    /// Held for the duration of any build of the entry.
    lock: tokio::sync::Mutex<()>,
    /// Set while a rebuild waits for the lock. A change arriving then is
    /// already covered by that rebuild.
    pending: AtomicBool,
}

struct Inner<B: Bundler> {
    invoker: BuildInvoker<B>,
    patterns: PatternSet,
    registry: Arc<Mutex<EntryRegistry<B::Handle>>>,
    /// Slots live as long as the session so every build of a path,
    /// before and after an unlink, queues on the same lock.
    slots: Mutex<HashMap<PathBuf, Arc<EntrySlot>>>,
    session: SessionHandle,
    silent: bool,
    on_rebuild: Option<RebuildCallback>,
}

impl<B: Bundler> Inner<B> {
    fn new(
        invoker: BuildInvoker<B>,
        patterns: PatternSet,
        options: ControllerOptions,
    ) -> Result<(Self, UnboundedReceiver<FileEvent>), WatchError> {
        let (subscription, events) = WatchSubscription::new(patterns.clone(), &options.watch)?;
        let registry = Arc::new(Mutex::new(EntryRegistry::new()));

        let inner = Self {
            invoker,
            patterns,
            registry: Arc::clone(&registry),
            slots: Mutex::new(HashMap::new()),
            session: SessionHandle {
                closed: Arc::new(AtomicBool::new(false)),
                subscription: Arc::new(Mutex::new(Some(subscription))),
                entries: registry,
            },
            silent: options.silent,
            on_rebuild: options.on_rebuild,
        };
        Ok((inner, events))
    }

    fn is_closed(&self) -> bool {
        self.session.is_stopped()
    }

    async fn handle(self: Arc<Self>, event: FileEvent) {
        if self.is_closed() {
            return;
        }
        match event.kind {
            // Editors that save by renaming over the original report an
            // add for a file we already track.
            FileEventKind::Add if self.is_tracked_input(&event.path) => {
                self.on_change(event.path).await
            }
            FileEventKind::Add => self.on_add(event.path).await,
            FileEventKind::Change => self.on_change(event.path).await,
            FileEventKind::Unlink => self.on_unlink(event.path).await,
        }
    }

    fn is_tracked_input(&self, path: &Path) -> bool {
        !lock(&self.registry).find_entries_by_input(path).is_empty()
    }

    async fn on_add(&self, path: PathBuf) {
        if !self.patterns.is_match(&path) {
            return;
        }
        // Outputs written inside a watched tree are not new entries, even
        // before the build that wrote them has been recorded.
        if self.invoker.is_in_outdir(&path) || lock(&self.registry).is_output(&path) {
            debug!("Ignoring build output {}", path.display());
            return;
        }

        if !self.silent {
            info!("[add] {}", path.display());
        }

        let slot = self.slot(&path);
        let _guard = slot.lock.lock().await;

        match self.invoker.build_fresh(std::slice::from_ref(&path)).await {
            Ok(outcome) => self.apply(&path, outcome),
            Err(e) => self.report_failure(&path, e),
        }
    }

    async fn on_change(self: Arc<Self>, path: PathBuf) {
        let entries = lock(&self.registry).find_entries_by_input(&path);
        if entries.is_empty() {
            debug!("No entry depends on {}", path.display());
            return;
        }

        let mut tasks = Vec::with_capacity(entries.len());
        for entry in entries {
            let inner = Arc::clone(&self);
            tasks.push(tokio::spawn(async move { inner.rebuild(entry).await }));
        }
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Rebuild task failed: {}", e);
            }
        }
    }

    async fn rebuild(&self, entry: PathBuf) {
        let slot = self.slot(&entry);
        if slot.pending.swap(true, Ordering::SeqCst) {
            debug!("Rebuild of {} already queued", entry.display());
            return;
        }
        let _guard = slot.lock.lock().await;
        // From here on the files are read afresh, so later changes need
        // a rebuild of their own.
        slot.pending.store(false, Ordering::SeqCst);

        // Read the handle under the entry lock so a queued rebuild starts
        // from whatever the previous one recorded.
        let Some(handle) = lock(&self.registry).handle(&entry) else {
            debug!("Entry {} was removed before it could rebuild", entry.display());
            return;
        };

        if !self.silent {
            info!("[change] {}", entry.display());
        }

        match self.invoker.rebuild(&handle).await {
            Ok(outcome) => self.apply(&entry, outcome),
            Err(e) => self.report_failure(&entry, e),
        }
    }

    async fn on_unlink(&self, path: PathBuf) {
        if !self.invoker.writes_outputs() {
            return;
        }

        // Only entry files are tracked for removal.
        if !lock(&self.registry).contains(&path) {
            return;
        }

        let slot = self.slot(&path);
        let _guard = slot.lock.lock().await;

        let outputs = match lock(&self.registry).outputs_for(&path) {
            Some(outputs) => outputs.clone(),
            None => return,
        };

        if !self.silent {
            info!("[unlink] {}", path.display());
        }

        let cwd = self.patterns.cwd();
        for output in &outputs {
            let target = absolutize(output, cwd);
            if let Err(e) = tokio::fs::remove_file(&target).await {
                warn!("Failed to remove output {}: {}", target.display(), e);
            }
        }

        if self.is_closed() {
            return;
        }

        let orphaned: Vec<PathBuf> = {
            let mut registry = lock(&self.registry);
            let inputs = registry.inputs_for(&path).cloned().unwrap_or_default();
            registry.remove(&path);
            inputs
                .into_iter()
                .filter(|input| registry.find_entries_by_input(input).is_empty())
                .collect()
        };

        if let Some(subscription) = lock(&self.session.subscription).as_mut() {
            subscription.remove(&orphaned);
        }
    }

    fn apply(&self, entry: &Path, outcome: BuildOutcome<B::Handle>) {
        if self.is_closed() {
            debug!("Discarding build of {} after stop", entry.display());
            return;
        }

        let BuildOutcome {
            handle,
            inputs,
            outputs,
            metafile,
            warnings,
        } = outcome;

        for warning in &warnings {
            warn!(entry = %entry.display(), "{}", warning);
        }

        if let Some(subscription) = lock(&self.session.subscription).as_mut() {
            if let Err(e) = subscription.add(&inputs) {
                warn!("Failed to watch inputs of {}: {}", entry.display(), e);
            }
        }

        lock(&self.registry).record_build(entry.to_path_buf(), inputs, outputs, handle);

        if let Some(callback) = &self.on_rebuild {
            callback(Ok(&metafile));
        }
    }

    /// Failed builds never end the session. The previous outputs stay on
    /// disk and the registry keeps the last good build.
    fn report_failure(&self, entry: &Path, err: InvokeError) {
        let Some(failure) = err.failure() else {
            error!(entry = %entry.display(), "Bundler broke its contract: {}", err);
            return;
        };

        warn!(
            entry = %entry.display(),
            errors = failure.errors.len(),
            warnings = failure.warnings.len(),
            "Build failed: {}",
            failure
        );
        if self.is_closed() {
            return;
        }
        if let Some(callback) = &self.on_rebuild {
            callback(Err(failure));
        }
    }

    fn slot(&self, entry: &Path) -> Arc<EntrySlot> {
        Arc::clone(lock(&self.slots).entry(entry.to_path_buf()).or_default())
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
