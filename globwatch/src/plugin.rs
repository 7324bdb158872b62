//! The glob plugin.
//!
//! In a single run the plugin swaps the host's entry patterns for the
//! files they match and lets the host build as usual. In watch mode it
//! takes over: the host's own watch mode and initial build are switched
//! off, and a [`WatchController`] builds each matching file as its own
//! entry from then on.

use crate::error::{PluginError, Result};
use globwatch_core::{BuildOptions, Bundler, EntryPoints, PatternSet, WatchMode};
use globwatch_watcher::{
    BuildInvoker, ControllerOptions, SessionHandle, WatchController, WatchOptions, WatchState,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Plugin configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GlobPluginOptions {
    /// Passed through to the file watcher.
    pub watch_options: WatchOptions,

    /// Don't log every add/change/unlink.
    pub silent: bool,

    /// More patterns, merged with the host's entry points.
    pub additional_entrypoints: Vec<String>,
}

/// What the plugin gets to see of the host build.
pub struct PluginBuild<B: Bundler> {
    /// The host's options. The plugin rewrites them during setup.
    pub initial_options: BuildOptions,
    pub bundler: Arc<B>,
}

impl<B: Bundler> PluginBuild<B> {
    pub fn new(initial_options: BuildOptions, bundler: Arc<B>) -> Self {
        Self {
            initial_options,
            bundler,
        }
    }
}

/// State shared between a plugin and its controls.
#[derive(Default)]
struct PluginContext {
    session: Mutex<Option<SessionHandle>>,
}

impl PluginContext {
    fn replace(&self, handle: Option<SessionHandle>) -> Option<SessionHandle> {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *session, handle)
    }

    fn current(&self) -> Option<SessionHandle> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Resolves glob entry points and, when watching, rebuilds incrementally.
pub struct GlobPlugin {
    options: GlobPluginOptions,
    context: Arc<PluginContext>,
}

/// Lets the caller inspect and end a watch session started by the plugin.
#[derive(Clone)]
pub struct GlobPluginControls {
    context: Arc<PluginContext>,
}

impl GlobPluginControls {
    /// Stops watching if in watch mode. Otherwise does nothing.
    pub async fn stop_watching(&self) {
        if let Some(handle) = self.context.current() {
            handle.stop().await;
        }
    }

    /// True while a watch session is running.
    pub fn is_watching(&self) -> bool {
        self.state() == WatchState::Watching
    }

    /// `Idle` before setup in watch mode and after stopping.
    pub fn state(&self) -> WatchState {
        self.context
            .current()
            .map_or(WatchState::Idle, |handle| handle.state())
    }

    /// Entries the current session has built, sorted.
    pub fn entries(&self) -> Vec<PathBuf> {
        self.context
            .current()
            .map(|handle| handle.entries())
            .unwrap_or_default()
    }

    /// Outputs of the last successful build of `entry`.
    pub fn outputs_for(&self, entry: impl AsRef<Path>) -> Option<BTreeSet<PathBuf>> {
        self.context.current()?.outputs_for(entry)
    }

    /// Source files the last successful build of `entry` read.
    pub fn inputs_for(&self, entry: impl AsRef<Path>) -> Option<BTreeSet<PathBuf>> {
        self.context.current()?.inputs_for(entry)
    }
}

/// Creates the plugin.
pub fn glob_plugin(options: GlobPluginOptions) -> GlobPlugin {
    GlobPlugin {
        options,
        context: Arc::new(PluginContext::default()),
    }
}

/// Creates the plugin together with controls for stopping its watch session.
pub fn glob_plugin_with_controls(options: GlobPluginOptions) -> (GlobPlugin, GlobPluginControls) {
    let plugin = glob_plugin(options);
    let controls = GlobPluginControls {
        context: Arc::clone(&plugin.context),
    };
    (plugin, controls)
}

impl GlobPlugin {
    pub const NAME: &'static str = "glob";

    pub fn name(&self) -> &'static str {
        Self::NAME
    }

    pub fn options(&self) -> &GlobPluginOptions {
        &self.options
    }

    /// Hooks the plugin into a host build.
    ///
    /// Must run inside a tokio runtime when the host is in watch mode.
    /// Fails only on configuration problems: entry points that aren't a
    /// list, patterns that don't compile, or a watcher that can't start.
    pub async fn setup<B: Bundler>(&self, build: &mut PluginBuild<B>) -> Result<()> {
        let mut patterns = match &build.initial_options.entry_points {
            Some(EntryPoints::List(list)) => list.clone(),
            _ => return Err(PluginError::UnsupportedEntryPoints),
        };
        patterns.extend(self.options.additional_entrypoints.iter().cloned());

        let cwd = build
            .initial_options
            .working_dir()
            .map_err(PluginError::WorkingDir)?;
        let pattern_set = PatternSet::new(&patterns, &cwd)?;
        if pattern_set.is_empty() {
            warn!("No entry patterns to include; nothing will be built");
        }
        let resolved = pattern_set.resolve()?;

        debug!(
            "Resolved {} entrypoint(s) from {} pattern(s)",
            resolved.len(),
            patterns.len()
        );

        if !build.initial_options.watch.is_enabled() {
            build.initial_options.entry_points = Some(EntryPoints::from_paths(resolved));
            return Ok(());
        }

        let on_rebuild = build.initial_options.watch.on_rebuild();
        let invoker = BuildInvoker::new(
            Arc::clone(&build.bundler),
            &build.initial_options,
            &cwd,
            &resolved,
        );
        let controller = WatchController::start(
            invoker,
            pattern_set,
            ControllerOptions {
                watch: self.options.watch_options.clone(),
                silent: self.options.silent,
                on_rebuild,
            },
        )?;

        if let Some(previous) = self.context.replace(Some(controller.session())) {
            previous.stop().await;
        }

        // The plugin runs the builds and watches the files from here on.
        build.initial_options.entry_points = None;
        build.initial_options.watch = WatchMode::Disabled;

        if !self.options.silent {
            info!("Watching {} entry pattern(s)", patterns.len());
        }

        Ok(())
    }
}
