#![allow(dead_code)]

use globwatch::{
    glob_plugin_with_controls, BuildOptions, EntryPoints, GlobPluginControls, GlobPluginOptions,
    PluginBuild, WatchMode,
};
use globwatch_core::testing::CopyBundler;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tokio::time::{sleep, Instant};

pub const IN_DIR: &str = "input";
pub const OUT_DIR: &str = "output";
pub const DEP_DIR: &str = "dependencies";

/// Installs a test subscriber once. Set RUST_LOG to see plugin output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Polls `check` until it passes or a few seconds go by.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    check()
}

/// Gives the watcher a moment to report events that should be ignored.
pub async fn settle() {
    sleep(Duration::from_millis(500)).await;
}

/// A scratch project with input, output and dependency directories.
pub struct Project {
    pub dir: TempDir,
}

impl Project {
    pub fn new() -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        for sub in [IN_DIR, OUT_DIR, DEP_DIR] {
            fs::create_dir_all(dir.path().join(sub)).unwrap();
        }
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn write(&self, rel: &str, contents: &str) {
        let path = self.path(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    pub fn remove(&self, rel: &str) {
        fs::remove_file(self.path(rel)).unwrap();
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.path(rel).exists()
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.path(rel)).unwrap_or_default()
    }

    pub fn mtime(&self, rel: &str) -> Option<SystemTime> {
        fs::metadata(self.path(rel)).and_then(|m| m.modified()).ok()
    }

    /// Writes an entry that imports the given dependency files.
    pub fn write_entry(&self, name: &str, deps: &[&str]) {
        let mut contents = String::new();
        for dep in deps {
            let dep_path = self.path(&format!("{DEP_DIR}/{dep}.ts"));
            contents.push_str(&format!(
                "import {{ {dep} }} from \"{}\";\n",
                dep_path.display()
            ));
        }
        contents.push_str(&format!("console.log('NAME', '{name}');\n"));
        self.write(&format!("{IN_DIR}/{name}.ts"), &contents);
    }

    pub fn write_dependency(&self, name: &str, value: &str) {
        self.write(
            &format!("{DEP_DIR}/{name}.ts"),
            &format!("export const {name} = () => '{value}';\n"),
        );
    }

    pub fn output(&self, name: &str) -> String {
        format!("{OUT_DIR}/{name}.js")
    }

    pub fn host_options(&self, patterns: &[&str], watch: WatchMode) -> BuildOptions {
        BuildOptions {
            entry_points: Some(EntryPoints::List(
                patterns.iter().map(|p| p.to_string()).collect(),
            )),
            abs_working_dir: Some(self.root().to_path_buf()),
            outdir: Some(PathBuf::from(OUT_DIR)),
            watch,
            ..Default::default()
        }
    }

    /// Starts a watch session over `patterns`.
    pub async fn watch(
        &self,
        patterns: &[&str],
        options: GlobPluginOptions,
    ) -> (Arc<CopyBundler>, GlobPluginControls) {
        self.watch_with(patterns, options, WatchMode::enabled()).await
    }

    pub async fn watch_with(
        &self,
        patterns: &[&str],
        options: GlobPluginOptions,
        mode: WatchMode,
    ) -> (Arc<CopyBundler>, GlobPluginControls) {
        let bundler = Arc::new(CopyBundler::new());
        let (plugin, controls) = glob_plugin_with_controls(options);
        let mut build = PluginBuild::new(self.host_options(patterns, mode), Arc::clone(&bundler));
        plugin.setup(&mut build).await.unwrap();

        assert!(build.initial_options.entry_points.is_none());
        assert!(!build.initial_options.watch.is_enabled());

        (bundler, controls)
    }
}
