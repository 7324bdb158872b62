//! Entry registry.
//!
//! Remembers, for every entry the plugin has built, which source files
//! went into it, which artifacts came out, and how to rebuild it.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One built entry.
#[derive(Debug)]
pub struct Entry<H> {
    /// First-party source files from the latest build.
    pub inputs: BTreeSet<PathBuf>,
    /// Artifacts from the latest build.
    pub outputs: BTreeSet<PathBuf>,
    handle: Arc<H>,
}

impl<H> Entry<H> {
    pub fn handle(&self) -> Arc<H> {
        Arc::clone(&self.handle)
    }
}

/// Maps entry paths to their latest build.
///
/// Owned by a single watch session; nothing here is global.
#[derive(Debug)]
pub struct EntryRegistry<H> {
    entries: HashMap<PathBuf, Entry<H>>,
}

impl<H> Default for EntryRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> EntryRegistry<H> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Stores the result of building `entry`, replacing any earlier build.
    ///
    /// Inputs are expected to be normalized and free of vendored paths.
    /// Dependencies dropped since the last build are forgotten.
    pub fn record_build<I, O>(&mut self, entry: PathBuf, inputs: I, outputs: O, handle: H)
    where
        I: IntoIterator<Item = PathBuf>,
        O: IntoIterator<Item = PathBuf>,
    {
        self.entries.insert(
            entry,
            Entry {
                inputs: inputs.into_iter().collect(),
                outputs: outputs.into_iter().collect(),
                handle: Arc::new(handle),
            },
        );
    }

    /// Every entry that depends on `input`, sorted.
    pub fn find_entries_by_input(&self, input: &Path) -> Vec<PathBuf> {
        let mut found: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.inputs.contains(input))
            .map(|(id, _)| id.clone())
            .collect();
        found.sort();
        found
    }

    pub fn outputs_for(&self, entry: &Path) -> Option<&BTreeSet<PathBuf>> {
        self.entries.get(entry).map(|e| &e.outputs)
    }

    pub fn inputs_for(&self, entry: &Path) -> Option<&BTreeSet<PathBuf>> {
        self.entries.get(entry).map(|e| &e.inputs)
    }

    /// Handle for rebuilding `entry` incrementally.
    pub fn handle(&self, entry: &Path) -> Option<Arc<H>> {
        self.entries.get(entry).map(Entry::handle)
    }

    /// Drops `entry` and hands back its last known outputs.
    pub fn remove(&mut self, entry: &Path) -> Option<BTreeSet<PathBuf>> {
        self.entries.remove(entry).map(|e| e.outputs)
    }

    /// True when some entry lists `path` as one of its outputs.
    pub fn is_output(&self, path: &Path) -> bool {
        self.entries.values().any(|e| e.outputs.contains(path))
    }

    pub fn contains(&self, entry: &Path) -> bool {
        self.entries.contains_key(entry)
    }

    pub fn entry_ids(&self) -> Vec<PathBuf> {
        let mut ids: Vec<_> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
