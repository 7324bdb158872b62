//! Build metadata reported by the bundler.
//!
//! Mirrors the bundler's JSON metafile: which files went into the build
//! and which artifacts came out, keyed by path.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata about one completed build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metafile {
    #[serde(default)]
    pub inputs: BTreeMap<String, MetafileInput>,
    #[serde(default)]
    pub outputs: BTreeMap<String, MetafileOutput>,
}

/// A source file the bundler read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetafileInput {
    #[serde(default)]
    pub bytes: u64,
    #[serde(default)]
    pub imports: Vec<MetafileImport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetafileImport {
    pub path: String,
    #[serde(default)]
    pub kind: Option<String>,
}

/// An artifact the bundler produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetafileOutput {
    #[serde(default)]
    pub bytes: u64,
    /// Source files that contributed to this output.
    #[serde(default)]
    pub inputs: BTreeMap<String, OutputInput>,
    /// Set when this output was produced for an entrypoint rather than
    /// being a shared chunk or asset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputInput {
    #[serde(default)]
    pub bytes_in_output: u64,
}

impl Metafile {
    /// Parses the bundler's JSON metafile.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Every output path, in the bundler's own notation.
    pub fn output_paths(&self) -> impl Iterator<Item = &str> {
        self.outputs.keys().map(String::as_str)
    }

    /// Inputs of outputs that belong to an entrypoint.
    ///
    /// Shared chunks and assets are skipped; their sources are reachable
    /// through the entry outputs that import them.
    pub fn entry_inputs(&self) -> impl Iterator<Item = &str> {
        self.outputs
            .values()
            .filter(|output| output.entry_point.is_some())
            .flat_map(|output| output.inputs.keys().map(String::as_str))
    }
}
