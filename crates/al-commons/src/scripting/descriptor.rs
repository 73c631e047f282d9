//! Script descriptor files.
//!
//! ```toml
//! [[scriptinfo]]
//! root = "handlers"
//! library = ["libs/common.toml"]
//! compiler = "rustc"
//!
//! [[scriptinfo.scriptinfo]]
//! root = "handlers/quests"
//! ```
//!
//! Relative paths are resolved against the descriptor's directory.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Top-level descriptor content.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ScriptList {
    #[serde(default, rename = "scriptinfo")]
    pub script_infos: Vec<ScriptInfo>,
}

/// One script context and its children.
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptInfo {
    pub root: PathBuf,
    #[serde(default, rename = "library")]
    pub libraries: Vec<PathBuf>,
    #[serde(default, rename = "scriptinfo")]
    pub children: Vec<ScriptInfo>,
    /// Compiler name; the default compiler when absent.
    #[serde(default)]
    pub compiler: Option<String>,
}

/// Script infos are identified by their root.
impl PartialEq for ScriptInfo {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
    }
}

impl Eq for ScriptInfo {}

impl std::hash::Hash for ScriptInfo {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.root.hash(state);
    }
}

impl ScriptList {
    /// Read a descriptor file, resolving its paths.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Descriptor(format!("can't read {}: {}", path.display(), e)))?;
        let mut list = Self::parse(&content)
            .map_err(|e| Error::Descriptor(format!("{}: {}", path.display(), e)))?;
        let base = path.parent().unwrap_or(Path::new("."));
        for info in &mut list.script_infos {
            info.resolve(base);
        }
        Ok(list)
    }

    /// Parse descriptor text as is.
    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

impl ScriptInfo {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            libraries: Vec::new(),
            children: Vec::new(),
            compiler: None,
        }
    }

    fn resolve(&mut self, base: &Path) {
        self.root = base.join(&self.root);
        for library in &mut self.libraries {
            *library = base.join(&*library);
        }
        for child in &mut self.children {
            child.resolve(base);
        }
    }
}
