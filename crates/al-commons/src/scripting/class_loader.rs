//! Class loader of a script context.
//!
//! Serves compiled classes and classes of attached library archives through
//! one lookup, defines each class once through the instrumentation chain and
//! delegates unknown names to its parent loader.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::instrument::{Instrumentation, LoaderKind};

use super::class::{
    ClassFile, DylibSymbols, NativeSymbols, ScriptClass, SymbolTable, class_name_of_resource,
    resource_name,
};

/// URL scheme of compiled script classes.
pub const SCRIPT_CLASS_SCHEME: &str = "script-class";

/// Undefined class: bytes plus the symbols its code resolves from.
#[derive(Clone)]
struct ClassSource {
    bytes: Vec<u8>,
    symbols: Arc<dyn SymbolTable>,
}

/// An attached library archive.
struct Library {
    path: PathBuf,
    classes: FxHashMap<String, ClassSource>,
}

/// On-disk form of a library archive.
#[derive(Deserialize)]
struct LibraryManifest {
    /// Dynamic library with the archive's symbols, relative to the archive.
    #[serde(default)]
    dylib: Option<PathBuf>,
    #[serde(default, rename = "class")]
    classes: Vec<ClassFile>,
}

impl Library {
    fn open(path: PathBuf) -> Result<Self> {
        let content = fs::read_to_string(&path)?;
        let manifest: LibraryManifest = toml::from_str(&content).map_err(|e| {
            Error::compilation(format!("invalid library archive {}: {}", path.display(), e))
        })?;

        let symbols: Arc<dyn SymbolTable> = match &manifest.dylib {
            Some(dylib) => {
                let base = path.parent().unwrap_or(Path::new("."));
                Arc::new(DylibSymbols::open(&base.join(dylib))?)
            }
            None => Arc::new(NativeSymbols::new()),
        };

        let mut classes = FxHashMap::default();
        for class in manifest.classes {
            let source = ClassSource {
                bytes: class.to_bytes()?,
                symbols: symbols.clone(),
            };
            classes.insert(class.name, source);
        }

        Ok(Self { path, classes })
    }
}

/// Rust crate that the classes of a loader were compiled from. Compilations
/// of child contexts link against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptCrate {
    pub name: String,
    pub rlib: PathBuf,
    /// Directories of this crate and of every crate it links.
    pub search_dirs: Vec<PathBuf>,
}

/// Class loader of one compilation.
pub struct ScriptClassLoader {
    kind: LoaderKind,
    parent: Option<Arc<ScriptClassLoader>>,
    instrumentation: Arc<Instrumentation>,
    compiled: RwLock<FxHashMap<String, ClassSource>>,
    libraries: RwLock<Vec<Library>>,
    defined: RwLock<FxHashMap<String, Arc<ScriptClass>>>,
    /// Serializes definitions so a class is defined at most once.
    define_lock: Mutex<()>,
    script_crate: OnceLock<ScriptCrate>,
}

impl ScriptClassLoader {
    /// Create a loader using the global instrumentation.
    pub fn new(kind: LoaderKind, parent: Option<Arc<ScriptClassLoader>>) -> Self {
        Self::with_instrumentation(kind, parent, Instrumentation::global())
    }

    pub fn with_instrumentation(
        kind: LoaderKind,
        parent: Option<Arc<ScriptClassLoader>>,
        instrumentation: Arc<Instrumentation>,
    ) -> Self {
        Self {
            kind,
            parent,
            instrumentation,
            compiled: RwLock::default(),
            libraries: RwLock::default(),
            defined: RwLock::default(),
            define_lock: Mutex::new(()),
            script_crate: OnceLock::new(),
        }
    }

    pub fn kind(&self) -> LoaderKind {
        self.kind
    }

    pub fn parent(&self) -> Option<&Arc<ScriptClassLoader>> {
        self.parent.as_ref()
    }

    /// Record the crate this loader's classes were built from. Only the
    /// first call has an effect.
    pub(crate) fn set_script_crate(&self, script_crate: ScriptCrate) {
        let _ = self.script_crate.set(script_crate);
    }

    pub fn script_crate(&self) -> Option<&ScriptCrate> {
        self.script_crate.get()
    }

    /// Crate of this loader, or of the closest ancestor that has one.
    pub fn nearest_script_crate(&self) -> Option<ScriptCrate> {
        if let Some(script_crate) = self.script_crate() {
            return Some(script_crate.clone());
        }
        self.parent.as_ref()?.nearest_script_crate()
    }

    /// Attach a library archive. Returns `false` if the same file (by
    /// canonical path) is already attached.
    pub fn add_library(&self, path: &Path) -> Result<bool> {
        let canonical = fs::canonicalize(path)?;
        if self.has_library(&canonical) {
            tracing::debug!("Library {} already attached", canonical.display());
            return Ok(false);
        }

        let library = Library::open(canonical)?;
        let mut libraries = self.libraries.write()?;
        if libraries.iter().any(|l| l.path == library.path) {
            return Ok(false);
        }
        tracing::debug!(
            "Attached library {} with {} classes",
            library.path.display(),
            library.classes.len()
        );
        libraries.push(library);
        Ok(true)
    }

    fn has_library(&self, canonical: &Path) -> bool {
        self.libraries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|l| l.path == canonical)
    }

    /// Canonical paths of the attached libraries, in attachment order.
    pub fn libraries(&self) -> Vec<PathBuf> {
        self.libraries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|l| l.path.clone())
            .collect()
    }

    /// Register the bytes of a freshly compiled class.
    pub(crate) fn add_compiled_class(
        &self,
        name: String,
        bytes: Vec<u8>,
        symbols: Arc<dyn SymbolTable>,
    ) {
        self.compiled
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name, ClassSource { bytes, symbols });
    }

    /// Names of compiled classes, sorted.
    pub fn compiled_class_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .compiled
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Names of all classes of the attached libraries, sorted.
    pub fn library_class_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .libraries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .flat_map(|l| l.classes.keys().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Raw (untransformed) bytes of a compiled or library class.
    pub fn class_bytes(&self, name: &str) -> Option<Vec<u8>> {
        self.find_source(name).map(|source| source.bytes)
    }

    fn find_source(&self, name: &str) -> Option<ClassSource> {
        if let Some(source) = self
            .compiled
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
        {
            return Some(source.clone());
        }
        self.libraries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find_map(|l| l.classes.get(name).cloned())
    }

    /// Already defined class, without defining anything.
    pub fn find_loaded_class(&self, name: &str) -> Option<Arc<ScriptClass>> {
        self.defined
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Resolve a class: defined cache, compiled classes, libraries, then the
    /// parent loader.
    pub fn load_class(&self, name: &str) -> Result<Arc<ScriptClass>> {
        if let Some(class) = self.find_loaded_class(name) {
            return Ok(class);
        }

        if let Some(source) = self.find_source(name) {
            return self.define_class(name, source);
        }

        match &self.parent {
            Some(parent) => parent.load_class(name),
            None => Err(Error::ClassNotFound(name.to_string())),
        }
    }

    fn define_class(&self, name: &str, source: ClassSource) -> Result<Arc<ScriptClass>> {
        let _guard = self.define_lock.lock()?;
        if let Some(class) = self.find_loaded_class(name) {
            return Ok(class);
        }

        let bytes = self.instrumentation.transform(self.kind, name, source.bytes)?;
        let file = ClassFile::from_bytes(name, &bytes)?;
        if file.name != name {
            return Err(Error::ClassFormat {
                class: name.to_string(),
                message: format!("class bytes define {}", file.name),
            });
        }

        let class = Arc::new(ScriptClass::new(file, source.symbols));
        self.defined
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), class.clone());
        tracing::trace!("Defined class {}", name);
        Ok(class)
    }

    /// URL of a class resource (`a/b/C.class`).
    ///
    /// Compiled classes get a synthetic `script-class:` URL, library classes
    /// point into their archive.
    pub fn get_resource(&self, resource: &str) -> Option<String> {
        let class = class_name_of_resource(resource)?;

        if self
            .compiled
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&class)
        {
            return Some(format!("{}:{}", SCRIPT_CLASS_SCHEME, resource_name(&class)));
        }

        let from_library = self
            .libraries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|l| l.classes.contains_key(&class))
            .map(|l| format!("archive:{}!/{}", l.path.display(), resource_name(&class)));
        if from_library.is_some() {
            return from_library;
        }

        self.parent.as_ref().and_then(|p| p.get_resource(resource))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_library(dir: &TempDir, file: &str, classes: &[&str]) -> PathBuf {
        let mut content = String::new();
        for class in classes {
            content.push_str(&format!("[[class]]\nname = \"{}\"\n\n", class));
        }
        let path = dir.path().join(file);
        fs::write(&path, content).unwrap();
        path
    }

    fn loader(parent: Option<Arc<ScriptClassLoader>>) -> ScriptClassLoader {
        ScriptClassLoader::with_instrumentation(
            LoaderKind::Script,
            parent,
            Arc::new(Instrumentation::with_callback_enhancers()),
        )
    }

    fn compiled(loader: &ScriptClassLoader, name: &str) {
        let bytes = ClassFile {
            name: name.to_string(),
            ..Default::default()
        }
        .to_bytes()
        .unwrap();
        loader.add_compiled_class(name.to_string(), bytes, Arc::new(NativeSymbols::new()));
    }

    #[test]
    fn test_add_library_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = write_library(&dir, "lib.toml", &["lib.Util"]);

        let loader = loader(None);
        assert!(loader.add_library(&path).unwrap());
        assert!(!loader.add_library(&path).unwrap());
        assert!(!loader.add_library(&dir.path().join(".").join("lib.toml")).unwrap());
        assert_eq!(loader.libraries().len(), 1);
        assert_eq!(loader.library_class_names(), vec!["lib.Util"]);
    }

    #[test]
    fn test_compiled_and_library_classes_load_alike() {
        let dir = TempDir::new().unwrap();
        let path = write_library(&dir, "lib.toml", &["lib.Util"]);

        let loader = loader(None);
        loader.add_library(&path).unwrap();
        compiled(&loader, "quest.Q1");

        let util = loader.load_class("lib.Util").unwrap();
        let quest = loader.load_class("quest.Q1").unwrap();
        assert_eq!(util.name(), "lib.Util");
        assert_eq!(quest.name(), "quest.Q1");

        // Defined once.
        assert!(Arc::ptr_eq(&quest, &loader.load_class("quest.Q1").unwrap()));
    }

    #[test]
    fn test_parent_delegation_and_not_found() {
        let parent = Arc::new(loader(None));
        compiled(&parent, "base.Npc");

        let child = loader(Some(parent.clone()));
        compiled(&child, "quest.Q2");

        let npc = child.load_class("base.Npc").unwrap();
        assert!(Arc::ptr_eq(&npc, &parent.load_class("base.Npc").unwrap()));
        assert!(child.find_loaded_class("base.Npc").is_none());
        assert!(matches!(
            child.load_class("missing.Class"),
            Err(Error::ClassNotFound(_))
        ));
    }

    #[test]
    fn test_nearest_script_crate_walks_ancestors() {
        let base = ScriptCrate {
            name: "al_scripts_base".to_string(),
            rlib: PathBuf::from("/build/base/libal_scripts_base.rlib"),
            search_dirs: vec![PathBuf::from("/build/base")],
        };
        let root = Arc::new(loader(None));
        root.set_script_crate(base.clone());
        // A context without Rust scripts in between.
        let middle = Arc::new(loader(Some(root.clone())));
        let leaf = loader(Some(middle.clone()));

        assert_eq!(middle.script_crate(), None);
        assert_eq!(leaf.nearest_script_crate(), Some(base.clone()));
        assert_eq!(loader(None).nearest_script_crate(), None);

        root.set_script_crate(ScriptCrate {
            name: "other".to_string(),
            ..base.clone()
        });
        assert_eq!(root.script_crate(), Some(&base));
    }

    #[test]
    fn test_get_resource() {
        let dir = TempDir::new().unwrap();
        let path = write_library(&dir, "lib.toml", &["lib.Util"]);

        let parent = Arc::new(loader(None));
        compiled(&parent, "base.Npc");
        let loader = loader(Some(parent));
        loader.add_library(&path).unwrap();
        compiled(&loader, "quest.Q3");

        assert_eq!(
            loader.get_resource("quest/Q3.class").as_deref(),
            Some("script-class:quest/Q3.class")
        );
        let url = loader.get_resource("lib/Util.class").unwrap();
        assert!(url.starts_with("archive:"));
        assert!(url.ends_with("lib.toml!/lib/Util.class"));
        assert_eq!(
            loader.get_resource("base/Npc.class").as_deref(),
            Some("script-class:base/Npc.class")
        );
        assert!(loader.get_resource("nothing/Here.class").is_none());
    }

    #[test]
    fn test_mismatched_class_name_is_rejected() {
        let loader = loader(None);
        let bytes = ClassFile {
            name: "other.Name".to_string(),
            ..Default::default()
        }
        .to_bytes()
        .unwrap();
        loader.add_compiled_class("quest.Q4".to_string(), bytes, Arc::new(NativeSymbols::new()));
        assert!(matches!(
            loader.load_class("quest.Q4"),
            Err(Error::ClassFormat { .. })
        ));
    }
}
