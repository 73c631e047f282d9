//! Script contexts: a source root compiled into one class loader, with child
//! contexts whose loaders delegate to it.
//!
//! A context is either initialized (it holds a [`CompilationResult`]) or shut
//! down. `init`, `shutdown`, `reload` and `add_child_script_context` are
//! serialized per context by its lifecycle lock.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, RwLock, Weak};

use crate::error::Result;

use super::class_loader::ScriptClassLoader;
use super::compiler::{CompilationResult, CompilerRegistry, DEFAULT_COMPILER};
use super::listener::{ClassListener, default_class_listener};

pub struct ScriptContext {
    root: PathBuf,
    parent: Option<Weak<ScriptContext>>,
    registry: Arc<CompilerRegistry>,
    lifecycle: Mutex<()>,
    compilation: RwLock<Option<CompilationResult>>,
    children: RwLock<Vec<Arc<ScriptContext>>>,
    listener: RwLock<Option<Arc<dyn ClassListener>>>,
    /// Lazily created listener of root contexts without their own.
    default_listener: OnceLock<Arc<dyn ClassListener>>,
    libraries: RwLock<Vec<PathBuf>>,
    compiler_name: RwLock<String>,
}

impl ScriptContext {
    /// A root context compiling with the global compiler registry.
    pub fn new(root: impl Into<PathBuf>) -> Arc<Self> {
        Self::with_registry(root, CompilerRegistry::global())
    }

    pub fn with_registry(root: impl Into<PathBuf>, registry: Arc<CompilerRegistry>) -> Arc<Self> {
        Arc::new(Self::build(root.into(), None, registry))
    }

    /// A context whose classes see `parent`'s classes. It still has to be
    /// added with [`add_child_script_context`](Self::add_child_script_context).
    pub fn with_parent(root: impl Into<PathBuf>, parent: &Arc<ScriptContext>) -> Arc<Self> {
        Arc::new(Self::build(
            root.into(),
            Some(Arc::downgrade(parent)),
            parent.registry.clone(),
        ))
    }

    fn build(root: PathBuf, parent: Option<Weak<ScriptContext>>, registry: Arc<CompilerRegistry>) -> Self {
        Self {
            root,
            parent,
            registry,
            lifecycle: Mutex::new(()),
            compilation: RwLock::new(None),
            children: RwLock::default(),
            listener: RwLock::new(None),
            default_listener: OnceLock::new(),
            libraries: RwLock::default(),
            compiler_name: RwLock::new(DEFAULT_COMPILER.to_string()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn parent(&self) -> Option<Arc<ScriptContext>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn children(&self) -> Vec<Arc<ScriptContext>> {
        self.children
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.compilation
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub fn compilation_result(&self) -> Option<CompilationResult> {
        self.compilation
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Loader of the current compilation.
    pub fn class_loader(&self) -> Option<Arc<ScriptClassLoader>> {
        self.compilation
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|c| c.loader().clone())
    }

    pub fn libraries(&self) -> Vec<PathBuf> {
        self.libraries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Library archives for the next compilation.
    pub fn set_libraries(&self, libraries: Vec<PathBuf>) {
        *self.libraries.write().unwrap_or_else(|e| e.into_inner()) = libraries;
    }

    pub fn compiler_name(&self) -> String {
        self.compiler_name
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Compiler for the next compilation.
    pub fn set_compiler_name(&self, name: impl Into<String>) {
        *self.compiler_name.write().unwrap_or_else(|e| e.into_inner()) = name.into();
    }

    pub fn set_class_listener(&self, listener: Arc<dyn ClassListener>) {
        *self.listener.write().unwrap_or_else(|e| e.into_inner()) = Some(listener);
    }

    /// Own listener, else the parent's, else (for roots) the default one.
    pub fn class_listener(&self) -> Arc<dyn ClassListener> {
        if let Some(listener) = self
            .listener
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            return listener.clone();
        }
        if let Some(parent) = self.parent() {
            return parent.class_listener();
        }
        self.default_listener
            .get_or_init(default_class_listener)
            .clone()
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Compile the root, notify the listener, then initialize the children in
    /// insertion order. Warns and does nothing if already initialized.
    pub fn init(&self) -> Result<()> {
        let _guard = self.lock();
        self.init_locked()
    }

    fn init_locked(&self) -> Result<()> {
        if self.is_initialized() {
            tracing::warn!("Script context {} is already initialized", self.root.display());
            return Ok(());
        }

        let mut compiler = self.registry.create(&self.compiler_name())?;
        if let Some(parent) = self.parent()
            && let Some(loader) = parent.class_loader()
        {
            compiler.set_parent_class_loader(loader);
        }
        compiler.set_libraries(&self.libraries());

        let files = discover_sources(&self.root, compiler.supported_source_extensions())?;
        let result = compiler.compile_files(&files)?;
        tracing::info!(
            "Loaded {} classes from {}",
            result.classes().len(),
            self.root.display()
        );

        *self.compilation.write().unwrap_or_else(|e| e.into_inner()) = Some(result.clone());
        self.class_listener().post_load(result.classes());

        for child in self.children() {
            child.init()?;
        }
        Ok(())
    }

    /// Shut the children down in reverse order, notify the listener and drop
    /// the compiled classes. Logs an error and does nothing if not
    /// initialized.
    pub fn shutdown(&self) {
        let _guard = self.lock();
        self.shutdown_locked();
    }

    fn shutdown_locked(&self) {
        let Some(result) = self.compilation_result() else {
            tracing::error!(
                "Shutdown of not initialized script context {}",
                self.root.display()
            );
            return;
        };

        for child in self.children().iter().rev() {
            child.shutdown();
        }

        self.class_listener().pre_unload(result.classes());
        *self.compilation.write().unwrap_or_else(|e| e.into_inner()) = None;
        tracing::info!("Unloaded script context {}", self.root.display());
    }

    /// Shutdown followed by init, without other lifecycle calls in between.
    pub fn reload(&self) -> Result<()> {
        let _guard = self.lock();
        self.shutdown_locked();
        self.init_locked()
    }

    /// Add a child context. A child with an already present root is logged
    /// and dropped. If this context is initialized the child is initialized
    /// right away.
    pub fn add_child_script_context(&self, child: Arc<ScriptContext>) -> Result<()> {
        let _guard = self.lock();

        {
            let mut children = self.children.write().unwrap_or_else(|e| e.into_inner());
            if children.iter().any(|c| c.root == child.root) {
                tracing::error!(
                    "Double child script context {} of {}",
                    child.root.display(),
                    self.root.display()
                );
                return Ok(());
            }
            children.push(child.clone());
        }

        if self.is_initialized() {
            child.init()?;
        }
        Ok(())
    }

    /// Innermost context of this tree whose root contains `path`. Child roots
    /// need not lie under their parent's root.
    pub fn find_containing(self: &Arc<Self>, path: &Path) -> Option<Arc<ScriptContext>> {
        self.children()
            .iter()
            .find_map(|child| child.find_containing(path))
            .or_else(|| path.starts_with(&self.root).then(|| self.clone()))
    }
}

impl PartialEq for ScriptContext {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
            && match (self.parent(), other.parent()) {
                (None, None) => true,
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
    }
}

impl Eq for ScriptContext {}

impl fmt::Debug for ScriptContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptContext")
            .field("root", &self.root)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

/// Source files under `root` with one of `extensions`, recursively, sorted.
pub fn discover_sources(root: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    collect_sources(root, extensions, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_sources(dir: &Path, extensions: &[&str], files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_sources(&path, extensions, files)?;
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| extensions.contains(&e))
        {
            files.push(path);
        }
    }
    Ok(())
}
