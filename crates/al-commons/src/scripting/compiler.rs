//! Script compiler contract and compiler registry.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, RwLock};

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::instrument::LoaderKind;

use super::class::{NativeSymbols, ScriptClass, SymbolTable};
use super::class_loader::ScriptClassLoader;
use super::native::NativeScriptCompiler;
use super::rustc::RustcCompiler;

/// Compiler used when a script descriptor names none.
pub const DEFAULT_COMPILER: &str = "rustc";

/// Classes of one compilation and the loader that defined them.
#[derive(Clone)]
pub struct CompilationResult {
    classes: Vec<Arc<ScriptClass>>,
    loader: Arc<ScriptClassLoader>,
}

impl CompilationResult {
    pub fn new(classes: Vec<Arc<ScriptClass>>, loader: Arc<ScriptClassLoader>) -> Self {
        Self { classes, loader }
    }

    /// Compiled classes first, then library classes.
    pub fn classes(&self) -> &[Arc<ScriptClass>] {
        &self.classes
    }

    pub fn loader(&self) -> &Arc<ScriptClassLoader> {
        &self.loader
    }

    pub fn class(&self, name: &str) -> Option<&Arc<ScriptClass>> {
        self.classes.iter().find(|c| c.name() == name)
    }
}

impl std::fmt::Debug for CompilationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilationResult")
            .field("classes", &self.classes)
            .finish_non_exhaustive()
    }
}

/// Turns script sources into defined classes.
pub trait ScriptCompiler: Send {
    /// Loader that classes of this compilation delegate to.
    fn set_parent_class_loader(&mut self, parent: Arc<ScriptClassLoader>);

    /// Library archives attached to the compilation's loader.
    fn set_libraries(&mut self, libraries: &[PathBuf]);

    /// Compile a single class from source.
    fn compile_class(&mut self, name: &str, source: &str) -> Result<CompilationResult> {
        self.compile_sources(&[name], &[source])
    }

    /// Compile classes from parallel name/source arrays.
    fn compile_sources(&mut self, names: &[&str], sources: &[&str]) -> Result<CompilationResult>;

    /// Compile source files.
    fn compile_files(&mut self, files: &[PathBuf]) -> Result<CompilationResult>;

    /// File extensions (without dot) this compiler accepts.
    fn supported_source_extensions(&self) -> &[&'static str];
}

/// Reject name/source arrays of different length.
pub(crate) fn check_parallel(names: &[&str], sources: &[&str]) -> Result<()> {
    if names.len() != sources.len() {
        return Err(Error::InvalidInput(format!(
            "{} class names for {} sources",
            names.len(),
            sources.len()
        )));
    }
    Ok(())
}

/// Class bytes produced by a compiler, ready to be defined.
pub(crate) struct CompiledClass {
    pub name: String,
    pub bytes: Vec<u8>,
    pub symbols: Arc<dyn SymbolTable>,
}

/// Create the loader of a compilation and define all of its classes.
pub(crate) fn link(
    kind: LoaderKind,
    parent: Option<Arc<ScriptClassLoader>>,
    libraries: &[PathBuf],
    compiled: Vec<CompiledClass>,
) -> Result<CompilationResult> {
    let loader = Arc::new(ScriptClassLoader::new(kind, parent));
    for library in libraries {
        loader.add_library(library)?;
    }

    let names: Vec<String> = compiled.iter().map(|c| c.name.clone()).collect();
    for class in compiled {
        loader.add_compiled_class(class.name, class.bytes, class.symbols);
    }

    let mut classes = Vec::new();
    for name in names.iter().chain(loader.library_class_names().iter()) {
        classes.push(loader.load_class(name)?);
    }
    Ok(CompilationResult::new(classes, loader))
}

/// Class name derived from a source file name.
pub(crate) fn class_name_of_file(file: &Path) -> Result<String> {
    file.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidInput(format!("bad source file name {}", file.display())))
}

/// Builds a fresh compiler.
pub type CompilerFactory = Arc<dyn Fn() -> Result<Box<dyn ScriptCompiler>> + Send + Sync>;

static GLOBAL: LazyLock<Arc<CompilerRegistry>> = LazyLock::new(|| Arc::new(CompilerRegistry::new()));

/// Compilers by name.
///
/// Every script context creates its compiler from here on each init.
pub struct CompilerRegistry {
    factories: RwLock<FxHashMap<String, CompilerFactory>>,
}

impl CompilerRegistry {
    /// Registry with the `rustc` and `native` compilers.
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.register(DEFAULT_COMPILER, || {
            Ok(Box::new(RustcCompiler::new()?) as Box<dyn ScriptCompiler>)
        });
        registry.register(NativeScriptCompiler::NAME, || {
            Ok(Box::new(NativeScriptCompiler::new(NativeSymbols::global())) as Box<dyn ScriptCompiler>)
        });
        registry
    }

    pub fn empty() -> Self {
        Self {
            factories: RwLock::default(),
        }
    }

    pub fn global() -> Arc<CompilerRegistry> {
        GLOBAL.clone()
    }

    /// Register or replace a compiler.
    pub fn register<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<Box<dyn ScriptCompiler>> + Send + Sync + 'static,
    {
        self.factories
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.into(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(name)
    }

    /// Instantiate the named compiler.
    pub fn create(&self, name: &str) -> Result<Box<dyn ScriptCompiler>> {
        let factory = self
            .factories
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownCompiler(name.to_string()))?;
        factory()
    }
}

impl Default for CompilerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
