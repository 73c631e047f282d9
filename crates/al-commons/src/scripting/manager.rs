//! Bulk management of script context trees.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::Result;

use super::compiler::CompilerRegistry;
use super::context::ScriptContext;
use super::descriptor::{ScriptInfo, ScriptList};
use super::listener::ClassListener;

/// Owns the root script contexts of the server.
pub struct ScriptManager {
    contexts: Mutex<Vec<Arc<ScriptContext>>>,
    global_listener: Mutex<Option<Arc<dyn ClassListener>>>,
    registry: Arc<CompilerRegistry>,
}

impl ScriptManager {
    pub fn new() -> Self {
        Self::with_registry(CompilerRegistry::global())
    }

    pub fn with_registry(registry: Arc<CompilerRegistry>) -> Self {
        Self {
            contexts: Mutex::default(),
            global_listener: Mutex::new(None),
            registry,
        }
    }

    /// Listener installed on root contexts created from now on.
    pub fn set_global_class_listener(&self, listener: Arc<dyn ClassListener>) {
        *self
            .global_listener
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(listener);
    }

    pub fn global_class_listener(&self) -> Option<Arc<dyn ClassListener>> {
        self.global_listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Create and initialize the context trees of a descriptor file.
    pub fn load(&self, descriptor: &Path) -> Result<()> {
        let list = ScriptList::load(descriptor)?;
        tracing::info!(
            "Loading {} script contexts from {}",
            list.script_infos.len(),
            descriptor.display()
        );
        for info in &list.script_infos {
            let context = self.create_context(info, None)?;
            if !self.register(context.clone()) {
                continue;
            }
            context.init()?;
        }
        Ok(())
    }

    /// Create and initialize a root context for a directory.
    pub fn load_directory(
        &self,
        directory: &Path,
        libraries: &[PathBuf],
        compiler: Option<&str>,
    ) -> Result<Option<Arc<ScriptContext>>> {
        let mut info = ScriptInfo::new(directory);
        info.libraries = libraries.to_vec();
        info.compiler = compiler.map(str::to_string);

        let context = self.create_context(&info, None)?;
        if !self.register(context.clone()) {
            return Ok(None);
        }
        context.init()?;
        Ok(Some(context))
    }

    /// Build a context (and its children) from a script info. Children are
    /// attached to `parent`; root contexts get the global listener.
    pub fn create_context(
        &self,
        info: &ScriptInfo,
        parent: Option<&Arc<ScriptContext>>,
    ) -> Result<Arc<ScriptContext>> {
        let context = match parent {
            Some(parent) => ScriptContext::with_parent(&info.root, parent),
            None => ScriptContext::with_registry(&info.root, self.registry.clone()),
        };
        context.set_libraries(info.libraries.clone());
        if let Some(compiler) = &info.compiler {
            context.set_compiler_name(compiler.clone());
        }

        match parent {
            Some(parent) => parent.add_child_script_context(context.clone())?,
            None => {
                if let Some(listener) = self.global_class_listener() {
                    context.set_class_listener(listener);
                }
            }
        }

        for child in &info.children {
            self.create_context(child, Some(&context))?;
        }
        Ok(context)
    }

    /// Add a root context unless an equal one is already registered.
    fn register(&self, context: Arc<ScriptContext>) -> bool {
        let mut contexts = self.contexts.lock().unwrap_or_else(|e| e.into_inner());
        if contexts.iter().any(|c| **c == *context) {
            tracing::warn!(
                "Double root for script context {}, skipping",
                context.root().display()
            );
            return false;
        }
        contexts.push(context);
        true
    }

    pub fn script_contexts(&self) -> Vec<Arc<ScriptContext>> {
        self.contexts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Shut down and forget all contexts.
    pub fn shutdown(&self) {
        let contexts = std::mem::take(&mut *self.contexts.lock().unwrap_or_else(|e| e.into_inner()));
        for context in contexts.iter().rev() {
            context.shutdown();
        }
    }

    /// Reload every root context.
    pub fn reload(&self) -> Result<()> {
        for context in self.script_contexts() {
            context.reload()?;
        }
        Ok(())
    }

    /// Reload the root context at `root`. Returns whether one was found.
    pub fn reload_root(&self, root: &Path) -> Result<bool> {
        let Some(context) = self
            .script_contexts()
            .into_iter()
            .find(|c| c.root() == root)
        else {
            return Ok(false);
        };
        context.reload()?;
        Ok(true)
    }

    /// Innermost context whose root contains `path`.
    pub fn context_containing(&self, path: &Path) -> Option<Arc<ScriptContext>> {
        self.script_contexts()
            .iter()
            .find_map(|root| root.find_containing(path))
    }

    /// Reload the innermost context whose root contains `path`.
    pub fn reload_containing(&self, path: &Path) -> Result<Option<Arc<ScriptContext>>> {
        let Some(context) = self.context_containing(path) else {
            return Ok(None);
        };
        tracing::info!("Reloading script context {}", context.root().display());
        context.reload()?;
        Ok(Some(context))
    }

    /// Reload the contexts containing any of the changed `paths`, each one
    /// once. A context whose ancestor is reloaded too is left to it. Failures
    /// are logged and don't stop the other reloads.
    ///
    /// Returns the contexts that reloaded successfully.
    pub fn reload_changed(&self, paths: &[PathBuf]) -> Vec<Arc<ScriptContext>> {
        let mut contexts: Vec<Arc<ScriptContext>> = Vec::new();
        for path in paths {
            let Some(context) = self.context_containing(path) else {
                tracing::debug!("Changed file {} is in no script context", path.display());
                continue;
            };
            if !contexts.iter().any(|c| Arc::ptr_eq(c, &context)) {
                contexts.push(context);
            }
        }

        let outermost: Vec<_> = contexts
            .iter()
            .filter(|context| {
                !contexts
                    .iter()
                    .any(|other| is_ancestor(other, context))
            })
            .cloned()
            .collect();

        let mut reloaded = Vec::with_capacity(outermost.len());
        for context in outermost {
            tracing::info!("Reloading script context {}", context.root().display());
            match context.reload() {
                Ok(()) => reloaded.push(context),
                Err(e) => tracing::error!("Reload of {} failed: {}", context.root().display(), e),
            }
        }
        reloaded
    }
}

fn is_ancestor(ancestor: &Arc<ScriptContext>, context: &ScriptContext) -> bool {
    let mut current = context.parent();
    while let Some(parent) = current {
        if Arc::ptr_eq(&parent, ancestor) {
            return true;
        }
        current = parent.parent();
    }
    false
}

impl Default for ScriptManager {
    fn default() -> Self {
        Self::new()
    }
}
