//! Class definitions and their executable symbols.
//!
//! A [`ClassFile`] is the declarative description of a script class. Its JSON
//! encoding is what class loaders hand to the instrumentation chain, so
//! transformers rewrite the same bytes that are later defined. The code behind
//! hooks and methods lives in a [`SymbolTable`].

use std::any::Any;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, LazyLock, RwLock};

use libloading::Library;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::callbacks::enhancer::{self, Dispatch};
use crate::callbacks::{CallbackResult, EnhancedObject, ListenerClass, Receiver};
use crate::error::{Error, Result};
use crate::scheduling::Runnable;

use super::abi;

/// Serializable description of a script class.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassFile {
    /// Fully qualified dotted name.
    #[serde(default)]
    pub name: String,
    /// Hooks run after the class is loaded.
    #[serde(default)]
    pub on_load: Vec<String>,
    /// Hooks run before the class is unloaded.
    #[serde(default)]
    pub on_unload: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled: Option<Scheduled>,
    /// Body of the runnable, required for scheduled classes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,
    #[serde(default, rename = "method")]
    pub methods: Vec<MethodInfo>,
    /// Listener fields synthesized by the callback enhancers.
    #[serde(default, rename = "field")]
    pub fields: Vec<FieldInfo>,
}

/// Cron schedule of a runnable script class.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scheduled {
    /// Cron expressions, Quartz field order.
    pub value: Vec<String>,
    #[serde(default)]
    pub disabled: bool,
    /// Create one runnable per expression instead of sharing one.
    #[serde(default)]
    pub instance_per_cron_expression: bool,
    #[serde(default)]
    pub long_running_task: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodInfo {
    pub name: String,
    /// Symbol of the body; `None` for abstract methods.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, rename = "static")]
    pub is_static: bool,
    #[serde(default)]
    pub native: bool,
    #[serde(default)]
    pub returns: ReturnType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<CallbackAnnotation>,
    /// Set by the callback enhancers.
    #[serde(default)]
    pub enhanced: bool,
}

/// Declared return type of a script method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnType {
    #[default]
    Unit,
    Bool,
    Char,
    Int,
    Long,
    Float,
    Double,
    Object,
}

impl ReturnType {
    /// Value returned when a before-callback blocked the caller.
    ///
    /// `Object` methods return the replacement value, or unit when there is
    /// none.
    pub fn blocked(self, result: CallbackResult) -> Box<dyn Any> {
        match self {
            ReturnType::Unit => Box::new(()),
            ReturnType::Bool => Box::new(false),
            ReturnType::Char => Box::new('a'),
            ReturnType::Int => Box::new(0i32),
            ReturnType::Long => Box::new(0i64),
            ReturnType::Float => Box::new(0f32),
            ReturnType::Double => Box::new(0f64),
            ReturnType::Object => result.into_result().unwrap_or_else(|| Box::new(())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackAnnotation {
    /// Fully qualified listener name.
    pub listener: String,
    #[serde(default)]
    pub scope: CallbackScope,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallbackScope {
    #[default]
    Global,
    Object,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    pub listener: String,
    #[serde(default, rename = "static")]
    pub is_static: bool,
}

impl ClassFile {
    /// Decode class bytes.
    pub fn from_bytes(class: &str, bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::ClassFormat {
            class: class.to_string(),
            message: e.to_string(),
        })
    }

    /// Encode into class bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::ClassFormat {
            class: self.name.clone(),
            message: e.to_string(),
        })
    }

    pub fn method(&self, name: &str) -> Option<&MethodInfo> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }
}

/// `a.b.C` → `a/b/C.class`.
pub fn resource_name(class: &str) -> String {
    format!("{}.class", class.replace('.', "/"))
}

/// `a/b/C.class` → `a.b.C`.
pub fn class_name_of_resource(resource: &str) -> Option<String> {
    resource
        .strip_suffix(".class")
        .map(|stem| stem.trim_start_matches('/').replace('/', "."))
}

/// Callable body of a script method: `(receiver, args) -> return value`.
pub type MethodHandle = Arc<dyn Fn(Option<&dyn Any>, &[&dyn Any]) -> Box<dyn Any> + Send + Sync>;

/// Zero-argument hook or runnable body.
pub type HookFn = Arc<dyn Fn() + Send + Sync>;

/// Resolves the symbols referenced by class files.
pub trait SymbolTable: Send + Sync {
    fn hook(&self, symbol: &str) -> Option<HookFn>;

    fn method(&self, symbol: &str) -> Option<MethodHandle>;
}

static NATIVE: LazyLock<Arc<NativeSymbols>> = LazyLock::new(|| Arc::new(NativeSymbols::new()));

/// In-process symbols: content compiled into the server binary.
#[derive(Default)]
pub struct NativeSymbols {
    hooks: RwLock<FxHashMap<String, HookFn>>,
    methods: RwLock<FxHashMap<String, MethodHandle>>,
}

impl NativeSymbols {
    pub fn new() -> Self {
        Self::default()
    }

    /// Symbols used by the `native` compiler of the default registry.
    pub fn global() -> Arc<NativeSymbols> {
        NATIVE.clone()
    }

    pub fn register_hook<F>(&self, symbol: impl Into<String>, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hooks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(symbol.into(), Arc::new(hook));
    }

    pub fn register_method<F>(&self, symbol: impl Into<String>, method: F)
    where
        F: Fn(Option<&dyn Any>, &[&dyn Any]) -> Box<dyn Any> + Send + Sync + 'static,
    {
        self.methods
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(symbol.into(), Arc::new(method));
    }
}

impl SymbolTable for NativeSymbols {
    fn hook(&self, symbol: &str) -> Option<HookFn> {
        self.hooks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(symbol)
            .cloned()
    }

    fn method(&self, symbol: &str) -> Option<MethodHandle> {
        self.methods
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(symbol)
            .cloned()
    }
}

type EntryFn = unsafe extern "C" fn();

/// Symbols exported by a loaded dynamic library.
///
/// Hooks are zero-argument `extern "C"` functions; methods follow the
/// marshalling convention of [`abi`](super::abi). Handles keep the library
/// mapped for as long as they are alive.
pub struct DylibSymbols {
    library: Arc<Library>,
}

impl DylibSymbols {
    pub fn open(path: &Path) -> Result<Self> {
        // Safety: the library initializers are generated by the script
        // compiler or shipped with a library archive.
        let library = unsafe { Library::new(path) }?;
        tracing::debug!("Loaded script library {}", path.display());
        Ok(Self {
            library: Arc::new(library),
        })
    }

    fn get<T: Copy>(&self, symbol: &str) -> Option<T> {
        // Safety: callers ask for the signature the symbol was generated with.
        unsafe { self.library.get::<T>(symbol.as_bytes()) }
            .ok()
            .map(|sym| *sym)
    }
}

impl SymbolTable for DylibSymbols {
    fn hook(&self, symbol: &str) -> Option<HookFn> {
        let entry: EntryFn = self.get(symbol)?;
        let library = self.library.clone();
        Some(Arc::new(move || {
            let _mapped = &library;
            // Safety: `library` is kept alive by this closure.
            unsafe { entry() }
        }))
    }

    fn method(&self, symbol: &str) -> Option<MethodHandle> {
        let entry: abi::MethodEntry = self.get(symbol)?;
        let library = self.library.clone();
        let symbol = symbol.to_string();
        Some(Arc::new(move |_receiver: Option<&dyn Any>, args: &[&dyn Any]| {
            let _mapped = &library;
            // Safety: `library` is kept alive by this closure.
            match unsafe { abi::call(entry, args) } {
                Ok(ret) => ret,
                Err(e) => {
                    tracing::error!("Call of {} failed: {}", symbol, e);
                    Box::new(()) as Box<dyn Any>
                }
            }
        }))
    }
}

/// A defined class: its (transformed) class file bound to its symbols.
pub struct ScriptClass {
    file: ClassFile,
    symbols: Arc<dyn SymbolTable>,
    /// Listener of each enhanced method, resolved at definition.
    listeners: FxHashMap<String, ListenerClass>,
}

impl ScriptClass {
    pub(crate) fn new(file: ClassFile, symbols: Arc<dyn SymbolTable>) -> Self {
        let listeners = file
            .methods
            .iter()
            .filter(|m| m.enhanced)
            .filter_map(|m| {
                let annotation = m.callback.as_ref()?;
                let listener = enhancer::resolve_listener_field(
                    &file.name,
                    ListenerClass::named(annotation.listener.clone()),
                    m.is_static,
                );
                Some((m.name.clone(), listener))
            })
            .collect();

        Self {
            file,
            symbols,
            listeners,
        }
    }

    pub fn name(&self) -> &str {
        &self.file.name
    }

    pub fn class_file(&self) -> &ClassFile {
        &self.file
    }

    pub fn scheduled(&self) -> Option<&Scheduled> {
        self.file.scheduled.as_ref()
    }

    pub fn method(&self, name: &str) -> Option<&MethodInfo> {
        self.file.method(name)
    }

    /// Run the class's load hooks in declaration order.
    pub fn run_on_load(&self) -> Result<()> {
        self.run_hooks(&self.file.on_load)
    }

    /// Run the class's unload hooks in declaration order.
    pub fn run_on_unload(&self) -> Result<()> {
        self.run_hooks(&self.file.on_unload)
    }

    fn run_hooks(&self, symbols: &[String]) -> Result<()> {
        for symbol in symbols {
            let hook = self.resolve_hook(symbol)?;
            hook();
        }
        Ok(())
    }

    fn resolve_hook(&self, symbol: &str) -> Result<HookFn> {
        self.symbols
            .hook(symbol)
            .ok_or_else(|| Error::SymbolNotFound {
                class: self.file.name.clone(),
                symbol: symbol.to_string(),
            })
    }

    /// Create a fresh runnable instance of this class.
    pub fn new_runnable(self: &Arc<Self>) -> Result<Arc<dyn Runnable>> {
        let symbol = self.file.run.as_deref().ok_or_else(|| Error::MethodNotFound {
            class: self.file.name.clone(),
            method: "run".to_string(),
        })?;
        let body = self.resolve_hook(symbol)?;
        Ok(Arc::new(ScriptRunnable {
            class: self.clone(),
            body,
        }))
    }

    /// Invoke a static method, or an instance method on a plain receiver.
    ///
    /// Enhanced methods dispatch their global callbacks around the body.
    pub fn invoke(
        &self,
        method: &str,
        receiver: Option<&dyn Any>,
        args: &[&dyn Any],
    ) -> Result<Box<dyn Any>> {
        let (info, handle) = self.resolve_method(method)?;
        let Some(listener) = self.listeners.get(method) else {
            return Ok(handle(receiver, args));
        };

        if info.callback.as_ref().map(|c| c.scope) == Some(CallbackScope::Object) {
            return Err(Error::InvalidInput(format!(
                "{}.{} dispatches object callbacks and needs an enhanced receiver",
                self.file.name, method
            )));
        }

        let dispatch = match receiver {
            Some(object) => Dispatch::global(Receiver::Object(object)),
            None => Dispatch::global(Receiver::Class(&self.file.name)),
        };
        Ok(Self::dispatch(dispatch, listener, info.returns, args, || {
            handle(receiver, args)
        }))
    }

    /// Invoke an instance method on an enhanced receiver.
    ///
    /// Object-scoped enhanced methods dispatch the receiver's own callbacks,
    /// global-scoped ones the global callbacks.
    pub fn invoke_on(
        &self,
        method: &str,
        object: &dyn EnhancedObject,
        args: &[&dyn Any],
    ) -> Result<Box<dyn Any>> {
        let (info, handle) = self.resolve_method(method)?;
        let receiver: &dyn Any = object;
        let Some(listener) = self.listeners.get(method) else {
            return Ok(handle(Some(receiver), args));
        };

        let dispatch = match info.callback.as_ref().map(|c| c.scope) {
            Some(CallbackScope::Object) => Dispatch::object(object),
            _ => Dispatch::global(Receiver::Object(receiver)),
        };
        Ok(Self::dispatch(dispatch, listener, info.returns, args, || {
            handle(Some(receiver), args)
        }))
    }

    fn resolve_method(&self, method: &str) -> Result<(&MethodInfo, MethodHandle)> {
        let info = self.file.method(method).ok_or_else(|| Error::MethodNotFound {
            class: self.file.name.clone(),
            method: method.to_string(),
        })?;
        let symbol = info.symbol.as_deref().ok_or_else(|| Error::AbstractMethod {
            class: self.file.name.clone(),
            method: method.to_string(),
        })?;
        let handle = self
            .symbols
            .method(symbol)
            .ok_or_else(|| Error::SymbolNotFound {
                class: self.file.name.clone(),
                symbol: symbol.to_string(),
            })?;
        Ok((info, handle))
    }

    fn dispatch(
        dispatch: Dispatch<'_>,
        listener: &ListenerClass,
        returns: ReturnType,
        args: &[&dyn Any],
        body: impl FnOnce() -> Box<dyn Any>,
    ) -> Box<dyn Any> {
        let before = dispatch.before(listener, args);
        if before.is_blocking_caller() {
            return returns.blocked(before);
        }
        let ret = body();
        dispatch.complete_dynamic(listener, args, before, ret)
    }
}

impl fmt::Debug for ScriptClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptClass")
            .field("name", &self.file.name)
            .finish_non_exhaustive()
    }
}

/// Runnable instance of a script class, named after it.
struct ScriptRunnable {
    class: Arc<ScriptClass>,
    body: HookFn,
}

impl Runnable for ScriptRunnable {
    fn run(&self) {
        (self.body)()
    }

    fn name(&self) -> &str {
        self.class.name()
    }
}
