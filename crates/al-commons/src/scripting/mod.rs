//! Script compilation, class loading and hot-reloadable script contexts.
//!
//! # Architecture
//!
//! ```text
//! ScriptManager
//!   └── ScriptContext (root)          init / shutdown / reload
//!         ├── ScriptCompiler          from CompilerRegistry, per init
//!         ├── CompilationResult
//!         │     └── ScriptClassLoader compiled + library classes, parent delegation
//!         │           └── ScriptClass class file bound to a SymbolTable
//!         └── ScriptContext (child)   loader delegates to the parent's
//! ```

mod abi;
pub mod class;
mod class_loader;
mod compiler;
mod context;
mod descriptor;
pub mod listener;
mod manager;
mod native;
pub mod rustc;

pub use class::{
    ClassFile, DylibSymbols, MethodHandle, NativeSymbols, ScriptClass, SymbolTable,
};
pub use class_loader::{SCRIPT_CLASS_SCHEME, ScriptClassLoader, ScriptCrate};
pub use compiler::{
    CompilationResult, CompilerFactory, CompilerRegistry, DEFAULT_COMPILER, ScriptCompiler,
};
pub use context::{ScriptContext, discover_sources};
pub use descriptor::{ScriptInfo, ScriptList};
pub use listener::{
    AggregatedClassListener, ClassListener, OnClassLoadUnloadListener,
    ScheduledTaskClassListener,
};
pub use manager::ScriptManager;
pub use native::NativeScriptCompiler;
pub use rustc::{RustcCompiler, RustcConfig};
