//! Core services for the Aion Lightning server.
//!
//! This crate provides:
//! - Callback primitives with a two-axis blocking policy
//! - Callback instrumentation (load-time class transformers and source-level macros)
//! - Script compilation, isolated class loading and hot-reloadable script contexts
//! - Cron scheduling and priority-aware thread pools
//! - DAO registry and configuration binding

extern crate self as al_commons;

pub mod callbacks;
pub mod config;
pub mod dao;
pub mod error;
pub mod instrument;
pub mod scheduling;
pub mod scripting;

pub use callbacks::{
    Callback, CallbackResult, EnhancedObject, GlobalCallbackHelper, Listener, ListenerClass,
    ObjectCallbackHelper, Receiver, global_callback, object_callback,
};
pub use config::{CommonsConfig, TransformationError};
pub use dao::{DaoError, DaoManager};
pub use error::{Error, Result};
pub use instrument::Instrumentation;
pub use scheduling::{
    CancellationToken, CronError, CronService, GameProcessor, Runnable, ScheduledFuture, Task,
    ThreadPriority,
};
pub use scripting::{
    ClassListener, CompilationResult, CompilerRegistry, ScriptClass, ScriptClassLoader,
    ScriptCompiler, ScriptContext, ScriptManager,
};
