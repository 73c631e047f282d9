//! Error types for al-commons.

use thiserror::Error;

use crate::config::TransformationError;
use crate::dao::DaoError;
use crate::scheduling::CronError;

/// Result type for al-commons operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in al-commons.
#[derive(Debug, Error)]
pub enum Error {
    /// Script compilation failed.
    #[error("compilation failed{}: {message}", class.as_ref().map(|c| format!(" for {}", c)).unwrap_or_default())]
    Compilation {
        class: Option<String>,
        message: String,
    },

    /// Caller violated an input contract (e.g. mismatched name/source arrays).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No loader in the delegation chain knows the class.
    #[error("class not found: {0}")]
    ClassNotFound(String),

    /// Class bytes could not be decoded into a class definition.
    #[error("malformed class {class}: {message}")]
    ClassFormat { class: String, message: String },

    /// A class file transformer failed on a script class.
    #[error("can't transform class {class}: {message}")]
    ClassTransform { class: String, message: String },

    /// Transformers must be installed before the first class is defined.
    #[error("instrumentation is sealed: classes were already defined")]
    InstrumentationSealed,

    /// Descriptor named a compiler that was never registered.
    #[error("unknown script compiler: {0}")]
    UnknownCompiler(String),

    /// A class references a symbol its symbol table cannot resolve.
    #[error("symbol {symbol} not found for class {class}")]
    SymbolNotFound { class: String, symbol: String },

    /// A compiled script function rejected its arguments, panicked or
    /// returned something unreadable.
    #[error("script call failed: {0}")]
    ScriptCall(String),

    /// Method lookup failed.
    #[error("method {method} not found in class {class}")]
    MethodNotFound { class: String, method: String },

    /// Attempt to invoke a method that has no body.
    #[error("method {class}.{method} is abstract")]
    AbstractMethod { class: String, method: String },

    /// Script descriptor could not be read or parsed.
    #[error("script descriptor error: {0}")]
    Descriptor(String),

    /// Failed to load a dynamic library.
    #[error("failed to load library: {0}")]
    LibraryLoad(#[from] libloading::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Toolchain error.
    #[error("toolchain error: {0}")]
    Toolchain(String),

    /// Configuration file error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Cron service error.
    #[error(transparent)]
    Cron(#[from] CronError),

    /// DAO registry error.
    #[error(transparent)]
    Dao(#[from] DaoError),

    /// Configuration value could not be bound to its typed field.
    #[error(transparent)]
    Transformation(#[from] TransformationError),

    /// A lock was poisoned by a panicking thread.
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}

impl Error {
    /// Shorthand for a compilation error not tied to a single class.
    pub fn compilation(message: impl Into<String>) -> Self {
        Error::Compilation {
            class: None,
            message: message.into(),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Error::LockPoisoned(e.to_string())
    }
}
