//! Load-time class transformation.
//!
//! Every class definition passes through the process-wide [`Instrumentation`]
//! before it is defined. The default instance carries the global and object
//! callback enhancers.

mod enhancers;
mod transformer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, RwLock};

pub use enhancers::{GlobalCallbackEnhancer, ObjectCallbackEnhancer};
pub use transformer::{CallbackClassFileTransformer, ClassTransform};

use crate::error::{Error, Result};

/// Kind of class loader defining a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoaderKind {
    /// Classes of the runtime itself.
    Bootstrap,
    /// Classes synthesized for reflective access.
    Reflection,
    /// Classes shipped with the server binary.
    Application,
    /// Classes defined by a script context.
    Script,
}

impl LoaderKind {
    /// Loaders whose classes are never transformed.
    pub fn is_system(self) -> bool {
        matches!(self, LoaderKind::Bootstrap | LoaderKind::Reflection)
    }
}

/// Rewrites class bytes before definition.
pub trait ClassFileTransformer: Send + Sync {
    /// Return the new bytes, or `None` to leave the class unchanged.
    fn transform(&self, loader: LoaderKind, class_name: &str, bytes: &[u8])
    -> Result<Option<Vec<u8>>>;
}

static GLOBAL: LazyLock<Arc<Instrumentation>> =
    LazyLock::new(|| Arc::new(Instrumentation::with_callback_enhancers()));

/// Ordered transformer chain applied to every class definition.
///
/// Transformers can only be added until the first class is defined.
#[derive(Default)]
pub struct Instrumentation {
    transformers: RwLock<Vec<Arc<dyn ClassFileTransformer>>>,
    sealed: AtomicBool,
}

impl Instrumentation {
    /// An empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// A chain with the global and object callback enhancers installed.
    pub fn with_callback_enhancers() -> Self {
        let instrumentation = Self::new();
        instrumentation
            .transformers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .extend([
                Arc::new(CallbackClassFileTransformer::new(GlobalCallbackEnhancer))
                    as Arc<dyn ClassFileTransformer>,
                Arc::new(CallbackClassFileTransformer::new(ObjectCallbackEnhancer)),
            ]);
        tracing::debug!("Installed callback enhancers");
        instrumentation
    }

    /// The instance used by script class loaders unless told otherwise.
    pub fn global() -> Arc<Instrumentation> {
        GLOBAL.clone()
    }

    /// Append a transformer. Fails once a class has been defined.
    pub fn add_transformer(&self, transformer: Arc<dyn ClassFileTransformer>) -> Result<()> {
        if self.is_sealed() {
            return Err(Error::InstrumentationSealed);
        }
        self.transformers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(transformer);
        Ok(())
    }

    /// Whether a class has been defined through this chain.
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Run the chain over class bytes. Each transformer sees the output of
    /// the previous one.
    pub fn transform(&self, loader: LoaderKind, class_name: &str, bytes: Vec<u8>) -> Result<Vec<u8>> {
        self.sealed.store(true, Ordering::Release);

        let transformers = self
            .transformers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let mut bytes = bytes;
        for transformer in transformers {
            if let Some(rewritten) = transformer.transform(loader, class_name, &bytes)? {
                bytes = rewritten;
            }
        }
        Ok(bytes)
    }
}
