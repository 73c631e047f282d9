use crate::error::{Error, Result};
use crate::scripting::class::ClassFile;

use super::{ClassFileTransformer, LoaderKind};

/// Rewrites a decoded class file in place. Returns whether anything changed.
pub trait ClassTransform: Send + Sync {
    fn transform_class(&self, loader: LoaderKind, class: &mut ClassFile) -> Result<bool>;
}

/// Adapts a [`ClassTransform`] to raw class bytes.
///
/// Classes of system loaders pass through untouched. A failed transform of an
/// application class leaves the process in an unusable state and aborts it;
/// for script classes the failure is returned to the defining loader.
pub struct CallbackClassFileTransformer<T> {
    inner: T,
}

impl<T: ClassTransform> CallbackClassFileTransformer<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    fn rewrite(&self, loader: LoaderKind, class_name: &str, bytes: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut class = ClassFile::from_bytes(class_name, bytes)?;
        if self.inner.transform_class(loader, &mut class)? {
            Ok(Some(class.to_bytes()?))
        } else {
            Ok(None)
        }
    }
}

impl<T: ClassTransform> ClassFileTransformer for CallbackClassFileTransformer<T> {
    fn transform(
        &self,
        loader: LoaderKind,
        class_name: &str,
        bytes: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        if loader.is_system() {
            return Ok(None);
        }

        match self.rewrite(loader, class_name, bytes) {
            Ok(rewritten) => Ok(rewritten),
            Err(e) if loader == LoaderKind::Application => {
                tracing::error!("Can't transform class {}: {}", class_name, e);
                tracing::error!("Core classes can't be enhanced, terminating");
                std::process::abort();
            }
            Err(e) => Err(Error::ClassTransform {
                class: class_name.to_string(),
                message: e.to_string(),
            }),
        }
    }
}
