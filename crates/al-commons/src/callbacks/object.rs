//! Per-instance callbacks for object-scoped enhanced methods.

use std::any::Any;
use std::sync::{Arc, RwLock};

use rustc_hash::FxHashMap;

use super::callback::{Callback, ListenerClass, Receiver};
use super::chain::{self, CallbackChain};
use super::result::CallbackResult;

/// Callbacks registered on one object, keyed by listener type.
///
/// Dispatch works on a snapshot, so callbacks may change the registry of the
/// object they are dispatched for.
#[derive(Default)]
pub struct CallbackRegistry {
    callbacks: RwLock<FxHashMap<ListenerClass, CallbackChain>>,
}

impl CallbackRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no callback is registered at all.
    pub fn is_empty(&self) -> bool {
        self.callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }

    /// Number of callbacks registered for a listener.
    pub fn len(&self, listener: &ListenerClass) -> usize {
        self.callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(listener)
            .map_or(0, Vec::len)
    }
}

/// An object carrying its own callback registry.
///
/// ```
/// use al_commons::callbacks::{CallbackRegistry, EnhancedObject};
///
/// struct Player {
///     callbacks: CallbackRegistry,
/// }
///
/// impl EnhancedObject for Player {
///     fn callback_registry(&self) -> &CallbackRegistry {
///         &self.callbacks
///     }
/// }
/// ```
pub trait EnhancedObject: Any + Send + Sync {
    /// The object's callback registry.
    fn callback_registry(&self) -> &CallbackRegistry;
}

/// Add/remove/dispatch operations over [`EnhancedObject`] registries.
pub struct ObjectCallbackHelper;

impl ObjectCallbackHelper {
    /// Register a callback on an object.
    pub fn add_callback(callback: Arc<dyn Callback>, object: &dyn EnhancedObject) {
        let key = callback.base_class();
        let mut map = object
            .callback_registry()
            .callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner());
        chain::insert_sorted(map.entry(key).or_default(), callback);
    }

    /// Remove a callback from an object. Returns whether it was registered.
    pub fn remove_callback(callback: &Arc<dyn Callback>, object: &dyn EnhancedObject) -> bool {
        let key = callback.base_class();
        let mut map = object
            .callback_registry()
            .callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner());
        let Some(list) = map.get_mut(&key) else {
            return false;
        };
        let removed = chain::remove(list, callback);
        if list.is_empty() {
            map.remove(&key);
        }
        removed
    }

    /// Dispatch `before_call` to the object's callbacks for `listener`.
    pub fn before_call(
        object: &dyn EnhancedObject,
        listener: &ListenerClass,
        args: &[&dyn Any],
    ) -> CallbackResult {
        match snapshot(object, listener) {
            Some(list) => chain::dispatch_before(&list, Receiver::Object(object), args),
            None => CallbackResult::new_continue(),
        }
    }

    /// Dispatch `after_call` to the object's callbacks for `listener`.
    pub fn after_call(
        object: &dyn EnhancedObject,
        listener: &ListenerClass,
        args: &[&dyn Any],
        result: &dyn Any,
    ) -> CallbackResult {
        match snapshot(object, listener) {
            Some(list) => chain::dispatch_after(&list, Receiver::Object(object), args, result),
            None => CallbackResult::new_continue(),
        }
    }
}

fn snapshot(object: &dyn EnhancedObject, listener: &ListenerClass) -> Option<CallbackChain> {
    object
        .callback_registry()
        .callbacks
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .get(listener)
        .cloned()
}
