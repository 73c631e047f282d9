//! Process-wide callbacks for static (class-scoped) enhanced methods.

use std::any::Any;
use std::sync::{Arc, LazyLock, RwLock};

use rustc_hash::FxHashMap;

use super::callback::{Callback, ListenerClass, Receiver};
use super::chain::{self, CallbackChain};
use super::result::CallbackResult;

static GLOBAL: LazyLock<GlobalCallbackHelper> = LazyLock::new(GlobalCallbackHelper::new);

/// Registry of global callbacks keyed by listener type.
///
/// Dispatch works on a snapshot of the chain, so callbacks may register or
/// remove callbacks while being dispatched.
#[derive(Default)]
pub struct GlobalCallbackHelper {
    callbacks: RwLock<FxHashMap<ListenerClass, CallbackChain>>,
}

impl GlobalCallbackHelper {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry used by enhanced static methods.
    pub fn global() -> &'static GlobalCallbackHelper {
        &GLOBAL
    }

    /// Register a callback under its [`Callback::base_class`].
    pub fn add_callback(&self, callback: Arc<dyn Callback>) {
        let key = callback.base_class();
        let mut map = self.callbacks.write().unwrap_or_else(|e| e.into_inner());
        chain::insert_sorted(map.entry(key).or_default(), callback);
    }

    /// Remove a callback. Returns whether it was registered.
    pub fn remove_callback(&self, callback: &Arc<dyn Callback>) -> bool {
        let key = callback.base_class();
        let mut map = self.callbacks.write().unwrap_or_else(|e| e.into_inner());
        let Some(list) = map.get_mut(&key) else {
            return false;
        };
        let removed = chain::remove(list, callback);
        if list.is_empty() {
            map.remove(&key);
        }
        removed
    }

    /// Number of callbacks registered for a listener.
    pub fn callback_count(&self, listener: &ListenerClass) -> usize {
        self.snapshot(listener).len()
    }

    /// Dispatch `before_call` to the callbacks of `listener`.
    pub fn before_call(
        &self,
        receiver: Receiver<'_>,
        listener: &ListenerClass,
        args: &[&dyn Any],
    ) -> CallbackResult {
        let list = self.snapshot(listener);
        if list.is_empty() {
            return CallbackResult::new_continue();
        }
        chain::dispatch_before(&list, receiver, args)
    }

    /// Dispatch `after_call` to the callbacks of `listener`.
    pub fn after_call(
        &self,
        receiver: Receiver<'_>,
        listener: &ListenerClass,
        args: &[&dyn Any],
        result: &dyn Any,
    ) -> CallbackResult {
        let list = self.snapshot(listener);
        if list.is_empty() {
            return CallbackResult::new_continue();
        }
        chain::dispatch_after(&list, receiver, args, result)
    }

    fn snapshot(&self, listener: &ListenerClass) -> CallbackChain {
        self.callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(listener)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
    }

    impl Callback for Counting {
        fn before_call(&self, _receiver: Receiver<'_>, _args: &[&dyn Any]) -> CallbackResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            CallbackResult::new_continue()
        }

        fn after_call(
            &self,
            _receiver: Receiver<'_>,
            _args: &[&dyn Any],
            _result: &dyn Any,
        ) -> CallbackResult {
            CallbackResult::new_continue()
        }

        fn base_class(&self) -> ListenerClass {
            ListenerClass::named("test.GlobalCounting")
        }
    }

    #[test]
    fn test_add_dispatch_remove() {
        let helper = GlobalCallbackHelper::new();
        let listener = ListenerClass::named("test.GlobalCounting");
        let counting = Arc::new(Counting {
            calls: AtomicUsize::new(0),
        });
        let callback: Arc<dyn Callback> = counting.clone();

        helper.add_callback(callback.clone());
        assert_eq!(helper.callback_count(&listener), 1);

        helper.before_call(Receiver::Class("Test"), &listener, &[]);
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);

        assert!(helper.remove_callback(&callback));
        assert_eq!(helper.callback_count(&listener), 0);

        helper.before_call(Receiver::Class("Test"), &listener, &[]);
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_listener_continues() {
        let helper = GlobalCallbackHelper::new();
        let result = helper.before_call(
            Receiver::Class("Test"),
            &ListenerClass::named("test.Nobody"),
            &[],
        );
        assert!(!result.is_blocking_caller());
        assert!(!result.is_blocking_callbacks());
    }
}
