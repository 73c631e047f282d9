//! Ordered callback lists and the chain dispatch algorithm shared by the
//! global and per-object registries.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use super::callback::{Callback, Receiver};
use super::result::{BLOCK_CALLBACKS, BLOCK_CALLER, CONTINUE, CallbackResult};

/// Callbacks of one listener type in dispatch order.
pub type CallbackChain = Vec<Arc<dyn Callback>>;

/// Pointer identity of two callbacks, ignoring vtables.
pub(crate) fn same_callback(a: &Arc<dyn Callback>, b: &Arc<dyn Callback>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Insert keeping higher priorities first and equal priorities in insertion order.
pub(crate) fn insert_sorted(chain: &mut CallbackChain, callback: Arc<dyn Callback>) {
    let priority = callback.priority();
    let index = chain
        .iter()
        .position(|existing| existing.priority() < priority)
        .unwrap_or(chain.len());
    chain.insert(index, callback);
}

/// Remove a callback by identity. Returns whether it was present.
pub(crate) fn remove(chain: &mut CallbackChain, callback: &Arc<dyn Callback>) -> bool {
    let before = chain.len();
    chain.retain(|existing| !same_callback(existing, callback));
    chain.len() != before
}

/// Run `before_call` over the chain.
///
/// Stops at the first result that blocks callbacks. The caller is blocked if
/// any invoked callback blocked it; the replacement value is the one of the
/// last callback that did.
pub(crate) fn dispatch_before(
    chain: &[Arc<dyn Callback>],
    receiver: Receiver<'_>,
    args: &[&dyn Any],
) -> CallbackResult {
    let mut policy = CONTINUE;
    let mut replacement: Option<Box<dyn Any>> = None;

    for callback in chain {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback.before_call(receiver, args)));
        let result = match outcome {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(
                    "Uncaught panic in before_call of {} callback",
                    callback.base_class()
                );
                continue;
            }
        };

        let blocks_callbacks = result.is_blocking_callbacks();
        if result.is_blocking_caller() {
            policy |= BLOCK_CALLER;
            replacement = result.into_result();
        }
        if blocks_callbacks {
            policy |= BLOCK_CALLBACKS;
            break;
        }
    }

    CallbackResult::new(policy, replacement)
}

/// Run `after_call` over the chain.
///
/// Each callback observes the current return value, which a previous
/// caller-blocking result may have replaced.
pub(crate) fn dispatch_after(
    chain: &[Arc<dyn Callback>],
    receiver: Receiver<'_>,
    args: &[&dyn Any],
    result: &dyn Any,
) -> CallbackResult {
    let mut policy = CONTINUE;
    let mut replacement: Option<Box<dyn Any>> = None;

    for callback in chain {
        let current: &dyn Any = match &replacement {
            Some(value) => value.as_ref(),
            None => result,
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            callback.after_call(receiver, args, current)
        }));
        let after = match outcome {
            Ok(after) => after,
            Err(_) => {
                tracing::error!(
                    "Uncaught panic in after_call of {} callback",
                    callback.base_class()
                );
                continue;
            }
        };

        let blocks_callbacks = after.is_blocking_callbacks();
        if after.is_blocking_caller() {
            policy |= BLOCK_CALLER;
            if let Some(value) = after.into_result() {
                replacement = Some(value);
            }
        }
        if blocks_callbacks {
            policy |= BLOCK_CALLBACKS;
            break;
        }
    }

    CallbackResult::new(policy, replacement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::ListenerClass;
    use std::sync::Mutex;

    struct Recording {
        id: u32,
        priority: i32,
        policy: u8,
        log: Arc<Mutex<Vec<u32>>>,
    }

    impl Callback for Recording {
        fn before_call(&self, _receiver: Receiver<'_>, _args: &[&dyn Any]) -> CallbackResult {
            self.log.lock().unwrap().push(self.id);
            CallbackResult::new(self.policy, Some(Box::new(self.id)))
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
            ListenerClass::named("test.Chain")
        }

        fn priority(&self) -> i32 {
            self.priority
        }
    }

    fn recording(id: u32, priority: i32, policy: u8, log: &Arc<Mutex<Vec<u32>>>) -> Arc<dyn Callback> {
        Arc::new(Recording {
            id,
            priority,
            policy,
            log: log.clone(),
        })
    }

    #[test]
    fn test_insertion_order_for_equal_priorities() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = CallbackChain::new();
        for id in 0..3 {
            insert_sorted(&mut chain, recording(id, 0, CONTINUE, &log));
        }
        dispatch_before(&chain, Receiver::Class("Test"), &[]);
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_higher_priority_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = CallbackChain::new();
        insert_sorted(&mut chain, recording(1, 0, CONTINUE, &log));
        insert_sorted(&mut chain, recording(2, 10, CONTINUE, &log));
        insert_sorted(&mut chain, recording(3, 0, CONTINUE, &log));
        dispatch_before(&chain, Receiver::Class("Test"), &[]);
        assert_eq!(*log.lock().unwrap(), vec![2, 1, 3]);
    }

    #[test]
    fn test_block_callbacks_stops_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = vec![
            recording(1, 0, BLOCK_CALLBACKS, &log),
            recording(2, 0, CONTINUE, &log),
        ];
        let result = dispatch_before(&chain, Receiver::Class("Test"), &[]);
        assert_eq!(*log.lock().unwrap(), vec![1]);
        assert!(result.is_blocking_callbacks());
        assert!(!result.is_blocking_caller());
    }

    #[test]
    fn test_blocking_caller_is_or_of_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = vec![
            recording(1, 0, BLOCK_CALLER, &log),
            recording(2, 0, CONTINUE, &log),
        ];
        let result = dispatch_before(&chain, Receiver::Class("Test"), &[]);
        assert_eq!(*log.lock().unwrap(), vec![1, 2]);
        assert!(result.is_blocking_caller());
        assert!(!result.is_blocking_callbacks());
        assert_eq!(result.downcast_result::<u32>(), Some(1));
    }

    #[test]
    fn test_remove_by_identity() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = recording(1, 0, CONTINUE, &log);
        let mut chain = vec![first.clone(), recording(2, 0, CONTINUE, &log)];
        assert!(remove(&mut chain, &first));
        assert!(!remove(&mut chain, &first));
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_empty_chain_continues() {
        let result = dispatch_before(&[], Receiver::Class("Test"), &[]);
        assert_eq!(result.block_policy(), CONTINUE);
    }
}
