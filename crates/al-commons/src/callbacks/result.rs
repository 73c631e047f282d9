//! Result of a single before/after callback invocation.

use std::any::Any;
use std::fmt;

/// Continue with the next callback and with the wrapped call.
pub const CONTINUE: u8 = 0x00;

/// Stop the callback chain; the wrapped call still runs.
pub const BLOCK_CALLBACKS: u8 = 0x01;

/// Skip the wrapped call (or replace its return value); the chain continues.
pub const BLOCK_CALLER: u8 = 0x02;

/// Both of the above.
pub const BLOCK_ALL: u8 = BLOCK_CALLBACKS | BLOCK_CALLER;

/// Outcome of a callback.
///
/// The policy is a 2-bit set: bit 0 blocks the remaining callbacks of the
/// chain, bit 1 blocks the caller. The two axes are independent, so they are
/// exposed as two predicates instead of one enum.
pub struct CallbackResult {
    /// Replacement value for the wrapped call's return value.
    result: Option<Box<dyn Any>>,
    /// Block policy bits.
    block_policy: u8,
}

impl CallbackResult {
    /// Create a result with an explicit policy.
    ///
    /// Only the two low bits of `block_policy` are kept.
    pub fn new(block_policy: u8, result: Option<Box<dyn Any>>) -> Self {
        Self {
            result,
            block_policy: block_policy & BLOCK_ALL,
        }
    }

    /// Let everything continue.
    pub fn new_continue() -> Self {
        Self::new(CONTINUE, None)
    }

    /// Stop the callback chain but let the caller run.
    pub fn new_once_blocker() -> Self {
        Self::new(BLOCK_CALLBACKS, None)
    }

    /// Stop the chain and the caller, replacing its return value.
    pub fn new_full_blocker<T: Any>(result: T) -> Self {
        Self::new(BLOCK_ALL, Some(Box::new(result)))
    }

    /// The raw policy bits.
    pub fn block_policy(&self) -> u8 {
        self.block_policy
    }

    /// Whether the rest of the callback chain must be skipped.
    pub fn is_blocking_callbacks(&self) -> bool {
        self.block_policy & BLOCK_CALLBACKS != 0
    }

    /// Whether the wrapped call must be skipped (or its result replaced).
    pub fn is_blocking_caller(&self) -> bool {
        self.block_policy & BLOCK_CALLER != 0
    }

    /// Borrow the replacement value.
    pub fn result(&self) -> Option<&dyn Any> {
        self.result.as_deref()
    }

    /// Take the replacement value.
    pub fn into_result(self) -> Option<Box<dyn Any>> {
        self.result
    }

    /// Take the replacement value if it is a `T`.
    pub fn downcast_result<T: Any>(self) -> Option<T> {
        self.result
            .and_then(|value| value.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }
}

impl Default for CallbackResult {
    fn default() -> Self {
        Self::new_continue()
    }
}

impl fmt::Debug for CallbackResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackResult")
            .field("block_policy", &self.block_policy)
            .field("has_result", &self.result.is_some())
            .finish()
    }
}
