//! Callback primitives and dispatch.
//!
//! A [`Callback`] intercepts calls of methods enhanced for its listener type.
//! Static methods dispatch through the process-wide [`GlobalCallbackHelper`];
//! instance methods of an [`EnhancedObject`] dispatch through the object's own
//! registry via [`ObjectCallbackHelper`].

mod callback;
mod chain;
pub mod enhancer;
mod global;
mod object;
mod result;

pub use al_commons_macros::{global_callback, object_callback};
pub use callback::{Callback, DEFAULT_PRIORITY, Listener, ListenerClass, Receiver};
pub use chain::CallbackChain;
pub use enhancer::{BlockedReturn, CallSite, Dispatch};
pub use global::GlobalCallbackHelper;
pub use object::{CallbackRegistry, EnhancedObject, ObjectCallbackHelper};
pub use result::{BLOCK_ALL, BLOCK_CALLBACKS, BLOCK_CALLER, CONTINUE, CallbackResult};
