//! Runtime half of callback enhancement.
//!
//! Both weaving paths end up here: the `#[global_callback]` /
//! `#[object_callback]` macros expand a function body into calls to
//! [`Dispatch`], and enhanced script methods are invoked through the same
//! sequence by [`ScriptClass::invoke`](crate::scripting::ScriptClass::invoke).
//!
//! The generated sequence is:
//!
//! ```text
//! before = dispatch.before(listener, args)
//! if before.is_blocking_caller() { return R::blocked(before) }
//! ret = <original body>
//! dispatch.complete(listener, args, before, ret)
//! ```

use std::any::Any;
use std::sync::{LazyLock, OnceLock, RwLock};

use rustc_hash::FxHashMap;

use super::callback::{Listener, ListenerClass, Receiver};
use super::global::GlobalCallbackHelper;
use super::object::{EnhancedObject, ObjectCallbackHelper};
use super::result::CallbackResult;

/// Prefix of synthesized listener fields.
pub const FIELD_PREFIX: &str = "$$$callback";

/// Name of the listener field synthesized on a declaring class.
///
/// `$$$callback` + `Static` for static methods + the listener's simple name.
pub fn listener_field_name(listener: &ListenerClass, is_static: bool) -> String {
    format!(
        "{}{}{}",
        FIELD_PREFIX,
        if is_static { "Static" } else { "" },
        listener.simple_name()
    )
}

/// Listener fields synthesized per declaring class.
static FIELDS: LazyLock<RwLock<FxHashMap<(String, String), ListenerClass>>> =
    LazyLock::new(Default::default);

/// Resolve (and on first use, synthesize) the listener field of a declaring
/// class. Every call site of the same listener on the same class shares it.
pub fn resolve_listener_field(
    declaring: &str,
    listener: ListenerClass,
    is_static: bool,
) -> ListenerClass {
    let key = (declaring.to_string(), listener_field_name(&listener, is_static));
    if let Some(existing) = FIELDS
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .get(&key)
    {
        return existing.clone();
    }

    let mut fields = FIELDS.write().unwrap_or_else(|e| e.into_inner());
    fields
        .entry(key)
        .or_insert_with(|| {
            tracing::debug!("Synthesized listener field {} on {}", listener, declaring);
            listener
        })
        .clone()
}

/// Listener fields synthesized so far on a declaring class, sorted.
pub fn synthesized_fields(declaring: &str) -> Vec<String> {
    let mut names: Vec<String> = FIELDS
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .keys()
        .filter(|(class, _)| class == declaring)
        .map(|(_, field)| field.clone())
        .collect();
    names.sort();
    names
}

/// Per-method cache of the resolved listener class.
///
/// The macros emit one `static` `CallSite` per enhanced function.
pub struct CallSite {
    listener: OnceLock<ListenerClass>,
}

impl CallSite {
    pub const fn new() -> Self {
        Self {
            listener: OnceLock::new(),
        }
    }

    /// Listener class of this site, resolved once.
    pub fn listener<L: Listener>(&self, declaring: &str, is_static: bool) -> &ListenerClass {
        self.listener
            .get_or_init(|| resolve_listener_field(declaring, ListenerClass::of::<L>(), is_static))
    }
}

impl Default for CallSite {
    fn default() -> Self {
        Self::new()
    }
}

/// Where callbacks of an enhanced method are looked up.
#[derive(Clone, Copy)]
pub enum Dispatch<'a> {
    /// Global registry; receiver is the instance or the declaring class.
    Global(Receiver<'a>),
    /// The receiver's own registry.
    Object(&'a dyn EnhancedObject),
}

impl<'a> Dispatch<'a> {
    pub fn global(receiver: Receiver<'a>) -> Self {
        Dispatch::Global(receiver)
    }

    pub fn object(object: &'a dyn EnhancedObject) -> Self {
        Dispatch::Object(object)
    }

    /// Run the before-chain.
    pub fn before(&self, listener: &ListenerClass, args: &[&dyn Any]) -> CallbackResult {
        match *self {
            Dispatch::Global(receiver) => {
                GlobalCallbackHelper::global().before_call(receiver, listener, args)
            }
            Dispatch::Object(object) => ObjectCallbackHelper::before_call(object, listener, args),
        }
    }

    /// Run the after-chain.
    pub fn after(
        &self,
        listener: &ListenerClass,
        args: &[&dyn Any],
        result: &dyn Any,
    ) -> CallbackResult {
        match *self {
            Dispatch::Global(receiver) => {
                GlobalCallbackHelper::global().after_call(receiver, listener, args, result)
            }
            Dispatch::Object(object) => {
                ObjectCallbackHelper::after_call(object, listener, args, result)
            }
        }
    }

    /// Finish an enhanced call whose body produced `ret`.
    ///
    /// A caller-blocking before-result overwrites `ret` with its replacement
    /// value; then the after-chain runs and, if it blocks the caller, its
    /// replacement value is returned instead.
    pub fn complete<R: Any>(
        &self,
        listener: &ListenerClass,
        args: &[&dyn Any],
        before: CallbackResult,
        ret: R,
    ) -> R {
        let mut ret = ret;
        if before.is_blocking_caller()
            && let Some(value) = before.downcast_result::<R>()
        {
            ret = value;
        }

        let after = self.after(listener, args, &ret);
        if after.is_blocking_caller() {
            match after.into_result().map(|value| value.downcast::<R>()) {
                Some(Ok(value)) => return *value,
                Some(Err(_)) => tracing::warn!(
                    "Replacement value of {} after-callback has the wrong type; keeping the real result",
                    listener
                ),
                None => {}
            }
        }
        ret
    }

    /// [`complete`](Self::complete) for type-erased return values of script
    /// methods: replacement values are taken as they are.
    pub fn complete_dynamic(
        &self,
        listener: &ListenerClass,
        args: &[&dyn Any],
        before: CallbackResult,
        ret: Box<dyn Any>,
    ) -> Box<dyn Any> {
        let mut ret = ret;
        if before.is_blocking_caller()
            && let Some(value) = before.into_result()
        {
            ret = value;
        }

        let after = self.after(listener, args, ret.as_ref());
        if after.is_blocking_caller()
            && let Some(value) = after.into_result()
        {
            return value;
        }
        ret
    }
}

/// Value returned by an enhanced method whose caller was blocked before the
/// body ran.
///
/// Primitives return their zero value (`char` returns `'a'`) and ignore any
/// replacement; other types take the replacement value when it has the right
/// type.
pub trait BlockedReturn: Sized + 'static {
    fn blocked(result: CallbackResult) -> Self;
}

impl BlockedReturn for () {
    fn blocked(_result: CallbackResult) -> Self {}
}

impl BlockedReturn for bool {
    fn blocked(_result: CallbackResult) -> Self {
        false
    }
}

impl BlockedReturn for char {
    fn blocked(_result: CallbackResult) -> Self {
        'a'
    }
}

macro_rules! blocked_zero {
    ($($ty:ty => $zero:expr),* $(,)?) => {
        $(
            impl BlockedReturn for $ty {
                fn blocked(_result: CallbackResult) -> Self {
                    $zero
                }
            }
        )*
    };
}

blocked_zero!(
    i8 => 0, i16 => 0, i32 => 0, i64 => 0, i128 => 0, isize => 0,
    u8 => 0, u16 => 0, u32 => 0, u64 => 0, u128 => 0, usize => 0,
    f32 => 0.0, f64 => 0.0,
);

impl BlockedReturn for String {
    fn blocked(result: CallbackResult) -> Self {
        replacement_or_default(result)
    }
}

impl<T: 'static> BlockedReturn for Option<T> {
    fn blocked(result: CallbackResult) -> Self {
        result.downcast_result::<Option<T>>().flatten()
    }
}

impl<T: 'static> BlockedReturn for Vec<T> {
    fn blocked(result: CallbackResult) -> Self {
        result.downcast_result::<Vec<T>>().unwrap_or_default()
    }
}

/// Helper for manual [`BlockedReturn`] impls of `Default` types.
pub fn replacement_or_default<T: Default + 'static>(result: CallbackResult) -> T {
    result.downcast_result::<T>().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Spawn;

    impl Listener for Spawn {
        const NAME: &'static str = "gameserver.ai.Spawn";
    }

    #[test]
    fn test_field_name() {
        let listener = ListenerClass::of::<Spawn>();
        assert_eq!(listener_field_name(&listener, true), "$$$callbackStaticSpawn");
        assert_eq!(listener_field_name(&listener, false), "$$$callbackSpawn");
    }

    #[test]
    fn test_one_field_per_listener_per_class() {
        let first = CallSite::new();
        let second = CallSite::new();
        first.listener::<Spawn>("test.enhancer.Npc", true);
        second.listener::<Spawn>("test.enhancer.Npc", true);
        assert_eq!(
            synthesized_fields("test.enhancer.Npc"),
            vec!["$$$callbackStaticSpawn".to_string()]
        );

        let other = CallSite::new();
        other.listener::<Spawn>("test.enhancer.Npc", false);
        assert_eq!(synthesized_fields("test.enhancer.Npc").len(), 2);
    }

    #[test]
    fn test_blocked_defaults() {
        assert!(!bool::blocked(CallbackResult::new_full_blocker(true)));
        assert_eq!(i32::blocked(CallbackResult::new_full_blocker(5i32)), 0);
        assert_eq!(f64::blocked(CallbackResult::new_continue()), 0.0);
        assert_eq!(char::blocked(CallbackResult::new_continue()), 'a');
        assert_eq!(
            String::blocked(CallbackResult::new_full_blocker("x".to_string())),
            "x"
        );
        assert_eq!(Option::<u8>::blocked(CallbackResult::new_continue()), None);
        assert_eq!(
            Option::<u8>::blocked(CallbackResult::new_full_blocker(Some(3u8))),
            Some(3)
        );
    }
}
