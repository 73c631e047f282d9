//! Callback contract and listener identities.

use std::any::Any;
use std::borrow::Cow;
use std::fmt;

use super::result::CallbackResult;

/// Priority used when a callback does not override [`Callback::priority`].
pub const DEFAULT_PRIORITY: i32 = 0;

/// A listener type: the key under which callbacks are registered and the
/// type named by `#[global_callback(L)]` / `#[object_callback(L)]`.
///
/// ```
/// use al_commons::callbacks::Listener;
///
/// pub struct PlayerLevelUp;
///
/// impl Listener for PlayerLevelUp {
///     const NAME: &'static str = "gameserver.PlayerLevelUp";
/// }
/// ```
pub trait Listener: 'static {
    /// Fully qualified, stable listener name.
    const NAME: &'static str;
}

/// Runtime identity of a listener type.
///
/// Class files reference listeners by name, so identity is the name rather
/// than a `TypeId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerClass(Cow<'static, str>);

impl ListenerClass {
    /// Identity of a statically known listener.
    pub fn of<L: Listener>() -> Self {
        Self(Cow::Borrowed(L::NAME))
    }

    /// Identity from a name found in a class file.
    pub fn named(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    /// Fully qualified name.
    pub fn name(&self) -> &str {
        &self.0
    }

    /// Last path segment (`a.b.Foo` and `a::b::Foo` both yield `Foo`).
    pub fn simple_name(&self) -> &str {
        simple_name(&self.0)
    }
}

impl fmt::Display for ListenerClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn simple_name(name: &str) -> &str {
    let tail = name.rsplit("::").next().unwrap_or(name);
    tail.rsplit('.').next().unwrap_or(tail)
}

/// What a callback is invoked on: an instance, or the declaring class of a
/// static method.
#[derive(Clone, Copy)]
pub enum Receiver<'a> {
    /// Instance method receiver.
    Object(&'a dyn Any),
    /// Declaring class of a static method.
    Class(&'a str),
}

impl<'a> Receiver<'a> {
    /// Downcast the instance receiver.
    pub fn downcast_ref<T: Any>(&self) -> Option<&'a T> {
        match self {
            Receiver::Object(obj) => obj.downcast_ref::<T>(),
            Receiver::Class(_) => None,
        }
    }

    /// Declaring class name for static receivers.
    pub fn class_name(&self) -> Option<&'a str> {
        match self {
            Receiver::Class(name) => Some(name),
            Receiver::Object(_) => None,
        }
    }
}

impl fmt::Debug for Receiver<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Receiver::Object(_) => f.write_str("Receiver::Object(..)"),
            Receiver::Class(name) => write!(f, "Receiver::Class({})", name),
        }
    }
}

/// Before/after interception of an enhanced method.
///
/// Implementations are shared between all call sites of their listener type
/// and must not keep per-call state.
pub trait Callback: Send + Sync + 'static {
    /// Called before the method body runs.
    fn before_call(&self, receiver: Receiver<'_>, args: &[&dyn Any]) -> CallbackResult;

    /// Called after the method body ran, with its (possibly replaced) result.
    fn after_call(
        &self,
        receiver: Receiver<'_>,
        args: &[&dyn Any],
        result: &dyn Any,
    ) -> CallbackResult;

    /// Listener type this callback is registered under.
    fn base_class(&self) -> ListenerClass;

    /// Higher priorities are dispatched first.
    fn priority(&self) -> i32 {
        DEFAULT_PRIORITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct LevelUp;

    impl Listener for LevelUp {
        const NAME: &'static str = "gameserver.model.LevelUp";
    }

    #[test]
    fn test_listener_class_identity() {
        assert_eq!(ListenerClass::of::<LevelUp>(), ListenerClass::named("gameserver.model.LevelUp"));
        assert_ne!(ListenerClass::of::<LevelUp>(), ListenerClass::named("LevelUp"));
    }

    #[test]
    fn test_simple_name() {
        assert_eq!(ListenerClass::named("a.b.Foo").simple_name(), "Foo");
        assert_eq!(ListenerClass::named("a::b::Foo").simple_name(), "Foo");
        assert_eq!(ListenerClass::named("Foo").simple_name(), "Foo");
    }

    #[test]
    fn test_receiver_downcast() {
        let value = 7u32;
        let receiver = Receiver::Object(&value);
        assert_eq!(receiver.downcast_ref::<u32>(), Some(&7));
        assert_eq!(receiver.class_name(), None);

        let receiver = Receiver::Class("quest.Q1000");
        assert_eq!(receiver.downcast_ref::<u32>(), None);
        assert_eq!(receiver.class_name(), Some("quest.Q1000"));
    }
}
