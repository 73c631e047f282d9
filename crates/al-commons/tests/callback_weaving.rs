//! Tests for functions woven with `#[global_callback]` and
//! `#[object_callback]`.
//!
//! The global registry is process-wide, so every test uses its own listener.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use al_commons::callbacks::{
    Callback, CallbackRegistry, CallbackResult, EnhancedObject, GlobalCallbackHelper, Listener,
    ListenerClass, ObjectCallbackHelper, Receiver, global_callback, object_callback,
};

// =============================================================================
// Test Helpers
// =============================================================================

type BeforeFn = Box<dyn Fn(Receiver<'_>, &[&dyn Any]) -> CallbackResult + Send + Sync>;
type AfterFn = Box<dyn Fn(&[&dyn Any], &dyn Any) -> CallbackResult + Send + Sync>;

/// A callback assembled from closures.
struct TestCallback {
    listener: ListenerClass,
    priority: i32,
    before: BeforeFn,
    after: AfterFn,
}

impl TestCallback {
    fn on<L: Listener>() -> Self {
        Self {
            listener: ListenerClass::of::<L>(),
            priority: 0,
            before: Box::new(continue_before),
            after: Box::new(continue_after),
        }
    }

    fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    fn before(
        mut self,
        f: impl Fn(Receiver<'_>, &[&dyn Any]) -> CallbackResult + Send + Sync + 'static,
    ) -> Self {
        self.before = Box::new(f);
        self
    }

    fn after(
        mut self,
        f: impl Fn(&[&dyn Any], &dyn Any) -> CallbackResult + Send + Sync + 'static,
    ) -> Self {
        self.after = Box::new(f);
        self
    }

    fn register(self) -> Arc<dyn Callback> {
        let callback: Arc<dyn Callback> = Arc::new(self);
        GlobalCallbackHelper::global().add_callback(callback.clone());
        callback
    }
}

impl Callback for TestCallback {
    fn before_call(&self, receiver: Receiver<'_>, args: &[&dyn Any]) -> CallbackResult {
        (self.before)(receiver, args)
    }

    fn after_call(
        &self,
        _receiver: Receiver<'_>,
        args: &[&dyn Any],
        result: &dyn Any,
    ) -> CallbackResult {
        (self.after)(args, result)
    }

    fn base_class(&self) -> ListenerClass {
        self.listener.clone()
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

fn continue_before(_: Receiver<'_>, _: &[&dyn Any]) -> CallbackResult {
    CallbackResult::new_continue()
}

fn continue_after(_: &[&dyn Any], _: &dyn Any) -> CallbackResult {
    CallbackResult::new_continue()
}

fn counter() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    (count.clone(), count)
}

macro_rules! listener {
    ($name:ident) => {
        struct $name;

        impl Listener for $name {
            const NAME: &'static str = concat!("test.weaving.", stringify!($name));
        }
    };
}

// =============================================================================
// Global callbacks on free functions
// =============================================================================

listener!(Heal);
listener!(Damage);
listener!(Greet);
listener!(Talk);
listener!(Loot);
listener!(Rest);

static HEAL_BODY: AtomicUsize = AtomicUsize::new(0);
static DAMAGE_BODY: AtomicUsize = AtomicUsize::new(0);
static TALK_BODY: AtomicUsize = AtomicUsize::new(0);

#[global_callback(Heal)]
fn heal(amount: i32) -> i32 {
    HEAL_BODY.fetch_add(1, Ordering::SeqCst);
    amount * 2
}

#[global_callback(Damage)]
fn damage(amount: i32) -> i32 {
    DAMAGE_BODY.fetch_add(1, Ordering::SeqCst);
    amount
}

#[global_callback(Greet)]
fn greet(name: String) -> String {
    format!("hello {}", name)
}

#[global_callback(Talk)]
fn talk(npc_id: u32) {
    TALK_BODY.fetch_add(1, Ordering::SeqCst);
    let _ = npc_id;
}

#[global_callback(Loot)]
fn loot(item_id: u32) -> Option<u32> {
    Some(item_id)
}

#[global_callback(Rest)]
fn rest() {}

#[test]
fn test_body_runs_without_callbacks() {
    assert_eq!(heal(5), 10);
    assert_eq!(HEAL_BODY.load(Ordering::SeqCst), 1);
}

#[test]
fn test_caller_blocked_primitive_returns_zero() {
    let callback = TestCallback::on::<Damage>()
        .before(|receiver, args| {
            assert_eq!(receiver.class_name(), Some(module_path!()));
            assert_eq!(args[0].downcast_ref::<i32>(), Some(&50));
            CallbackResult::new_full_blocker(99i32)
        })
        .register();

    assert_eq!(damage(50), 0);
    assert_eq!(DAMAGE_BODY.load(Ordering::SeqCst), 0);

    GlobalCallbackHelper::global().remove_callback(&callback);
    assert_eq!(damage(50), 50);
    assert_eq!(DAMAGE_BODY.load(Ordering::SeqCst), 1);
}

#[test]
fn test_caller_blocked_takes_replacement() {
    TestCallback::on::<Greet>()
        .before(|_, args| match args[0].downcast_ref::<String>() {
            Some(name) if name == "intruder" => {
                CallbackResult::new_full_blocker("go away".to_string())
            }
            _ => CallbackResult::new_continue(),
        })
        .register();

    assert_eq!(greet("intruder".to_string()), "go away");
    assert_eq!(greet("friend".to_string()), "hello friend");
}

#[test]
fn test_after_callback_replaces_return() {
    let (seen, seen_by_callback) = counter();
    TestCallback::on::<Loot>()
        .after(move |_, result| {
            seen_by_callback.fetch_add(1, Ordering::SeqCst);
            match result.downcast_ref::<Option<u32>>() {
                Some(Some(13)) => CallbackResult::new_full_blocker(None::<u32>),
                _ => CallbackResult::new_continue(),
            }
        })
        .register();

    assert_eq!(loot(12), Some(12));
    assert_eq!(loot(13), None);
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

/// A high priority callback stops the chain for one argument without
/// blocking the caller.
#[test]
fn test_once_blocker_skips_lower_priority_callbacks() {
    let (b_calls, b_counter) = counter();
    TestCallback::on::<Talk>()
        .before(move |_, _| {
            b_counter.fetch_add(1, Ordering::SeqCst);
            CallbackResult::new_continue()
        })
        .register();
    TestCallback::on::<Talk>()
        .priority(10)
        .before(|_, args| match args[0].downcast_ref::<u32>() {
            Some(42) => CallbackResult::new_once_blocker(),
            _ => CallbackResult::new_continue(),
        })
        .register();

    talk(42);
    assert_eq!(TALK_BODY.load(Ordering::SeqCst), 1);
    assert_eq!(b_calls.load(Ordering::SeqCst), 0);

    talk(7);
    assert_eq!(TALK_BODY.load(Ordering::SeqCst), 2);
    assert_eq!(b_calls.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Methods
// =============================================================================

listener!(LevelUp);
listener!(Aggro);

struct Player {
    level: Mutex<u32>,
}

impl Player {
    #[global_callback(LevelUp)]
    fn level_up(&self, levels: u32) -> u32 {
        let mut level = self.level.lock().unwrap();
        *level += levels;
        *level
    }
}

struct Npc {
    name: &'static str,
    callbacks: CallbackRegistry,
}

impl EnhancedObject for Npc {
    fn callback_registry(&self) -> &CallbackRegistry {
        &self.callbacks
    }
}

impl Npc {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            callbacks: CallbackRegistry::new(),
        }
    }

    #[object_callback(Aggro)]
    fn aggro(&self, target: u32) -> bool {
        target != 0
    }
}

#[test]
fn test_global_callback_on_method_sees_receiver() {
    let (calls, counter) = counter();
    TestCallback::on::<LevelUp>()
        .before(move |receiver, _| {
            if let Some(player) = receiver.downcast_ref::<Player>() {
                assert_eq!(*player.level.lock().unwrap(), 1);
                counter.fetch_add(1, Ordering::SeqCst);
            }
            CallbackResult::new_continue()
        })
        .register();

    let player = Player {
        level: Mutex::new(1),
    };
    assert_eq!(player.level_up(2), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_object_callbacks_are_per_instance() {
    let guard = Npc::new("guard");
    let merchant = Npc::new("merchant");

    let callback: Arc<dyn Callback> = Arc::new(TestCallback::on::<Aggro>().before(|receiver, _| {
        let npc = receiver.downcast_ref::<Npc>().map(|n| n.name);
        assert_eq!(npc, Some("guard"));
        CallbackResult::new_full_blocker(true)
    }));
    ObjectCallbackHelper::add_callback(callback.clone(), &guard);

    // Blocked: bool returns false without running the body.
    assert!(!guard.aggro(7));
    assert!(merchant.aggro(7));

    assert!(ObjectCallbackHelper::remove_callback(&callback, &guard));
    assert!(guard.aggro(7));
}

#[test]
fn test_synthesized_listener_fields() {
    use al_commons::callbacks::enhancer::synthesized_fields;

    rest();
    assert!(
        synthesized_fields(module_path!()).contains(&"$$$callbackStaticRest".to_string())
    );

    Npc::new("field").aggro(1);
    assert_eq!(
        synthesized_fields(std::any::type_name::<Npc>()),
        vec!["$$$callbackAggro".to_string()]
    );
}
