//! Class listeners: reactions to classes being loaded and unloaded.

mod aggregated;
mod load_unload;
mod scheduled;

use std::sync::Arc;

pub use aggregated::AggregatedClassListener;
pub use load_unload::OnClassLoadUnloadListener;
pub use scheduled::ScheduledTaskClassListener;

use super::class::ScriptClass;

/// Notified after a context compiled its classes and before it drops them.
pub trait ClassListener: Send + Sync {
    fn post_load(&self, classes: &[Arc<ScriptClass>]);

    fn pre_unload(&self, classes: &[Arc<ScriptClass>]);
}

/// Listener used by root contexts that have none: load/unload hooks first,
/// then scheduled task registration.
pub fn default_class_listener() -> Arc<dyn ClassListener> {
    let mut listener = AggregatedClassListener::new();
    listener.add_class_listener(Arc::new(OnClassLoadUnloadListener));
    listener.add_class_listener(Arc::new(ScheduledTaskClassListener::global()));
    Arc::new(listener)
}
