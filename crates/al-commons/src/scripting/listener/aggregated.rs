use std::sync::Arc;

use super::ClassListener;
use crate::scripting::class::ScriptClass;

/// Fans out to several listeners: in order on load, in reverse on unload.
#[derive(Default)]
pub struct AggregatedClassListener {
    listeners: Vec<Arc<dyn ClassListener>>,
}

impl AggregatedClassListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_class_listener(&mut self, listener: Arc<dyn ClassListener>) {
        self.listeners.push(listener);
    }

    pub fn class_listeners(&self) -> &[Arc<dyn ClassListener>] {
        &self.listeners
    }
}

impl ClassListener for AggregatedClassListener {
    fn post_load(&self, classes: &[Arc<ScriptClass>]) {
        for listener in &self.listeners {
            listener.post_load(classes);
        }
    }

    fn pre_unload(&self, classes: &[Arc<ScriptClass>]) {
        for listener in self.listeners.iter().rev() {
            listener.pre_unload(classes);
        }
    }
}
