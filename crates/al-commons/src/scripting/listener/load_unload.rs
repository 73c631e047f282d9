use std::sync::Arc;

use super::ClassListener;
use crate::scripting::class::ScriptClass;

/// Runs each class's load hooks after loading and unload hooks before
/// unloading. A failing class is logged and skipped.
pub struct OnClassLoadUnloadListener;

impl ClassListener for OnClassLoadUnloadListener {
    fn post_load(&self, classes: &[Arc<ScriptClass>]) {
        for class in classes {
            if let Err(e) = class.run_on_load() {
                tracing::error!("Can't run load hooks of {}: {}", class.name(), e);
            }
        }
    }

    fn pre_unload(&self, classes: &[Arc<ScriptClass>]) {
        for class in classes {
            if let Err(e) = class.run_on_unload() {
                tracing::error!("Can't run unload hooks of {}: {}", class.name(), e);
            }
        }
    }
}
