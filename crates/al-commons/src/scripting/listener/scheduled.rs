use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;

use super::ClassListener;
use crate::scheduling::{CronService, Runnable};
use crate::scripting::class::ScriptClass;

/// Schedules runnable classes carrying a cron schedule, and cancels their
/// jobs when they are unloaded.
///
/// Jobs are tracked per class instance, so unloading one context leaves the
/// jobs of same-named classes in other contexts alone.
pub struct ScheduledTaskClassListener {
    cron: Option<Arc<CronService>>,
    /// Keyed by the address of the scheduled [`ScriptClass`].
    scheduled: Mutex<FxHashMap<usize, Vec<Arc<dyn Runnable>>>>,
}

impl ScheduledTaskClassListener {
    pub fn new(cron: Arc<CronService>) -> Self {
        Self {
            cron: Some(cron),
            scheduled: Mutex::default(),
        }
    }

    /// Uses the process-wide cron service, looked up on each event.
    pub fn global() -> Self {
        Self {
            cron: None,
            scheduled: Mutex::default(),
        }
    }

    fn cron(&self) -> Option<Arc<CronService>> {
        self.cron.clone().or_else(CronService::instance)
    }

    fn schedule(&self, cron: &CronService, class: &Arc<ScriptClass>) {
        let Some(scheduled) = class.scheduled() else {
            return;
        };
        if scheduled.disabled {
            tracing::debug!("Scheduled task {} is disabled", class.name());
            return;
        }
        if scheduled.value.is_empty() {
            tracing::warn!("Scheduled task {} has no cron expression", class.name());
            return;
        }

        let mut shared: Option<Arc<dyn Runnable>> = None;
        for expression in &scheduled.value {
            let runnable = match &shared {
                Some(runnable) => Ok(runnable.clone()),
                None => class.new_runnable(),
            };
            let runnable = match runnable {
                Ok(runnable) => runnable,
                Err(e) => {
                    tracing::error!("Can't instantiate scheduled task {}: {}", class.name(), e);
                    return;
                }
            };
            if !scheduled.instance_per_cron_expression {
                shared = Some(runnable.clone());
            }

            if let Err(e) = cron.schedule(runnable.clone(), expression, scheduled.long_running_task) {
                tracing::error!(
                    "Can't schedule {} with \"{}\": {}",
                    class.name(),
                    expression,
                    e
                );
                continue;
            }
            let mut tracked = self.scheduled.lock().unwrap_or_else(|e| e.into_inner());
            let runnables = tracked.entry(class_key(class)).or_default();
            if !runnables.iter().any(|r| Arc::ptr_eq(r, &runnable)) {
                runnables.push(runnable);
            }
        }
    }
}

impl ClassListener for ScheduledTaskClassListener {
    fn post_load(&self, classes: &[Arc<ScriptClass>]) {
        let scheduled: Vec<_> = classes.iter().filter(|c| c.scheduled().is_some()).collect();
        if scheduled.is_empty() {
            return;
        }
        let Some(cron) = self.cron() else {
            tracing::warn!(
                "Cron service not initialized, {} scheduled tasks ignored",
                scheduled.len()
            );
            return;
        };
        for class in scheduled {
            self.schedule(&cron, class);
        }
    }

    fn pre_unload(&self, classes: &[Arc<ScriptClass>]) {
        let cron = self.cron();
        let mut tracked = self.scheduled.lock().unwrap_or_else(|e| e.into_inner());
        for class in classes {
            let Some(runnables) = tracked.remove(&class_key(class)) else {
                continue;
            };
            let Some(cron) = &cron else {
                continue;
            };
            for runnable in runnables {
                cron.cancel(&runnable);
            }
        }
    }
}

fn class_key(class: &Arc<ScriptClass>) -> usize {
    Arc::as_ptr(class) as usize
}
