use std::sync::Arc;

/// A unit of work run by pools and the cron service.
pub trait Runnable: Send + Sync + 'static {
    fn run(&self);

    /// Name used in logs, statistics and scheduled task lookups.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<F> Runnable for F
where
    F: Fn() + Send + Sync + 'static,
{
    fn run(&self) {
        self()
    }
}

/// A closure with an explicit name.
pub struct NamedRunnable<F> {
    name: String,
    body: F,
}

impl<F: Fn() + Send + Sync + 'static> NamedRunnable<F> {
    pub fn new(name: impl Into<String>, body: F) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            body,
        })
    }
}

impl<F: Fn() + Send + Sync + 'static> Runnable for NamedRunnable<F> {
    fn run(&self) {
        (self.body)()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Identity of two runnables, ignoring vtables.
pub(crate) fn same_runnable(a: &Arc<dyn Runnable>, b: &Arc<dyn Runnable>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Message of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
