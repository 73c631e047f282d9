use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::runnable::{Runnable, panic_message};
use super::stats::RunnableStatsManager;

/// Runs a runnable with panic isolation and execution time accounting.
pub struct ExecutionWrapper {
    runnable: Arc<dyn Runnable>,
    /// Warn when a run takes longer; zero disables the check.
    max_time: Duration,
    collect_stats: bool,
}

impl ExecutionWrapper {
    pub fn new(runnable: Arc<dyn Runnable>, max_time: Duration, collect_stats: bool) -> Self {
        Self {
            runnable,
            max_time,
            collect_stats,
        }
    }

    /// Run once. Panics are caught and logged; the elapsed time is returned.
    pub fn run(&self) -> Duration {
        let start = Instant::now();
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.runnable.run())) {
            tracing::error!(
                "Exception in a Runnable execution {}: {}",
                self.runnable.name(),
                panic_message(payload.as_ref())
            );
        }
        let elapsed = start.elapsed();

        if self.collect_stats {
            RunnableStatsManager::global().add_time(self.runnable.name(), elapsed);
        }
        if !self.max_time.is_zero() && elapsed > self.max_time {
            tracing::warn!(
                "{} - execution time: {}ms",
                self.runnable.name(),
                elapsed.as_millis()
            );
        }
        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduling::runnable::NamedRunnable;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_panic_is_contained() {
        let wrapper = ExecutionWrapper::new(
            NamedRunnable::new("test.Panics", || panic!("boom")),
            Duration::ZERO,
            false,
        );
        wrapper.run();
    }

    #[test]
    fn test_stats_are_collected() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let wrapper = ExecutionWrapper::new(
            NamedRunnable::new("test.wrapper.Stats", move || flag.store(true, Ordering::SeqCst)),
            Duration::from_secs(5),
            true,
        );
        wrapper.run();
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(
            RunnableStatsManager::global()
                .stats("test.wrapper.Stats")
                .unwrap()
                .count,
            1
        );
    }
}
