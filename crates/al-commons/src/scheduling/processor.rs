//! Game thread pools.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::pool::{PoolConfig, ScheduledFuture, ScheduledThreadPool};
use super::rejection::Rejection;
use super::runnable::Runnable;
use super::wrapper::ExecutionWrapper;

/// Largest accepted delay or period, in milliseconds.
pub const MAX_DELAY_MS: i64 = i32::MAX as i64;

/// Executes runnables on a scheduled pool, each one wrapped with panic
/// isolation and timing.
pub struct GameProcessor {
    pool: ScheduledThreadPool,
    max_time: Duration,
    collect_stats: bool,
}

impl GameProcessor {
    /// `max_time` is the run time above which a warning is logged.
    pub fn new(config: PoolConfig, max_time: Duration, collect_stats: bool) -> std::io::Result<Self> {
        Ok(Self {
            pool: ScheduledThreadPool::new(config)?,
            max_time,
            collect_stats,
        })
    }

    pub fn name(&self) -> &str {
        self.pool.name()
    }

    fn wrap(&self, runnable: Arc<dyn Runnable>) -> ExecutionWrapper {
        ExecutionWrapper::new(runnable, self.max_time, self.collect_stats)
    }

    pub fn execute(&self, runnable: Arc<dyn Runnable>) -> Option<Rejection> {
        let wrapper = self.wrap(runnable);
        self.pool.execute(move || {
            wrapper.run();
        })
    }

    /// Run once after `delay_ms`, clamped into `[0, MAX_DELAY_MS]`.
    pub fn schedule(&self, runnable: Arc<dyn Runnable>, delay_ms: i64) -> ScheduledFuture {
        let delay = clamp_delay(delay_ms, "delay", runnable.name());
        let wrapper = self.wrap(runnable);
        self.pool.schedule(
            move || {
                wrapper.run();
            },
            delay,
        )
    }

    /// Run after `delay_ms`, then every `period_ms`. Both are clamped; the
    /// period is at least one millisecond.
    pub fn schedule_at_fixed_rate(
        &self,
        runnable: Arc<dyn Runnable>,
        delay_ms: i64,
        period_ms: i64,
    ) -> ScheduledFuture {
        let delay = clamp_delay(delay_ms, "delay", runnable.name());
        let period = clamp_delay(period_ms, "period", runnable.name()).max(Duration::from_millis(1));
        let wrapper = self.wrap(runnable);
        self.pool.schedule_at_fixed_rate(
            move || {
                wrapper.run();
            },
            delay,
            period,
        )
    }

    /// Schedule `task` once. Unlike [`schedule`](Self::schedule), an out of
    /// range delay is refused instead of clamped. A previous schedule of the
    /// task is cancelled.
    pub fn schedule_task(&self, task: &Task, delay_ms: i64) -> bool {
        if !in_range(delay_ms) {
            tracing::warn!("Refusing to schedule {} with delay {}ms", task.name(), delay_ms);
            return false;
        }
        task.replace(self.schedule(task.runnable.clone(), delay_ms));
        true
    }

    /// Schedule `task` at a fixed rate, refusing out of range values.
    pub fn schedule_task_at_fixed_rate(&self, task: &Task, delay_ms: i64, period_ms: i64) -> bool {
        if !in_range(delay_ms) || !in_range(period_ms) || period_ms == 0 {
            tracing::warn!(
                "Refusing to schedule {} with delay {}ms and period {}ms",
                task.name(),
                delay_ms,
                period_ms
            );
            return false;
        }
        task.replace(self.schedule_at_fixed_rate(task.runnable.clone(), delay_ms, period_ms));
        true
    }

    pub fn is_shutdown(&self) -> bool {
        self.pool.is_shutdown()
    }

    pub fn shutdown(&self) {
        tracing::info!("Shutting down {}", self.pool.name());
        self.pool.shutdown();
    }
}

fn in_range(ms: i64) -> bool {
    (0..=MAX_DELAY_MS).contains(&ms)
}

fn clamp_delay(ms: i64, what: &str, name: &str) -> Duration {
    if !in_range(ms) {
        tracing::warn!("{} of {} is out of range: {}ms, clamping", what, name, ms);
    }
    Duration::from_millis(ms.clamp(0, MAX_DELAY_MS) as u64)
}

/// A runnable together with its current schedule.
pub struct Task {
    runnable: Arc<dyn Runnable>,
    future: Mutex<Option<ScheduledFuture>>,
}

impl Task {
    pub fn new(runnable: Arc<dyn Runnable>) -> Self {
        Self {
            runnable,
            future: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        self.runnable.name()
    }

    pub fn future(&self) -> Option<ScheduledFuture> {
        self.future
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Scheduled and neither cancelled nor completed.
    pub fn is_scheduled(&self) -> bool {
        self.future().is_some_and(|f| !f.is_done())
    }

    /// Cancel the current schedule, if any.
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        self.future
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .is_some_and(|f| f.cancel(may_interrupt))
    }

    fn replace(&self, future: ScheduledFuture) {
        let previous = self
            .future
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(future);
        if let Some(previous) = previous {
            previous.cancel(false);
        }
    }
}
