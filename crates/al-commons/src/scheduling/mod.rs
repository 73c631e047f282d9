//! Thread pools and cron scheduling.
//!
//! - [`GameProcessor`] runs runnables on a [`ScheduledThreadPool`], isolating
//!   panics and timing every run
//! - [`CronService`] fires runnables on cron expressions through a
//!   [`RunnableRunner`]
//! - [`CancellationToken`] is a one-shot signal with ordered actions

mod cancellation;
mod cron;
mod pool;
mod priority;
mod processor;
mod rejection;
mod runnable;
mod stats;
mod wrapper;

pub use cancellation::CancellationToken;
pub use self::cron::{
    CronError, CronService, CronTrigger, JobDataMap, JobDetail, JobKey, RunnableRunner,
    ThreadPoolRunnableRunner,
};
pub use pool::{PoolConfig, ScheduledFuture, ScheduledThreadPool};
pub use priority::ThreadPriority;
pub use processor::{GameProcessor, MAX_DELAY_MS, Task};
pub use rejection::Rejection;
pub use runnable::{NamedRunnable, Runnable};
pub use stats::{RunnableStats, RunnableStatsManager};
pub use wrapper::ExecutionWrapper;
