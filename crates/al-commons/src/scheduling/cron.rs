//! Cron scheduling of runnables.
//!
//! Expressions use the six or seven field format with seconds
//! (`sec min hour day-of-month month day-of-week [year]`); `?` is accepted as
//! a synonym of `*`. Fire times are computed in local time by a dispatcher
//! thread that hands due runnables to a [`RunnableRunner`].

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use rustc_hash::FxHashMap;
use thiserror::Error;

use super::processor::GameProcessor;
use super::runnable::{Runnable, same_runnable};

static INSTANCE: OnceLock<Arc<CronService>> = OnceLock::new();

/// Errors of the cron service.
#[derive(Debug, Error)]
pub enum CronError {
    #[error("cron service is already initialized")]
    AlreadyInitialized,

    #[error("invalid cron expression \"{expression}\": {message}")]
    InvalidExpression { expression: String, message: String },

    #[error("no job {0}")]
    JobNotFound(JobKey),

    #[error("cron service is shut down")]
    Shutdown,

    #[error("can't start cron dispatcher: {0}")]
    Thread(#[from] std::io::Error),
}

/// Runs what the cron service fires.
pub trait RunnableRunner: Send + Sync {
    fn execute_runnable(&self, runnable: Arc<dyn Runnable>);

    /// Runnables flagged as long running, kept off the general pool.
    fn execute_long_running_runnable(&self, runnable: Arc<dyn Runnable>);
}

/// Runner backed by a general and a long running task processor.
pub struct ThreadPoolRunnableRunner {
    general: Arc<GameProcessor>,
    long_running: Arc<GameProcessor>,
}

impl ThreadPoolRunnableRunner {
    pub fn new(general: Arc<GameProcessor>, long_running: Arc<GameProcessor>) -> Self {
        Self {
            general,
            long_running,
        }
    }
}

impl RunnableRunner for ThreadPoolRunnableRunner {
    fn execute_runnable(&self, runnable: Arc<dyn Runnable>) {
        self.general.execute(runnable);
    }

    fn execute_long_running_runnable(&self, runnable: Arc<dyn Runnable>) {
        self.long_running.execute(runnable);
    }
}

/// Identity of a scheduled job. The group is the runnable's name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobKey {
    pub name: String,
    pub group: String,
}

impl JobKey {
    fn generate(group: &str) -> Self {
        static LAST: AtomicU64 = AtomicU64::new(0);
        static START: OnceLock<Instant> = OnceLock::new();

        let nanos = START.get_or_init(Instant::now).elapsed().as_nanos() as u64;
        let previous = LAST.fetch_max(nanos, Ordering::SeqCst);
        let nanos = if previous >= nanos {
            LAST.fetch_add(1, Ordering::SeqCst) + 1
        } else {
            nanos
        };
        Self {
            name: format!("{}_{}", Local::now().timestamp_millis(), nanos),
            group: group.to_string(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

/// Data attached to a job.
#[derive(Clone)]
pub struct JobDataMap {
    pub runnable: Arc<dyn Runnable>,
    pub cron_expression: String,
    pub long_running: bool,
}

#[derive(Clone)]
pub struct JobDetail {
    pub key: JobKey,
    pub data: JobDataMap,
}

impl fmt::Debug for JobDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDetail")
            .field("key", &self.key)
            .field("runnable", &self.data.runnable.name())
            .field("cron_expression", &self.data.cron_expression)
            .field("long_running", &self.data.long_running)
            .finish()
    }
}

/// A parsed cron expression.
#[derive(Debug, Clone)]
pub struct CronTrigger {
    expression: String,
    schedule: ::cron::Schedule,
}

impl CronTrigger {
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let normalized = expression.trim().replace('?', "*");
        let schedule =
            ::cron::Schedule::from_str(&normalized).map_err(|e| CronError::InvalidExpression {
                expression: expression.to_string(),
                message: e.to_string(),
            })?;
        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `after`.
    pub fn next_fire_time(&self, after: &DateTime<Local>) -> Option<DateTime<Local>> {
        self.schedule.after(after).next()
    }
}

struct Job {
    detail: JobDetail,
    trigger: CronTrigger,
    next: Option<DateTime<Local>>,
}

struct Inner {
    runner: Arc<dyn RunnableRunner>,
    jobs: Mutex<FxHashMap<JobKey, Job>>,
    signal: Condvar,
    shutdown: AtomicBool,
}

impl Inner {
    fn dispatch(&self) {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }

            let now = Local::now();
            let mut due = Vec::new();
            let mut finished = Vec::new();
            for (key, job) in jobs.iter_mut() {
                let Some(next) = job.next else {
                    continue;
                };
                if next <= now {
                    due.push(job.detail.data.clone());
                    job.next = job.trigger.next_fire_time(&now);
                    if job.next.is_none() {
                        finished.push(key.clone());
                    }
                }
            }
            for key in finished {
                tracing::debug!("Job {} has no further fire times", key);
                jobs.remove(&key);
            }

            if !due.is_empty() {
                drop(jobs);
                for data in due {
                    if data.long_running {
                        self.runner.execute_long_running_runnable(data.runnable);
                    } else {
                        self.runner.execute_runnable(data.runnable);
                    }
                }
                jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
                continue;
            }

            let wait = jobs
                .values()
                .filter_map(|job| job.next)
                .min()
                .map(|next| (next - now).to_std().unwrap_or(Duration::ZERO));
            jobs = match wait {
                None => self.signal.wait(jobs).unwrap_or_else(|e| e.into_inner()),
                Some(wait) => {
                    self.signal
                        .wait_timeout(jobs, wait)
                        .unwrap_or_else(|e| e.into_inner())
                        .0
                }
            };
        }
    }
}

pub struct CronService {
    inner: Arc<Inner>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl CronService {
    /// Create and publish the process-wide service.
    pub fn initialize(runner: Arc<dyn RunnableRunner>) -> Result<Arc<CronService>, CronError> {
        if INSTANCE.get().is_some() {
            return Err(CronError::AlreadyInitialized);
        }
        let service = Arc::new(Self::new(runner)?);
        INSTANCE
            .set(service.clone())
            .map_err(|_| CronError::AlreadyInitialized)?;
        tracing::info!("Cron service initialized");
        Ok(service)
    }

    /// The process-wide service, if initialized.
    pub fn instance() -> Option<Arc<CronService>> {
        INSTANCE.get().cloned()
    }

    /// A standalone service with its own dispatcher thread.
    pub fn new(runner: Arc<dyn RunnableRunner>) -> Result<Self, CronError> {
        let inner = Arc::new(Inner {
            runner,
            jobs: Mutex::default(),
            signal: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });
        let dispatcher_inner = inner.clone();
        let dispatcher = thread::Builder::new()
            .name("cron-dispatcher".to_string())
            .spawn(move || dispatcher_inner.dispatch())?;
        Ok(Self {
            inner,
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }

    fn jobs(&self) -> std::sync::MutexGuard<'_, FxHashMap<JobKey, Job>> {
        self.inner.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fire `runnable` on every match of `expression`.
    pub fn schedule(
        &self,
        runnable: Arc<dyn Runnable>,
        expression: &str,
        long_running: bool,
    ) -> Result<JobKey, CronError> {
        if self.is_shutdown() {
            return Err(CronError::Shutdown);
        }
        let trigger = CronTrigger::parse(expression)?;
        let next = trigger.next_fire_time(&Local::now());
        if next.is_none() {
            tracing::warn!("\"{}\" never fires, {} not scheduled", expression, runnable.name());
        }

        let key = JobKey::generate(runnable.name());
        let detail = JobDetail {
            key: key.clone(),
            data: JobDataMap {
                runnable,
                cron_expression: expression.to_string(),
                long_running,
            },
        };
        tracing::debug!("Scheduled {} with \"{}\"", key, expression);
        self.jobs().insert(
            key.clone(),
            Job {
                detail,
                trigger,
                next,
            },
        );
        self.inner.signal.notify_all();
        Ok(key)
    }

    /// Remove every job of `runnable`. Returns whether there was one.
    pub fn cancel(&self, runnable: &Arc<dyn Runnable>) -> bool {
        let mut jobs = self.jobs();
        let before = jobs.len();
        jobs.retain(|_, job| !same_runnable(&job.detail.data.runnable, runnable));
        let removed = before - jobs.len();
        drop(jobs);

        if removed > 0 {
            tracing::debug!("Cancelled {} jobs of {}", removed, runnable.name());
            self.inner.signal.notify_all();
        }
        removed > 0
    }

    pub fn cancel_job(&self, key: &JobKey) -> Result<(), CronError> {
        self.jobs()
            .remove(key)
            .ok_or_else(|| CronError::JobNotFound(key.clone()))?;
        self.inner.signal.notify_all();
        Ok(())
    }

    /// Scheduled runnables, each listed once.
    pub fn runnables(&self) -> Vec<Arc<dyn Runnable>> {
        let mut runnables: Vec<Arc<dyn Runnable>> = Vec::new();
        for job in self.jobs().values() {
            let runnable = &job.detail.data.runnable;
            if !runnables.iter().any(|r| same_runnable(r, runnable)) {
                runnables.push(runnable.clone());
            }
        }
        runnables
    }

    pub fn job_details(&self) -> Vec<JobDetail> {
        let mut details: Vec<_> = self.jobs().values().map(|j| j.detail.clone()).collect();
        details.sort_by(|a, b| a.key.cmp(&b.key));
        details
    }

    pub fn job_triggers(&self, key: &JobKey) -> Result<Vec<CronTrigger>, CronError> {
        self.jobs()
            .get(key)
            .map(|job| vec![job.trigger.clone()])
            .ok_or_else(|| CronError::JobNotFound(key.clone()))
    }

    /// Next fire time of a job.
    pub fn next_fire_time(&self, key: &JobKey) -> Option<DateTime<Local>> {
        self.jobs().get(key).and_then(|job| job.next)
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::SeqCst)
    }

    /// Stop firing and drop all jobs.
    pub fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        self.jobs().clear();
        self.inner.signal.notify_all();

        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle
            && handle.thread().id() != thread::current().id()
            && handle.join().is_err()
        {
            tracing::error!("Cron dispatcher panicked");
        }
        tracing::info!("Cron service shut down");
    }
}

impl Drop for CronService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
