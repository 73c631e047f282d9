//! Fixed-size thread pool with delayed and fixed-rate scheduling.
//!
//! Workers take jobs from a bounded channel. A single timer thread keeps the
//! delayed jobs in a heap and hands them to the workers when due; jobs the
//! channel can't take go through the rejection policy.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError};

use super::priority::ThreadPriority;
use super::rejection::{self, Job, Rejection};

/// Pool settings.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Thread name prefix.
    pub name: String,
    pub threads: usize,
    pub queue_capacity: usize,
    /// Priority given to the worker and timer threads.
    pub priority: u8,
}

impl PoolConfig {
    pub fn new(name: impl Into<String>, threads: usize) -> Self {
        Self {
            name: name.into(),
            threads: threads.max(1),
            queue_capacity: 4096,
            priority: ThreadPriority::NORM,
        }
    }
}

#[derive(Debug, Default)]
struct FutureState {
    cancelled: AtomicBool,
    done: AtomicBool,
}

/// Handle to a delayed or periodic job.
#[derive(Debug, Clone)]
pub struct ScheduledFuture {
    state: Arc<FutureState>,
}

impl ScheduledFuture {
    fn new() -> Self {
        Self {
            state: Arc::default(),
        }
    }

    /// Prevent further runs. A run in progress is never interrupted, so
    /// `may_interrupt` has no effect. Returns false if the job already
    /// completed or was cancelled.
    pub fn cancel(&self, _may_interrupt: bool) -> bool {
        if self.state.done.load(Ordering::SeqCst) {
            return false;
        }
        !self.state.cancelled.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Completed or cancelled. Periodic jobs are only ever done by
    /// cancellation.
    pub fn is_done(&self) -> bool {
        self.is_cancelled() || self.state.done.load(Ordering::SeqCst)
    }
}

enum Payload {
    Once(Mutex<Option<Job>>),
    Periodic {
        body: Arc<dyn Fn() + Send + Sync>,
        period: Duration,
    },
}

struct TimerEntry {
    at: Instant,
    seq: u64,
    payload: Arc<Payload>,
    state: Arc<FutureState>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.at.cmp(&other.at).then(self.seq.cmp(&other.seq))
    }
}

#[derive(Default)]
struct TimerQueue {
    heap: BinaryHeap<Reverse<TimerEntry>>,
    seq: u64,
}

struct Shared {
    name: String,
    shutdown: AtomicBool,
    sender: Mutex<Option<Sender<Job>>>,
    timer: Mutex<TimerQueue>,
    timer_signal: Condvar,
}

impl Shared {
    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn submit(&self, job: Job) -> Option<Rejection> {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let Some(sender) = sender else {
            return Some(rejection::reject(&self.name, job, true));
        };
        match sender.try_send(job) {
            Ok(()) => None,
            Err(TrySendError::Full(job)) => {
                Some(rejection::reject(&self.name, job, self.is_shutdown()))
            }
            Err(TrySendError::Disconnected(job)) => Some(rejection::reject(&self.name, job, true)),
        }
    }

    fn arm(&self, at: Instant, payload: Arc<Payload>, state: Arc<FutureState>) {
        let mut queue = self.timer.lock().unwrap_or_else(|e| e.into_inner());
        let seq = queue.seq;
        queue.seq += 1;
        queue.heap.push(Reverse(TimerEntry {
            at,
            seq,
            payload,
            state,
        }));
        self.timer_signal.notify_one();
    }

    fn run_timer(self: &Arc<Self>) {
        let mut queue = self.timer.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if self.is_shutdown() {
                return;
            }
            let now = Instant::now();
            let next = queue.heap.peek().map(|Reverse(entry)| entry.at);
            queue = match next {
                None => self
                    .timer_signal
                    .wait(queue)
                    .unwrap_or_else(|e| e.into_inner()),
                Some(at) if at > now => {
                    self.timer_signal
                        .wait_timeout(queue, at - now)
                        .unwrap_or_else(|e| e.into_inner())
                        .0
                }
                Some(_) => {
                    let entry = queue.heap.pop();
                    drop(queue);
                    if let Some(Reverse(entry)) = entry {
                        self.fire(entry);
                    }
                    self.timer.lock().unwrap_or_else(|e| e.into_inner())
                }
            };
        }
    }

    fn fire(self: &Arc<Self>, entry: TimerEntry) {
        if entry.state.cancelled.load(Ordering::SeqCst) {
            return;
        }
        match entry.payload.as_ref() {
            Payload::Once(job) => {
                let Some(job) = job.lock().unwrap_or_else(|e| e.into_inner()).take() else {
                    return;
                };
                let state = entry.state.clone();
                self.submit(Box::new(move || {
                    if !state.cancelled.load(Ordering::SeqCst) {
                        job();
                    }
                    state.done.store(true, Ordering::SeqCst);
                }));
            }
            Payload::Periodic { body, period } => {
                // The next run is armed only once this one has returned, at
                // the planned time or right away if the run overran it.
                let body = body.clone();
                let next = entry.at + *period;
                let payload = entry.payload.clone();
                let state = entry.state;
                let shared = Arc::downgrade(self);
                self.submit(Box::new(move || {
                    if state.cancelled.load(Ordering::SeqCst) {
                        return;
                    }
                    body();
                    if let Some(shared) = shared.upgrade()
                        && !shared.is_shutdown()
                        && !state.cancelled.load(Ordering::SeqCst)
                    {
                        shared.arm(next.max(Instant::now()), payload, state);
                    }
                }));
            }
        }
    }
}

pub struct ScheduledThreadPool {
    shared: Arc<Shared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl ScheduledThreadPool {
    /// Start the pool with all its worker threads.
    pub fn new(config: PoolConfig) -> std::io::Result<Self> {
        let (sender, receiver) = crossbeam_channel::bounded::<Job>(config.queue_capacity.max(1));
        let shared = Arc::new(Shared {
            name: config.name.clone(),
            shutdown: AtomicBool::new(false),
            sender: Mutex::new(Some(sender)),
            timer: Mutex::default(),
            timer_signal: Condvar::new(),
        });

        let mut threads = Vec::with_capacity(config.threads + 1);
        for index in 0..config.threads {
            let receiver = receiver.clone();
            let priority = config.priority;
            threads.push(
                thread::Builder::new()
                    .name(format!("{}-{}", config.name, index))
                    .spawn(move || worker_loop(receiver, priority))?,
            );
        }

        let timer_shared = shared.clone();
        let priority = config.priority;
        threads.push(
            thread::Builder::new()
                .name(format!("{}-timer", config.name))
                .spawn(move || {
                    ThreadPriority::set(priority);
                    timer_shared.run_timer();
                })?,
        );

        tracing::debug!(
            "Started pool {} with {} threads",
            config.name,
            config.threads
        );
        Ok(Self {
            shared,
            threads: Mutex::new(threads),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Run a job as soon as a worker is free. Returns how it was rejected, if
    /// it was.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) -> Option<Rejection> {
        if self.shared.is_shutdown() {
            return Some(rejection::reject(&self.shared.name, Box::new(job), true));
        }
        self.shared.submit(Box::new(job))
    }

    /// Run a job once after `delay`.
    pub fn schedule(&self, job: impl FnOnce() + Send + 'static, delay: Duration) -> ScheduledFuture {
        let future = ScheduledFuture::new();
        if self.shared.is_shutdown() {
            future.state.cancelled.store(true, Ordering::SeqCst);
            return future;
        }
        self.shared.arm(
            Instant::now() + delay,
            Arc::new(Payload::Once(Mutex::new(Some(Box::new(job))))),
            future.state.clone(),
        );
        future
    }

    /// Run a job after `delay`, then every `period` measured from the
    /// planned start of the previous run. Runs never overlap: a run that
    /// overruns its period delays the next one until it returns.
    pub fn schedule_at_fixed_rate(
        &self,
        job: impl Fn() + Send + Sync + 'static,
        delay: Duration,
        period: Duration,
    ) -> ScheduledFuture {
        let future = ScheduledFuture::new();
        if self.shared.is_shutdown() {
            future.state.cancelled.store(true, Ordering::SeqCst);
            return future;
        }
        self.shared.arm(
            Instant::now() + delay,
            Arc::new(Payload::Periodic {
                body: Arc::new(job),
                period: period.max(Duration::from_millis(1)),
            }),
            future.state.clone(),
        );
        future
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }

    /// Stop accepting work, drop pending timers, let the workers drain the
    /// queue and wait for them. Threads of the pool itself are not joined.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut queue = self.shared.timer.lock().unwrap_or_else(|e| e.into_inner());
            for Reverse(entry) in queue.heap.drain() {
                entry.state.cancelled.store(true, Ordering::SeqCst);
            }
            self.shared.timer_signal.notify_all();
        }
        self.shared
            .sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        let current = thread::current().id();
        let threads = std::mem::take(&mut *self.threads.lock().unwrap_or_else(|e| e.into_inner()));
        for handle in threads {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::error!("A thread of pool {} panicked", self.shared.name);
            }
        }
        tracing::debug!("Pool {} shut down", self.shared.name);
    }
}

impl Drop for ScheduledThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(receiver: Receiver<Job>, priority: u8) {
    ThreadPriority::set(priority);
    while let Ok(job) = receiver.recv() {
        job();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    fn pool(threads: usize) -> ScheduledThreadPool {
        ScheduledThreadPool::new(PoolConfig::new("test-pool", threads)).unwrap()
    }

    #[test]
    fn test_execute() {
        let pool = pool(2);
        let (tx, rx) = mpsc::channel();
        assert!(pool.execute(move || tx.send(42).unwrap()).is_none());
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
    }

    #[test]
    fn test_schedule_runs_after_delay() {
        let pool = pool(1);
        let (tx, rx) = mpsc::channel();
        let start = Instant::now();
        let future = pool.schedule(move || tx.send(start.elapsed()).unwrap(), Duration::from_millis(50));

        let elapsed = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(elapsed >= Duration::from_millis(50));
        thread::sleep(Duration::from_millis(20));
        assert!(future.is_done());
        assert!(!future.cancel(false));
    }

    #[test]
    fn test_cancelled_job_never_runs() {
        let pool = pool(1);
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let future = pool.schedule(move || flag.store(true, Ordering::SeqCst), Duration::from_millis(100));

        assert!(future.cancel(true));
        assert!(!future.cancel(true));
        assert!(future.is_cancelled());
        thread::sleep(Duration::from_millis(200));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_fixed_rate_repeats_until_cancelled() {
        let pool = pool(2);
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let future = pool.schedule_at_fixed_rate(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            Duration::ZERO,
            Duration::from_millis(10),
        );

        thread::sleep(Duration::from_millis(150));
        assert!(future.cancel(false));
        let after_cancel = runs.load(Ordering::SeqCst);
        assert!(after_cancel >= 3, "only {} runs", after_cancel);

        thread::sleep(Duration::from_millis(50));
        assert!(runs.load(Ordering::SeqCst) <= after_cancel + 1);
    }

    #[test]
    fn test_fixed_rate_runs_never_overlap() {
        let pool = pool(4);
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(AtomicUsize::new(0));
        let (active_c, max_c, runs_c) = (active.clone(), max_active.clone(), runs.clone());
        let future = pool.schedule_at_fixed_rate(
            move || {
                let now = active_c.fetch_add(1, Ordering::SeqCst) + 1;
                max_c.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(60));
                active_c.fetch_sub(1, Ordering::SeqCst);
                runs_c.fetch_add(1, Ordering::SeqCst);
            },
            Duration::ZERO,
            Duration::from_millis(10),
        );

        thread::sleep(Duration::from_millis(300));
        future.cancel(false);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(max_active.load(Ordering::SeqCst), 1);
        assert!(runs.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn test_full_queue_runs_inline() {
        let pool = Arc::new(
            ScheduledThreadPool::new(PoolConfig {
                queue_capacity: 1,
                ..PoolConfig::new("test-full", 1)
            })
            .unwrap(),
        );
        let (block_tx, block_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel();
        pool.execute(move || {
            started_tx.send(()).unwrap();
            let _ = block_rx.recv();
        });
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        // Fills the only queue slot.
        assert!(pool.execute(|| {}).is_none());

        let submitter = pool.clone();
        let rejection = thread::spawn(move || {
            ThreadPriority::set(ThreadPriority::NORM);
            submitter.execute(|| {})
        })
        .join()
        .unwrap();
        assert_eq!(rejection, Some(Rejection::RanInline));

        block_tx.send(()).unwrap();
        pool.shutdown();
    }

    #[test]
    fn test_shutdown_drops_new_work() {
        let pool = pool(1);
        pool.shutdown();
        assert!(pool.is_shutdown());
        assert_eq!(pool.execute(|| panic!("must not run")), Some(Rejection::Dropped));
        assert!(pool.schedule(|| {}, Duration::ZERO).is_cancelled());
    }
}
