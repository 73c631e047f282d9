//! Thread pool, rejection and cron tests across the scheduling layer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use al_commons::scheduling::{
    CancellationToken, CronError, CronService, GameProcessor, MAX_DELAY_MS, NamedRunnable,
    PoolConfig, Rejection, Runnable, RunnableStatsManager, ScheduledThreadPool, Task,
    ThreadPoolRunnableRunner, ThreadPriority,
};

fn processor(name: &str, threads: usize) -> Arc<GameProcessor> {
    Arc::new(GameProcessor::new(PoolConfig::new(name, threads), Duration::ZERO, true).unwrap())
}

/// Fills a single-thread, single-slot pool so the next submission is
/// rejected. Returns the pool and the sender releasing the blocked worker.
fn saturated_pool(name: &str) -> (Arc<ScheduledThreadPool>, mpsc::Sender<()>) {
    let pool = Arc::new(
        ScheduledThreadPool::new(PoolConfig {
            queue_capacity: 1,
            ..PoolConfig::new(name, 1)
        })
        .unwrap(),
    );
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let (started_tx, started_rx) = mpsc::channel();
    pool.execute(move || {
        started_tx.send(()).unwrap();
        let _ = release_rx.recv();
    });
    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(pool.execute(|| {}).is_none());
    (pool, release_tx)
}

#[test]
fn test_rejection_depends_on_submitter_priority() {
    let (pool, release) = saturated_pool("test-rejection");

    let normal = pool.clone();
    let low = thread::spawn(move || {
        ThreadPriority::set(ThreadPriority::NORM);
        let me = thread::current().id();
        let ran_on = Arc::new(Mutex::new(None));
        let slot = ran_on.clone();
        let rejection = normal.execute(move || {
            *slot.lock().unwrap() = Some(thread::current().id());
        });
        (rejection, *ran_on.lock().unwrap() == Some(me))
    })
    .join()
    .unwrap();
    assert_eq!(low, (Some(Rejection::RanInline), true));

    let high = pool.clone();
    let (tx, rx) = mpsc::channel();
    let rejection = thread::spawn(move || {
        ThreadPriority::set(ThreadPriority::MAX);
        high.execute(move || {
            tx.send(ThreadPriority::current()).unwrap();
        })
    })
    .join()
    .unwrap();
    assert_eq!(rejection, Some(Rejection::Spawned));
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        ThreadPriority::MAX
    );

    release.send(()).unwrap();
    pool.shutdown();
    assert_eq!(pool.execute(|| {}), Some(Rejection::Dropped));
}

#[test]
fn test_processor_collects_stats_and_survives_panics() {
    let processor = processor("test-stats", 2);
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);

    processor.execute(NamedRunnable::new("test.scheduling.Panics", || panic!("boom")));
    processor.execute(NamedRunnable::new("test.scheduling.Counted", move || {
        tx.lock().unwrap().send(()).unwrap();
    }));
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    thread::sleep(Duration::from_millis(50));

    let stats = RunnableStatsManager::global();
    assert_eq!(stats.stats("test.scheduling.Counted").unwrap().count, 1);
    assert_eq!(stats.stats("test.scheduling.Panics").unwrap().count, 1);
    processor.shutdown();
}

#[test]
fn test_clamping_asymmetry() {
    let processor = processor("test-clamp", 1);
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let runnable: Arc<dyn Runnable> = NamedRunnable::new("test.scheduling.Clamped", move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    // Plain scheduling clamps a negative delay to zero and runs.
    processor.schedule(runnable.clone(), -500);
    // The task variant refuses instead.
    let task = Task::new(runnable);
    assert!(!processor.schedule_task(&task, -500));
    assert!(task.future().is_none());

    thread::sleep(Duration::from_millis(200));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_too_long_delay_is_clamped_not_refused() {
    let processor = processor("test-clamp-max", 1);
    let runnable: Arc<dyn Runnable> = NamedRunnable::new("test.scheduling.Far", || {});

    // Plain scheduling clamps to the largest delay and stays pending.
    let future = processor.schedule(runnable.clone(), MAX_DELAY_MS + 1);
    assert!(!future.is_cancelled());
    assert!(!future.is_done());

    // The task variant refuses the same delay.
    let task = Task::new(runnable);
    assert!(!processor.schedule_task(&task, MAX_DELAY_MS + 1));
    assert!(task.future().is_none());
    assert!(processor.schedule_task(&task, MAX_DELAY_MS));
    assert!(task.future().is_some());

    assert!(future.cancel(false));
    assert!(future.is_done());
    processor.shutdown();
}

#[test]
fn test_cancellation_token_cancels_scheduled_work() {
    let processor = processor("test-token", 1);
    let token = Arc::new(CancellationToken::new());
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let future = processor.schedule_at_fixed_rate(
        NamedRunnable::new("test.scheduling.Periodic", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
        0,
        10,
    );
    let handle = future.clone();
    token.add_cancel_action(move || {
        handle.cancel(false);
    });

    thread::sleep(Duration::from_millis(100));
    assert!(token.cancel());
    assert!(future.is_cancelled());
    let stopped_at = runs.load(Ordering::SeqCst);
    assert!(stopped_at > 0);

    thread::sleep(Duration::from_millis(100));
    assert!(runs.load(Ordering::SeqCst) <= stopped_at + 1);
}

#[test]
fn test_cron_service_singleton_with_pool_runner() {
    let general = processor("test-cron-general", 1);
    let long_running = processor("test-cron-long", 1);
    let runner = Arc::new(ThreadPoolRunnableRunner::new(general, long_running));

    let cron = CronService::initialize(runner.clone()).unwrap();
    assert!(Arc::ptr_eq(&cron, &CronService::instance().unwrap()));
    assert!(matches!(
        CronService::initialize(runner),
        Err(CronError::AlreadyInitialized)
    ));

    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let runnable: Arc<dyn Runnable> = NamedRunnable::new("test.scheduling.Cron", move || {
        let _ = tx.lock().unwrap().send(thread::current().name().map(str::to_string));
    });
    let key = cron.schedule(runnable.clone(), "* * * * * ?", true).unwrap();
    assert_eq!(key.group, "test.scheduling.Cron");

    let thread_name = rx.recv_timeout(Duration::from_secs(3)).unwrap().unwrap();
    assert!(thread_name.starts_with("test-cron-long"), "ran on {}", thread_name);

    assert!(cron.cancel(&runnable));
    assert!(cron.runnables().is_empty());
}
