//! What happens to work a pool cannot queue.

use std::thread;

use super::priority::ThreadPriority;

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fate of a rejected job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The pool is shut down; the job is dropped.
    Dropped,
    /// Submitted from a high priority thread; run on a new thread of the same
    /// priority.
    Spawned,
    /// Run on the submitting thread.
    RanInline,
}

/// Handle a job rejected by `pool`.
pub(crate) fn reject(pool: &str, job: Job, shut_down: bool) -> Rejection {
    if shut_down {
        tracing::debug!("{} is shut down, dropping task", pool);
        return Rejection::Dropped;
    }

    let priority = ThreadPriority::current();
    tracing::warn!(
        "Task rejected by {} (submitter priority {})",
        pool,
        priority
    );

    if priority > ThreadPriority::NORM {
        let spawned = thread::Builder::new()
            .name(format!("{}-rejected", pool))
            .spawn(move || {
                ThreadPriority::set(priority);
                job();
            });
        match spawned {
            Ok(_) => Rejection::Spawned,
            Err(e) => {
                tracing::error!("Can't start thread for rejected task of {}: {}", pool, e);
                Rejection::Dropped
            }
        }
    } else {
        job();
        Rejection::RanInline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU8, Ordering};
    use std::sync::mpsc;

    #[test]
    fn test_dropped_when_shut_down() {
        let outcome = reject("test", Box::new(|| panic!("must not run")), true);
        assert_eq!(outcome, Rejection::Dropped);
    }

    #[test]
    fn test_normal_priority_runs_inline() {
        let (tx, rx) = mpsc::channel();
        let caller = thread::current().id();
        thread::spawn(move || {
            ThreadPriority::set(ThreadPriority::NORM);
            let outcome = reject(
                "test",
                Box::new(move || {
                    tx.send(thread::current().id()).unwrap();
                }),
                false,
            );
            assert_eq!(outcome, Rejection::RanInline);
        })
        .join()
        .unwrap();
        assert_ne!(rx.recv().unwrap(), caller);
    }

    #[test]
    fn test_high_priority_spawns_with_same_priority() {
        let seen = Arc::new(AtomicU8::new(0));
        let (tx, rx) = mpsc::channel();
        let seen_by_job = seen.clone();
        let submitter = thread::spawn(move || {
            ThreadPriority::set(7);
            let me = thread::current().id();
            let outcome = reject(
                "test",
                Box::new(move || {
                    seen_by_job.store(ThreadPriority::current(), Ordering::SeqCst);
                    tx.send(thread::current().id() != me).unwrap();
                }),
                false,
            );
            assert_eq!(outcome, Rejection::Spawned);
        });
        submitter.join().unwrap();

        assert!(rx.recv().unwrap(), "job ran on the submitting thread");
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }
}
