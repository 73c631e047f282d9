use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

type CancelAction = Box<dyn FnOnce() + Send>;

/// One-shot cancellation signal with actions.
///
/// Actions run in registration order exactly once, on the thread that
/// cancels. An action added after cancellation runs immediately on the adding
/// thread.
#[derive(Default)]
pub struct CancellationToken {
    cancelled: AtomicBool,
    actions: Mutex<VecDeque<CancelAction>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn add_cancel_action(&self, action: impl FnOnce() + Send + 'static) {
        {
            let mut actions = self.actions.lock().unwrap_or_else(|e| e.into_inner());
            if !self.is_cancelled() {
                actions.push_back(Box::new(action));
                return;
            }
        }
        action();
    }

    /// Returns false if the token was already cancelled.
    pub fn cancel(&self) -> bool {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        let actions = std::mem::take(&mut *self.actions.lock().unwrap_or_else(|e| e.into_inner()));
        for action in actions {
            action();
        }
        true
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_actions_run_once_in_order() {
        let token = CancellationToken::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            token.add_cancel_action(move || log.lock().unwrap().push(i));
        }

        assert!(!token.is_cancelled());
        assert!(token.cancel());
        assert!(!token.cancel());
        assert!(token.is_cancelled());
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_late_action_runs_immediately() {
        let token = CancellationToken::new();
        token.cancel();
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        token.add_cancel_action(move || sink.lock().unwrap().push("late"));
        assert_eq!(*log.lock().unwrap(), vec!["late"]);
    }

    #[test]
    fn test_concurrent_cancel_runs_actions_once() {
        let token = Arc::new(CancellationToken::new());
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = count.clone();
        token.add_cancel_action(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let token = token.clone();
                std::thread::spawn(move || token.cancel())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
