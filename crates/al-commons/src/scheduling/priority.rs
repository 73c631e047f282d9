//! Per-thread scheduling priority.
//!
//! Threads carry no portable OS priority, so the value is a thread-local set by
//! pool thread factories and read by the rejection policy.

use std::cell::Cell;

thread_local! {
    static PRIORITY: Cell<u8> = const { Cell::new(ThreadPriority::NORM) };
}

pub struct ThreadPriority;

impl ThreadPriority {
    pub const MIN: u8 = 1;
    pub const NORM: u8 = 5;
    pub const MAX: u8 = 10;

    /// Priority of the current thread.
    pub fn current() -> u8 {
        PRIORITY.with(Cell::get)
    }

    /// Set the current thread's priority, clamped into `MIN..=MAX`.
    pub fn set(priority: u8) {
        PRIORITY.with(|p| p.set(priority.clamp(Self::MIN, Self::MAX)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_default_and_clamp() {
        thread::spawn(|| {
            assert_eq!(ThreadPriority::current(), ThreadPriority::NORM);
            ThreadPriority::set(42);
            assert_eq!(ThreadPriority::current(), ThreadPriority::MAX);
            ThreadPriority::set(0);
            assert_eq!(ThreadPriority::current(), ThreadPriority::MIN);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_is_per_thread() {
        ThreadPriority::set(ThreadPriority::MAX);
        let other = thread::spawn(ThreadPriority::current).join().unwrap();
        assert_eq!(other, ThreadPriority::NORM);
        ThreadPriority::set(ThreadPriority::NORM);
    }
}
