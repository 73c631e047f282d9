//! Execution time statistics per runnable name.

use std::sync::{LazyLock, Mutex};
use std::time::Duration;

use rustc_hash::FxHashMap;

static GLOBAL: LazyLock<RunnableStatsManager> = LazyLock::new(RunnableStatsManager::new);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunnableStats {
    pub count: u64,
    pub total: Duration,
    pub min: Duration,
    pub max: Duration,
}

impl RunnableStats {
    pub fn average(&self) -> Duration {
        match self.count {
            0 => Duration::ZERO,
            n => self.total / n as u32,
        }
    }

    fn record(&mut self, time: Duration) {
        if self.count == 0 || time < self.min {
            self.min = time;
        }
        if time > self.max {
            self.max = time;
        }
        self.count += 1;
        self.total += time;
    }
}

#[derive(Default)]
pub struct RunnableStatsManager {
    stats: Mutex<FxHashMap<String, RunnableStats>>,
}

impl RunnableStatsManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> &'static RunnableStatsManager {
        &GLOBAL
    }

    pub fn add_time(&self, name: &str, time: Duration) {
        self.stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(name.to_string())
            .or_default()
            .record(time);
    }

    pub fn stats(&self, name: &str) -> Option<RunnableStats> {
        self.stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .copied()
    }

    /// All stats, slowest total first.
    pub fn snapshot(&self) -> Vec<(String, RunnableStats)> {
        let mut all: Vec<_> = self
            .stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(name, stats)| (name.clone(), *stats))
            .collect();
        all.sort_by(|a, b| b.1.total.cmp(&a.1.total).then_with(|| a.0.cmp(&b.0)));
        all
    }

    /// Log every entry at info level.
    pub fn dump(&self) {
        for (name, stats) in self.snapshot() {
            tracing::info!(
                "{}: count={} avg={}ms min={}ms max={}ms total={}ms",
                name,
                stats.count,
                stats.average().as_millis(),
                stats.min.as_millis(),
                stats.max.as_millis(),
                stats.total.as_millis()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_min_max_avg() {
        let manager = RunnableStatsManager::new();
        manager.add_time("task", Duration::from_millis(10));
        manager.add_time("task", Duration::from_millis(30));

        let stats = manager.stats("task").unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.min, Duration::from_millis(10));
        assert_eq!(stats.max, Duration::from_millis(30));
        assert_eq!(stats.average(), Duration::from_millis(20));
        assert!(manager.stats("other").is_none());
    }
}
