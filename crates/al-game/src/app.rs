//! Application context: the long-lived services of a running server.

use std::path::PathBuf;
use std::sync::Arc;

use al_commons::config::CommonsConfig;
use al_commons::dao::{DaoManager, DatabaseInfo};
use al_commons::scheduling::{
    CronService, GameProcessor, NamedRunnable, RunnableStatsManager, ScheduledFuture,
    ThreadPoolRunnableRunner,
};
use al_commons::scripting::{
    CompilerRegistry, DEFAULT_COMPILER, NativeScriptCompiler, NativeSymbols, RustcCompiler,
    RustcConfig, ScriptCompiler, ScriptContext, ScriptManager,
};

/// Period of the execution statistics dump.
const STATS_DUMP_PERIOD_MS: i64 = 10 * 60 * 1000;

/// Services are created in field order and shut down in reverse.
pub struct AppContext {
    config: CommonsConfig,
    general: Arc<GameProcessor>,
    scheduled: Arc<GameProcessor>,
    /// Set when execution statistics are collected.
    stats_dump: Option<ScheduledFuture>,
    long_running: Arc<GameProcessor>,
    cron: Arc<CronService>,
    daos: DaoManager,
    scripts: ScriptManager,
}

impl AppContext {
    pub fn new(config: CommonsConfig) -> anyhow::Result<Self> {
        let pools = &config.threadpool;
        let processor = |name: &str, threads: usize| {
            GameProcessor::new(
                pools.pool(name, threads),
                pools.max_execution_time(),
                pools.collect_stats,
            )
        };
        let general = Arc::new(processor("general", pools.general_threads)?);
        let scheduled = Arc::new(processor("scheduled", pools.scheduled_threads)?);
        let stats_dump = schedule_stats_dump(&scheduled, pools.collect_stats, STATS_DUMP_PERIOD_MS);
        let long_running = Arc::new(processor("long-running", pools.long_running_threads)?);

        let runner = ThreadPoolRunnableRunner::new(general.clone(), long_running.clone());
        let cron = CronService::initialize(Arc::new(runner))?;

        let daos = DaoManager::new(DatabaseInfo::from(&config.database));
        let scripts = ScriptManager::with_registry(Arc::new(compiler_registry(&config)));

        tracing::info!(
            "Application context ready: {} general, {} scheduled, {} long running threads",
            pools.general_threads,
            pools.scheduled_threads,
            pools.long_running_threads
        );

        Ok(Self {
            config,
            general,
            scheduled,
            stats_dump,
            long_running,
            cron,
            daos,
            scripts,
        })
    }

    pub fn config(&self) -> &CommonsConfig {
        &self.config
    }

    /// Load the configured script descriptor.
    pub fn load_scripts(&self) -> anyhow::Result<()> {
        let descriptor = &self.config.scripting.descriptor;
        self.scripts.load(descriptor)?;
        tracing::info!(
            "Loaded {} root script contexts, {} cron jobs",
            self.scripts.script_contexts().len(),
            self.cron.job_details().len()
        );
        Ok(())
    }

    /// Roots of every loaded context, children included.
    pub fn script_roots(&self) -> Vec<PathBuf> {
        let mut roots = Vec::new();
        for context in self.scripts.script_contexts() {
            collect_roots(&context, &mut roots);
        }
        roots
    }

    /// Reload the contexts containing the changed paths, each one once.
    pub fn reload_changed(&self, paths: &[PathBuf]) {
        let reloaded = self.scripts.reload_changed(paths);
        if !reloaded.is_empty() {
            tracing::info!("Reloaded {} script contexts", reloaded.len());
        }
    }

    /// Stop everything in reverse creation order.
    pub fn shutdown(&self) {
        tracing::info!("Shutting down");
        self.scripts.shutdown();
        self.daos.shutdown();
        self.cron.shutdown();
        self.long_running.shutdown();
        if let Some(stats_dump) = &self.stats_dump {
            stats_dump.cancel(false);
        }
        self.scheduled.shutdown();
        self.general.shutdown();
    }
}

fn collect_roots(context: &Arc<ScriptContext>, roots: &mut Vec<PathBuf>) {
    roots.push(context.root().to_path_buf());
    for child in context.children() {
        collect_roots(&child, roots);
    }
}

/// Periodically log the execution statistics, when they are collected.
fn schedule_stats_dump(
    scheduled: &GameProcessor,
    collect_stats: bool,
    period_ms: i64,
) -> Option<ScheduledFuture> {
    if !collect_stats {
        return None;
    }
    let dump = NamedRunnable::new("al_game.StatsDump", || RunnableStatsManager::global().dump());
    Some(scheduled.schedule_at_fixed_rate(dump, period_ms, period_ms))
}

/// `rustc` built with the scripting settings, plus the in-process compiler.
fn compiler_registry(config: &CommonsConfig) -> CompilerRegistry {
    let mut rustc = RustcConfig {
        opt_level: config.scripting.opt_level,
        ..RustcConfig::default()
    };
    if let Some(build_dir) = &config.scripting.build_dir {
        rustc.build_dir = build_dir.clone();
    }

    let registry = CompilerRegistry::empty();
    registry.register(DEFAULT_COMPILER, move || {
        Ok(Box::new(RustcCompiler::with_config(rustc.clone())?) as Box<dyn ScriptCompiler>)
    });
    registry.register(NativeScriptCompiler::NAME, || {
        Ok(Box::new(NativeScriptCompiler::new(NativeSymbols::global())) as Box<dyn ScriptCompiler>)
    });
    registry
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use al_commons::scheduling::PoolConfig;

    use super::*;

    fn scheduled() -> GameProcessor {
        GameProcessor::new(PoolConfig::new("test-scheduled", 1), Duration::ZERO, true).unwrap()
    }

    #[test]
    fn test_stats_dump_only_when_collecting() {
        let scheduled = scheduled();
        assert!(schedule_stats_dump(&scheduled, false, 10).is_none());

        let dump = schedule_stats_dump(&scheduled, true, 10).unwrap();
        std::thread::sleep(Duration::from_millis(200));
        assert!(!dump.is_done());
        let runs = RunnableStatsManager::global()
            .stats("al_game.StatsDump")
            .map_or(0, |stats| stats.count);
        assert!(runs >= 2, "only {} dumps", runs);

        assert!(dump.cancel(false));
        scheduled.shutdown();
    }
}
