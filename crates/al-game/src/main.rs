//! Aion Lightning game server.

mod app;
mod watch;

use std::path::PathBuf;

use al_commons::config::CommonsConfig;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use app::AppContext;
use watch::ScriptWatcher;

#[derive(Parser)]
#[command(name = "al-game")]
#[command(about = "Aion Lightning game server", version)]
struct Cli {
    /// Configuration file (TOML); defaults plus AL_* environment overrides when absent
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Script descriptor, overriding the configured one
    #[arg(short, long)]
    descriptor: Option<PathBuf>,

    /// Don't reload scripts when their files change
    #[arg(long)]
    no_watch: bool,

    /// Load the scripts, then shut down instead of serving
    #[arg(long)]
    check: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => CommonsConfig::load(path)?,
        None => CommonsConfig::from_env()?,
    };
    if let Some(descriptor) = cli.descriptor {
        config.scripting.descriptor = descriptor;
    }
    if cli.no_watch || cli.check {
        config.scripting.watch = false;
    }

    init_logging(&config, cli.verbose)?;

    let app = AppContext::new(config)?;
    let result = serve(&app, cli.check).await;
    app.shutdown();
    result
}

fn init_logging(config: &CommonsConfig, verbose: bool) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.logging.filter)?,
    };
    let filter = if verbose {
        filter.add_directive(tracing::Level::DEBUG.into())
    } else {
        filter
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .init();
    Ok(())
}

async fn serve(app: &AppContext, check: bool) -> anyhow::Result<()> {
    app.load_scripts()?;
    if check {
        return Ok(());
    }

    let mut watcher = if app.config().scripting.watch {
        Some(ScriptWatcher::new(&app.script_roots())?)
    } else {
        None
    };

    tracing::info!("Server started (Ctrl+C to stop)");
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                tracing::info!("Received Ctrl+C");
                return Ok(());
            }
            Some(paths) = next_change(&mut watcher) => app.reload_changed(&paths),
        }
    }
}

async fn next_change(watcher: &mut Option<ScriptWatcher>) -> Option<Vec<PathBuf>> {
    match watcher {
        Some(watcher) => watcher.recv().await,
        None => std::future::pending().await,
    }
}
