//! Watches script roots and reports changed files in debounced batches.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify_debouncer_mini::{DebounceEventResult, Debouncer, new_debouncer, notify::RecursiveMode};
use tokio::sync::mpsc;

const DEBOUNCE: Duration = Duration::from_millis(500);

pub struct ScriptWatcher {
    /// Kept alive to keep watching.
    _debouncer: Debouncer<notify::RecommendedWatcher>,
    rx: mpsc::UnboundedReceiver<Vec<PathBuf>>,
}

impl ScriptWatcher {
    /// Watch `roots` recursively. Roots nested in another watched root are
    /// covered by it.
    pub fn new(roots: &[PathBuf]) -> anyhow::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut debouncer = new_debouncer(DEBOUNCE, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    let paths: Vec<PathBuf> = events
                        .into_iter()
                        .map(|event| event.path)
                        .filter(|path| !is_hidden(path))
                        .collect();
                    if !paths.is_empty() {
                        let _ = tx.send(paths);
                    }
                }
                Err(e) => tracing::warn!("Script watch error: {}", e),
            }
        })?;

        for root in outermost(roots) {
            debouncer.watcher().watch(&root, RecursiveMode::Recursive)?;
            tracing::info!("Watching script root {}", root.display());
        }

        Ok(Self {
            _debouncer: debouncer,
            rx,
        })
    }

    /// Next batch of changed paths.
    pub async fn recv(&mut self) -> Option<Vec<PathBuf>> {
        self.rx.recv().await
    }
}

/// Editor swap and backup files.
fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') || n.ends_with('~'))
}

fn outermost(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut sorted = roots.to_vec();
    sorted.sort();
    let mut kept: Vec<PathBuf> = Vec::new();
    for root in sorted {
        if !kept.iter().any(|k| root.starts_with(k)) {
            kept.push(root);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_outermost_drops_nested_roots() {
        let roots = vec![
            PathBuf::from("/scripts/handlers/quests"),
            PathBuf::from("/scripts/ai"),
            PathBuf::from("/scripts/handlers"),
            PathBuf::from("/scripts/handlers-extra"),
        ];
        assert_eq!(
            outermost(&roots),
            vec![
                PathBuf::from("/scripts/ai"),
                PathBuf::from("/scripts/handlers"),
                PathBuf::from("/scripts/handlers-extra"),
            ]
        );
    }

    #[test]
    fn test_hidden_files() {
        assert!(is_hidden(Path::new("/s/.Quest.rs.swp")));
        assert!(is_hidden(Path::new("/s/Quest.rs~")));
        assert!(!is_hidden(Path::new("/s/Quest.rs")));
    }

    #[test]
    fn test_watcher_creation() {
        let temp = TempDir::new().unwrap();
        assert!(ScriptWatcher::new(&[temp.path().to_path_buf()]).is_ok());
        assert!(ScriptWatcher::new(&[temp.path().join("missing")]).is_err());
    }
}
