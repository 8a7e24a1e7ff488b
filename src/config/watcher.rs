//! Credential file watcher for hot reload.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::schema::FrontendConfig;

/// A watcher that monitors certificate, key and CA files for changes.
///
/// Directories are watched rather than files so that atomic replacement
/// (write to a temp file, rename over the original) is observed.
pub struct CredentialWatcher {
    files: BTreeSet<PathBuf>,
    update_tx: mpsc::UnboundedSender<PathBuf>,
}

impl CredentialWatcher {
    /// Create a new CredentialWatcher for every credential file in `config`.
    ///
    /// Returns the watcher and a receiver yielding each changed file.
    pub fn new(config: &FrontendConfig) -> (Self, mpsc::UnboundedReceiver<PathBuf>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        let files = config
            .endpoints
            .iter()
            .flat_map(|e| e.credential_paths())
            .map(absolute)
            .collect();

        (Self { files, update_tx }, update_rx)
    }

    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().map(PathBuf::as_path)
    }

    /// Start watching in a background thread. The returned watcher must be
    /// kept alive for notifications to continue.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let files = self.files.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if !(event.kind.is_modify() || event.kind.is_create()) {
                        return;
                    }
                    for path in event.paths.iter().filter(|p| files.contains(*p)) {
                        tracing::info!(path = ?path, "Credential file change detected");
                        let _ = tx.send(path.clone());
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        let directories: BTreeSet<PathBuf> = self
            .files
            .iter()
            .filter_map(|f| f.parent().map(Path::to_path_buf))
            .collect();
        for directory in &directories {
            watcher.watch(directory, RecursiveMode::NonRecursive)?;
        }

        tracing::info!(files = self.files.len(), "Credential watcher started");
        Ok(watcher)
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    })
}
