//! Source file watcher for automatic reconciliation.
//!
//! The parent directory is watched rather than the file itself: editors and
//! config management replace the file by renaming a new one over it, which
//! would orphan a watch on the old inode.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_service_config;
use crate::config::parser::ParsedConfig;

/// A watcher that monitors the source file and emits freshly parsed
/// configurations.
pub struct ConfigWatcher {
    path: PathBuf,
    poll_interval: Duration,
    update_tx: mpsc::UnboundedSender<ParsedConfig>,
}

impl ConfigWatcher {
    /// Create a new ConfigWatcher.
    ///
    /// Returns the watcher and a receiver for parsed configurations.
    pub fn new(
        path: &Path,
        poll_interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<ParsedConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                poll_interval,
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching the file in a background thread.
    ///
    /// The returned handle must be kept alive for as long as events are wanted.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx;
        let path = self.path.clone();
        let file_name = self.path.file_name().map(|name| name.to_os_string());
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event)
                    if (event.kind.is_modify() || event.kind.is_create())
                        && touches(&event, file_name.as_ref()) =>
                {
                    tracing::info!(path = %path.display(), "Source file change detected");
                    // A file that fails to parse leaves the applied state untouched.
                    match load_service_config(&path) {
                        Ok(parsed) => {
                            let _ = tx.send(parsed);
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Ignoring unparseable source file");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(self.poll_interval),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, dir = ?dir, "Source watcher started");
        Ok(watcher)
    }
}

fn touches(event: &Event, file_name: Option<&OsString>) -> bool {
    event
        .paths
        .iter()
        .any(|changed| changed.file_name() == file_name.map(|name| name.as_os_str()))
}
