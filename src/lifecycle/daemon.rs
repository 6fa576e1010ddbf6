//! Watch mode: keep the proxy reconciled with the source file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep_until, Instant};

use crate::config::loader::load_service_config;
use crate::config::model::ServiceConfig;
use crate::config::schema::ReconcilerSettings;
use crate::config::watcher::ConfigWatcher;
use crate::proxy::ProxyControl;
use crate::reconcile::{ReconcileError, Reconciler};
use crate::resilience::RetryPolicy;

/// Long-running loop driving a [`Reconciler`] from file changes, explicit
/// requests (SIGHUP) and retries.
pub struct Daemon<C> {
    reconciler: Arc<Reconciler<C>>,
    source_path: PathBuf,
    watch: bool,
    poll_interval: Duration,
    retry: RetryPolicy,
    requests_tx: mpsc::Sender<()>,
    requests_rx: mpsc::Receiver<()>,
}

impl<C: ProxyControl + 'static> Daemon<C> {
    pub fn new(reconciler: Arc<Reconciler<C>>, settings: &ReconcilerSettings) -> Self {
        let (requests_tx, requests_rx) = mpsc::channel(1);
        Self {
            reconciler,
            source_path: settings.source.path.clone(),
            watch: settings.source.watch,
            poll_interval: Duration::from_secs(settings.source.poll_interval_secs),
            retry: RetryPolicy::new(&settings.retries),
            requests_tx,
            requests_rx,
        }
    }

    /// Sender that asks the daemon to re-read the source file and reconcile.
    pub fn requester(&self) -> mpsc::Sender<()> {
        self.requests_tx.clone()
    }

    /// Run until `shutdown` fires.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<(), notify::Error> {
        let (watcher, mut updates) = ConfigWatcher::new(&self.source_path, self.poll_interval);
        let _watch_handle = if self.watch {
            Some(watcher.run()?)
        } else {
            None
        };

        let mut desired = self.read_source();
        let mut attempt = 0u32;
        let mut retry_at = None;
        if let Some(config) = &desired {
            retry_at = self.cycle(config, &mut attempt).await;
        }

        loop {
            let retry_timer = async move {
                match retry_at {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Daemon stopping");
                    break;
                }
                Some(parsed) = updates.recv(), if self.watch => {
                    desired = Some(parsed.services);
                    attempt = 0;
                }
                Some(()) = self.requests_rx.recv() => {
                    match self.read_source() {
                        Some(config) => {
                            desired = Some(config);
                            attempt = 0;
                        }
                        None => continue,
                    }
                }
                _ = retry_timer => {
                    tracing::info!(attempt, "Retrying reconciliation");
                }
            }

            retry_at = match &desired {
                Some(config) => self.cycle(config, &mut attempt).await,
                None => None,
            };
        }
        Ok(())
    }

    fn read_source(&self) -> Option<ServiceConfig> {
        match load_service_config(&self.source_path) {
            Ok(parsed) => Some(parsed.services),
            Err(e) => {
                tracing::error!(error = %e, "Source file not usable, keeping applied state");
                None
            }
        }
    }

    /// Run a cycle; returns when to retry, if a retry is due.
    async fn cycle(&self, desired: &ServiceConfig, attempt: &mut u32) -> Option<Instant> {
        match self.reconciler.reconcile(desired.clone()).await {
            Ok(report) => {
                *attempt = 0;
                tracing::info!(
                    cycle = %report.cycle_id,
                    version = report.version,
                    operations = report.applied.len(),
                    "Reconciliation finished"
                );
                None
            }
            Err(ReconcileError::Validation(errors)) => {
                *attempt = 0;
                for error in &errors {
                    tracing::error!(service = %error.service(), error = %error, "Invalid configuration");
                }
                None
            }
            Err(e) if !e.is_transient() => {
                *attempt = 0;
                tracing::error!(error = %e, "Reconciliation failed, waiting for the next change");
                None
            }
            Err(e) => {
                *attempt += 1;
                if self.retry.should_retry(*attempt) {
                    let delay = self.retry.delay(*attempt);
                    tracing::warn!(error = %e, attempt = *attempt, delay_ms = delay.as_millis() as u64, "Reconciliation failed, will retry");
                    Some(Instant::now() + delay)
                } else {
                    tracing::error!(error = %e, attempts = *attempt, "Reconciliation failed, giving up until the next change");
                    *attempt = 0;
                    None
                }
            }
        }
    }
}
