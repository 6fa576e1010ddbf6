//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use proxy_reconciler::config::{parse, ServiceConfig};
use proxy_reconciler::proxy::{ControlError, ProxyControl, RenderedConfig};

/// Two plain-HTTP fronts sharing port 80 by host name.
pub const BASE_SOURCE: &str = "\
external_url \"http://git.example.org\"
registry_external_url \"http://registry.example.org\"
nginx['proxy_set_headers'] = {
  \"Host\" => \"git.example.org\",
  \"X-Forwarded-Proto\" => \"http\"
}
registry_nginx['proxy_set_headers'] = {
  \"Host\" => \"registry.example.org\"
}
";

/// `BASE_SOURCE` followed by `extra`; later assignments win.
pub fn services(extra: &str) -> ServiceConfig {
    parse(&format!("{BASE_SOURCE}{extra}")).unwrap().services
}

/// Write a self-signed certificate for `host` and its key into `dir`.
pub fn write_cert_pair(dir: &Path, name: &str, host: &str) -> (PathBuf, PathBuf) {
    let certified = rcgen::generate_simple_self_signed(vec![host.to_string()]).unwrap();
    let cert_path = dir.join(format!("{name}.crt"));
    let key_path = dir.join(format!("{name}.key"));
    std::fs::write(&cert_path, certified.cert.pem()).unwrap();
    std::fs::write(&key_path, certified.key_pair.serialize_pem()).unwrap();
    (cert_path, key_path)
}

/// A call received by [`MockControl`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Install(RenderedConfig),
    Reload,
    Restart,
}

/// Recording `ProxyControl` with programmable failures.
///
/// Reloads and restarts share one 1-based action counter, so "fail on the
/// third action" means the third reload-or-restart the proxy sees.
#[derive(Default)]
pub struct MockControl {
    calls: Mutex<Vec<Call>>,
    actions: AtomicUsize,
    fail_on: Option<usize>,
    hang_on: Option<usize>,
    action_delay: Duration,
}

impl MockControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// The `n`th reload/restart returns an error.
    pub fn failing_on_action(mut self, n: usize) -> Self {
        self.fail_on = Some(n);
        self
    }

    /// The `n`th reload/restart never completes in time.
    pub fn hanging_on_action(mut self, n: usize) -> Self {
        self.hang_on = Some(n);
        self
    }

    /// Every reload/restart takes `delay`.
    pub fn with_action_delay(mut self, delay: Duration) -> Self {
        self.action_delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Only the reload/restart calls, in order.
    pub fn actions(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| !matches!(call, Call::Install(_)))
            .collect()
    }

    pub fn last_install(&self) -> Option<RenderedConfig> {
        self.calls().into_iter().rev().find_map(|call| match call {
            Call::Install(rendered) => Some(rendered),
            _ => None,
        })
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    async fn action(&self, call: Call) -> Result<(), String> {
        let n = self.actions.fetch_add(1, Ordering::SeqCst) + 1;
        self.record(call);
        if !self.action_delay.is_zero() {
            tokio::time::sleep(self.action_delay).await;
        }
        if self.hang_on == Some(n) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        if self.fail_on == Some(n) {
            return Err(format!("injected failure on action {n}"));
        }
        Ok(())
    }
}

impl ProxyControl for MockControl {
    async fn install(&self, rendered: &RenderedConfig) -> Result<(), ControlError> {
        self.record(Call::Install(rendered.clone()));
        Ok(())
    }

    async fn reload(&self) -> Result<(), ControlError> {
        self.action(Call::Reload)
            .await
            .map_err(|reason| ControlError::ReloadFailed { reason })
    }

    async fn restart(&self) -> Result<(), ControlError> {
        self.action(Call::Restart)
            .await
            .map_err(|reason| ControlError::RestartFailed { reason })
    }
}
