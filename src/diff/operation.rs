//! Operations produced by the diff engine.

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::config::model::{CertificatePaths, ProxyConfig, RedirectSettings, ServiceKind};
use crate::diff::snapshot::AppliedState;

/// How disruptive applying an operation is to the running proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RiskLevel {
    /// An nginx reload picks the change up without touching sockets.
    SafeReload,
    /// Listening sockets change; nginx must be restarted.
    RequiresRestart,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::SafeReload => "safe-reload",
            RiskLevel::RequiresRestart => "requires-restart",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single change to one service. Every change carries enough of the
/// previous value to be inverted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Change {
    Provision { config: Box<ProxyConfig> },
    Deprovision { config: Box<ProxyConfig> },
    ExternalUrl { from: Url, to: Url },
    Upstream { from: Url, to: Url },
    /// `index` is the header's position on the side where it exists: the
    /// target map when set, the current map when removed.
    Header {
        name: String,
        from: Option<String>,
        to: Option<String>,
        index: usize,
    },
    Certificate {
        from: CertificatePaths,
        to: CertificatePaths,
    },
    TlsToggle { from: bool, to: bool },
    ListenPort { from: u16, to: u16 },
    Redirect {
        from: RedirectSettings,
        to: RedirectSettings,
    },
}

impl Change {
    pub fn risk(&self) -> RiskLevel {
        match self {
            Change::ExternalUrl { .. }
            | Change::Upstream { .. }
            | Change::Header { .. }
            | Change::Certificate { .. } => RiskLevel::SafeReload,
            Change::Provision { .. }
            | Change::Deprovision { .. }
            | Change::TlsToggle { .. }
            | Change::ListenPort { .. }
            | Change::Redirect { .. } => RiskLevel::RequiresRestart,
        }
    }

    pub fn inverse(&self) -> Change {
        match self.clone() {
            Change::Provision { config } => Change::Deprovision { config },
            Change::Deprovision { config } => Change::Provision { config },
            Change::ExternalUrl { from, to } => Change::ExternalUrl { from: to, to: from },
            Change::Upstream { from, to } => Change::Upstream { from: to, to: from },
            Change::Header {
                name,
                from,
                to,
                index,
            } => Change::Header {
                name,
                from: to,
                to: from,
                index,
            },
            Change::Certificate { from, to } => Change::Certificate { from: to, to: from },
            Change::TlsToggle { from, to } => Change::TlsToggle { from: to, to: from },
            Change::ListenPort { from, to } => Change::ListenPort { from: to, to: from },
            Change::Redirect { from, to } => Change::Redirect { from: to, to: from },
        }
    }

    /// Apply to a provisioned service. Provisioning is handled by the caller.
    fn apply_to(&self, proxy: &mut ProxyConfig) {
        match self {
            Change::Provision { .. } | Change::Deprovision { .. } => {}
            Change::ExternalUrl { to, .. } => proxy.external_url = to.clone(),
            Change::Upstream { to, .. } => proxy.upstream = to.clone(),
            Change::Header {
                name, to, index, ..
            } => match to {
                Some(value) if !proxy.proxy_headers.contains_key(name) => {
                    let index = (*index).min(proxy.proxy_headers.len());
                    proxy
                        .proxy_headers
                        .shift_insert(index, name.clone(), value.clone());
                }
                Some(value) => {
                    proxy.proxy_headers.insert(name.clone(), value.clone());
                }
                None => {
                    proxy.proxy_headers.shift_remove(name);
                }
            },
            Change::Certificate { to, .. } => proxy.set_certificate_paths(to.clone()),
            Change::TlsToggle { to, .. } => proxy.listen_https = *to,
            Change::ListenPort { to, .. } => proxy.listen_port = *to,
            Change::Redirect { to, .. } => proxy.set_redirect(*to),
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Change::Provision { config } => write!(
                f,
                "provision {} on port {}",
                config.host(),
                config.listen_port
            ),
            Change::Deprovision { config } => write!(f, "deprovision {}", config.host()),
            Change::ExternalUrl { from, to } => write!(f, "external_url {} -> {}", from, to),
            Change::Upstream { from, to } => write!(f, "upstream {} -> {}", from, to),
            Change::Header { name, from, to, .. } => match (from, to) {
                (_, Some(value)) => write!(f, "set header {}: {}", name, value),
                (Some(_), None) => write!(f, "remove header {}", name),
                (None, None) => write!(f, "header {} unchanged", name),
            },
            Change::Certificate { to, .. } if to.pair().is_some() => {
                write!(f, "load certificate {}", to)
            }
            Change::Certificate { from, .. } => write!(f, "unload certificate {}", from),
            Change::TlsToggle { to: true, .. } => f.write_str("enable TLS listener"),
            Change::TlsToggle { to: false, .. } => f.write_str("disable TLS listener"),
            Change::ListenPort { from, to } => write!(f, "listen_port {} -> {}", from, to),
            Change::Redirect { from, to } => write!(f, "{} -> {}", from, to),
        }
    }
}

/// An operation applied to a service that is not in the expected state.
#[derive(Debug, Clone, Error)]
#[error("{service}: cannot {change} on a service that is {state}")]
pub struct StaleOperation {
    pub service: ServiceKind,
    pub change: String,
    pub state: &'static str,
}

/// One step of a plan: a change to one service with its risk level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Operation {
    pub service: ServiceKind,
    pub change: Change,
    pub risk: RiskLevel,
}

impl Operation {
    pub fn new(service: ServiceKind, change: Change) -> Self {
        let risk = change.risk();
        Self {
            service,
            change,
            risk,
        }
    }

    /// The operation that undoes this one.
    pub fn inverse(&self) -> Operation {
        Operation::new(self.service, self.change.inverse())
    }

    /// Apply this operation to an in-memory applied state.
    pub fn apply_to(&self, state: &mut AppliedState) -> Result<(), StaleOperation> {
        let slot = state.slot_mut(self.service);
        match (&self.change, slot.as_mut()) {
            (Change::Provision { config }, None) => {
                *slot = Some(config.as_ref().clone());
                Ok(())
            }
            (Change::Provision { .. }, Some(_)) => Err(self.stale("already provisioned")),
            (Change::Deprovision { .. }, Some(_)) => {
                *slot = None;
                Ok(())
            }
            (_, None) => Err(self.stale("not provisioned")),
            (change, Some(proxy)) => {
                change.apply_to(proxy);
                Ok(())
            }
        }
    }

    fn stale(&self, state: &'static str) -> StaleOperation {
        StaleOperation {
            service: self.service,
            change: self.change.to_string(),
            state,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.risk, self.service, self.change)
    }
}
