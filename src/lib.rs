//! TLS-aware reverse proxy configuration reconciler.
//!
//! Keeps the nginx fronts of a GitLab Omnibus installation (`git` and
//! `registry`) in line with the settings file, applying changes in an
//! order that never activates a TLS listener before its certificate and
//! rolling back when the proxy rejects a step.

pub mod config;
pub mod diff;
pub mod lifecycle;
pub mod observability;
pub mod proxy;
pub mod reconcile;
pub mod resilience;
pub mod tls;

pub use config::{ReconcilerSettings, ServiceConfig};
pub use diff::{diff, AppliedSnapshot, Plan};
pub use lifecycle::Shutdown;
pub use proxy::{NginxControl, ProxyControl};
pub use reconcile::{ReconcileError, Reconciler};
