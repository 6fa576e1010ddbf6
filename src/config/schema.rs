//! Reconciler settings schema.
//!
//! This module defines the settings of the reconciler itself (where the
//! source file lives, how nginx is driven, timeouts). All types derive Serde
//! traits for deserialization from a TOML file.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root settings for the reconciler.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ReconcilerSettings {
    /// Source file paths and watch mode.
    pub source: SourceSettings,

    /// How the nginx process is driven.
    pub nginx: NginxSettings,

    /// Timeout configuration.
    pub timeouts: TimeoutSettings,

    /// Retry configuration for watch mode.
    pub retries: RetrySettings,

    /// Observability settings.
    pub observability: ObservabilitySettings,
}

/// Where desired and applied state live.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SourceSettings {
    /// Settings file in the Omnibus format.
    pub path: PathBuf,

    /// JSON file holding the last applied snapshot.
    pub state_path: PathBuf,

    /// Reconcile automatically when the source file changes.
    pub watch: bool,

    /// Poll interval for the file watcher in seconds.
    pub poll_interval_secs: u64,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/etc/gitlab/gitlab.rb"),
            state_path: PathBuf::from("/var/lib/proxy-reconciler/applied.json"),
            watch: true,
            poll_interval_secs: 2,
        }
    }
}

/// nginx control-plane settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NginxSettings {
    /// Directory receiving one site file per service.
    pub sites_dir: PathBuf,

    /// Command that reloads nginx in place (argv form).
    pub reload_command: Vec<String>,

    /// Command that restarts nginx (argv form).
    pub restart_command: Vec<String>,

    /// Optional syntax check run before every reload or restart.
    pub test_command: Option<Vec<String>>,
}

impl Default for NginxSettings {
    fn default() -> Self {
        Self {
            sites_dir: PathBuf::from("/var/opt/gitlab/nginx/conf"),
            reload_command: vec!["gitlab-ctl".into(), "hup".into(), "nginx".into()],
            restart_command: vec!["gitlab-ctl".into(), "restart".into(), "nginx".into()],
            test_command: None,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutSettings {
    /// Deadline for each blocking step (certificate reads, install,
    /// reload, restart) in seconds.
    pub operation_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self { operation_secs: 10 }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Maximum number of attempts per reconciliation request.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilitySettings {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9168".to_string(),
        }
    }
}
