//! Typed model of the proxied services.
//!
//! # Responsibilities
//! - Represent one nginx front per service (`git`, `registry`)
//! - Expose the listeners a service needs (main + optional redirect)
//! - Carry the ordered proxy header rewrites
//!
//! # Design Decisions
//! - A `ServiceConfig` is immutable once validated; a new cycle replaces it
//!   wholesale instead of patching fields in place
//! - Certificate paths on a non-TLS service are kept but inert

use std::fmt;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use url::Url;

/// Ordered mapping of header name to value.
pub type ProxyHeaders = IndexMap<String, String>;

/// The two nginx fronts managed by the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Git,
    Registry,
}

impl ServiceKind {
    /// Every service, in reconciliation order.
    pub const ALL: [ServiceKind; 2] = [ServiceKind::Git, ServiceKind::Registry];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Git => "git",
            ServiceKind::Registry => "registry",
        }
    }

    /// Name of the settings block in the source file (`nginx['...']`).
    pub fn block_name(&self) -> &'static str {
        match self {
            ServiceKind::Git => "nginx",
            ServiceKind::Registry => "registry_nginx",
        }
    }

    /// Top-level key holding the service's external URL.
    pub fn url_key(&self) -> &'static str {
        match self {
            ServiceKind::Git => "external_url",
            ServiceKind::Registry => "registry_external_url",
        }
    }

    /// Backend the service proxies to when no `upstream` is given.
    pub fn default_upstream(&self) -> &'static str {
        match self {
            ServiceKind::Git => "http://127.0.0.1:8181",
            ServiceKind::Registry => "http://127.0.0.1:5000",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Certificate and key paths as configured, either of which may be unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificatePaths {
    pub certificate: Option<PathBuf>,
    pub key: Option<PathBuf>,
}

impl CertificatePaths {
    /// Both paths, if both are present.
    pub fn pair(&self) -> Option<(&Path, &Path)> {
        match (&self.certificate, &self.key) {
            (Some(cert), Some(key)) => Some((cert.as_path(), key.as_path())),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.certificate.is_none() && self.key.is_none()
    }
}

impl fmt::Display for CertificatePaths {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |p: &Option<PathBuf>| match p {
            Some(path) => path.display().to_string(),
            None => "none".to_string(),
        };
        write!(f, "{} (key {})", show(&self.certificate), show(&self.key))
    }
}

/// HTTP to HTTPS redirect listener settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectSettings {
    pub enabled: bool,
    pub port: u16,
}

impl fmt::Display for RedirectSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.enabled {
            write!(f, "redirect from port {}", self.port)
        } else {
            f.write_str("no redirect")
        }
    }
}

/// A socket the proxy must listen on for a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Listener {
    pub port: u16,
    pub tls: bool,
    pub redirect: bool,
}

/// Settings for a single nginx front.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub external_url: Url,
    pub listen_port: u16,
    pub listen_https: bool,
    pub redirect_http_to_https: bool,
    pub redirect_http_to_https_port: u16,
    pub ssl_certificate: Option<PathBuf>,
    pub ssl_certificate_key: Option<PathBuf>,
    pub proxy_headers: ProxyHeaders,
    pub upstream: Url,
}

impl ProxyConfig {
    /// Host part of the external URL, used as the nginx `server_name`.
    pub fn host(&self) -> &str {
        self.external_url.host_str().unwrap_or("localhost")
    }

    pub fn certificate_paths(&self) -> CertificatePaths {
        CertificatePaths {
            certificate: self.ssl_certificate.clone(),
            key: self.ssl_certificate_key.clone(),
        }
    }

    pub fn set_certificate_paths(&mut self, paths: CertificatePaths) {
        self.ssl_certificate = paths.certificate;
        self.ssl_certificate_key = paths.key;
    }

    pub fn redirect(&self) -> RedirectSettings {
        RedirectSettings {
            enabled: self.redirect_http_to_https,
            port: self.redirect_http_to_https_port,
        }
    }

    pub fn set_redirect(&mut self, redirect: RedirectSettings) {
        self.redirect_http_to_https = redirect.enabled;
        self.redirect_http_to_https_port = redirect.port;
    }

    /// Whether a plain-HTTP redirect listener is rendered for this service.
    pub fn has_redirect_listener(&self) -> bool {
        self.listen_https && self.redirect_http_to_https
    }

    /// Sockets this service occupies once rendered.
    pub fn listeners(&self) -> Vec<Listener> {
        let mut listeners = vec![Listener {
            port: self.listen_port,
            tls: self.listen_https,
            redirect: false,
        }];
        if self.has_redirect_listener() {
            listeners.push(Listener {
                port: self.redirect_http_to_https_port,
                tls: false,
                redirect: true,
            });
        }
        listeners
    }
}

/// The full desired state: one front per service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub git: ProxyConfig,
    pub registry: ProxyConfig,
}

impl ServiceConfig {
    pub fn get(&self, kind: ServiceKind) -> &ProxyConfig {
        match kind {
            ServiceKind::Git => &self.git,
            ServiceKind::Registry => &self.registry,
        }
    }

    /// Services paired with their settings, in reconciliation order.
    pub fn iter(&self) -> impl Iterator<Item = (ServiceKind, &ProxyConfig)> {
        ServiceKind::ALL.into_iter().map(move |kind| (kind, self.get(kind)))
    }
}
