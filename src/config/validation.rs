//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (the parser handles syntax and types)
//! - TLS-enabled services have a readable, matching certificate and key
//! - Listen ports do not collide across services
//! - Redirects to HTTPS only exist on TLS listeners
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>
//! - Sharing a port between services is accepted only as name-based virtual
//!   hosting: different hosts, same TLS mode
//! - Certificate paths on a non-TLS service are a warning, never an error

use thiserror::Error;

use crate::config::model::{Listener, ProxyConfig, ServiceConfig, ServiceKind};
use crate::tls::{self, TlsError};

/// A single semantic problem, tagged with the service it was found in.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{service}: listen_https is enabled but `{field}` is not set")]
    MissingTlsField {
        service: ServiceKind,
        field: &'static str,
    },

    #[error("{service}: {source}")]
    Certificate {
        service: ServiceKind,
        #[source]
        source: TlsError,
    },

    #[error("{service} and {other} both listen on port {port} and cannot share it")]
    PortCollision {
        service: ServiceKind,
        other: ServiceKind,
        port: u16,
    },

    #[error("{service}: redirect_http_to_https requires listen_https")]
    RedirectWithoutTls { service: ServiceKind },

    #[error("{service}: redirect port {port} is also the HTTPS listen port")]
    RedirectPortConflict { service: ServiceKind, port: u16 },
}

impl ValidationError {
    pub fn service(&self) -> ServiceKind {
        match self {
            ValidationError::MissingTlsField { service, .. }
            | ValidationError::Certificate { service, .. }
            | ValidationError::PortCollision { service, .. }
            | ValidationError::RedirectWithoutTls { service }
            | ValidationError::RedirectPortConflict { service, .. } => *service,
        }
    }
}

/// Validate the desired configuration, reporting every violation.
pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    for (kind, proxy) in config.iter() {
        validate_service(kind, proxy, &mut errors);
    }
    check_port_collisions(config, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_service(kind: ServiceKind, proxy: &ProxyConfig, errors: &mut Vec<ValidationError>) {
    if !proxy.listen_https {
        if !proxy.certificate_paths().is_empty() {
            tracing::warn!(
                service = %kind,
                "ssl_certificate settings are ignored because listen_https is false"
            );
        }
        if proxy.redirect_http_to_https {
            errors.push(ValidationError::RedirectWithoutTls { service: kind });
        }
        return;
    }

    if proxy.redirect_http_to_https && proxy.redirect_http_to_https_port == proxy.listen_port {
        errors.push(ValidationError::RedirectPortConflict {
            service: kind,
            port: proxy.listen_port,
        });
    }

    let cert = proxy.ssl_certificate.as_deref();
    let key = proxy.ssl_certificate_key.as_deref();
    if cert.is_none() {
        errors.push(ValidationError::MissingTlsField {
            service: kind,
            field: "ssl_certificate",
        });
    }
    if key.is_none() {
        errors.push(ValidationError::MissingTlsField {
            service: kind,
            field: "ssl_certificate_key",
        });
    }

    match (cert, key) {
        (Some(cert), Some(key)) => {
            if let Err(source) = tls::verify_pair(cert, key) {
                errors.push(ValidationError::Certificate {
                    service: kind,
                    source,
                });
            }
        }
        // A lone certificate is still checked so that every problem surfaces.
        (Some(cert), None) => {
            if let Err(source) = tls::load_certificate(cert) {
                errors.push(ValidationError::Certificate {
                    service: kind,
                    source,
                });
            }
        }
        (None, Some(key)) => {
            if let Err(source) = tls::load_private_key(key) {
                errors.push(ValidationError::Certificate {
                    service: kind,
                    source,
                });
            }
        }
        (None, None) => {}
    }
}

fn check_port_collisions(config: &ServiceConfig, errors: &mut Vec<ValidationError>) {
    errors.extend(listener_conflicts(&config.git, &config.registry));
}

/// Ports on which the git and registry listeners cannot coexist, one error
/// per port. Also used on the intermediate states of a plan.
pub fn listener_conflicts(git: &ProxyConfig, registry: &ProxyConfig) -> Vec<ValidationError> {
    let mut conflicts = Vec::new();
    let mut reported: Vec<u16> = Vec::new();

    for ours in git.listeners() {
        for theirs in registry.listeners() {
            if ours.port != theirs.port || reported.contains(&ours.port) {
                continue;
            }
            if !can_share(git, &ours, registry, &theirs) {
                reported.push(ours.port);
                conflicts.push(ValidationError::PortCollision {
                    service: ServiceKind::Git,
                    other: ServiceKind::Registry,
                    port: ours.port,
                });
            }
        }
    }
    conflicts
}

/// nginx serves two `server` blocks on one port by `server_name`, provided
/// both agree on TLS for that port.
fn can_share(a: &ProxyConfig, a_listener: &Listener, b: &ProxyConfig, b_listener: &Listener) -> bool {
    !a.host().eq_ignore_ascii_case(b.host()) && a_listener.tls == b_listener.tls
}
