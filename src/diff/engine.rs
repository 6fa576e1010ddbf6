//! Plan computation.
//!
//! # Ordering
//! ```text
//! 1. certificate loads         (safe-reload)
//! 2. headers, URLs, upstreams  (safe-reload)
//! 3. listener changes          (requires-restart)
//! 4. certificate unloads       (safe-reload)
//! ```
//! A reload therefore never activates a TLS listener before its certificate
//! is in place, and never drops a certificate a live listener still uses.
//! Within a phase, `git` precedes `registry`. When one service changes both
//! its TLS mode and its port, the two steps are ordered so the state between
//! them does not collide with the other service's listeners.

use crate::config::model::{ProxyConfig, ServiceConfig, ServiceKind};
use crate::config::validation::listener_conflicts;
use crate::diff::operation::{Change, Operation};
use crate::diff::snapshot::AppliedSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
    CertificateLoad,
    Reload,
    Listener,
    CertificateUnload,
}

/// Ordered operations moving the applied snapshot to a desired state.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    /// Version of the snapshot the plan was computed against.
    pub base_version: u64,
    pub operations: Vec<Operation>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Operation> {
        self.operations.iter()
    }
}

/// Compute the minimal ordered plan from `applied` to `desired`.
pub fn diff(applied: &AppliedSnapshot, desired: &ServiceConfig) -> Plan {
    let mut staged: Vec<(Phase, Operation)> = Vec::new();

    for (kind, target) in desired.iter() {
        match applied.state.get(kind) {
            None => staged.push((
                Phase::Listener,
                Operation::new(
                    kind,
                    Change::Provision {
                        config: Box::new(target.clone()),
                    },
                ),
            )),
            Some(current) => {
                // Listener state of the other service while ours changes:
                // git's listener steps all run before the registry's.
                let neighbour = match kind {
                    ServiceKind::Git => applied.state.get(ServiceKind::Registry),
                    ServiceKind::Registry => Some(&desired.git),
                };
                diff_service(kind, current, target, neighbour, &mut staged)
            }
        }
    }

    // Stable sort keeps service and field order inside a phase.
    staged.sort_by_key(|(phase, _)| *phase);

    Plan {
        base_version: applied.version,
        operations: staged.into_iter().map(|(_, op)| op).collect(),
    }
}

fn diff_service(
    kind: ServiceKind,
    current: &ProxyConfig,
    target: &ProxyConfig,
    neighbour: Option<&ProxyConfig>,
    staged: &mut Vec<(Phase, Operation)>,
) {
    let mut push = |phase: Phase, change: Change| staged.push((phase, Operation::new(kind, change)));

    let current_certs = current.certificate_paths();
    let target_certs = target.certificate_paths();
    if current_certs != target_certs {
        // Paths on a plain-HTTP service are inert and never worth a reload.
        if target.listen_https {
            push(
                Phase::CertificateLoad,
                Change::Certificate {
                    from: current_certs,
                    to: target_certs,
                },
            );
        } else if current.listen_https {
            push(
                Phase::CertificateUnload,
                Change::Certificate {
                    from: current_certs,
                    to: target_certs,
                },
            );
        }
    }

    if current.external_url != target.external_url {
        push(
            Phase::Reload,
            Change::ExternalUrl {
                from: current.external_url.clone(),
                to: target.external_url.clone(),
            },
        );
    }

    if current.upstream != target.upstream {
        push(
            Phase::Reload,
            Change::Upstream {
                from: current.upstream.clone(),
                to: target.upstream.clone(),
            },
        );
    }

    for (index, (name, value)) in target.proxy_headers.iter().enumerate() {
        let existing = current.proxy_headers.get(name);
        if existing != Some(value) {
            push(
                Phase::Reload,
                Change::Header {
                    name: name.clone(),
                    from: existing.cloned(),
                    to: Some(value.clone()),
                    index,
                },
            );
        }
    }
    for (index, (name, value)) in current.proxy_headers.iter().enumerate() {
        if !target.proxy_headers.contains_key(name) {
            push(
                Phase::Reload,
                Change::Header {
                    name: name.clone(),
                    from: Some(value.clone()),
                    to: None,
                    index,
                },
            );
        }
    }

    let tls_change = (current.listen_https != target.listen_https).then_some(Change::TlsToggle {
        from: current.listen_https,
        to: target.listen_https,
    });
    let port_change = (current.listen_port != target.listen_port).then_some(Change::ListenPort {
        from: current.listen_port,
        to: target.listen_port,
    });
    match (tls_change, port_change) {
        (Some(tls), Some(port)) => {
            let (first, second) = if port_moves_first(kind, current, target, neighbour) {
                (port, tls)
            } else {
                (tls, port)
            };
            push(Phase::Listener, first);
            push(Phase::Listener, second);
        }
        (tls, port) => {
            for change in tls.into_iter().chain(port) {
                push(Phase::Listener, change);
            }
        }
    }

    let (current_redirect, target_redirect) = (current.redirect(), target.redirect());
    // The redirect port only matters while a redirect is configured.
    if current_redirect != target_redirect && (current_redirect.enabled || target_redirect.enabled) {
        push(
            Phase::Listener,
            Change::Redirect {
                from: current_redirect,
                to: target_redirect,
            },
        );
    }
}

/// Whether the port should move before TLS is toggled. Picks the order
/// whose halfway state leaves the neighbour's listeners intact; when both or
/// neither do, the port moves first only when TLS is being enabled.
fn port_moves_first(
    kind: ServiceKind,
    current: &ProxyConfig,
    target: &ProxyConfig,
    neighbour: Option<&ProxyConfig>,
) -> bool {
    let preferred = target.listen_https;
    let Some(neighbour) = neighbour else {
        return preferred;
    };

    // Earlier phases already moved URLs and certificates; redirects follow.
    let mut halfway = target.clone();
    halfway.set_redirect(current.redirect());

    let mut port_moved = halfway.clone();
    port_moved.listen_https = current.listen_https;
    let mut tls_toggled = halfway;
    tls_toggled.listen_port = current.listen_port;

    let clear = |state: &ProxyConfig| match kind {
        ServiceKind::Git => listener_conflicts(state, neighbour).is_empty(),
        ServiceKind::Registry => listener_conflicts(neighbour, state).is_empty(),
    };
    match (clear(&port_moved), clear(&tls_toggled)) {
        (true, false) => true,
        (false, true) => false,
        _ => preferred,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse;
    use crate::diff::operation::RiskLevel;

    const BASE: &str = "external_url \"http://git.example.org\"\n\
                        registry_external_url \"http://registry.example.org\"\n\
                        nginx['proxy_set_headers'] = { \"X-Forwarded-Proto\" => \"http\", \"Host\" => \"git.example.org\" }\n";

    fn config(extra: &str) -> ServiceConfig {
        parse(&format!("{BASE}{extra}")).unwrap().services
    }

    fn applied(extra: &str) -> AppliedSnapshot {
        AppliedSnapshot::from_config(7, &config(extra))
    }

    #[test]
    fn test_identical_config_yields_empty_plan() {
        let desired = config("");
        let plan = diff(&AppliedSnapshot::from_config(3, &desired), &desired);
        assert!(plan.is_empty());
        assert_eq!(plan.base_version, 3);
    }

    #[test]
    fn test_fresh_snapshot_provisions_every_service() {
        let plan = diff(&AppliedSnapshot::empty(), &config(""));
        assert_eq!(plan.len(), 2);
        assert!(plan
            .iter()
            .all(|op| matches!(op.change, Change::Provision { .. })
                && op.risk == RiskLevel::RequiresRestart));
        assert_eq!(plan.operations[0].service, ServiceKind::Git);
    }

    #[test]
    fn test_enabling_tls_loads_certificate_before_listener() {
        let desired = config(
            "registry_nginx['listen_https'] = true\n\
             registry_nginx['listen_port'] = 443\n\
             registry_nginx['ssl_certificate'] = \"/etc/ssl/registry.crt\"\n\
             registry_nginx['ssl_certificate_key'] = \"/etc/ssl/registry.key\"\n",
        );
        let plan = diff(&applied(""), &desired);

        let kinds: Vec<_> = plan.iter().map(|op| (op.service, op.risk)).collect();
        assert_eq!(
            kinds,
            vec![
                (ServiceKind::Registry, RiskLevel::SafeReload),
                (ServiceKind::Registry, RiskLevel::RequiresRestart),
                (ServiceKind::Registry, RiskLevel::RequiresRestart),
            ]
        );
        assert!(matches!(plan.operations[0].change, Change::Certificate { .. }));
        // Port first: a TLS listener on 80 would collide with git's plain 80.
        assert!(matches!(
            plan.operations[1].change,
            Change::ListenPort { from: 80, to: 443 }
        ));
        assert!(matches!(
            plan.operations[2].change,
            Change::TlsToggle { from: false, to: true }
        ));
    }

    fn assert_no_intermediate_collision(applied: &AppliedSnapshot, plan: &Plan) {
        let mut working = applied.state.clone();
        for operation in plan.iter() {
            operation.apply_to(&mut working).unwrap();
            if let (Some(git), Some(registry)) = (&working.git, &working.registry) {
                assert!(
                    listener_conflicts(git, registry).is_empty(),
                    "collision after `{operation}`"
                );
            }
        }
    }

    #[test]
    fn test_swapping_tls_between_services_never_collides() {
        // git: plain 80 -> TLS 443, registry: TLS 443 -> plain 80.
        let tls = |prefix: &str, name: &str| {
            format!(
                "{prefix}['listen_https'] = true\n\
                 {prefix}['listen_port'] = 443\n\
                 {prefix}['ssl_certificate'] = \"/etc/ssl/{name}.crt\"\n\
                 {prefix}['ssl_certificate_key'] = \"/etc/ssl/{name}.key\"\n"
            )
        };
        let applied = applied(&tls("registry_nginx", "registry"));
        let desired = config(&tls("nginx", "git"));
        let plan = diff(&applied, &desired);

        let listener_steps: Vec<_> = plan
            .iter()
            .filter(|op| op.risk == RiskLevel::RequiresRestart)
            .map(|op| (op.service, op.change.clone()))
            .collect();
        assert_eq!(
            listener_steps,
            vec![
                (ServiceKind::Git, Change::TlsToggle { from: false, to: true }),
                (ServiceKind::Git, Change::ListenPort { from: 80, to: 443 }),
                (ServiceKind::Registry, Change::ListenPort { from: 443, to: 80 }),
                (ServiceKind::Registry, Change::TlsToggle { from: true, to: false }),
            ]
        );
        assert_no_intermediate_collision(&applied, &plan);
    }

    #[test]
    fn test_enabling_tls_on_shared_port_never_collides() {
        let desired = config(
            "registry_nginx['listen_https'] = true\n\
             registry_nginx['listen_port'] = 443\n\
             registry_nginx['ssl_certificate'] = \"/etc/ssl/registry.crt\"\n\
             registry_nginx['ssl_certificate_key'] = \"/etc/ssl/registry.key\"\n",
        );
        let applied = applied("");
        assert_no_intermediate_collision(&applied, &diff(&applied, &desired));
    }

    #[test]
    fn test_disabling_tls_unloads_certificate_last() {
        let tls = "nginx['listen_https'] = true\n\
                   nginx['listen_port'] = 443\n\
                   nginx['ssl_certificate'] = \"/etc/ssl/git.crt\"\n\
                   nginx['ssl_certificate_key'] = \"/etc/ssl/git.key\"\n";
        let plan = diff(&applied(tls), &config("nginx['proxy_set_headers'] = {}\n"));

        let last = plan.operations.last().unwrap();
        assert!(matches!(last.change, Change::Certificate { .. }));
        assert_eq!(last.risk, RiskLevel::SafeReload);
        assert!(plan.operations[..plan.len() - 1]
            .iter()
            .any(|op| matches!(op.change, Change::TlsToggle { to: false, .. })));
        // Header removals (safe-reload) precede listener changes.
        assert!(matches!(plan.operations[0].change, Change::Header { to: None, .. }));
    }

    #[test]
    fn test_certificate_paths_on_plain_http_are_inert() {
        let plan = diff(
            &applied(""),
            &config("nginx['ssl_certificate'] = \"/etc/ssl/unused.crt\"\n"),
        );
        assert!(plan.is_empty());
    }

    #[test]
    fn test_certificate_rotation_is_safe_reload() {
        let tls = |name: &str| {
            format!(
                "nginx['listen_https'] = true\n\
                 nginx['listen_port'] = 443\n\
                 nginx['ssl_certificate'] = \"/etc/ssl/{name}.crt\"\n\
                 nginx['ssl_certificate_key'] = \"/etc/ssl/{name}.key\"\n"
            )
        };
        let plan = diff(&applied(&tls("old")), &config(&tls("new")));
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.operations[0].risk, RiskLevel::SafeReload);
    }

    #[test]
    fn test_header_changes() {
        let plan = diff(
            &applied(""),
            &config(
                "nginx['proxy_set_headers'] = { \"X-Forwarded-Proto\" => \"https\", \"X-Real-IP\" => \"$remote_addr\" }\n",
            ),
        );
        let changes: Vec<_> = plan.iter().map(|op| op.change.to_string()).collect();
        assert_eq!(
            changes,
            vec![
                "set header X-Forwarded-Proto: https",
                "set header X-Real-IP: $remote_addr",
                "remove header Host",
            ]
        );
        assert!(plan.iter().all(|op| op.risk == RiskLevel::SafeReload));
    }

    #[test]
    fn test_header_reorder_is_not_a_change() {
        let plan = diff(
            &applied(""),
            &config(
                "nginx['proxy_set_headers'] = { \"Host\" => \"git.example.org\", \"X-Forwarded-Proto\" => \"http\" }\n",
            ),
        );
        assert!(plan.is_empty());
    }

    #[test]
    fn test_inert_redirect_port() {
        let plan = diff(
            &applied(""),
            &config("registry_nginx['redirect_http_to_https_port'] = 8080\n"),
        );
        assert!(plan.is_empty());
    }
}
