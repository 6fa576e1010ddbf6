//! nginx site rendering.
//!
//! One site file per provisioned service:
//! ```text
//! server {                      # main listener
//!     listen <port> [ssl];
//!     server_name <host>;
//!     ssl_certificate ...;      # TLS only
//!     location / { proxy_set_header ...; proxy_pass <upstream>; }
//! }
//! server {                      # only with redirect_http_to_https
//!     listen <redirect port>;
//!     return 301 https://<host>$request_uri;
//! }
//! ```

use std::fmt;

use url::Url;

use crate::config::model::{ProxyConfig, ServiceKind};
use crate::diff::snapshot::AppliedState;

/// A rendered site file for one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteFile {
    pub service: ServiceKind,
    pub file_name: &'static str,
    pub contents: String,
}

impl SiteFile {
    /// File name used for `kind` inside the sites directory.
    pub fn file_name_for(kind: ServiceKind) -> &'static str {
        match kind {
            ServiceKind::Git => "gitlab-http.conf",
            ServiceKind::Registry => "gitlab-registry.conf",
        }
    }
}

/// The complete nginx configuration for an applied state. Services absent
/// from `sites` are not provisioned and have no site file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedConfig {
    pub sites: Vec<SiteFile>,
}

impl RenderedConfig {
    pub fn site(&self, kind: ServiceKind) -> Option<&SiteFile> {
        self.sites.iter().find(|site| site.service == kind)
    }
}

/// Render every provisioned service in `state`.
pub fn render_state(state: &AppliedState) -> RenderedConfig {
    let sites = state
        .iter()
        .map(|(kind, proxy)| SiteFile {
            service: kind,
            file_name: SiteFile::file_name_for(kind),
            contents: Site { kind, proxy }.to_string(),
        })
        .collect();
    RenderedConfig { sites }
}

struct Site<'a> {
    kind: ServiceKind,
    proxy: &'a ProxyConfig,
}

impl fmt::Display for Site<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let proxy = self.proxy;
        let host = proxy.host();

        writeln!(f, "# {} front, managed by proxy-reconciler", self.kind)?;
        writeln!(f, "server {{")?;
        if proxy.listen_https {
            writeln!(f, "    listen {} ssl;", proxy.listen_port)?;
        } else {
            writeln!(f, "    listen {};", proxy.listen_port)?;
        }
        writeln!(f, "    server_name {host};")?;

        if proxy.listen_https {
            if let Some((cert, key)) = proxy.certificate_paths().pair() {
                writeln!(f, "    ssl_certificate {};", cert.display())?;
                writeln!(f, "    ssl_certificate_key {};", key.display())?;
            }
        }

        writeln!(f)?;
        writeln!(f, "    location / {{")?;
        for (name, value) in &proxy.proxy_headers {
            writeln!(f, "        proxy_set_header {} {};", name, quote(value))?;
        }
        writeln!(f, "        proxy_pass {};", proxy_target(&proxy.upstream))?;
        writeln!(f, "    }}")?;
        writeln!(f, "}}")?;

        if proxy.has_redirect_listener() {
            let target = match proxy.listen_port {
                443 => format!("https://{host}"),
                port => format!("https://{host}:{port}"),
            };
            writeln!(f)?;
            writeln!(f, "server {{")?;
            writeln!(f, "    listen {};", proxy.redirect_http_to_https_port)?;
            writeln!(f, "    server_name {host};")?;
            writeln!(f, "    return 301 {target}$request_uri;")?;
            writeln!(f, "}}")?;
        }
        Ok(())
    }
}

/// A bare origin keeps the request URI intact; `proxy_pass` with a trailing
/// `/` would rewrite it.
fn proxy_target(upstream: &Url) -> String {
    if upstream.path() == "/" && upstream.query().is_none() {
        upstream.origin().ascii_serialization()
    } else {
        upstream.as_str().to_string()
    }
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}
