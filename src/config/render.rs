//! Rendering a `ServiceConfig` back into the settings file format.
//!
//! Every field is written explicitly in bracket form, so parsing the output
//! yields the same structure without relying on derived defaults.

use std::fmt;
use std::path::PathBuf;

use crate::config::model::{ProxyConfig, ServiceConfig};

/// Render the settings file for `config`.
pub fn render(config: &ServiceConfig) -> String {
    SourceFile(config).to_string()
}

struct SourceFile<'a>(&'a ServiceConfig);

impl fmt::Display for SourceFile<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (kind, proxy) in self.0.iter() {
            writeln!(f, "{} {}", kind.url_key(), quote(proxy.external_url.as_str()))?;
        }
        for (kind, proxy) in self.0.iter() {
            writeln!(f)?;
            write_block(f, kind.block_name(), proxy)?;
        }
        Ok(())
    }
}

fn write_block(f: &mut fmt::Formatter<'_>, block: &str, proxy: &ProxyConfig) -> fmt::Result {
    writeln!(f, "{block}['listen_port'] = {}", proxy.listen_port)?;
    writeln!(f, "{block}['listen_https'] = {}", proxy.listen_https)?;
    writeln!(
        f,
        "{block}['redirect_http_to_https'] = {}",
        proxy.redirect_http_to_https
    )?;
    writeln!(
        f,
        "{block}['redirect_http_to_https_port'] = {}",
        proxy.redirect_http_to_https_port
    )?;
    writeln!(
        f,
        "{block}['ssl_certificate'] = {}",
        optional_path(&proxy.ssl_certificate)
    )?;
    writeln!(
        f,
        "{block}['ssl_certificate_key'] = {}",
        optional_path(&proxy.ssl_certificate_key)
    )?;
    writeln!(f, "{block}['upstream'] = {}", quote(proxy.upstream.as_str()))?;

    if proxy.proxy_headers.is_empty() {
        return writeln!(f, "{block}['proxy_set_headers'] = {{}}");
    }
    writeln!(f, "{block}['proxy_set_headers'] = {{")?;
    let last = proxy.proxy_headers.len() - 1;
    for (idx, (name, value)) in proxy.proxy_headers.iter().enumerate() {
        let sep = if idx == last { "" } else { "," };
        writeln!(f, "  {} => {}{}", quote(name), quote(value), sep)?;
    }
    writeln!(f, "}}")
}

fn optional_path(path: &Option<PathBuf>) -> String {
    match path {
        Some(p) => quote(&p.to_string_lossy()),
        None => "nil".to_string(),
    }
}

fn quote(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 2);
    out.push('"');
    for ch in raw.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
