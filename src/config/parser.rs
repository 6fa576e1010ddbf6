//! Parser for the Omnibus-style settings file.
//!
//! # Accepted Syntax
//! ```text
//! external_url "https://git.example.org"        # bare assignment
//! registry_external_url = "https://registry.example.org"
//! nginx['listen_port'] = 80                     # bracket form
//! registry_nginx.listen_https = false           # dotted form
//! nginx['proxy_set_headers'] = {
//!   "X-Forwarded-Proto" => "http",
//!   "Host" => "registry.example.org"
//! }
//! roles ['application_role']                    # unmanaged call
//! gitlab_rails['env'] = { "HOME" => ENV['HOME'] } # unmanaged expression
//! ```
//!
//! # Design Decisions
//! - Strict schema: every known key has one accepted value type
//! - Unknown keys become warnings, never errors (forward compatibility).
//!   Their values only need balanced brackets and closed strings.
//! - Later assignments win, as they do when Omnibus evaluates the file
//! - `nil` means "unset" and falls back to the derived default

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;
use url::Url;

use crate::config::model::{ProxyConfig, ProxyHeaders, ServiceConfig, ServiceKind};

/// Fatal parse error. A malformed file is never partially applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedConfig {
    #[error("line {line}: {reason}")]
    Syntax { line: usize, reason: String },

    #[error("line {line}: invalid value for `{key}`: {reason}")]
    InvalidValue {
        line: usize,
        key: String,
        reason: String,
    },

    #[error("missing required key `{key}`")]
    MissingKey { key: String },
}

/// Non-fatal finding, such as a key this reconciler does not manage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseWarning {
    pub line: usize,
    pub key: String,
    pub message: String,
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: `{}` {}", self.line, self.key, self.message)
    }
}

/// Result of a successful parse.
#[derive(Debug, Clone)]
pub struct ParsedConfig {
    pub services: ServiceConfig,
    pub warnings: Vec<ParseWarning>,
}

/// Parse the settings file contents.
pub fn parse(input: &str) -> Result<ParsedConfig, MalformedConfig> {
    let mut git = ServiceDraft::default();
    let mut registry = ServiceDraft::default();
    let mut warnings = Vec::new();

    for statement in split_statements(input)? {
        let assignment = parse_statement(&statement)?;
        let key_label = assignment.label();

        let kind_for_url = ServiceKind::ALL
            .into_iter()
            .find(|kind| kind.url_key() == assignment.target);
        let kind_for_block = ServiceKind::ALL
            .into_iter()
            .find(|kind| kind.block_name() == assignment.target);

        let known = match (kind_for_url, kind_for_block, &assignment.subkey) {
            (Some(kind), _, None) => {
                let draft = draft_for(kind, &mut git, &mut registry);
                draft.external_url = to_http_url(&assignment, &key_label)?;
                true
            }
            (_, Some(kind), Some(subkey)) => {
                let draft = draft_for(kind, &mut git, &mut registry);
                draft.assign(subkey, &assignment, &key_label)?
            }
            _ => false,
        };

        if !known {
            tracing::debug!(
                line = assignment.line,
                key = %key_label,
                value = %assignment.value,
                "Ignoring unmanaged key"
            );
            warnings.push(ParseWarning {
                line: assignment.line,
                key: key_label,
                message: "is not managed by the reconciler and was ignored".to_string(),
            });
        }
    }

    let services = ServiceConfig {
        git: git.build(ServiceKind::Git)?,
        registry: registry.build(ServiceKind::Registry)?,
    };

    Ok(ParsedConfig { services, warnings })
}

fn draft_for<'a>(
    kind: ServiceKind,
    git: &'a mut ServiceDraft,
    registry: &'a mut ServiceDraft,
) -> &'a mut ServiceDraft {
    match kind {
        ServiceKind::Git => git,
        ServiceKind::Registry => registry,
    }
}

/// Keys of an `nginx` / `registry_nginx` block that the reconciler manages.
const MANAGED_KEYS: [&str; 8] = [
    "listen_port",
    "listen_https",
    "redirect_http_to_https",
    "redirect_http_to_https_port",
    "ssl_certificate",
    "ssl_certificate_key",
    "proxy_set_headers",
    "upstream",
];

fn is_managed(target: &str, subkey: Option<&str>) -> bool {
    ServiceKind::ALL.into_iter().any(|kind| match subkey {
        None => kind.url_key() == target,
        Some(key) => kind.block_name() == target && MANAGED_KEYS.contains(&key),
    })
}

/// One logical statement; bracketed literals may span several physical lines.
#[derive(Debug)]
struct Statement {
    line: usize,
    text: String,
}

fn split_statements(input: &str) -> Result<Vec<Statement>, MalformedConfig> {
    let mut statements = Vec::new();
    let mut pending: Option<(usize, String, i32)> = None;

    for (idx, raw) in input.lines().enumerate() {
        let line = idx + 1;
        let (text, delta) = strip_comment(raw, line)?;
        let text = text.trim();

        match pending.take() {
            Some((start, mut buf, depth)) => {
                if !text.is_empty() {
                    buf.push(' ');
                    buf.push_str(text);
                }
                let depth = depth + delta;
                if depth > 0 {
                    pending = Some((start, buf, depth));
                } else {
                    statements.push(Statement { line: start, text: buf });
                }
            }
            None if text.is_empty() => {}
            None if delta > 0 => pending = Some((line, text.to_string(), delta)),
            None => statements.push(Statement {
                line,
                text: text.to_string(),
            }),
        }
    }

    if let Some((start, _, _)) = pending {
        return Err(MalformedConfig::Syntax {
            line: start,
            reason: "unterminated bracket".to_string(),
        });
    }

    Ok(statements)
}

/// Cut a trailing `#` comment and report the bracket depth change of the rest.
fn strip_comment(line: &str, line_no: usize) -> Result<(&str, i32), MalformedConfig> {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut depth = 0;
    let mut end = line.len();

    for (idx, ch) in line.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => quote = Some(ch),
            '{' | '[' | '(' => depth += 1,
            '}' | ']' | ')' => depth -= 1,
            '#' => {
                end = idx;
                break;
            }
            _ => {}
        }
    }

    if quote.is_some() {
        return Err(MalformedConfig::Syntax {
            line: line_no,
            reason: "unterminated string".to_string(),
        });
    }

    Ok((&line[..end], depth))
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Str(String),
    Int(i64),
    Bool(bool),
    Nil,
    Hash(Vec<(String, Value)>),
    Array(Vec<Value>),
    /// Unparsed expression assigned to an unmanaged key.
    Raw(String),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "a string",
            Value::Int(_) => "an integer",
            Value::Bool(_) => "a boolean",
            Value::Nil => "nil",
            Value::Hash(_) => "a hash",
            Value::Array(_) => "an array",
            Value::Raw(_) => "an expression",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Int(n) => write!(f, "{}", n),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Nil => f.write_str("nil"),
            Value::Hash(entries) => {
                f.write_str("{")?;
                for (idx, (key, value)) in entries.iter().enumerate() {
                    let sep = if idx == 0 { " " } else { ", " };
                    write!(f, "{}{:?} => {}", sep, key, value)?;
                }
                f.write_str(" }")
            }
            Value::Array(items) => {
                f.write_str("[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Value::Raw(expr) => f.write_str(expr),
        }
    }
}

#[derive(Debug)]
struct Assignment {
    line: usize,
    target: String,
    subkey: Option<String>,
    value: Value,
}

impl Assignment {
    fn label(&self) -> String {
        match &self.subkey {
            Some(subkey) => format!("{}['{}']", self.target, subkey),
            None => self.target.clone(),
        }
    }

    fn invalid(&self, key: &str, reason: impl Into<String>) -> MalformedConfig {
        MalformedConfig::InvalidValue {
            line: self.line,
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    fn expected(&self, key: &str, what: &str) -> MalformedConfig {
        self.invalid(
            key,
            format!("expected {}, found {}", what, self.value.type_name()),
        )
    }
}

fn parse_statement(statement: &Statement) -> Result<Assignment, MalformedConfig> {
    let mut cursor = Cursor::new(&statement.text, statement.line);

    let target = cursor
        .identifier()
        .ok_or_else(|| cursor.error("expected a setting name"))?
        .to_string();

    let subkey = if cursor.eat('[') {
        cursor.skip_ws();
        if !matches!(cursor.peek(), Some('"' | '\'')) {
            return Err(cursor.error("expected a quoted key inside `[...]`"));
        }
        let key = cursor.quoted()?;
        cursor.skip_ws();
        if !cursor.eat(']') {
            return Err(cursor.error("expected `]`"));
        }
        Some(key)
    } else if cursor.eat('.') {
        let key = cursor
            .key_segment()
            .ok_or_else(|| cursor.error("expected a key after `.`"))?;
        Some(key.to_string())
    } else {
        None
    };

    let managed = is_managed(&target, subkey.as_deref());
    cursor.skip_ws();
    // `external_url "https://..."` is a method call in the source format.
    if !cursor.eat('=') && subkey.is_some() && managed {
        return Err(cursor.error("expected `=`"));
    }

    let start = cursor.pos;
    let value = match cursor.value_to_end() {
        Ok(value) => value,
        Err(e) if managed => return Err(e),
        Err(_) => {
            cursor.pos = start;
            cursor.balanced()?
        }
    };

    Ok(Assignment {
        line: statement.line,
        target,
        subkey,
        value,
    })
}

struct Cursor<'a> {
    text: &'a str,
    pos: usize,
    line: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str, line: usize) -> Self {
        Self { text, pos: 0, line }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn eat_str(&mut self, expected: &str) -> bool {
        if self.rest().starts_with(expected) {
            self.pos += expected.len();
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn is_done(&mut self) -> bool {
        self.skip_ws();
        self.pos == self.text.len()
    }

    fn error(&self, reason: impl Into<String>) -> MalformedConfig {
        MalformedConfig::Syntax {
            line: self.line,
            reason: reason.into(),
        }
    }

    fn take_while(&mut self, accept: impl Fn(char) -> bool) -> Option<&'a str> {
        let text = self.text;
        let start = self.pos;
        while matches!(self.peek(), Some(c) if accept(c)) {
            self.bump();
        }
        let end = self.pos;
        (end > start).then(|| &text[start..end])
    }

    fn identifier(&mut self) -> Option<&'a str> {
        self.take_while(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    fn key_segment(&mut self) -> Option<&'a str> {
        self.take_while(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }

    fn quoted(&mut self) -> Result<String, MalformedConfig> {
        let quote = self
            .bump()
            .ok_or_else(|| self.error("expected a quoted string"))?;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some(c) if c == quote => break,
                Some('\\') => match self.bump() {
                    None => return Err(self.error("unterminated string")),
                    Some('n') if quote == '"' => out.push('\n'),
                    Some('t') if quote == '"' => out.push('\t'),
                    Some(c) if quote == '"' || c == '\\' || c == quote => out.push(c),
                    Some(c) => {
                        out.push('\\');
                        out.push(c);
                    }
                },
                Some(c) => out.push(c),
            }
        }
        Ok(out)
    }

    /// A literal that must be the rest of the statement.
    fn value_to_end(&mut self) -> Result<Value, MalformedConfig> {
        let value = self.value()?;
        if !self.is_done() {
            return Err(self.error("unexpected trailing input"));
        }
        Ok(value)
    }

    fn value(&mut self) -> Result<Value, MalformedConfig> {
        self.skip_ws();
        match self.peek() {
            Some('"' | '\'') => Ok(Value::Str(self.quoted()?)),
            Some('{') => self.hash(),
            Some('[') => self.array(),
            Some(c) if c == '-' || c.is_ascii_digit() => {
                let start = self.pos;
                self.bump();
                self.take_while(|c| c.is_ascii_digit() || c == '_');
                let digits: String = self.text[start..self.pos]
                    .chars()
                    .filter(|c| *c != '_')
                    .collect();
                digits
                    .parse::<i64>()
                    .map(Value::Int)
                    .map_err(|_| self.error(format!("invalid integer `{}`", digits)))
            }
            Some(_) => match self.identifier() {
                Some("true") => Ok(Value::Bool(true)),
                Some("false") => Ok(Value::Bool(false)),
                Some("nil") => Ok(Value::Nil),
                Some(other) => Err(self.error(format!("unexpected token `{}`", other))),
                None => Err(self.error("expected a value")),
            },
            None => Err(self.error("missing value")),
        }
    }

    fn hash(&mut self) -> Result<Value, MalformedConfig> {
        self.bump();
        let mut entries = Vec::new();
        loop {
            self.skip_ws();
            if self.eat('}') {
                break;
            }
            if !matches!(self.peek(), Some('"' | '\'')) {
                return Err(self.error("expected a quoted hash key"));
            }
            let key = self.quoted()?;
            self.skip_ws();
            if !self.eat_str("=>") {
                return Err(self.error("expected `=>` after hash key"));
            }
            let value = self.value()?;
            entries.push((key, value));

            self.skip_ws();
            if self.eat(',') {
                continue;
            }
            if self.eat('}') {
                break;
            }
            return Err(self.error("expected `,` or `}` in hash literal"));
        }
        Ok(Value::Hash(entries))
    }

    fn array(&mut self) -> Result<Value, MalformedConfig> {
        self.bump();
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.eat(']') {
                break;
            }
            items.push(self.value()?);

            self.skip_ws();
            if self.eat(',') {
                continue;
            }
            if self.eat(']') {
                break;
            }
            return Err(self.error("expected `,` or `]` in array literal"));
        }
        Ok(Value::Array(items))
    }

    /// Take the rest of the statement as an opaque expression, requiring only
    /// matched brackets and closed strings.
    fn balanced(&mut self) -> Result<Value, MalformedConfig> {
        self.skip_ws();
        let start = self.pos;
        let mut open: Vec<char> = Vec::new();

        while let Some(ch) = self.peek() {
            match ch {
                '"' | '\'' => {
                    self.quoted()?;
                    continue;
                }
                '{' => open.push('}'),
                '[' => open.push(']'),
                '(' => open.push(')'),
                '}' | ']' | ')' => {
                    if open.pop() != Some(ch) {
                        return Err(self.error(format!("unbalanced `{}`", ch)));
                    }
                }
                _ => {}
            }
            self.bump();
        }

        if let Some(close) = open.last() {
            return Err(self.error(format!("missing `{}`", close)));
        }
        Ok(Value::Raw(self.text[start..].trim_end().to_string()))
    }
}

/// Settings collected for one service before defaults are derived.
#[derive(Debug, Default)]
struct ServiceDraft {
    external_url: Option<Url>,
    listen_port: Option<u16>,
    listen_https: Option<bool>,
    redirect_http_to_https: Option<bool>,
    redirect_http_to_https_port: Option<u16>,
    ssl_certificate: Option<PathBuf>,
    ssl_certificate_key: Option<PathBuf>,
    proxy_headers: Option<ProxyHeaders>,
    upstream: Option<Url>,
}

impl ServiceDraft {
    /// Apply one `block['key'] = value` assignment. Returns `false` for keys
    /// this reconciler does not manage.
    fn assign(
        &mut self,
        key: &str,
        assignment: &Assignment,
        label: &str,
    ) -> Result<bool, MalformedConfig> {
        match key {
            "listen_port" => self.listen_port = to_port(assignment, label)?,
            "listen_https" => self.listen_https = to_bool(assignment, label)?,
            "redirect_http_to_https" => {
                self.redirect_http_to_https = to_bool(assignment, label)?
            }
            "redirect_http_to_https_port" => {
                self.redirect_http_to_https_port = to_port(assignment, label)?
            }
            "ssl_certificate" => self.ssl_certificate = to_path(assignment, label)?,
            "ssl_certificate_key" => self.ssl_certificate_key = to_path(assignment, label)?,
            "proxy_set_headers" => self.proxy_headers = to_headers(assignment, label)?,
            "upstream" => self.upstream = to_http_url(assignment, label)?,
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Fill in derived defaults and produce the final settings.
    fn build(self, kind: ServiceKind) -> Result<ProxyConfig, MalformedConfig> {
        let external_url = self.external_url.ok_or_else(|| MalformedConfig::MissingKey {
            key: kind.url_key().to_string(),
        })?;
        let https_url = external_url.scheme() == "https";
        let default_port = if https_url { 443 } else { 80 };

        let upstream = match self.upstream {
            Some(url) => url,
            None => Url::parse(kind.default_upstream()).map_err(|e| {
                MalformedConfig::InvalidValue {
                    line: 0,
                    key: format!("{}['upstream']", kind.block_name()),
                    reason: e.to_string(),
                }
            })?,
        };

        Ok(ProxyConfig {
            listen_port: self
                .listen_port
                .unwrap_or_else(|| external_url.port_or_known_default().unwrap_or(default_port)),
            listen_https: self.listen_https.unwrap_or(https_url),
            redirect_http_to_https: self.redirect_http_to_https.unwrap_or(false),
            redirect_http_to_https_port: self.redirect_http_to_https_port.unwrap_or(80),
            ssl_certificate: self.ssl_certificate,
            ssl_certificate_key: self.ssl_certificate_key,
            proxy_headers: self.proxy_headers.unwrap_or_default(),
            upstream,
            external_url,
        })
    }
}

fn to_port(assignment: &Assignment, label: &str) -> Result<Option<u16>, MalformedConfig> {
    match assignment.value {
        Value::Int(n) if (1..=65535).contains(&n) => Ok(Some(n as u16)),
        Value::Int(n) => Err(assignment.invalid(
            label,
            format!("port {} is out of range 1-65535", n),
        )),
        Value::Nil => Ok(None),
        _ => Err(assignment.expected(label, "an integer port")),
    }
}

fn to_bool(assignment: &Assignment, label: &str) -> Result<Option<bool>, MalformedConfig> {
    match assignment.value {
        Value::Bool(b) => Ok(Some(b)),
        Value::Nil => Ok(None),
        _ => Err(assignment.expected(label, "`true` or `false`")),
    }
}

fn to_path(assignment: &Assignment, label: &str) -> Result<Option<PathBuf>, MalformedConfig> {
    match &assignment.value {
        Value::Str(s) if s.is_empty() => Err(assignment.invalid(label, "path is empty")),
        Value::Str(s) => Ok(Some(PathBuf::from(s))),
        Value::Nil => Ok(None),
        _ => Err(assignment.expected(label, "a path string")),
    }
}

fn to_headers(
    assignment: &Assignment,
    label: &str,
) -> Result<Option<ProxyHeaders>, MalformedConfig> {
    let entries = match &assignment.value {
        Value::Hash(entries) => entries,
        Value::Nil => return Ok(None),
        _ => return Err(assignment.expected(label, "a hash of header names to values")),
    };

    let mut headers = ProxyHeaders::new();
    for (name, value) in entries {
        if name.is_empty() || name.chars().any(|c| c.is_whitespace() || c == ':') {
            return Err(assignment.invalid(label, format!("invalid header name `{}`", name)));
        }
        match value {
            Value::Str(v) => {
                headers.insert(name.clone(), v.clone());
            }
            other => {
                return Err(assignment.invalid(
                    label,
                    format!("header `{}` must be a string, found {}", name, other.type_name()),
                ))
            }
        }
    }
    Ok(Some(headers))
}

fn to_http_url(assignment: &Assignment, label: &str) -> Result<Option<Url>, MalformedConfig> {
    let raw = match &assignment.value {
        Value::Str(s) => s,
        Value::Nil => return Ok(None),
        _ => return Err(assignment.expected(label, "a URL string")),
    };
    let url = Url::parse(raw).map_err(|e| assignment.invalid(label, e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(assignment.invalid(
            label,
            format!("unsupported scheme `{}`, expected http or https", url.scheme()),
        ));
    }
    if url.host_str().is_none() {
        return Err(assignment.invalid(label, "URL has no host"));
    }
    Ok(Some(url))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGINAL: &str = r#"
external_url "https://git.x.archive.org"
registry_external_url "https://registry.x.archive.org"
# registry_external_url "https://registry.x.archive.org:88"


nginx['listen_port'] = 80
registry_nginx['listen_port'] = 80

nginx['listen_https'] = false
registry_nginx['listen_https'] = false

nginx['redirect_http_to_https'] = false

# new:
registry_nginx['redirect_http_to_https'] = false

# new:
nginx['proxy_set_headers'] = {
  "X-Forwarded-Proto" => "http",
  "X-Forwarded-Protocol" => "http",
  "Host" => "registry.x.archive.org"
 }
"#;

    #[test]
    fn test_parse_omnibus_file() {
        let parsed = parse(ORIGINAL).unwrap();
        let git = &parsed.services.git;
        let registry = &parsed.services.registry;

        assert_eq!(git.host(), "git.x.archive.org");
        assert_eq!(git.listen_port, 80);
        assert!(!git.listen_https);
        assert!(!git.redirect_http_to_https);
        assert_eq!(
            git.proxy_headers.keys().collect::<Vec<_>>(),
            vec!["X-Forwarded-Proto", "X-Forwarded-Protocol", "Host"]
        );
        assert_eq!(git.proxy_headers["Host"], "registry.x.archive.org");

        assert_eq!(registry.host(), "registry.x.archive.org");
        assert_eq!(registry.listen_port, 80);
        assert!(registry.proxy_headers.is_empty());
        assert_eq!(registry.upstream.as_str(), "http://127.0.0.1:5000/");
        assert!(parsed.warnings.is_empty());
    }

    #[test]
    fn test_defaults_derived_from_external_url() {
        let parsed = parse(
            "external_url 'https://git.example.org'\n\
             registry_external_url = \"https://registry.example.org:88\"\n",
        )
        .unwrap();
        assert_eq!(parsed.services.git.listen_port, 443);
        assert!(parsed.services.git.listen_https);
        assert_eq!(parsed.services.registry.listen_port, 88);
        assert!(parsed.services.registry.listen_https);
        assert_eq!(parsed.services.registry.redirect_http_to_https_port, 80);
    }

    #[test]
    fn test_dotted_form_and_nil() {
        let parsed = parse(
            "external_url \"http://git.example.org\"\n\
             registry_external_url \"http://registry.example.org\"\n\
             registry_nginx.listen_port = 5050\n\
             nginx.ssl_certificate = nil\n",
        )
        .unwrap();
        assert_eq!(parsed.services.registry.listen_port, 5050);
        assert_eq!(parsed.services.git.ssl_certificate, None);
    }

    #[test]
    fn test_unknown_keys_are_warnings() {
        let parsed = parse(
            "external_url \"http://git.example.org\"\n\
             registry_external_url \"http://registry.example.org\"\n\
             nginx['worker_processes'] = 4\n\
             letsencrypt['enable'] = false\n",
        )
        .unwrap();
        assert_eq!(parsed.warnings.len(), 2);
        assert_eq!(parsed.warnings[0].key, "nginx['worker_processes']");
        assert_eq!(parsed.warnings[0].line, 3);
        assert_eq!(parsed.warnings[1].key, "letsencrypt['enable']");
    }

    #[test]
    fn test_arrays_and_unmanaged_expressions() {
        let parsed = parse(
            "external_url \"http://git.example.org\"\n\
             registry_external_url \"http://registry.example.org\"\n\
             roles ['application_role', 'geo_primary_role']\n\
             nginx['real_ip_trusted_addresses'] = [\n\
               '10.0.0.0/8',\n\
               '192.168.0.0/16'\n\
             ]\n\
             gitlab_rails['ldap_servers'] = { 'main' => { 'hosts' => ['ldap1', 'ldap2'] } }\n\
             gitlab_rails['env'] = { 'HOME' => ENV['HOME'] }\n\
             git_data_dirs({ 'default' => { 'path' => '/var/opt/git' } })\n\
             nginx['listen_port'] = 8080\n",
        )
        .unwrap();

        let keys: Vec<_> = parsed.warnings.iter().map(|w| w.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "roles",
                "nginx['real_ip_trusted_addresses']",
                "gitlab_rails['ldap_servers']",
                "gitlab_rails['env']",
                "git_data_dirs",
            ]
        );
        assert_eq!(parsed.warnings[1].line, 4);
        assert_eq!(parsed.services.git.listen_port, 8080);
    }

    #[test]
    fn test_array_for_managed_key_is_a_type_error() {
        let err = parse(
            "external_url \"http://git.example.org\"\n\
             registry_external_url \"http://registry.example.org\"\n\
             nginx['listen_port'] = [80, 443]\n",
        )
        .unwrap_err();
        match err {
            MalformedConfig::InvalidValue { line, reason, .. } => {
                assert_eq!(line, 3);
                assert!(reason.contains("an array"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unbalanced_unmanaged_expression_is_rejected() {
        assert!(matches!(
            parse("gitlab_rails['env'] = { 'HOME' => ENV['HOME') }\n"),
            Err(MalformedConfig::Syntax { line: 1, .. })
        ));
    }

    #[test]
    fn test_port_out_of_range() {
        let err = parse(
            "external_url \"http://git.example.org\"\n\
             registry_external_url \"http://registry.example.org\"\n\
             nginx['listen_port'] = 70000\n",
        )
        .unwrap_err();
        assert!(matches!(err, MalformedConfig::InvalidValue { line: 3, .. }));

        let err = parse(
            "external_url \"http://git.example.org\"\n\
             registry_external_url \"http://registry.example.org\"\n\
             nginx['listen_port'] = 0\n",
        )
        .unwrap_err();
        assert!(matches!(err, MalformedConfig::InvalidValue { .. }));
    }

    #[test]
    fn test_port_not_numeric() {
        let err = parse(
            "external_url \"http://git.example.org\"\n\
             registry_external_url \"http://registry.example.org\"\n\
             registry_nginx['listen_port'] = \"eighty\"\n",
        )
        .unwrap_err();
        match err {
            MalformedConfig::InvalidValue { key, reason, .. } => {
                assert_eq!(key, "registry_nginx['listen_port']");
                assert!(reason.contains("a string"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_missing_required_url() {
        let err = parse("external_url \"http://git.example.org\"\n").unwrap_err();
        assert_eq!(
            err,
            MalformedConfig::MissingKey {
                key: "registry_external_url".into()
            }
        );
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(
            parse("external_url \"http://git.example.org\n"),
            Err(MalformedConfig::Syntax { line: 1, .. })
        ));
        assert!(matches!(
            parse("nginx['proxy_set_headers'] = {\n  \"Host\" => \"x\"\n"),
            Err(MalformedConfig::Syntax { line: 1, .. })
        ));
        assert!(matches!(
            parse("nginx['listen_port'] 80\n"),
            Err(MalformedConfig::Syntax { .. })
        ));
    }

    #[test]
    fn test_comment_inside_string_is_kept() {
        let parsed = parse(
            "external_url \"http://git.example.org\"\n\
             registry_external_url \"http://registry.example.org\"\n\
             nginx['proxy_set_headers'] = { \"X-Tag\" => \"a#b\" } # trailing\n",
        )
        .unwrap();
        assert_eq!(parsed.services.git.proxy_headers["X-Tag"], "a#b");
    }

    #[test]
    fn test_rejects_non_http_url() {
        let err = parse(
            "external_url \"ftp://git.example.org\"\n\
             registry_external_url \"http://registry.example.org\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, MalformedConfig::InvalidValue { line: 1, .. }));
    }
}
