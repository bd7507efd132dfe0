//! Orchestration definition (docker-compose) merge
//!
//! The compose file is human-edited, so it is never re-serialized. The
//! merge scans the top-level `services` mapping structurally (keys at the
//! mapping's indentation), and splices a new stanza in after the mapping's
//! last line. Every other byte of the file is preserved.
//!
//! Anything the scanner does not understand (no `services` mapping, a
//! flow-style `services: {}`, tabs, sequences) aborts the merge instead of
//! guessing.

use std::fmt::Write as _;

/// Why a document could not be merged into
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct MergeError(pub String);

/// Result of [`merge_service`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    AlreadyPresent,
}

/// A value inside a service stanza
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StanzaValue {
    Scalar(String),
    List(Vec<String>),
}

/// One service entry, rendered as block-style YAML
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStanza {
    pub name: String,
    pub fields: Vec<(String, StanzaValue)>,
}

impl ServiceStanza {
    pub fn new(name: impl Into<String>) -> Self {
        ServiceStanza {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn scalar(mut self, key: &str, value: impl Into<String>) -> Self {
        self.fields
            .push((key.to_string(), StanzaValue::Scalar(value.into())));
        self
    }

    pub fn list(mut self, key: &str, items: Vec<String>) -> Self {
        self.fields.push((key.to_string(), StanzaValue::List(items)));
        self
    }

    /// Render with the service key at `indent` spaces, nesting by `unit`
    pub fn render(&self, indent: usize, unit: usize) -> String {
        let pad = |n: usize| " ".repeat(n);
        let mut out = String::new();
        let _ = writeln!(out, "{}{}:", pad(indent), quote(&self.name));
        for (key, value) in &self.fields {
            match value {
                StanzaValue::Scalar(v) => {
                    let _ = writeln!(out, "{}{}: {}", pad(indent + unit), key, quote(v));
                }
                StanzaValue::List(items) => {
                    let _ = writeln!(out, "{}{}:", pad(indent + unit), key);
                    for item in items {
                        let _ = writeln!(out, "{}- {}", pad(indent + 2 * unit), quote(item));
                    }
                }
            }
        }
        out
    }

    /// A standalone compose document containing only this service
    pub fn render_document(&self) -> String {
        format!("services:\n{}", self.render(2, 2))
    }
}

fn quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
        && !value.chars().next().is_some_and(|c| c.is_ascii_digit())
        && value.parse::<f64>().is_err()
        && !matches!(
            value.to_ascii_lowercase().as_str(),
            "true" | "false" | "yes" | "no" | "on" | "off" | "y" | "n" | "null"
                | ".inf" | "-.inf" | ".nan"
        );
    if plain {
        value.to_string()
    } else {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

/// Structural view of the top-level services mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicesBlock {
    /// Service keys in document order
    pub keys: Vec<String>,
    /// Indentation of service keys, if any exist
    pub child_indent: Option<usize>,
    /// Byte offset where a new stanza goes
    pub insert_at: usize,
}

fn indentation(line: &str) -> Result<usize, MergeError> {
    let ws: &str = &line[..line.len() - line.trim_start().len()];
    if ws.contains('\t') {
        return Err(MergeError("tab indentation is not valid YAML".to_string()));
    }
    Ok(ws.len())
}

/// Key of a `key:` / `key: value` mapping line, unquoted
fn mapping_key(content: &str) -> Option<String> {
    let content = content.trim();
    if let Some(q) = content.chars().next().filter(|c| *c == '"' || *c == '\'') {
        let rest = &content[1..];
        let close = rest.find(q)?;
        let after = &rest[close + 1..];
        return after.starts_with(':').then(|| rest[..close].to_string());
    }

    let bytes = content.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b':' {
            let next = bytes.get(i + 1);
            if next.is_none() || next.is_some_and(|n| n.is_ascii_whitespace()) {
                return Some(content[..i].trim_end().to_string());
            }
        }
    }
    None
}

/// Locate the services mapping and its keys
pub fn scan_services(text: &str, services_key: &str) -> Result<ServicesBlock, MergeError> {
    #[derive(PartialEq)]
    enum State {
        Before,
        Inside,
        After,
    }

    let mut state = State::Before;
    let mut keys = Vec::new();
    let mut child_indent = None;
    let mut insert_at = None;
    let mut offset = 0usize;

    for line in text.split_inclusive('\n') {
        let start = offset;
        offset += line.len();

        let content = line.trim_end_matches(['\n', '\r']);
        let trimmed = content.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let indent = indentation(content)?;

        if indent == 0 {
            if state == State::Inside {
                state = State::After;
            }
            if trimmed == "---" || trimmed == "..." {
                continue;
            }
            if mapping_key(trimmed).as_deref() == Some(services_key) {
                if state != State::Before {
                    return Err(MergeError(format!(
                        "duplicate top-level `{services_key}` key"
                    )));
                }
                let value = trimmed
                    .split_once(':')
                    .map(|(_, v)| v.trim())
                    .unwrap_or("");
                if !value.is_empty() && !value.starts_with('#') {
                    return Err(MergeError(format!(
                        "`{services_key}` is not a block mapping (found `{value}`)"
                    )));
                }
                state = State::Inside;
                insert_at = Some(offset);
            }
            continue;
        }

        if state != State::Inside {
            continue;
        }

        match child_indent {
            None => child_indent = Some(indent),
            Some(ci) if indent < ci => {
                return Err(MergeError(format!(
                    "inconsistent indentation in `{services_key}` at byte {start}"
                )));
            }
            _ => {}
        }

        if Some(indent) == child_indent {
            if trimmed.starts_with("- ") || trimmed == "-" {
                return Err(MergeError(format!(
                    "`{services_key}` is a sequence, expected a mapping"
                )));
            }
            match mapping_key(trimmed) {
                Some(key) => keys.push(key),
                None => {
                    return Err(MergeError(format!(
                        "unrecognised line in `{services_key}`: {trimmed}"
                    )))
                }
            }
        }
        insert_at = Some(offset);
    }

    let insert_at = insert_at.ok_or_else(|| {
        MergeError(format!("no top-level `{services_key}` mapping found"))
    })?;

    Ok(ServicesBlock {
        keys,
        child_indent,
        insert_at,
    })
}

/// Add `stanza` to the services mapping of `text` unless a service with
/// the same key exists. Returns the new document and what happened.
pub fn merge_service(
    text: &str,
    services_key: &str,
    stanza: &ServiceStanza,
) -> Result<(String, MergeOutcome), MergeError> {
    let block = scan_services(text, services_key)?;
    if block.keys.iter().any(|k| k == &stanza.name) {
        return Ok((text.to_string(), MergeOutcome::AlreadyPresent));
    }

    let indent = block.child_indent.unwrap_or(2);
    let rendered = stanza.render(indent, indent);

    let mut merged = String::with_capacity(text.len() + rendered.len() + 1);
    merged.push_str(&text[..block.insert_at]);
    if !merged.is_empty() && !merged.ends_with('\n') {
        merged.push('\n');
    }
    merged.push_str(&rendered);
    merged.push_str(&text[block.insert_at..]);

    // the result must scan cleanly with exactly one more key
    let check = scan_services(&merged, services_key)?;
    let mut expected = block.keys.clone();
    expected.push(stanza.name.clone());
    if check.keys != expected {
        return Err(MergeError(format!(
            "merged document did not verify (expected services {:?}, found {:?})",
            expected, check.keys
        )));
    }

    Ok((merged, MergeOutcome::Inserted))
}

/// First host port of a `"host:container"` mapping in a compose fragment
pub fn first_host_port(fragment: &str) -> Option<u16> {
    fragment.lines().find_map(|line| {
        let item = line.trim().strip_prefix("- ")?;
        let item = item.trim().trim_matches(|c| c == '"' || c == '\'');
        let (host, _container) = item.rsplit_once(':')?;
        // tolerate "ip:host:container"
        let host = host.rsplit(':').next()?;
        host.parse().ok()
    })
}
