//! Compose descriptor scanning: bind-mount sources only
//!
//! Recognizes service-level `volumes:` blocks in short syntax
//! (`- ./src:/dst[:mode]`), long syntax (`source: ./src`) and inline flow lists
//! (`volumes: ["./a:/b"]`). Named volumes, anonymous volumes and the top-level
//! `volumes:` section are not bind mounts and are ignored. A bind source starts
//! with `.`, `/`, `~` or a `$` interpolation. Sources are kept as declared;
//! [`expand_source`] resolves `~` and `${VAR}` when the volume is hashed.

use crate::error::{Result, TeeError};
use std::collections::BTreeSet;

/// Normalized, deduplicated, sorted bind-mount sources declared in `text`
pub fn extract_volume_sources(text: &str) -> Vec<String> {
    let mut sources = BTreeSet::new();
    let mut block_indent: Option<usize> = None;

    for raw in text.lines() {
        let line = strip_comment(raw);
        let content = line.trim();
        if content.is_empty() {
            continue;
        }
        let indent = line.len() - line.trim_start().len();

        if let Some(key_indent) = block_indent {
            // YAML allows list items at the same indentation as their key
            let item_at_key = indent == key_indent && content.starts_with('-');
            if indent > key_indent || item_at_key {
                if let Some(source) = parse_volume_entry(content) {
                    sources.insert(source);
                }
                continue;
            }
            block_indent = None;
        }

        if let Some(rest) = content.strip_prefix("volumes:") {
            if indent == 0 {
                continue;
            }
            let rest = rest.trim();
            if rest.is_empty() {
                block_indent = Some(indent);
            } else if let Some(list) = rest.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
                for entry in list.split(',') {
                    if let Some(source) = parse_short_syntax(entry) {
                        sources.insert(source);
                    }
                }
            }
        }
    }

    sources.into_iter().collect()
}

/// Cut a trailing `# comment`. A `#` only starts a comment outside quotes and
/// after whitespace (or at the start of the line).
fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut prev: Option<char> = None;
    for (i, c) in line.char_indices() {
        let after_blank = prev.map_or(true, char::is_whitespace);
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if (c == '"' || c == '\'') && prev.map_or(true, opens_scalar) => quote = Some(c),
            None if c == '#' && after_blank => return &line[..i],
            None => {}
        }
        prev = Some(c);
    }
    line
}

fn opens_scalar(c: char) -> bool {
    c.is_whitespace() || matches!(c, '[' | ',' | ':' | '-')
}

fn parse_volume_entry(content: &str) -> Option<String> {
    let item = content.strip_prefix('-').map(str::trim).unwrap_or(content);
    match split_mapping(item) {
        Some((key, value)) => {
            if key == "source" {
                bind_source(unquote(value))
            } else {
                None
            }
        }
        None => parse_short_syntax(item),
    }
}

/// `key: value` where key is a plain identifier. `./web:/x` is not a mapping.
fn split_mapping(item: &str) -> Option<(&str, &str)> {
    let colon = item.find(':')?;
    let key = &item[..colon];
    let after = &item[colon + 1..];
    let is_ident = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if is_ident && (after.is_empty() || after.starts_with(char::is_whitespace)) {
        Some((key, after.trim()))
    } else {
        None
    }
}

fn parse_short_syntax(entry: &str) -> Option<String> {
    let mapping = unquote(entry.trim());
    // no colon: anonymous volume
    let (source, _target) = split_source(mapping)?;
    bind_source(source)
}

/// Split `src:dst` at the first colon outside a `${...}` interpolation
fn split_source(mapping: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    let mut prev = None;
    for (i, c) in mapping.char_indices() {
        match c {
            '{' if prev == Some('$') => depth += 1,
            '}' if depth > 0 => depth -= 1,
            ':' if depth == 0 => return Some((&mapping[..i], &mapping[i + 1..])),
            _ => {}
        }
        prev = Some(c);
    }
    None
}

fn bind_source(source: &str) -> Option<String> {
    let source = source.trim();
    if source.starts_with(['.', '/', '~', '$']) {
        Some(normalize_source(source))
    } else {
        None
    }
}

fn unquote(value: &str) -> &str {
    value.trim().trim_matches(|c| c == '"' || c == '\'')
}

/// `./web/` → `web`, `/srv//data` → `/srv/data`, `.` → `.`
pub fn normalize_source(source: &str) -> String {
    let absolute = source.starts_with('/');
    let joined = source
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/");
    if absolute {
        format!("/{}", joined)
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Expand `$VAR`, `${VAR}`, `${VAR:-default}`, `${VAR-default}` and `$$`, then a
/// leading `~` (from `HOME`). Accepts both declared and normalized sources, so a
/// plain `web` passes through. Unset variables without a default are an error: a
/// volume that cannot be located must not drop out of the measurement.
pub fn expand_source(source: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<String> {
    let unresolved =
        |what: String| TeeError::Crypto(format!("cannot resolve volume source {}: {}", source, what));

    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        if let Some(tail) = after.strip_prefix('$') {
            out.push('$');
            rest = tail;
        } else if let Some(body) = after.strip_prefix('{') {
            let end = body
                .find('}')
                .ok_or_else(|| unresolved("unterminated ${".to_string()))?;
            let expr = &body[..end];
            let (name, default, empty_is_unset) = match expr.find(":-") {
                Some(i) => (&expr[..i], Some(&expr[i + 2..]), true),
                None => match expr.find('-') {
                    Some(i) => (&expr[..i], Some(&expr[i + 1..]), false),
                    None => (expr, None, false),
                },
            };
            let value = lookup(name).filter(|v| !(empty_is_unset && v.is_empty()));
            match (value, default) {
                (Some(v), _) => out.push_str(&v),
                (None, Some(d)) => out.push_str(d),
                (None, None) => return Err(unresolved(format!("{} is not set", name))),
            }
            rest = &body[end + 1..];
        } else {
            let len = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            if len == 0 {
                return Err(unresolved("bare $".to_string()));
            }
            let name = &after[..len];
            let value = lookup(name).ok_or_else(|| unresolved(format!("{} is not set", name)))?;
            out.push_str(&value);
            rest = &after[len..];
        }
    }
    out.push_str(rest);

    if out == "~" || out.starts_with("~/") {
        let home = lookup("HOME").ok_or_else(|| unresolved("HOME is not set".to_string()))?;
        out = format!("{}{}", home.trim_end_matches('/'), &out[1..]);
    }
    // a leading interpolation must land on a host path, not a named volume
    if source.starts_with('$') && !(out.starts_with('.') || out.starts_with('/')) {
        return Err(unresolved(format!("{} is not a host path", out)));
    }
    Ok(out)
}
