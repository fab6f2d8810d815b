//! `${taskId.output}` references in tool args.
//!
//! A tool task can consume a dependency's output in its args:
//!
//! - `"${search.output}"` becomes the whole output, keeping its JSON type;
//! - `"${search.output.items.0.url}"` walks into a JSON output;
//! - `"see ${search.output.title}"` is substituted inline as text.
//!
//! Anything left unresolved, including template syntaxes planners used to
//! emit (`{{...}}`, `#id.result`, bare `task.output`), fails the task before
//! the tool is reached.

use super::types::TaskResults;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unresolved placeholders: {}", .0.join(","))]
pub struct UnresolvedPlaceholders(pub Vec<String>);

/// Substitutes dependency outputs into `args`.
///
/// Only ids listed in `depends_on` are visible. Outputs that are not JSON are
/// treated as plain strings; blank outputs resolve nothing.
pub fn resolve_args(
    args: Option<&Map<String, Value>>,
    depends_on: &[String],
    results: &TaskResults,
) -> Result<Map<String, Value>, UnresolvedPlaceholders> {
    let Some(args) = args else {
        return Ok(Map::new());
    };

    let outputs: BTreeMap<&str, Value> = depends_on
        .iter()
        .filter_map(|dep| {
            let output = results.get(dep)?.output.trim();
            if output.is_empty() {
                return None;
            }
            let value = serde_json::from_str(output)
                .unwrap_or_else(|_| Value::String(output.to_string()));
            Some((dep.as_str(), value))
        })
        .collect();

    let resolved: Map<String, Value> = args
        .iter()
        .map(|(key, value)| (key.clone(), resolve_value(value, &outputs)))
        .collect();

    let mut unresolved = Vec::new();
    for value in resolved.values() {
        collect_unresolved(value, &mut unresolved);
    }
    if unresolved.is_empty() {
        Ok(resolved)
    } else {
        Err(UnresolvedPlaceholders(unresolved))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Reference<'a> {
    start: usize,
    end: usize,
    task_id: &'a str,
    path: Option<&'a str>,
}

fn resolve_value(value: &Value, outputs: &BTreeMap<&str, Value>) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), resolve_value(item, outputs)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve_value(item, outputs))
                .collect(),
        ),
        Value::String(text) if !text.trim().is_empty() => resolve_text(text, outputs),
        other => other.clone(),
    }
}

fn resolve_text(text: &str, outputs: &BTreeMap<&str, Value>) -> Value {
    let trimmed = text.trim();
    if let [only] = find_references(trimmed).as_slice()
        && only.start == 0
        && only.end == trimmed.len()
    {
        return lookup(outputs, only).map_or_else(|| Value::String(text.to_string()), Clone::clone);
    }

    let references = find_references(text);
    if references.is_empty() {
        return Value::String(text.to_string());
    }

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for reference in &references {
        out.push_str(&text[cursor..reference.start]);
        match lookup(outputs, reference) {
            Some(Value::String(s)) => out.push_str(s),
            Some(other) => out.push_str(&other.to_string()),
            None => out.push_str(&text[reference.start..reference.end]),
        }
        cursor = reference.end;
    }
    out.push_str(&text[cursor..]);
    Value::String(out)
}

fn lookup<'v>(outputs: &'v BTreeMap<&str, Value>, reference: &Reference<'_>) -> Option<&'v Value> {
    let mut current = outputs.get(reference.task_id)?;
    if let Some(path) = reference.path {
        for token in path.split('.') {
            let token = token.trim();
            if token.is_empty() {
                return None;
            }
            current = match current {
                Value::Array(items) => items.get(token.parse::<usize>().ok()?)?,
                Value::Object(map) => map.get(token)?,
                _ => return None,
            };
        }
    }
    (!current.is_null()).then_some(current)
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn find_references(text: &str) -> Vec<Reference<'_>> {
    let mut found = Vec::new();
    let mut cursor = 0;
    while let Some(offset) = text[cursor..].find("${") {
        let start = cursor + offset;
        let Some(close) = text[start..].find('}') else {
            break;
        };
        let end = start + close + 1;
        match parse_reference(&text[start + 2..end - 1]) {
            Some((task_id, path)) => {
                found.push(Reference {
                    start,
                    end,
                    task_id,
                    path,
                });
                cursor = end;
            }
            None => cursor = start + 2,
        }
    }
    found
}

/// `id.output` or `id.output.some.path`.
fn parse_reference(inner: &str) -> Option<(&str, Option<&str>)> {
    let (task_id, rest) = inner.split_once(".output")?;
    if task_id.is_empty() || !task_id.chars().all(is_id_char) {
        return None;
    }
    if rest.is_empty() {
        return Some((task_id, None));
    }
    let path = rest.strip_prefix('.')?;
    (!path.is_empty() && path.chars().all(|c| is_id_char(c) || c == '.'))
        .then_some((task_id, Some(path)))
}

fn collect_unresolved(value: &Value, unresolved: &mut Vec<String>) {
    match value {
        Value::Object(map) => map
            .values()
            .for_each(|item| collect_unresolved(item, unresolved)),
        Value::Array(items) => items
            .iter()
            .for_each(|item| collect_unresolved(item, unresolved)),
        Value::String(text) => {
            let tokens = find_references(text)
                .into_iter()
                .map(|reference| &text[reference.start..reference.end])
                .chain(legacy_tokens(text));
            for token in tokens {
                if !unresolved.iter().any(|seen| seen == token) {
                    unresolved.push(token.to_string());
                }
            }
        }
        _ => {}
    }
}

/// Template syntaxes that are never substituted.
fn legacy_tokens(text: &str) -> Vec<&str> {
    let mut tokens = Vec::new();

    let mut cursor = 0;
    while let Some(offset) = text[cursor..].find("{{") {
        let start = cursor + offset;
        let Some(close) = text[start + 2..].find("}}") else {
            break;
        };
        let end = start + 2 + close + 2;
        let inner = &text[start + 2..end - 2];
        if !inner.is_empty() && !inner.contains('}') {
            tokens.push(&text[start..end]);
            cursor = end;
        } else {
            cursor = start + 1;
        }
    }

    for (hash, _) in text.match_indices('#') {
        let id_len: usize = text[hash + 1..]
            .chars()
            .take_while(|c| is_id_char(*c))
            .map(char::len_utf8)
            .sum();
        let end = hash + 1 + id_len;
        if id_len > 0 && text[end..].starts_with(".result") {
            tokens.push(&text[hash..end + ".result".len()]);
        }
    }

    for (start, needle) in text.match_indices("task.output") {
        let end = start + needle.len();
        let before = text[..start].chars().next_back();
        let after = text[end..].chars().next();
        if !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char) {
            tokens.push(needle);
        }
    }

    tokens
}
