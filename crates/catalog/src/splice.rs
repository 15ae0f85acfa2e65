//! Line-level rewrite of a YAML block mapping.
//!
//! Only entries whose value changed are re-rendered.  Every other line,
//! comments and blank lines included, is copied through byte for byte.
//! Nested block mappings are spliced the same way, one level down.

use std::ops::Range;

use serde_yaml::{Mapping, Value};

/// One `key: ...` entry of a block mapping as a range of lines.
#[derive(Debug)]
struct Entry {
    key: String,
    start: usize,
    /// Exclusive.  Trailing blank and comment lines stay outside.
    end: usize,
    /// The header line has no inline value; children follow as a block.
    block: bool,
}

/// Rewrites `original`, whose content is `before`, so that it reads as
/// `after`.  Returns `None` when the layout is not a plain block mapping
/// this can edit safely, and the caller should re-render the whole file.
pub fn splice(original: &str, before: &Value, after: &Value) -> Option<String> {
    let (Value::Mapping(old), Value::Mapping(new)) = (before, after) else {
        return None;
    };
    let lines: Vec<&str> = original.split_inclusive('\n').collect();
    let mut out = String::with_capacity(original.len() + 64);
    splice_map(&lines, 0..lines.len(), 0, old, new, &mut out)?;

    let check: Value = serde_yaml::from_str(&out).ok()?;
    (check == *after).then_some(out)
}

fn splice_map(
    lines: &[&str],
    range: Range<usize>,
    indent: usize,
    old: &Mapping,
    new: &Mapping,
    out: &mut String,
) -> Option<()> {
    let entries = entries(lines, range.clone(), indent)?;
    if entries.len() != old.len() || entries.iter().any(|e| !old.contains_key(e.key.as_str())) {
        return None;
    }

    let mut cursor = range.start;
    for entry in &entries {
        copy(lines, cursor..entry.start, out);
        cursor = entry.end;

        let current = old.get(entry.key.as_str())?;
        let Some(wanted) = new.get(entry.key.as_str()).filter(|v| *v != current) else {
            copy(lines, entry.start..entry.end, out);
            continue;
        };
        match (current, wanted) {
            (Value::Mapping(o), Value::Mapping(n)) if entry.block && entry.end > entry.start + 1 => {
                let children = entry.start + 1..entry.end;
                let child_indent = first_depth(lines, children.clone())?;
                if child_indent <= indent {
                    return None;
                }
                copy(lines, entry.start..entry.start + 1, out);
                splice_map(lines, children, child_indent, o, n, out)?;
            }
            _ => render(&entry.key, wanted, indent, out)?,
        }
    }

    for (key, value) in new {
        if old.contains_key(key) {
            continue;
        }
        let Value::String(key) = key else {
            return None;
        };
        render(key, value, indent, out)?;
    }

    copy(lines, cursor..range.end, out);
    Some(())
}

/// Entries of the mapping whose keys sit at exactly `indent` columns.
fn entries(lines: &[&str], range: Range<usize>, indent: usize) -> Option<Vec<Entry>> {
    let mut found: Vec<Entry> = Vec::new();
    for i in range {
        let (depth, body) = split_indent(lines[i]);
        if body.is_empty() || body.starts_with('#') {
            continue;
        }
        if depth < indent {
            return None;
        }
        // Deeper lines and same-column sequence items belong to the entry above.
        if depth > indent || body == "-" || body.starts_with("- ") {
            found.last_mut()?.end = i + 1;
            continue;
        }
        if indent == 0 && found.is_empty() && body.starts_with("---") {
            continue;
        }
        let (key, rest) = split_key(body)?;
        found.push(Entry {
            key,
            start: i,
            end: i + 1,
            block: rest.is_empty() || rest.starts_with('#'),
        });
    }
    Some(found)
}

fn split_indent(line: &str) -> (usize, &str) {
    let line = line.trim_end_matches(['\n', '\r']);
    let body = line.trim_start_matches(' ');
    (line.len() - body.len(), body.trim_end())
}

/// `key: rest` into the unquoted key and the trimmed rest of the line.
fn split_key(body: &str) -> Option<(String, &str)> {
    let (key, rest) = match body.chars().next()? {
        quote @ ('"' | '\'') => {
            let close = body[1..].find(quote)? + 1;
            let rest = body[close + 1..].strip_prefix(':')?;
            (body[1..close].to_string(), rest)
        }
        '?' | '&' | '*' | '!' | '{' | '[' | '|' | '>' => return None,
        _ => {
            let colon = body
                .match_indices(':')
                .map(|(i, _)| i)
                .find(|&i| body[i + 1..].is_empty() || body[i + 1..].starts_with(' '))?;
            (body[..colon].trim_end().to_string(), &body[colon + 1..])
        }
    };
    Some((key, rest.trim()))
}

fn first_depth(lines: &[&str], range: Range<usize>) -> Option<usize> {
    range
        .map(|i| split_indent(lines[i]))
        .find(|(_, body)| !body.is_empty() && !body.starts_with('#'))
        .map(|(depth, _)| depth)
}

fn copy(lines: &[&str], range: Range<usize>, out: &mut String) {
    for line in &lines[range] {
        out.push_str(line);
    }
}

fn render(key: &str, value: &Value, indent: usize, out: &mut String) -> Option<()> {
    let mut entry = Mapping::new();
    entry.insert(Value::String(key.to_string()), value.clone());
    let text = serde_yaml::to_string(&Value::Mapping(entry)).ok()?;

    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    let pad = " ".repeat(indent);
    for line in text.lines() {
        if !line.is_empty() {
            out.push_str(&pad);
        }
        out.push_str(line);
        out.push('\n');
    }
    Some(())
}
