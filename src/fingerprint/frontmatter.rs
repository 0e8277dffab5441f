//! Minimal frontmatter extraction and scalar parsing
//!
//! Fingerprinting only needs a canonical view of the leading `---`
//! block: a flat map of scalar values, serialized with sorted keys so
//! that key order never affects the digest. Nested structures are out
//! of contract; unknown or malformed lines are skipped, not errors.

use std::collections::BTreeMap;

/// A scalar frontmatter value
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Null,
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    /// Canonical rendering, tagged so that `42` and `"42"` stay distinct
    fn canonical(&self) -> String {
        match self {
            Self::Bool(b) => format!("b:{}", b),
            Self::Null => "z".to_string(),
            Self::Int(i) => format!("i:{}", i),
            Self::Float(f) => format!("f:{}", f),
            Self::Str(s) => format!("s:{}", s),
        }
    }
}

/// Parse a raw scalar token. Bare words that are not recognized as
/// booleans, null, or numbers are strings.
fn parse_scalar(raw: &str) -> Scalar {
    let raw = raw.trim();
    match raw {
        "true" => return Scalar::Bool(true),
        "false" => return Scalar::Bool(false),
        "null" | "~" => return Scalar::Null,
        _ => {}
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Scalar::Int(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Scalar::Float(f);
    }
    // Strip one layer of matching quotes
    let bytes = raw.as_bytes();
    if raw.len() >= 2 {
        let (first, last) = (bytes[0], bytes[raw.len() - 1]);
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return Scalar::Str(raw[1..raw.len() - 1].to_string());
        }
    }
    Scalar::Str(raw.to_string())
}

/// Extract a leading `---` fenced block and parse it as a flat scalar map.
///
/// Returns the map (empty when no block is present) and the remaining
/// body. An unterminated fence is not a block: the whole input is body.
pub fn extract(content: &str) -> (BTreeMap<String, Scalar>, &str) {
    let mut map = BTreeMap::new();

    let Some(rest) = content.strip_prefix("---") else {
        return (map, content);
    };
    // The opening fence must be its own line
    let Some(rest) = rest.strip_prefix('\n') else {
        return (map, content);
    };

    let Some(end) = find_closing_fence(rest) else {
        return (map, content);
    };

    for line in rest[..end].lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        // Flat `key: value` pairs only; anything else is skipped
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() || value.trim().is_empty() {
            continue;
        }
        map.insert(key.to_string(), parse_scalar(value));
    }

    let body_start = rest[end..]
        .find('\n')
        .map(|i| end + i + 1)
        .unwrap_or(rest.len());
    let prefix_len = content.len() - rest.len();
    (map, &content[prefix_len + body_start..])
}

/// Byte offset in `rest` of the closing `---` line, if any
fn find_closing_fence(rest: &str) -> Option<usize> {
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            return Some(offset);
        }
        offset += line.len();
    }
    None
}

/// Canonical serialization of a scalar map: sorted keys, one
/// `key=value` line each. BTreeMap iteration order provides the sort.
pub fn canonical(map: &BTreeMap<String, Scalar>) -> String {
    let mut out = String::new();
    for (key, value) in map {
        out.push_str(key);
        out.push('=');
        out.push_str(&value.canonical());
        out.push('\n');
    }
    out
}
