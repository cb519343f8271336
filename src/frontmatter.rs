//! Front matter codec.
//!
//! A document is an optional YAML block delimited by `---` lines, followed by
//! the Markdown body:
//!
//! ```text
//! ---
//! title: Schrödinger Equation
//! slug: physics-se
//! tags: [quantum]
//! ---
//! The body starts here.
//! ```
//!
//! The block must open on the very first line. A document without an opening
//! delimiter has no front matter and its whole text is the body. The block
//! must be a YAML mapping; anything else (a list, a scalar, invalid YAML, a
//! missing closing delimiter) is a [`FrontmatterError`], which the scanner
//! downgrades to a warning.
//!
//! Key order survives a parse/stringify round trip because
//! [`serde_yaml::Mapping`] preserves insertion order, so renames rewrite only
//! the keys they touch.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_yaml::{Mapping, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrontmatterError {
    #[error("front matter block is not terminated by a '---' line")]
    Unterminated,
    #[error("front matter is not a key/value mapping")]
    NotAMapping,
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// A parsed document: metadata mapping plus body text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    pub data: Mapping,
    pub body: String,
}

impl Document {
    /// Look up a top-level key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Insert or overwrite a top-level key, keeping its original position.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.data.insert(Value::String(key.to_string()), value.into());
    }
}

/// Split raw text into `(yaml, body)` without parsing the YAML.
///
/// Returns `Ok(None)` when the text does not open with a delimiter line.
pub fn split(content: &str) -> Result<Option<(&str, &str)>, FrontmatterError> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let Some(rest) = strip_delimiter_line(content) else {
        return Ok(None);
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == "---" {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Ok(Some((yaml, body)));
        }
        offset += line.len();
    }
    Err(FrontmatterError::Unterminated)
}

/// Strip an opening `---` line, returning the remainder.
fn strip_delimiter_line(content: &str) -> Option<&str> {
    let rest = content.strip_prefix("---")?;
    if let Some(rest) = rest.strip_prefix("\r\n") {
        Some(rest)
    } else if let Some(rest) = rest.strip_prefix('\n') {
        Some(rest)
    } else if rest.is_empty() {
        Some(rest)
    } else {
        None
    }
}

/// Parse a document into metadata and body.
pub fn parse(content: &str) -> Result<Document, FrontmatterError> {
    let Some((yaml, body)) = split(content)? else {
        return Ok(Document {
            data: Mapping::new(),
            body: content.to_string(),
        });
    };

    let data = if yaml.trim().is_empty() {
        Mapping::new()
    } else {
        match serde_yaml::from_str::<Value>(yaml)? {
            Value::Mapping(map) => map,
            Value::Null => Mapping::new(),
            _ => return Err(FrontmatterError::NotAMapping),
        }
    };

    Ok(Document {
        data,
        body: body.to_string(),
    })
}

/// Serialize metadata and body back into document text.
///
/// An empty mapping still produces a (empty) block so that the document keeps
/// a front matter section once it has had one.
pub fn stringify(data: &Mapping, body: &str) -> Result<String, FrontmatterError> {
    let yaml = if data.is_empty() {
        String::new()
    } else {
        serde_yaml::to_string(data)?
    };
    Ok(format!("---\n{yaml}---\n{body}"))
}

/// Normalize timestamp-shaped top-level values to calendar-date strings.
///
/// YAML timestamps (`2024-03-01T10:00:00Z`, `2024-03-01 10:00:00`) become
/// `2024-03-01`, converted to UTC first when an offset is present. Plain dates
/// are already calendar dates and pass through. Nothing non-serializable ever
/// reaches the index, so consumers only ever see strings here.
pub fn normalize_dates(data: &mut Mapping) {
    for (_, value) in data.iter_mut() {
        if let Value::String(s) = value
            && let Some(date) = timestamp_to_date(s)
        {
            *s = date;
        }
    }
}

/// Convert a YAML timestamp (with a time component) into `YYYY-MM-DD`.
pub fn timestamp_to_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    // Cheap shape check before trying the parsers: `YYYY-MM-DD` + time.
    if raw.len() <= 10 || !raw.as_bytes()[..10].iter().enumerate().all(|(i, b)| match i {
        4 | 7 => *b == b'-',
        _ => b.is_ascii_digit(),
    }) {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc).format("%Y-%m-%d").to_string());
    }
    for format in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.format("%Y-%m-%d").to_string());
        }
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f %:z", "%Y-%m-%d %H:%M:%S %:z"] {
        if let Ok(dt) = DateTime::parse_from_str(raw, format) {
            return Some(dt.with_timezone(&Utc).format("%Y-%m-%d").to_string());
        }
    }
    None
}

/// Render a scalar YAML value as display text. Sequences and mappings yield `None`.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Tagged(tagged) => scalar_to_string(&tagged.value),
        Value::Null | Value::Sequence(_) | Value::Mapping(_) => None,
    }
}
