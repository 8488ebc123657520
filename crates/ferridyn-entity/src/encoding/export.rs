//! JSON, HTML and INI renderings of mapped records.

use serde_json::{Map, Value};

use crate::error::{CodecError, Result};
use crate::schema::access::resolve;
use crate::schema::{Entity, Schema};
use crate::types::PARTITION_KEY;

use super::lines::{push_line, unescape};

pub use crate::schema::access::copy_fields;

/// Render `record` as a JSON object of string values.
///
/// `subset` restricts the output to the named fields; an empty subset
/// renders the partition key and every schema field.
pub fn to_json<T: Entity>(schema: &Schema<T>, record: &T, subset: &[&str]) -> Value {
    let wanted = |name: &str| subset.is_empty() || subset.contains(&name);
    let mut object = Map::new();
    if wanted(PARTITION_KEY) {
        object.insert(
            PARTITION_KEY.to_string(),
            Value::String(record.meta().partition_key.clone()),
        );
    }
    for (name, value) in schema.values(record) {
        if wanted(name) {
            object.insert(name.to_string(), Value::String(value));
        }
    }
    Value::Object(object)
}

/// Set fields of `record` from a JSON object. Strings, numbers and booleans
/// are taken as their text form; `null` resets a field to its default.
/// Returns the number of fields set; unknown keys are ignored.
pub fn from_json<T: Entity>(schema: &Schema<T>, record: &mut T, value: &Value) -> Result<usize> {
    let Value::Object(object) = value else {
        return Err(CodecError::NotAnObject(json_kind(value)).into());
    };
    let mut applied = 0;
    for (name, value) in object {
        let text = match value {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Array(_) | Value::Object(_) => {
                return Err(CodecError::UnsupportedValue(name.clone()).into());
            }
        };
        if schema.set_column(record, name, text.as_deref())? {
            applied += 1;
        }
    }
    Ok(applied)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Markup wrapped around an HTML rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlFormat {
    pub prefix: String,
    pub suffix: String,
    pub name_prefix: String,
    pub name_suffix: String,
    pub value_prefix: String,
    pub value_suffix: String,
    /// Placed between each name and its value.
    pub separator: String,
}

impl Default for HtmlFormat {
    fn default() -> Self {
        Self {
            prefix: "<dl>".to_string(),
            suffix: "</dl>".to_string(),
            name_prefix: "<dt>".to_string(),
            name_suffix: "</dt>".to_string(),
            value_prefix: "<dd>".to_string(),
            value_suffix: "</dd>".to_string(),
            separator: String::new(),
        }
    }
}

/// Render every schema field of `record`, one name/value pair per line.
pub fn to_html<T: Entity>(schema: &Schema<T>, record: &T, format: &HtmlFormat) -> String {
    let mut out = String::new();
    out.push_str(&format.prefix);
    out.push('\n');
    for (name, value) in schema.values(record) {
        out.push_str(&format.name_prefix);
        out.push_str(&html_escape(name));
        out.push_str(&format.name_suffix);
        out.push_str(&format.separator);
        out.push_str(&format.value_prefix);
        out.push_str(&html_escape(&value));
        out.push_str(&format.value_suffix);
        out.push('\n');
    }
    out.push_str(&format.suffix);
    out
}

fn html_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Render `record` as one INI section.
pub fn to_ini<T: Entity>(schema: &Schema<T>, record: &T, section: &str) -> String {
    let mut out = format!("[{section}]\n");
    let partition_key = &record.meta().partition_key;
    if !partition_key.is_empty() {
        push_line(&mut out, PARTITION_KEY, partition_key);
    }
    for field in schema.fields() {
        let value = resolve(field.read(record), field.default_value());
        push_line(&mut out, field.name(), &value);
    }
    out
}

/// Set fields of `record` from the `[section]` of an INI document. Other
/// sections, comments and lines without `=` are skipped. Section names
/// compare case-insensitively.
pub fn from_ini<T: Entity>(
    schema: &Schema<T>,
    record: &mut T,
    text: &str,
    section: &str,
) -> Result<usize> {
    let mut found = false;
    let mut inside = false;
    let mut applied = 0;
    for line in text.lines() {
        let line = line.trim();
        if let Some(header) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            inside = header.trim().eq_ignore_ascii_case(section);
            found |= inside;
            continue;
        }
        if !inside || line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        let Some((name, value)) = line.split_once('=') else {
            continue;
        };
        let value = unescape(value.trim());
        let value = (!value.is_empty()).then_some(value.as_str());
        if schema.set_column(record, name.trim(), value)? {
            applied += 1;
        }
    }
    if !found {
        return Err(CodecError::SectionNotFound(section.to_string()).into());
    }
    Ok(applied)
}
