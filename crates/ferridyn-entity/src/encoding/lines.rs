//! Line-oriented `name=value` record form.
//!
//! One pair per line in schema order, preceded by a `PartitionKey` line when
//! the record has a partition key. Backslash, CR and LF inside values are
//! escaped as `\\`, `\r` and `\n`, so each value stays on one line. Decoding
//! accepts LF, CR or CRLF terminators, splits each line at its first `=`,
//! and skips lines without one or whose value does not parse.

use tracing::{trace, warn};

use crate::schema::access::resolve;
use crate::schema::{Entity, Schema};
use crate::types::PARTITION_KEY;

/// Serialize the non-empty fields of `record`.
pub fn encode_lines<T: Entity>(schema: &Schema<T>, record: &T) -> String {
    let mut out = String::new();
    let partition_key = &record.meta().partition_key;
    if !partition_key.is_empty() {
        push_line(&mut out, PARTITION_KEY, partition_key);
    }
    for field in schema.fields() {
        let value = resolve(field.read(record), field.default_value());
        if !value.is_empty() {
            push_line(&mut out, field.name(), &value);
        }
    }
    out
}

/// Apply every recognized `name=value` line of `text` to `record`.
/// Returns the number of fields set. Unknown names and values that do not
/// parse as the field's type are skipped.
pub fn decode_lines<T: Entity>(schema: &Schema<T>, record: &mut T, text: &str) -> usize {
    let mut applied = 0;
    for line in text.split(['\r', '\n']) {
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once('=') else {
            trace!(line, "skipping line without '='");
            continue;
        };
        match schema.set_column(record, name, Some(&unescape(value))) {
            Ok(true) => applied += 1,
            Ok(false) => {}
            Err(e) => warn!(field = name, error = %e, "skipping unparseable value"),
        }
    }
    applied
}

pub(crate) fn push_line(out: &mut String, name: &str, value: &str) {
    out.push_str(name);
    out.push('=');
    out.push_str(&escape(value));
    out.push('\n');
}

pub(crate) fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

pub(crate) fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Contact, contact};

    #[test]
    fn test_encode_in_schema_order() {
        let schema = Schema::<Contact>::derive();
        let mut c = contact("A", "1", "alice");
        c.age = Some(4);
        c.scratch = "not persisted".into();
        assert_eq!(
            encode_lines(&schema, &c),
            "PartitionKey=A\nRowKey=1\nName=alice\nEmail=unknown@example.com\nAge=4\n"
        );
    }

    #[test]
    fn test_decode_tolerates_line_endings_and_junk() {
        let schema = Schema::<Contact>::derive();
        let mut c = Contact::default();
        let text = "PartitionKey=P\r\nRowKey=7\rName=a=b\nnonsense\nUnknown=1\nAge=12\r\n";
        let applied = decode_lines(&schema, &mut c, text);
        assert_eq!(applied, 4);
        assert_eq!(c.meta.partition_key, "P");
        assert_eq!(c.meta.row_key, "7");
        assert_eq!(c.name, "a=b");
        assert_eq!(c.age, Some(12));
    }

    #[test]
    fn test_multiline_values_survive() {
        let schema = Schema::<Contact>::derive();
        let c = contact("A", "1", "line one\nline two\\end\r");
        let text = encode_lines(&schema, &c);
        assert_eq!(text.lines().count(), 4);

        let mut back = Contact::default();
        decode_lines(&schema, &mut back, &text);
        assert_eq!(back.name, c.name);
    }

    #[test]
    fn test_decode_skips_unparseable_typed_value() {
        let schema = Schema::<Contact>::derive();
        let mut c = Contact::default();
        let applied = decode_lines(&schema, &mut c, "Age=old\nName=kept\nActive=true\n");
        assert_eq!(applied, 2);
        assert_eq!(c.age, None);
        assert_eq!(c.name, "kept");
        assert_eq!(c.active, Some(true));
    }

    #[test]
    fn test_unescape_keeps_unknown_sequences() {
        assert_eq!(unescape("a\\tb\\"), "a\\tb\\");
        assert_eq!(unescape(&escape("x\\n")), "x\\n");
    }
}
