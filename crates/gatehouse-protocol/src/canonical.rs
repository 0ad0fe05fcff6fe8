//! Canonical form of a signed message body.
//!
//! Browser clients sign `JSON.stringify(body)` and hash the resulting
//! string one UTF-16 code unit per byte. For the server to compute the
//! same digest, this module reproduces both steps exactly:
//!
//! 1. **Serialization** follows `JSON.stringify`: no whitespace, object
//!    keys in insertion order except that array-index keys (`"0"`,
//!    `"17"`) come first in ascending numeric order, JavaScript number
//!    formatting (`1` not `1.0`, `1e+21`, `1e-7`), and the same string
//!    escapes.
//! 2. **Byte mapping**: if the text contains a CJK unified ideograph
//!    (U+4E00..=U+9FA5), every UTF-16 code unit is re-encoded as UTF-8
//!    (surrogate halves become three bytes each). Otherwise each code
//!    unit contributes only its low byte.
//!
//! Step 2 is lossy for non-Latin text outside the CJK range. That is the
//! client's behavior and signatures only verify if it is matched.

use serde_json::{Map, Number, Value};

/// Returns the bytes a client signed for `body`.
pub fn signed_payload(body: &Map<String, Value>) -> Vec<u8> {
    let mut text = String::new();
    write_object(&mut text, body);

    if text.chars().any(is_cjk_ideograph) {
        unicode_to_utf8(&text)
    } else {
        // Truncation to the low byte is the client's hashing behavior.
        text.encode_utf16().map(|unit| unit as u8).collect()
    }
}

/// Serializes a value the way `JSON.stringify` does.
pub fn to_js_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn is_cjk_ideograph(c: char) -> bool {
    ('\u{4e00}'..='\u{9fa5}').contains(&c)
}

/// UTF-8 encodes each UTF-16 code unit independently.
fn unicode_to_utf8(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for unit in text.encode_utf16() {
        let ch = u32::from(unit);
        match ch {
            0x00..=0x7f => out.push(ch as u8),
            0x80..=0x7ff => {
                out.push(0xc0 | ((ch >> 6) & 0x1f) as u8);
                out.push(0x80 | (ch & 0x3f) as u8);
            }
            _ => {
                out.push(0xe0 | ((ch >> 12) & 0x0f) as u8);
                out.push(0x80 | ((ch >> 6) & 0x3f) as u8);
                out.push(0x80 | (ch & 0x3f) as u8);
            }
        }
    }
    out
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => write_number(out, n),
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => write_object(out, map),
    }
}

fn write_object(out: &mut String, map: &Map<String, Value>) {
    let mut indexed: Vec<(u32, &String, &Value)> = Vec::new();
    let mut named: Vec<(&String, &Value)> = Vec::new();
    for (key, value) in map {
        match array_index(key) {
            Some(index) => indexed.push((index, key, value)),
            None => named.push((key, value)),
        }
    }
    indexed.sort_by_key(|(index, _, _)| *index);

    out.push('{');
    let entries = indexed
        .into_iter()
        .map(|(_, key, value)| (key, value))
        .chain(named);
    for (i, (key, value)) in entries.enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_string(out, key);
        out.push(':');
        write_value(out, value);
    }
    out.push('}');
}

/// JavaScript orders canonical array-index keys (0..2^32-2, no leading
/// zeros) before every other key.
fn array_index(key: &str) -> Option<u32> {
    if key.is_empty() || !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if key.len() > 1 && key.starts_with('0') {
        return None;
    }
    key.parse::<u32>().ok().filter(|index| *index != u32::MAX)
}

fn write_number(out: &mut String, n: &Number) {
    if let Some(i) = n.as_i64() {
        out.push_str(&i.to_string());
    } else if let Some(u) = n.as_u64() {
        out.push_str(&u.to_string());
    } else if let Some(f) = n.as_f64() {
        write_f64(out, f);
    }
}

fn write_f64(out: &mut String, f: f64) {
    if !f.is_finite() {
        out.push_str("null");
        return;
    }
    if f == 0.0 {
        // Covers -0, which JSON.stringify prints as 0.
        out.push('0');
        return;
    }
    let abs = f.abs();
    if (1e-6..1e21).contains(&abs) {
        out.push_str(&f.to_string());
        return;
    }
    let exp = format!("{f:e}");
    match exp.split_once('e') {
        Some((mantissa, exponent)) if !exponent.starts_with('-') => {
            out.push_str(mantissa);
            out.push_str("e+");
            out.push_str(exponent);
        }
        _ => out.push_str(&exp),
    }
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if u32::from(c) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", u32::from(c)));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
