//! Canonical JSON serialisation.
//!
//! Compact output with lexicographically sorted object keys. This form is
//! the HMAC pre-image for protected sections, so it must stay bit-exact:
//! two documents that parse to the same value always canonicalise to the
//! same bytes, regardless of key order or escape syntax in the source text.

use std::io::Write;

use serde_json::Value;

use crate::error::{Error, Result};

/// Serialise `value` canonically into a string.
///
/// # Errors
///
/// Returns [`Error::Protection`] for values that have no canonical form
/// (non-finite numbers cannot occur in parsed JSON, but can be constructed
/// programmatically).
pub fn canonical_json(value: &Value) -> Result<String> {
    let mut out = Vec::new();
    write_canonical(&mut out, value)?;
    String::from_utf8(out).map_err(|_| Error::Protection("canonical form is not UTF-8".into()))
}

fn write_canonical<W: Write>(w: &mut W, value: &Value) -> Result<()> {
    let io_err = |e: std::io::Error| Error::io("canonical serialisation", e);

    match value {
        Value::Null => w.write_all(b"null").map_err(io_err)?,
        Value::Bool(true) => w.write_all(b"true").map_err(io_err)?,
        Value::Bool(false) => w.write_all(b"false").map_err(io_err)?,
        Value::Number(n) => {
            if n.as_f64().is_some_and(|f| !f.is_finite()) {
                return Err(Error::Protection(format!(
                    "number {n} has no canonical JSON form"
                )));
            }
            write!(w, "{n}").map_err(io_err)?;
        }
        Value::String(s) => {
            serde_json::to_writer(&mut *w, s)
                .map_err(|e| Error::Protection(format!("string serialisation failed: {e}")))?;
        }
        Value::Array(items) => {
            w.write_all(b"[").map_err(io_err)?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    w.write_all(b",").map_err(io_err)?;
                }
                write_canonical(w, item)?;
            }
            w.write_all(b"]").map_err(io_err)?;
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            w.write_all(b"{").map_err(io_err)?;
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    w.write_all(b",").map_err(io_err)?;
                }
                serde_json::to_writer(&mut *w, key)
                    .map_err(|e| Error::Protection(format!("key serialisation failed: {e}")))?;
                w.write_all(b":").map_err(io_err)?;
                write_canonical(w, &map[*key])?;
            }
            w.write_all(b"}").map_err(io_err)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_key_order_is_ignored() {
        let a: Value = serde_json::from_str(r#"{"a":1,"b":2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"b":2,"a":1}"#).unwrap();
        assert_eq!(canonical_json(&a).unwrap(), canonical_json(&b).unwrap());
    }

    #[test]
    fn array_order_is_respected() {
        let a = json!([1, 2]);
        let b = json!([2, 1]);
        assert_ne!(canonical_json(&a).unwrap(), canonical_json(&b).unwrap());
    }

    #[test]
    fn output_is_compact() {
        let v = json!({ "b": [1, 2, { "x": null }], "a": "s" });
        assert_eq!(canonical_json(&v).unwrap(), r#"{"a":"s","b":[1,2,{"x":null}]}"#);
    }

    #[test]
    fn nested_objects_sort_recursively() {
        let v = json!({ "outer": { "z": 1, "a": 2 } });
        assert_eq!(canonical_json(&v).unwrap(), r#"{"outer":{"a":2,"z":1}}"#);
    }

    #[test]
    fn escape_syntax_normalises_after_parsing() {
        // both texts parse to the string "<"
        let a: Value = serde_json::from_str(r#"{"s":"<"}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"s":"\u003c"}"#).unwrap();
        assert_eq!(canonical_json(&a).unwrap(), canonical_json(&b).unwrap());
    }

    #[test]
    fn numbers_keep_their_syntactic_form() {
        let int: Value = serde_json::from_str(r#"{"a":1}"#).unwrap();
        let float: Value = serde_json::from_str(r#"{"a":1.0}"#).unwrap();
        assert_ne!(canonical_json(&int).unwrap(), canonical_json(&float).unwrap());
    }
}
