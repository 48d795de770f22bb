//! Tamper-evident protection of configuration sections.
//!
//! A protected document carries a top-level `protectedSections` array of
//! `{ sectionName, hash }` entries plus a `protectedSectionsHash` string.
//! Hashes are lower-case hex HMAC-SHA256 digests over the canonical JSON of
//! the referenced sub-document; the array-level hash is computed after the
//! per-section hashes are filled in, so it covers them. Verification checks
//! the array hash first: a tampered section list invalidates everything the
//! entries claim.

use std::fs;
use std::path::Path;

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::config::{canonical_json, navigate};
use crate::error::{Error, Result};

/// Top-level key listing the protected sections.
pub const PROTECTED_SECTIONS_KEY: &str = "protectedSections";

/// Top-level key holding the hash over the section list.
pub const PROTECTED_SECTIONS_HASH_KEY: &str = "protectedSectionsHash";

/// HMAC-SHA256 over the canonical JSON of `value`, lower-case hex encoded.
fn compute_json_hash(value: &Value, password: &str) -> Result<String> {
    let serialized = canonical_json(value)?;
    let mut mac = Hmac::<Sha256>::new_from_slice(password.as_bytes())
        .map_err(|e| Error::Protection(format!("HMAC key setup failed: {e}")))?;
    mac.update(serialized.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time equality of two hex digest strings.
fn digests_match(stored: &str, computed: &str) -> bool {
    stored.as_bytes().ct_eq(computed.as_bytes()).into()
}

/// Fill in the protection hashes of `doc` in place.
///
/// # Errors
///
/// [`Error::Protection`] when `protectedSections` is missing or malformed,
/// or when a named section path does not resolve.
pub fn protect(doc: &mut Value, password: &str) -> Result<()> {
    let sections = section_entries(doc)?;

    // Per-section hashes first; the array hash below covers them.
    let mut hashes = Vec::with_capacity(sections.len());
    for name in &sections {
        let section_data = navigate(doc, name).ok_or_else(|| {
            Error::Protection(format!("section path '{name}' not found in configuration"))
        })?;
        hashes.push(compute_json_hash(section_data, password)?);
    }

    if let Some(entries) = doc
        .get_mut(PROTECTED_SECTIONS_KEY)
        .and_then(Value::as_array_mut)
    {
        for (entry, hash) in entries.iter_mut().zip(hashes) {
            entry["hash"] = Value::String(hash);
        }
    }

    let array_hash = compute_json_hash(&doc[PROTECTED_SECTIONS_KEY], password)?;
    doc[PROTECTED_SECTIONS_HASH_KEY] = Value::String(array_hash);
    Ok(())
}

/// Verify the protection hashes of `doc`.
///
/// # Errors
///
/// [`Error::Protection`] for structural problems, [`Error::HmacMismatch`]
/// naming the first offending section — or `protectedSections` itself when
/// the array-level hash does not match.
pub fn verify(doc: &Value, password: &str) -> Result<()> {
    let stored_array_hash = doc
        .get(PROTECTED_SECTIONS_HASH_KEY)
        .and_then(Value::as_str)
        .ok_or_else(|| {
            Error::Protection(format!("'{PROTECTED_SECTIONS_HASH_KEY}' missing or not a string"))
        })?;

    let section_names = section_entries(doc)?;

    // Array tampering trumps the per-section checks.
    let computed_array_hash = compute_json_hash(&doc[PROTECTED_SECTIONS_KEY], password)?;
    if !digests_match(stored_array_hash, &computed_array_hash) {
        return Err(Error::hmac_mismatch(PROTECTED_SECTIONS_KEY));
    }

    let empty = Vec::new();
    let entries = doc[PROTECTED_SECTIONS_KEY].as_array().unwrap_or(&empty);
    for (entry, name) in entries.iter().zip(&section_names) {
        let stored = entry.get("hash").and_then(Value::as_str).ok_or_else(|| {
            Error::Protection(format!("protected section '{name}' has no 'hash' field"))
        })?;

        let section_data = navigate(doc, name).ok_or_else(|| {
            Error::Protection(format!("section path '{name}' not found in configuration"))
        })?;
        let computed = compute_json_hash(section_data, password)?;

        if !digests_match(stored, &computed) {
            return Err(Error::hmac_mismatch(name.clone()));
        }
    }

    Ok(())
}

/// Validate the shape of `protectedSections` and collect its section names.
fn section_entries(doc: &Value) -> Result<Vec<String>> {
    let sections = doc
        .get(PROTECTED_SECTIONS_KEY)
        .ok_or_else(|| Error::Protection(format!("'{PROTECTED_SECTIONS_KEY}' array missing")))?
        .as_array()
        .ok_or_else(|| Error::Protection(format!("'{PROTECTED_SECTIONS_KEY}' must be an array")))?;

    sections
        .iter()
        .map(|entry| {
            entry
                .get("sectionName")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    Error::Protection(
                        "each protected section must be an object with a 'sectionName' field"
                            .into(),
                    )
                })
        })
        .collect()
}

/// Protect `source` and write the result to `target`.
///
/// The file is rewritten with tab indentation and the original key order
/// (hashing itself always sorts keys, so the stored order is free to stay
/// human-friendly).
///
/// # Errors
///
/// IO and parse failures, plus everything [`protect`] can report.
pub fn protect_file(source: &Path, target: &Path, password: &str) -> Result<()> {
    let mut doc = read_document(source)?;
    protect(&mut doc, password)?;

    if let Some(parent) = target.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .map_err(|e| Error::io(format!("creating {}", parent.display()), e))?;
    }

    let mut pretty = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(
        &mut pretty,
        serde_json::ser::PrettyFormatter::with_indent(b"\t"),
    );
    serde::Serialize::serialize(&doc, &mut serializer)
        .map_err(|e| Error::Protection(format!("serialising protected document: {e}")))?;
    pretty.push(b'\n');

    fs::write(target, pretty).map_err(|e| Error::io(format!("writing {}", target.display()), e))
}

/// Verify the protection hashes of the document in `file`.
///
/// # Errors
///
/// IO and parse failures, plus everything [`verify`] can report.
pub fn verify_file(file: &Path, password: &str) -> Result<()> {
    let doc = read_document(file)?;
    verify(&doc, password)
}

fn read_document(path: &Path) -> Result<Value> {
    let text = fs::read_to_string(path).map_err(|e| Error::ConfigParse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    serde_json::from_str(&text).map_err(|e| Error::ConfigParse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "svcWatchDog": { "args": ["srv", "-x"], "watchdogTimeout": 5000 },
            "email": { "smtp": { "password": "s3cret" } },
            "protectedSections": [
                { "sectionName": "svcWatchDog", "hash": "" },
                { "sectionName": "email.smtp", "hash": "" }
            ]
        })
    }

    #[test]
    fn protect_then_verify_roundtrip() {
        let mut doc = sample();
        protect(&mut doc, "pw").unwrap();
        assert!(doc[PROTECTED_SECTIONS_HASH_KEY].is_string());
        verify(&doc, "pw").unwrap();
    }

    #[test]
    fn wrong_password_fails_on_array_hash() {
        let mut doc = sample();
        protect(&mut doc, "pw").unwrap();
        let err = verify(&doc, "other").unwrap_err();
        assert!(
            matches!(err, Error::HmacMismatch { ref section } if section == PROTECTED_SECTIONS_KEY)
        );
    }

    #[test]
    fn tampered_section_is_named() {
        let mut doc = sample();
        protect(&mut doc, "pw").unwrap();
        doc["email"]["smtp"]["password"] = json!("s3creT");
        let err = verify(&doc, "pw").unwrap_err();
        assert!(matches!(err, Error::HmacMismatch { ref section } if section == "email.smtp"));
    }

    #[test]
    fn tampered_array_trumps_section_check() {
        let mut doc = sample();
        protect(&mut doc, "pw").unwrap();
        // corrupt a stored per-section hash: the array hash covers it
        doc["protectedSections"][0]["hash"] = json!("00");
        let err = verify(&doc, "pw").unwrap_err();
        assert!(
            matches!(err, Error::HmacMismatch { ref section } if section == PROTECTED_SECTIONS_KEY)
        );
    }

    #[test]
    fn tampered_top_hash_fails() {
        let mut doc = sample();
        protect(&mut doc, "pw").unwrap();
        let mut hash = doc[PROTECTED_SECTIONS_HASH_KEY].as_str().unwrap().to_string();
        let flipped = if hash.ends_with('0') { 'f' } else { '0' };
        hash.pop();
        hash.push(flipped);
        doc[PROTECTED_SECTIONS_HASH_KEY] = json!(hash);
        assert!(verify(&doc, "pw").is_err());
    }

    #[test]
    fn missing_pieces_are_structural_errors() {
        let doc = json!({ "a": 1 });
        assert!(matches!(verify(&doc, "pw"), Err(Error::Protection(_))));

        let mut no_array = json!({ "protectedSections": "nope" });
        assert!(matches!(
            protect(&mut no_array, "pw"),
            Err(Error::Protection(_))
        ));

        let mut bad_path = json!({
            "protectedSections": [ { "sectionName": "ghost" } ]
        });
        assert!(matches!(
            protect(&mut bad_path, "pw"),
            Err(Error::Protection(_))
        ));
    }

    #[test]
    fn key_order_does_not_affect_hashes() {
        let mut a = sample();
        let mut b: Value = serde_json::from_str(
            &serde_json::to_string(&json!({
                "protectedSections": [
                    { "sectionName": "svcWatchDog", "hash": "" },
                    { "sectionName": "email.smtp", "hash": "" }
                ],
                "email": { "smtp": { "password": "s3cret" } },
                "svcWatchDog": { "watchdogTimeout": 5000, "args": ["srv", "-x"] }
            }))
            .unwrap(),
        )
        .unwrap();

        protect(&mut a, "pw").unwrap();
        protect(&mut b, "pw").unwrap();
        assert_eq!(a[PROTECTED_SECTIONS_HASH_KEY], b[PROTECTED_SECTIONS_HASH_KEY]);
    }

    #[test]
    fn protect_file_preserves_key_order() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.json");
        let target = dir.path().join("out.json");
        // zebra before alpha: preserved order is observable in the output
        std::fs::write(
            &source,
            r#"{
  "zebra": { "z": 1 },
  "alpha": { "a": 2 },
  "protectedSections": [ { "sectionName": "zebra" } ]
}"#,
        )
        .unwrap();

        protect_file(&source, &target, "pw").unwrap();
        let text = std::fs::read_to_string(&target).unwrap();
        let zebra = text.find("\"zebra\"").unwrap();
        let alpha = text.find("\"alpha\"").unwrap();
        assert!(zebra < alpha);

        verify_file(&target, "pw").unwrap();
        assert!(verify_file(&target, "wrong").is_err());
    }
}
