//! JSON configuration store.
//!
//! The document is parsed once at startup and read-only afterwards. Lookup
//! follows the forgiving-getter style: configuration files omit optional
//! keys, so every getter resolves a dot-separated path, then a key, and
//! falls back to the supplied default when any hop is missing or the value
//! cannot be coerced. **No getter ever fails.** Components that prefer
//! fail-fast binding use [`ConfigStore::parse_section`] instead.

mod canon;
pub mod protect;

#[cfg(test)]
mod property_tests;

pub use canon::canonical_json;

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};

/// Immutable view over a parsed JSON configuration document.
#[derive(Debug)]
pub struct ConfigStore {
    root: Value,
}

impl ConfigStore {
    /// Load and parse a UTF-8 JSON file. One-shot; there is no reload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigParse`] when the file cannot be read or is not
    /// valid JSON. The raw text is echoed to stderr on a parse failure so a
    /// misquoted file can be diagnosed without another tool.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::ConfigParse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        match serde_json::from_str(&text) {
            Ok(root) => Ok(Self { root }),
            Err(e) => {
                eprintln!("JSON file:\n{text}");
                Err(Error::ConfigParse {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Build a store from an already-parsed document. Used by tests and by
    /// the protector CLI.
    pub fn from_value(root: Value) -> Self {
        Self { root }
    }

    /// The whole document.
    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Navigate a dot-separated path of object keys. An empty path is the
    /// document root.
    pub fn get_json(&self, path: &str) -> Option<&Value> {
        navigate(&self.root, path)
    }

    /// String value at `path`/`key`, or `default`.
    pub fn get_string(&self, path: &str, key: &str, default: &str) -> String {
        self.get_json(path)
            .and_then(|section| section.get(key))
            .and_then(Value::as_str)
            .map_or_else(|| default.to_string(), str::to_string)
    }

    /// Boolean value at `path`/`key`, or `default`.
    pub fn get_bool(&self, path: &str, key: &str, default: bool) -> bool {
        self.get_json(path)
            .and_then(|section| section.get(key))
            .and_then(Value::as_bool)
            .unwrap_or(default)
    }

    /// Numeric value at `path`/`key`, or `default`.
    ///
    /// Besides JSON numbers, string-encoded values are accepted: plain
    /// decimal (which must consume the whole string) and `0x…` hex (parsed
    /// as 64-bit unsigned and narrowed to the target type, ignoring
    /// overflow).
    pub fn get_number<T: ConfigNumber>(&self, path: &str, key: &str, default: T) -> T {
        let Some(value) = self.get_json(path).and_then(|section| section.get(key)) else {
            return default;
        };

        if let Some(n) = T::from_json(value) {
            return n;
        }

        let Some(s) = value.as_str() else {
            return default;
        };
        let s = s.trim();
        if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            u64::from_str_radix(hex, 16)
                .map(T::from_hex_u64)
                .unwrap_or(default)
        } else {
            T::from_decimal(s).unwrap_or(default)
        }
    }

    /// Vector of strings at `path`/`key`, or `default`. An array with any
    /// non-string element is not coercible and yields the default.
    pub fn get_string_vector(&self, path: &str, key: &str, default: &[String]) -> Vec<String> {
        self.get_json(path)
            .and_then(|section| section.get(key))
            .and_then(Value::as_array)
            .and_then(|items| {
                items
                    .iter()
                    .map(|v| v.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
            })
            .unwrap_or_else(|| default.to_vec())
    }

    /// Immediate child keys of the object at `path`, filtered by the kind of
    /// each child value. Missing or non-object paths yield an empty vector.
    pub fn get_keys(
        &self,
        path: &str,
        include_objects: bool,
        include_arrays: bool,
        include_others: bool,
    ) -> Vec<String> {
        self.get_json(path)
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter(|(_, v)| match v {
                        Value::Object(_) => include_objects,
                        Value::Array(_) => include_arrays,
                        _ => include_others,
                    })
                    .map(|(k, _)| k.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Strictly bind the section at `path` to `T`.
    ///
    /// # Errors
    ///
    /// [`Error::ConfigMissingSection`] when the path does not resolve,
    /// [`Error::ConfigSchema`] when the section does not deserialize.
    pub fn parse_section<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let section = self
            .get_json(path)
            .ok_or_else(|| Error::ConfigMissingSection {
                section: path.to_string(),
            })?;
        serde_json::from_value(section.clone()).map_err(|e| Error::schema(path, e.to_string()))
    }
}

/// Resolve `path` as dot-separated object keys starting at `root`.
pub(crate) fn navigate<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(root);
    }
    let mut current = root;
    for part in path.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Numeric types the forgiving getter can produce.
///
/// Implementations never fail: out-of-range JSON numbers and malformed
/// strings are rejected by returning `None`, which the getter converts into
/// the caller's default.
pub trait ConfigNumber: Copy {
    /// Extract directly from a JSON number.
    fn from_json(value: &Value) -> Option<Self>;
    /// Parse a decimal string; must consume the entire input.
    fn from_decimal(s: &str) -> Option<Self>;
    /// Narrow a parsed hex value; overflow is deliberately ignored.
    fn from_hex_u64(value: u64) -> Self;
}

macro_rules! config_number_int {
    ($($t:ty),*) => {$(
        impl ConfigNumber for $t {
            fn from_json(value: &Value) -> Option<Self> {
                if let Some(n) = value.as_i64() {
                    return <$t>::try_from(n).ok();
                }
                value.as_u64().and_then(|n| <$t>::try_from(n).ok())
            }

            fn from_decimal(s: &str) -> Option<Self> {
                s.parse().ok()
            }

            fn from_hex_u64(value: u64) -> Self {
                value as $t
            }
        }
    )*};
}

config_number_int!(i8, u8, i16, u16, i32, u32, i64, u64, isize, usize);

macro_rules! config_number_float {
    ($($t:ty),*) => {$(
        impl ConfigNumber for $t {
            fn from_json(value: &Value) -> Option<Self> {
                value.as_f64().map(|n| n as $t)
            }

            fn from_decimal(s: &str) -> Option<Self> {
                s.parse().ok()
            }

            fn from_hex_u64(value: u64) -> Self {
                value as $t
            }
        }
    )*};
}

config_number_float!(f32, f64);
