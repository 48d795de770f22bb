//! Property-based tests for the configuration layer.

use proptest::prelude::*;
use serde_json::{Value, json};

use super::{ConfigStore, canonical_json};

/// Strategy producing arbitrary JSON values of bounded depth.
fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-zA-Z0-9 _.-]{0,16}".prop_map(Value::from),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::from),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    /// Canonicalisation is deterministic and survives a parse round-trip.
    #[test]
    fn canonical_form_is_stable(value in arb_json()) {
        let first = canonical_json(&value).unwrap();
        let second = canonical_json(&value).unwrap();
        prop_assert_eq!(&first, &second);

        let reparsed: Value = serde_json::from_str(&first).unwrap();
        prop_assert_eq!(first, canonical_json(&reparsed).unwrap());
    }

    /// Getters are total: any document, any path, any key yields the default
    /// rather than a panic when the lookup cannot be satisfied.
    #[test]
    fn getters_never_panic(
        value in arb_json(),
        path in "[a-z.]{0,12}",
        key in "[a-z]{1,6}",
    ) {
        let cfg = ConfigStore::from_value(value);
        let _ = cfg.get_string(&path, &key, "d");
        let _ = cfg.get_number(&path, &key, 0i64);
        let _ = cfg.get_number(&path, &key, 0.0f64);
        let _ = cfg.get_bool(&path, &key, false);
        let _ = cfg.get_string_vector(&path, &key, &[]);
        let _ = cfg.get_keys(&path, true, true, true);
    }

    /// Numeric strings round-trip through the string-coercion path.
    #[test]
    fn decimal_strings_parse_like_numbers(n in any::<i32>()) {
        let cfg = ConfigStore::from_value(json!({ "s": { "v": n.to_string() } }));
        prop_assert_eq!(cfg.get_number("s", "v", 0i64), i64::from(n));
    }
}
