// SPDX-License-Identifier: MIT OR Apache-2.0
//! Property tests for canonical stability.

use proptest::prelude::*;
use serde_json::{Map, Value};

fn arb_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|i| Value::from(i)),
        "[a-zA-Z0-9 _.\\-]{0,24}".prop_map(Value::String),
    ]
}

fn arb_value() -> impl Strategy<Value = Value> {
    arb_scalar().prop_recursive(4, 64, 8, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::vec(("[a-z]{1,8}", inner), 0..6).prop_map(|pairs| {
                let mut map = Map::new();
                for (k, v) in pairs {
                    map.insert(k, v);
                }
                Value::Object(map)
            }),
        ]
    })
}

/// Unicode-equivalent inputs canonicalize to the same bytes: the codec
/// applies NFC before escaping, for values and for mapping keys.
#[test]
fn unicode_composition_never_splits_the_canonical_form() {
    let pairs = [
        // é precomposed vs e + combining acute.
        ("caf\u{e9}", "cafe\u{301}"),
        // Å precomposed vs A + combining ring.
        ("\u{c5}ngstr\u{f6}m", "A\u{30a}ngstro\u{308}m"),
        // Same marks applied in different orders.
        ("\u{1e0b}\u{323}", "d\u{323}\u{307}"),
    ];
    for (a, b) in pairs {
        let keyed = |text: &str| {
            let mut map = Map::new();
            map.insert(text.to_string(), serde_json::json!([text]));
            Value::Object(map)
        };
        assert_eq!(
            hull_canon::canonicalize(&keyed(a)).unwrap(),
            hull_canon::canonicalize(&keyed(b)).unwrap(),
            "{a:?} and {b:?} must share one canonical form"
        );
    }
}

proptest! {
    /// Same value, same bytes, every time.
    #[test]
    fn canonicalize_is_deterministic(v in arb_value()) {
        let a = hull_canon::canonicalize(&v).unwrap();
        let b = hull_canon::canonicalize(&v).unwrap();
        prop_assert_eq!(a, b);
    }

    /// Parsing the canonical form and re-canonicalizing is a fixpoint.
    #[test]
    fn canonical_form_is_a_fixpoint(v in arb_value()) {
        let first = hull_canon::canonicalize(&v).unwrap();
        let reparsed: Value = serde_json::from_slice(&first).unwrap();
        let second = hull_canon::canonicalize(&reparsed).unwrap();
        prop_assert_eq!(first, second);
    }

    /// Canonical output never contains whitespace outside string literals.
    #[test]
    fn no_structural_whitespace(v in arb_value()) {
        let bytes = hull_canon::canonicalize(&v).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let mut in_string = false;
        let mut escaped = false;
        for c in text.chars() {
            if escaped {
                escaped = false;
                continue;
            }
            match c {
                '\\' if in_string => escaped = true,
                '"' => in_string = !in_string,
                ' ' | '\n' | '\r' | '\t' => prop_assert!(in_string),
                _ => {}
            }
        }
    }

    /// Signature round-trip over canonical bytes.
    #[test]
    fn sign_verify_round_trip(v in arb_value()) {
        let (sk, pk) = hull_canon::generate_keypair();
        let payload = hull_canon::canonicalize(&v).unwrap();
        let sig = hull_canon::sign(&payload, &sk);
        prop_assert!(hull_canon::verify(&payload, &sig, &pk).is_ok());
    }
}
