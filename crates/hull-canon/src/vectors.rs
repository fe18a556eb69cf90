// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canonical-form vectors shared between the unit tests, the workspace
//! integration tests, and any out-of-tree verifier implementation.
//!
//! If an entry here ever changes, every previously issued signature breaks.

use serde_json::{Value, json};

/// The full vector set as `(value, expected canonical text)` pairs.
#[must_use]
pub fn all() -> Vec<(Value, &'static str)> {
    vec![
        (json!(null), "null"),
        (json!(true), "true"),
        (json!(false), "false"),
        (json!(0), "0"),
        (json!(-1), "-1"),
        (json!(42), "42"),
        (json!(1.25), "1.25"),
        (json!(""), r#""""#),
        (json!("hull"), r#""hull""#),
        (json!("naïve"), r#""naïve""#),
        // Decomposed input (U+0065 U+0301) emits the NFC form (U+00E9).
        (json!("cafe\u{301}"), "\"caf\u{e9}\""),
        (json!([]), "[]"),
        (json!({}), "{}"),
        (json!([1, "two", null]), r#"[1,"two",null]"#),
        (
            json!({"b": 1, "a": 2, "c": {"z": [], "y": {}}}),
            r#"{"a":2,"b":1,"c":{"y":{},"z":[]}}"#,
        ),
        (
            json!({"manifest": null, "files": []}),
            r#"{"files":[],"manifest":null}"#,
        ),
        (
            json!({"hashes": {"x86_64-linux": "00ff", "aarch64-darwin": "ab01"}, "version": "1"}),
            r#"{"hashes":{"aarch64-darwin":"ab01","x86_64-linux":"00ff"},"version":"1"}"#,
        ),
    ]
}
