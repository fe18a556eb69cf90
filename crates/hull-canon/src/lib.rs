// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod keys;
mod sign;
/// Shared canonical-form test vectors.
pub mod vectors;

pub use keys::{generate_keypair, load_signing_key, load_verifying_key, write_keypair};
pub use sign::{sha256_hex, sign, verify};

use serde_json::Value;
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

/// Maximum nesting depth the canonical encoder will follow.
pub const MAX_CANON_DEPTH: usize = 64;

/// Errors produced by canonical encoding or signature verification.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CanonError {
    /// The value contains something the canonical form cannot represent.
    #[error("invalid value: {0}")]
    InvalidValue(&'static str),

    /// The value nests deeper than [`MAX_CANON_DEPTH`] levels.
    #[error("structure deeper than {MAX_CANON_DEPTH} levels")]
    TooDeep,

    /// A signature did not verify against the given payload and key.
    #[error("signature mismatch")]
    SigMismatch,

    /// Key material could not be read or parsed.
    #[error("bad key material: {0}")]
    BadKey(&'static str),
}

/// Encode `value` into its canonical byte form.
///
/// The rules are fixed: strings NFC-normalized before the fixed escape
/// set is applied, mapping keys sorted byte-wise over their normalized
/// form at every level, arrays in original order, numbers in minimal
/// decimal form, `true`/`false`/`null` as literal tokens, no whitespace
/// anywhere. Two structurally equal values always produce identical
/// bytes, including values whose strings differ only in Unicode
/// composition.
///
/// # Errors
///
/// [`CanonError::TooDeep`] past 64 nesting levels and
/// [`CanonError::InvalidValue`] for non-finite numbers. String keys and
/// UTF-8 validity are guaranteed by the [`Value`] domain itself.
///
/// # Examples
///
/// ```
/// let v = serde_json::json!({"b": 1, "a": [true, null]});
/// let bytes = hull_canon::canonicalize(&v).unwrap();
/// assert_eq!(bytes, br#"{"a":[true,null],"b":1}"#);
/// ```
pub fn canonicalize(value: &Value) -> Result<Vec<u8>, CanonError> {
    let mut out = Vec::with_capacity(128);
    emit(value, &mut out, 0)?;
    Ok(out)
}

fn emit(value: &Value, out: &mut Vec<u8>, depth: usize) -> Result<(), CanonError> {
    if depth > MAX_CANON_DEPTH {
        return Err(CanonError::TooDeep);
    }
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => emit_number(n, out)?,
        Value::String(s) => emit_string(s, out),
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                emit(item, out, depth + 1)?;
            }
            out.push(b']');
        }
        Value::Object(map) => {
            // Keys normalize like any other string, and the byte-wise
            // sort runs over the normalized form so two spellings of the
            // same key cannot order differently.
            let mut keys: Vec<(String, &String)> = map
                .keys()
                .map(|key| (key.nfc().collect::<String>(), key))
                .collect();
            keys.sort_unstable_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
            out.push(b'{');
            for (i, (normalized, original)) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                escape_into(normalized.chars(), out);
                out.push(b':');
                emit(&map[original.as_str()], out, depth + 1)?;
            }
            out.push(b'}');
        }
    }
    Ok(())
}

fn emit_number(n: &serde_json::Number, out: &mut Vec<u8>) -> Result<(), CanonError> {
    if let Some(i) = n.as_i64() {
        out.extend_from_slice(i.to_string().as_bytes());
        return Ok(());
    }
    if let Some(u) = n.as_u64() {
        out.extend_from_slice(u.to_string().as_bytes());
        return Ok(());
    }
    match n.as_f64() {
        Some(f) if f.is_finite() => {
            // std's Display for f64 is the shortest representation that
            // round-trips, which is exactly the minimal decimal form.
            out.extend_from_slice(format!("{f}").as_bytes());
            Ok(())
        }
        _ => Err(CanonError::InvalidValue("non-finite number")),
    }
}

// NFC before escape: Unicode-equivalent inputs share one byte form, so
// composition differences can never split a signature.
fn emit_string(s: &str, out: &mut Vec<u8>) {
    escape_into(s.nfc(), out);
}

fn escape_into(chars: impl Iterator<Item = char>, out: &mut Vec<u8>) {
    out.push(b'"');
    for c in chars {
        match c {
            '"' => out.extend_from_slice(b"\\\""),
            '\\' => out.extend_from_slice(b"\\\\"),
            '\n' => out.extend_from_slice(b"\\n"),
            '\r' => out.extend_from_slice(b"\\r"),
            '\t' => out.extend_from_slice(b"\\t"),
            c if (c as u32) < 0x20 => {
                out.extend_from_slice(format!("\\u{:04x}", c as u32).as_bytes());
            }
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    out.push(b'"');
}
