// SPDX-License-Identifier: MIT OR Apache-2.0
//! Platform attestation: the outer trust anchor.
//!
//! The platform publisher signs `{version, hashes}` where `hashes` maps
//! architecture triples to the SHA-256 of the platform bytes shipped for
//! that architecture. The publisher key is pinned in the binary and can
//! be overridden for self-hosted platforms.

use crate::bundle::PlatformBlock;
use ed25519_dalek::{SigningKey, VerifyingKey};
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// Attestation format version.
pub const PLATFORM_ATTESTATION_VERSION: &str = "1";

// The Hull project's publisher key. Overridable via --platform-key for
// self-hosted platform builds.
const PINNED_PLATFORM_KEY_HEX: &str =
    "d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a";

/// The pinned publisher key, if it parses (a build with a corrupt pin
/// fails every platform verification rather than panicking).
#[must_use]
pub fn pinned_platform_key() -> Option<VerifyingKey> {
    let raw = hex::decode(PINNED_PLATFORM_KEY_HEX).ok()?;
    let bytes: [u8; 32] = raw.try_into().ok()?;
    VerifyingKey::from_bytes(&bytes).ok()
}

/// The canonical attestation payload for a hash map.
#[must_use]
pub fn attestation_payload(version: &str, hashes: &BTreeMap<String, String>) -> Value {
    json!({
        "version": version,
        "hashes": hashes,
    })
}

/// Sign a platform attestation with the publisher key.
#[must_use]
pub fn sign_platform(hashes: BTreeMap<String, String>, key: &SigningKey) -> PlatformBlock {
    let payload = attestation_payload(PLATFORM_ATTESTATION_VERSION, &hashes);
    // The payload is built from plain maps and strings; canonicalization
    // cannot fail on it.
    let bytes = hull_canon::canonicalize(&payload).unwrap_or_default();
    let signature = hull_canon::sign(&bytes, key);
    PlatformBlock {
        hashes,
        public_key: hex::encode(key.verifying_key().to_bytes()),
        signature: hex::encode(signature),
        version: PLATFORM_ATTESTATION_VERSION.to_string(),
    }
}

/// The architecture triple for the running binary, e.g. `x86_64-linux`.
#[must_use]
pub fn current_arch() -> String {
    format!("{}-{}", std::env::consts::ARCH, std::env::consts::OS)
}
