// SPDX-License-Identifier: MIT OR Apache-2.0
//! The signature bundle (`package.sig`).
//!
//! The bundle is stored as canonical-JSON bytes; the app signature covers
//! the canonical payload with the `signature` field removed. Field order
//! on disk is the canonical (lexicographic) order and is part of the
//! contract.

use crate::SignatureError;
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// One embedded source artifact and its content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Logical path, `/`-separated, relative to the app root.
    pub path: String,
    /// Hex SHA-256 of the file bytes.
    pub sha256: String,
}

/// Compiler provenance recorded by the build pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    /// `cc --version` first line, verbatim.
    pub cc_version: String,
    /// Compile flags, verbatim and in order.
    pub flags: Vec<String>,
    /// Unix seconds; `SOURCE_DATE_EPOCH` or zero, never the wall clock.
    pub timestamp: i64,
}

/// The platform publisher's attestation, embedded in every bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformBlock {
    /// Hex SHA-256 of the platform bytes, per architecture triple.
    pub hashes: BTreeMap<String, String>,
    /// Hex Ed25519 public key of the platform publisher.
    pub public_key: String,
    /// Hex signature over the canonical attestation payload.
    pub signature: String,
    /// Attestation format version.
    pub version: String,
}

/// The full signature bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    /// Hex SHA-256 of the final executable bytes.
    pub binary_hash: String,
    /// Compiler provenance.
    pub build: BuildInfo,
    /// Ordered inventory of every embedded source artifact.
    pub files: Vec<FileEntry>,
    /// Copy of the declared manifest, or `null` when absent.
    pub manifest: Value,
    /// The platform attestation.
    pub platform: PlatformBlock,
    /// Hex Ed25519 public key of the developer.
    pub public_key: String,
    /// Hex signature over the canonical bundle payload minus this field.
    pub signature: String,
    /// Hex SHA-256 of the entry-point template, pre-substitution.
    pub trampoline_hash: String,
}

impl Bundle {
    /// The canonical payload the app signature covers: the bundle with
    /// its `signature` field removed.
    ///
    /// # Errors
    ///
    /// [`SignatureError::Malformed`] if the bundle cannot canonicalize.
    pub fn signing_payload(&self) -> Result<Vec<u8>, SignatureError> {
        let mut value =
            serde_json::to_value(self).map_err(|e| SignatureError::Malformed(e.to_string()))?;
        if let Value::Object(map) = &mut value {
            map.remove("signature");
        }
        hull_canon::canonicalize(&value).map_err(|e| SignatureError::Malformed(e.to_string()))
    }

    /// Serialize to the canonical on-disk byte form.
    ///
    /// # Errors
    ///
    /// [`SignatureError::Malformed`] if the bundle cannot canonicalize.
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>, SignatureError> {
        let value =
            serde_json::to_value(self).map_err(|e| SignatureError::Malformed(e.to_string()))?;
        hull_canon::canonicalize(&value).map_err(|e| SignatureError::Malformed(e.to_string()))
    }

    /// Write `package.sig` next to a binary.
    ///
    /// # Errors
    ///
    /// [`SignatureError::Io`] on write failure.
    pub fn save(&self, path: &Path) -> Result<(), SignatureError> {
        let bytes = self.to_canonical_bytes()?;
        fs::write(path, bytes).map_err(|e| SignatureError::Io(e.to_string()))
    }

    /// Load a bundle from disk.
    ///
    /// # Errors
    ///
    /// [`SignatureError::Io`] when unreadable, [`SignatureError::Malformed`]
    /// when the bytes do not parse as a bundle.
    pub fn load(path: &Path) -> Result<Self, SignatureError> {
        let bytes = fs::read(path).map_err(|e| SignatureError::Io(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| SignatureError::Malformed(e.to_string()))
    }
}

/// Sign a bundle with the developer key, filling `public_key` and
/// `signature`.
///
/// # Errors
///
/// [`SignatureError::Malformed`] if the payload cannot canonicalize.
pub fn sign_bundle(mut bundle: Bundle, key: &SigningKey) -> Result<Bundle, SignatureError> {
    bundle.public_key = hex::encode(key.verifying_key().to_bytes());
    bundle.signature = String::new();
    let payload = bundle.signing_payload()?;
    bundle.signature = hex::encode(hull_canon::sign(&payload, key));
    Ok(bundle)
}
