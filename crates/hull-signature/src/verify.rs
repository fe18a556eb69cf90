// SPDX-License-Identifier: MIT OR Apache-2.0
//! The three verification points share this code: CLI `verify`, runtime
//! `--verify-sig`, and (by contract, not by linkage) the browser
//! verifier.
//!
//! Verification is chained: the platform attestation first, then the app
//! bundle. Every failure is terminal; nothing here retries or downgrades
//! to a warning.

use crate::bundle::{Bundle, PlatformBlock};
use crate::platform::attestation_payload;
use crate::SignatureError;
use ed25519_dalek::VerifyingKey;
use tracing::debug;

/// What a successful app verification established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedBundle {
    /// Number of embedded files whose hashes were recomputed.
    pub files_checked: usize,
}

/// Verify the platform attestation.
///
/// `platform_bytes_hash` is the hex SHA-256 of the platform bytes found
/// in the binary under inspection; it must equal the attested hash for
/// `arch`, and the attestation signature must verify under
/// `publisher_key` (pinned or overridden).
///
/// # Errors
///
/// [`SignatureError::UnknownArch`], [`SignatureError::PlatformSigMismatch`],
/// or [`SignatureError::Malformed`].
pub fn verify_platform(
    block: &PlatformBlock,
    arch: &str,
    platform_bytes_hash: &str,
    publisher_key: &VerifyingKey,
) -> Result<(), SignatureError> {
    let attested = block
        .hashes
        .get(arch)
        .ok_or_else(|| SignatureError::UnknownArch {
            arch: arch.to_string(),
        })?;
    if attested != platform_bytes_hash {
        debug!(arch, "platform bytes hash does not match attestation");
        return Err(SignatureError::PlatformSigMismatch);
    }

    let embedded_key = decode_key(&block.public_key)?;
    if embedded_key != *publisher_key {
        debug!("embedded publisher key differs from the trusted key");
        return Err(SignatureError::PlatformSigMismatch);
    }

    let payload = attestation_payload(&block.version, &block.hashes);
    let bytes =
        hull_canon::canonicalize(&payload).map_err(|e| SignatureError::Malformed(e.to_string()))?;
    let signature = decode_signature(&block.signature)?;
    hull_canon::verify(&bytes, &signature, publisher_key)
        .map_err(|_| SignatureError::PlatformSigMismatch)
}

/// Verify the app signature and the embedded-file inventory.
///
/// `read_file` resolves a bundle-relative logical path to its current
/// bytes (from disk for CLI verify, from the embedded asset region for
/// runtime verify).
///
/// # Errors
///
/// [`SignatureError::HashMismatch`] naming the first divergent file,
/// [`SignatureError::AppSigMismatch`] for key or signature failures.
pub fn verify_app(
    bundle: &Bundle,
    developer_key: &VerifyingKey,
    mut read_file: impl FnMut(&str) -> Result<Vec<u8>, SignatureError>,
) -> Result<VerifiedBundle, SignatureError> {
    for entry in &bundle.files {
        let bytes = read_file(&entry.path)?;
        let actual = hull_canon::sha256_hex(&bytes);
        if actual != entry.sha256 {
            debug!(path = %entry.path, "embedded file hash mismatch");
            return Err(SignatureError::HashMismatch {
                path: entry.path.clone(),
            });
        }
    }

    let embedded_key = decode_key(&bundle.public_key)?;
    if embedded_key != *developer_key {
        debug!("bundle public key differs from the trusted developer key");
        return Err(SignatureError::AppSigMismatch);
    }

    let payload = bundle.signing_payload()?;
    let signature = decode_signature(&bundle.signature)?;
    hull_canon::verify(&payload, &signature, developer_key)
        .map_err(|_| SignatureError::AppSigMismatch)?;

    Ok(VerifiedBundle {
        files_checked: bundle.files.len(),
    })
}

/// Compare the runtime-extracted manifest against the signed copy.
///
/// # Errors
///
/// [`SignatureError::ManifestTampered`] on any difference, including
/// present-vs-absent.
pub fn verify_manifest(
    bundle: &Bundle,
    declared: Option<&hull_manifest::Manifest>,
) -> Result<(), SignatureError> {
    let current = hull_manifest::Manifest::to_signed_value(declared);
    if current != bundle.manifest {
        return Err(SignatureError::ManifestTampered);
    }
    Ok(())
}

fn decode_key(hex_text: &str) -> Result<VerifyingKey, SignatureError> {
    let raw = hex::decode(hex_text)
        .map_err(|_| SignatureError::Malformed("public key is not hex".into()))?;
    let bytes: [u8; 32] = raw
        .try_into()
        .map_err(|_| SignatureError::Malformed("public key is not 32 bytes".into()))?;
    VerifyingKey::from_bytes(&bytes)
        .map_err(|_| SignatureError::Malformed("public key is not a curve point".into()))
}

fn decode_signature(hex_text: &str) -> Result<[u8; 64], SignatureError> {
    let raw = hex::decode(hex_text)
        .map_err(|_| SignatureError::Malformed("signature is not hex".into()))?;
    raw.try_into()
        .map_err(|_| SignatureError::Malformed("signature is not 64 bytes".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{BuildInfo, Bundle, FileEntry, sign_bundle};
    use crate::platform::sign_platform;
    use hull_canon::{generate_keypair, sha256_hex};
    use std::collections::BTreeMap;

    struct Fixture {
        bundle: Bundle,
        developer_pk: ed25519_dalek::VerifyingKey,
        publisher_pk: ed25519_dalek::VerifyingKey,
        files: BTreeMap<String, Vec<u8>>,
        platform_hash: String,
    }

    fn fixture() -> Fixture {
        let (dev_sk, developer_pk) = generate_keypair();
        let (pub_sk, publisher_pk) = generate_keypair();

        let mut files = BTreeMap::new();
        files.insert("app/init.js".to_string(), b"route('/');".to_vec());
        files.insert("app/lib.js".to_string(), b"exports.x = 1;".to_vec());

        let platform_bytes = b"platform machine code";
        let platform_hash = sha256_hex(platform_bytes);
        let mut hashes = BTreeMap::new();
        hashes.insert("x86_64-linux".to_string(), platform_hash.clone());
        let platform = sign_platform(hashes, &pub_sk);

        let entries = files
            .iter()
            .map(|(path, bytes)| FileEntry {
                path: path.clone(),
                sha256: sha256_hex(bytes),
            })
            .collect();

        let bundle = Bundle {
            binary_hash: "00".repeat(32),
            build: BuildInfo {
                cc_version: "cc 14".into(),
                flags: vec!["-O2".into()],
                timestamp: 0,
            },
            files: entries,
            manifest: serde_json::Value::Null,
            platform,
            public_key: String::new(),
            signature: String::new(),
            trampoline_hash: "11".repeat(32),
        };
        let bundle = sign_bundle(bundle, &dev_sk).unwrap();

        Fixture {
            bundle,
            developer_pk,
            publisher_pk,
            files,
            platform_hash,
        }
    }

    fn reader(files: &BTreeMap<String, Vec<u8>>) -> impl FnMut(&str) -> Result<Vec<u8>, SignatureError> + '_ {
        move |path: &str| {
            files
                .get(path)
                .cloned()
                .ok_or_else(|| SignatureError::Io(format!("missing {path}")))
        }
    }

    #[test]
    fn known_good_bundle_verifies_end_to_end() {
        let fx = fixture();
        verify_platform(
            &fx.bundle.platform,
            "x86_64-linux",
            &fx.platform_hash,
            &fx.publisher_pk,
        )
        .unwrap();
        let verified = verify_app(&fx.bundle, &fx.developer_pk, reader(&fx.files)).unwrap();
        assert_eq!(verified.files_checked, 2);
    }

    #[test]
    fn flipped_file_byte_reports_that_path() {
        let fx = fixture();
        let mut files = fx.files.clone();
        files.get_mut("app/lib.js").unwrap()[0] ^= 1;

        let err = verify_app(&fx.bundle, &fx.developer_pk, reader(&files)).unwrap_err();
        assert_eq!(
            err,
            SignatureError::HashMismatch {
                path: "app/lib.js".into()
            }
        );

        // The platform attestation is untouched and still verifies.
        verify_platform(
            &fx.bundle.platform,
            "x86_64-linux",
            &fx.platform_hash,
            &fx.publisher_pk,
        )
        .unwrap();
    }

    #[test]
    fn unknown_arch_is_its_own_error() {
        let fx = fixture();
        let err = verify_platform(
            &fx.bundle.platform,
            "riscv64-linux",
            &fx.platform_hash,
            &fx.publisher_pk,
        )
        .unwrap_err();
        assert_eq!(
            err,
            SignatureError::UnknownArch {
                arch: "riscv64-linux".into()
            }
        );
    }

    #[test]
    fn wrong_publisher_key_fails_platform() {
        let fx = fixture();
        let (_, other_pk) = generate_keypair();
        let err = verify_platform(
            &fx.bundle.platform,
            "x86_64-linux",
            &fx.platform_hash,
            &other_pk,
        )
        .unwrap_err();
        assert_eq!(err, SignatureError::PlatformSigMismatch);
    }

    #[test]
    fn wrong_developer_key_fails_app() {
        let fx = fixture();
        let (_, other_pk) = generate_keypair();
        let err = verify_app(&fx.bundle, &other_pk, reader(&fx.files)).unwrap_err();
        assert_eq!(err, SignatureError::AppSigMismatch);
    }

    #[test]
    fn tampered_bundle_field_fails_app_signature() {
        let fx = fixture();
        let mut tampered = fx.bundle.clone();
        tampered.binary_hash = "ff".repeat(32);
        let err = verify_app(&tampered, &fx.developer_pk, reader(&fx.files)).unwrap_err();
        assert_eq!(err, SignatureError::AppSigMismatch);
    }

    #[test]
    fn manifest_comparison_distinguishes_absent_from_empty() {
        let fx = fixture();
        // Signed as null; an extracted empty manifest is tampering.
        verify_manifest(&fx.bundle, None).unwrap();
        let empty = hull_manifest::Manifest::default();
        assert_eq!(
            verify_manifest(&fx.bundle, Some(&empty)).unwrap_err(),
            SignatureError::ManifestTampered
        );
    }
}
