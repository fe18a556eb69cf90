// SPDX-License-Identifier: MIT OR Apache-2.0
//! Ed25519 signing over canonical payloads.

use crate::CanonError;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};

/// Sign `payload` and return the detached 64-byte signature.
#[must_use]
pub fn sign(payload: &[u8], key: &SigningKey) -> [u8; 64] {
    key.sign(payload).to_bytes()
}

/// Verify a detached signature over `payload`.
///
/// Uses strict verification: malleable or non-canonical signatures are
/// rejected along with plain mismatches.
///
/// # Errors
///
/// [`CanonError::SigMismatch`] when the signature does not verify.
pub fn verify(payload: &[u8], signature: &[u8; 64], key: &VerifyingKey) -> Result<(), CanonError> {
    let sig = Signature::from_bytes(signature);
    key.verify_strict(payload, &sig)
        .map_err(|_| CanonError::SigMismatch)
}

/// Hex-encoded SHA-256 of `bytes`.
///
/// # Examples
///
/// ```
/// let h = hull_canon::sha256_hex(b"hull");
/// assert_eq!(h.len(), 64);
/// ```
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate_keypair;

    #[test]
    fn sign_verify_round_trip() {
        let (sk, pk) = generate_keypair();
        let payload = b"canonical bytes";
        let sig = sign(payload, &sk);
        assert_eq!(verify(payload, &sig, &pk), Ok(()));
    }

    #[test]
    fn tampered_payload_rejected() {
        let (sk, pk) = generate_keypair();
        let sig = sign(b"payload", &sk);
        assert_eq!(verify(b"payloae", &sig, &pk), Err(CanonError::SigMismatch));
    }

    #[test]
    fn wrong_key_rejected() {
        let (sk, _) = generate_keypair();
        let (_, other_pk) = generate_keypair();
        let sig = sign(b"payload", &sk);
        assert_eq!(
            verify(b"payload", &sig, &other_pk),
            Err(CanonError::SigMismatch)
        );
    }

    #[test]
    fn sha256_hex_known_value() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
