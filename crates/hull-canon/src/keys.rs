// SPDX-License-Identifier: MIT OR Apache-2.0
//! Ed25519 key material: generation and sidecar file I/O.
//!
//! Key files are hex-encoded raw key bytes with a trailing newline:
//! `<prefix>.key` holds the 32-byte signing seed, `<prefix>.pub` the
//! 32-byte public key. Nothing else ever creates key files.

use crate::CanonError;
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand_core::OsRng;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Generate a fresh Ed25519 keypair from OS entropy.
#[must_use]
pub fn generate_keypair() -> (SigningKey, VerifyingKey) {
    let sk = SigningKey::generate(&mut OsRng);
    let pk = sk.verifying_key();
    (sk, pk)
}

/// Write `<prefix>.key` and `<prefix>.pub` next to each other.
///
/// Returns the two paths written, private first.
///
/// # Errors
///
/// Any I/O failure creating either file.
pub fn write_keypair(prefix: &Path, sk: &SigningKey) -> io::Result<(PathBuf, PathBuf)> {
    let key_path = prefix.with_extension("key");
    let pub_path = prefix.with_extension("pub");
    fs::write(&key_path, format!("{}\n", hex::encode(sk.to_bytes())))?;
    fs::write(&pub_path, format!("{}\n", hex::encode(sk.verifying_key().to_bytes())))?;
    Ok((key_path, pub_path))
}

/// Load a signing key from a `.key` file written by [`write_keypair`].
///
/// # Errors
///
/// [`CanonError::BadKey`] when the file is unreadable, not hex, or not
/// exactly 32 bytes.
pub fn load_signing_key(path: &Path) -> Result<SigningKey, CanonError> {
    let bytes = read_key_bytes(path)?;
    Ok(SigningKey::from_bytes(&bytes))
}

/// Load a verifying key from a `.pub` file written by [`write_keypair`].
///
/// # Errors
///
/// [`CanonError::BadKey`] when the file is unreadable, not hex, not 32
/// bytes, or not a valid curve point.
pub fn load_verifying_key(path: &Path) -> Result<VerifyingKey, CanonError> {
    let bytes = read_key_bytes(path)?;
    VerifyingKey::from_bytes(&bytes).map_err(|_| CanonError::BadKey("not a valid public key"))
}

fn read_key_bytes(path: &Path) -> Result<[u8; 32], CanonError> {
    let text = fs::read_to_string(path).map_err(|_| CanonError::BadKey("unreadable key file"))?;
    let raw = hex::decode(text.trim()).map_err(|_| CanonError::BadKey("key file is not hex"))?;
    raw.as_slice()
        .try_into()
        .map_err(|_| CanonError::BadKey("key must be exactly 32 bytes"))
}
