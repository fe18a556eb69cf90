// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cryptographic primitives exposed to scripted code.
//!
//! Hashes, MACs, base64url, PBKDF2, Ed25519, authenticated symmetric
//! encryption (XSalsa20-Poly1305), an asymmetric box (x25519 ECDH with a
//! SHA-256 KDF into the same secretbox), and OS-entropy randomness.
//! Intermediate key material on the stack is wiped through `zeroize`.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use crypto_secretbox::aead::{Aead, KeyInit};
use crypto_secretbox::XSalsa20Poly1305;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use hmac::{Hmac, Mac};
use hull_core::{CapError, CapResult};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256, Sha512};
use zeroize::Zeroize;

/// Secretbox nonce length in bytes.
pub const NONCE_LEN: usize = 24;
/// Secretbox / box key length in bytes.
pub const KEY_LEN: usize = 32;

/// SHA-256 digest.
#[must_use]
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// SHA-512 digest.
#[must_use]
pub fn sha512(data: &[u8]) -> [u8; 64] {
    Sha512::digest(data).into()
}

/// HMAC-SHA256 tag.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> CapResult<[u8; 32]> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
        .map_err(|_| CapError::Invalid("bad hmac key".into()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// HMAC-SHA512 tag.
pub fn hmac_sha512(key: &[u8], data: &[u8]) -> CapResult<[u8; 64]> {
    let mut mac = <Hmac<Sha512> as Mac>::new_from_slice(key)
        .map_err(|_| CapError::Invalid("bad hmac key".into()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// base64url (no padding) encode.
#[must_use]
pub fn b64url_encode(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// base64url (no padding) decode.
pub fn b64url_decode(text: &str) -> CapResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(text)
        .map_err(|e| CapError::Invalid(format!("bad base64url: {e}")))
}

/// PBKDF2-HMAC-SHA256 key derivation.
///
/// # Errors
///
/// `Invalid` for a zero iteration count or zero output length.
pub fn pbkdf2_sha256(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
    out_len: usize,
) -> CapResult<Vec<u8>> {
    if iterations == 0 || out_len == 0 {
        return Err(CapError::Invalid(
            "pbkdf2 needs iterations > 0 and out_len > 0".into(),
        ));
    }
    let mut out = vec![0u8; out_len];
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut out);
    Ok(out)
}

/// Fresh Ed25519 keypair as raw bytes `(public, secret)`.
#[must_use]
pub fn ed25519_keypair() -> ([u8; 32], [u8; 32]) {
    let sk = SigningKey::generate(&mut OsRng);
    (sk.verifying_key().to_bytes(), sk.to_bytes())
}

/// Sign a message with a raw 32-byte secret key.
#[must_use]
pub fn ed25519_sign(secret: &[u8; 32], message: &[u8]) -> [u8; 64] {
    let sk = SigningKey::from_bytes(secret);
    sk.sign(message).to_bytes()
}

/// Verify a detached Ed25519 signature.
pub fn ed25519_verify(public: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> CapResult<bool> {
    let pk = VerifyingKey::from_bytes(public)
        .map_err(|_| CapError::Invalid("bad public key".into()))?;
    let sig = Signature::from_bytes(signature);
    Ok(pk.verify_strict(message, &sig).is_ok())
}

/// Authenticated symmetric encryption.
pub fn secretbox_seal(key: &[u8; 32], nonce: &[u8; 24], plaintext: &[u8]) -> CapResult<Vec<u8>> {
    let cipher = XSalsa20Poly1305::new(key.into());
    cipher
        .encrypt(nonce.into(), plaintext)
        .map_err(|_| CapError::Internal("secretbox seal failed".into()))
}

/// Authenticated symmetric decryption.
///
/// # Errors
///
/// `Invalid` when authentication fails; a tampered box never decrypts.
pub fn secretbox_open(key: &[u8; 32], nonce: &[u8; 24], ciphertext: &[u8]) -> CapResult<Vec<u8>> {
    let cipher = XSalsa20Poly1305::new(key.into());
    cipher
        .decrypt(nonce.into(), ciphertext)
        .map_err(|_| CapError::Invalid("secretbox authentication failed".into()))
}

/// Fresh x25519 keypair as raw bytes `(public, secret)`.
#[must_use]
pub fn box_keypair() -> ([u8; 32], [u8; 32]) {
    let secret = x25519_dalek::StaticSecret::random_from_rng(OsRng);
    let public = x25519_dalek::PublicKey::from(&secret);
    (public.to_bytes(), secret.to_bytes())
}

/// Asymmetric authenticated encryption to `their_public`.
pub fn box_seal(
    their_public: &[u8; 32],
    my_secret: &[u8; 32],
    nonce: &[u8; 24],
    plaintext: &[u8],
) -> CapResult<Vec<u8>> {
    let mut key = box_shared_key(their_public, my_secret);
    let result = secretbox_seal(&key, nonce, plaintext);
    key.zeroize();
    result
}

/// Asymmetric authenticated decryption from `their_public`.
pub fn box_open(
    their_public: &[u8; 32],
    my_secret: &[u8; 32],
    nonce: &[u8; 24],
    ciphertext: &[u8],
) -> CapResult<Vec<u8>> {
    let mut key = box_shared_key(their_public, my_secret);
    let result = secretbox_open(&key, nonce, ciphertext);
    key.zeroize();
    result
}

// x25519 ECDH, then SHA-256 as the KDF into a secretbox key. Both sides
// derive the same key from either (secret, public) pairing.
fn box_shared_key(their_public: &[u8; 32], my_secret: &[u8; 32]) -> [u8; 32] {
    let secret = x25519_dalek::StaticSecret::from(*my_secret);
    let public = x25519_dalek::PublicKey::from(*their_public);
    let mut shared = *secret.diffie_hellman(&public).as_bytes();
    let key = sha256(&shared);
    shared.zeroize();
    key
}

/// `n` bytes from OS entropy.
#[must_use]
pub fn random_bytes(n: usize) -> Vec<u8> {
    let mut out = vec![0u8; n];
    OsRng.fill_bytes(&mut out);
    out
}

/// A fresh 256-bit identifier, hex-encoded.
///
/// Session ids come from here and only here; scripted code cannot supply
/// its own.
#[must_use]
pub fn new_id() -> String {
    hex::encode(random_bytes(32))
}
