// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bundle;
mod platform;
mod verify;

pub use bundle::{Bundle, BuildInfo, FileEntry, PlatformBlock, sign_bundle};
pub use platform::{
    PLATFORM_ATTESTATION_VERSION, attestation_payload, current_arch, pinned_platform_key,
    sign_platform,
};
pub use verify::{VerifiedBundle, verify_app, verify_manifest, verify_platform};

use thiserror::Error;

/// Verification failure modes. Each is fatal at runtime verify.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// The platform attestation signature did not verify.
    #[error("platform signature mismatch")]
    PlatformSigMismatch,
    /// The app bundle signature did not verify.
    #[error("app signature mismatch")]
    AppSigMismatch,
    /// A recomputed file hash disagreed with the bundle.
    #[error("hash mismatch: {path}")]
    HashMismatch {
        /// The embedded file whose bytes changed.
        path: String,
    },
    /// The attestation has no entry for the current architecture.
    #[error("no platform hash for architecture '{arch}'")]
    UnknownArch {
        /// The architecture triple that was looked up.
        arch: String,
    },
    /// The declared manifest disagrees with the signed copy.
    #[error("manifest does not match the signed bundle")]
    ManifestTampered,
    /// The bundle file itself is structurally broken.
    #[error("malformed bundle: {0}")]
    Malformed(String),
    /// The bundle or a referenced file could not be read.
    #[error("io: {0}")]
    Io(String),
}
