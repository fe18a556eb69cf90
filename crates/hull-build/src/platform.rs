// SPDX-License-Identifier: MIT OR Apache-2.0
//! Platform archive location.
//!
//! Distribution builds carry the platform archive inside the running
//! binary, delimited by the canary marker and a length prefix; source
//! builds read it from a build artifact path instead.

use crate::BuildError;
use std::fs;
use std::path::{Path, PathBuf};

/// The canary magic marker. Its hash is covered by the platform
/// attestation, which makes it a quick pre-verify scan target.
pub const PLATFORM_CANARY: &[u8] = b"HULL_PLATFORM_CANARY";

/// Embed an archive into distribution bytes: `canary || u64-le len ||
/// archive`.
#[must_use]
pub fn embed_archive(binary: &mut Vec<u8>, archive: &[u8]) -> usize {
    let offset = binary.len();
    binary.extend_from_slice(PLATFORM_CANARY);
    binary.extend_from_slice(&(archive.len() as u64).to_le_bytes());
    binary.extend_from_slice(archive);
    offset
}

/// Locate an embedded archive in distribution-binary bytes.
#[must_use]
pub fn find_embedded_archive(binary: &[u8]) -> Option<&[u8]> {
    let pos = binary
        .windows(PLATFORM_CANARY.len())
        .rposition(|window| window == PLATFORM_CANARY)?;
    let len_start = pos + PLATFORM_CANARY.len();
    let len_bytes: [u8; 8] = binary.get(len_start..len_start + 8)?.try_into().ok()?;
    let len = usize::try_from(u64::from_le_bytes(len_bytes)).ok()?;
    binary.get(len_start + 8..len_start + 8 + len)
}

/// Resolve the platform archive for a build: an explicit artifact path
/// wins; otherwise the current executable is scanned for an embedded
/// archive, which is written to `scratch` for the linker.
///
/// # Errors
///
/// [`BuildError::Layout`] when no archive can be found either way.
pub fn resolve_archive(
    explicit: Option<&Path>,
    current_exe: Option<&Path>,
    scratch: &Path,
) -> Result<PathBuf, BuildError> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(BuildError::Io(format!(
                "platform archive not found: {}",
                path.display()
            )));
        }
        return Ok(path.to_path_buf());
    }

    if let Some(exe) = current_exe {
        let bytes = fs::read(exe)?;
        if let Some(archive) = find_embedded_archive(&bytes) {
            let out = scratch.join("platform.a");
            fs::write(&out, archive)?;
            return Ok(out);
        }
    }

    Err(BuildError::Layout(
        "no platform archive: pass one explicitly or run a distribution build".into(),
    ))
}
