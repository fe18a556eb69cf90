// SPDX-License-Identifier: MIT OR Apache-2.0
//! Derivation of kernel sandbox promises from a declared manifest.
//!
//! The derivation is pure: it computes what the sandbox layer will apply,
//! in the exact order the application sequence requires, without touching
//! the OS.

use crate::Manifest;
use std::path::{Path, PathBuf};

/// Unveil permission classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnveilPerm {
    /// Read-only visibility (`r`).
    Read,
    /// Read, write, create (`rwc`).
    ReadWriteCreate,
}

impl UnveilPerm {
    /// The permission string handed to `unveil(2)`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "r",
            Self::ReadWriteCreate => "rwc",
        }
    }
}

/// Everything the sandbox layer will apply, already ordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Promises {
    /// Pledge tokens, space-joined for the syscall.
    pub pledge_tokens: Vec<&'static str>,
    /// Unveil entries in application order: declared reads, declared
    /// writes, the database file, the binary itself.
    pub unveil_paths: Vec<(PathBuf, UnveilPerm)>,
}

impl Promises {
    /// The pledge promise string, e.g. `"stdio rpath wpath cpath flock"`.
    #[must_use]
    pub fn pledge_line(&self) -> String {
        self.pledge_tokens.join(" ")
    }
}

/// Derive pledge tokens and unveil paths for a declared manifest.
///
/// Tokens always include `stdio rpath wpath cpath flock`; `inet` and `dns`
/// appear iff the manifest names at least one egress host. Filesystem
/// entries resolve against `base_dir`.
#[must_use]
pub fn derive_promises(
    manifest: &Manifest,
    base_dir: &Path,
    db_path: &Path,
    exe_path: &Path,
) -> Promises {
    let mut pledge_tokens = vec!["stdio", "rpath", "wpath", "cpath", "flock"];
    if !manifest.hosts.is_empty() {
        pledge_tokens.push("inet");
        pledge_tokens.push("dns");
    }

    let mut unveil_paths = Vec::new();
    for entry in &manifest.fs.read {
        unveil_paths.push((base_dir.join(entry), UnveilPerm::Read));
    }
    for entry in &manifest.fs.write {
        unveil_paths.push((base_dir.join(entry), UnveilPerm::ReadWriteCreate));
    }
    // The database file plus the engine's WAL/shared-memory sidecars.
    unveil_paths.push((db_path.to_path_buf(), UnveilPerm::ReadWriteCreate));
    for suffix in ["-wal", "-shm"] {
        let mut name = db_path.file_name().unwrap_or_default().to_os_string();
        name.push(suffix);
        unveil_paths.push((db_path.with_file_name(name), UnveilPerm::ReadWriteCreate));
    }
    unveil_paths.push((exe_path.to_path_buf(), UnveilPerm::Read));

    Promises {
        pledge_tokens,
        unveil_paths,
    }
}
