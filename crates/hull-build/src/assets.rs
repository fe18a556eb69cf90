// SPDX-License-Identifier: MIT OR Apache-2.0
//! Asset collection.
//!
//! Walks the source directory into an ordered `(logical_name, bytes)`
//! list. Order is lexicographic by logical name and is part of the signed
//! bundle, so two walks of the same tree are byte-identical.

use crate::BuildError;
use std::path::Path;
use walkdir::WalkDir;

/// One collected source artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// `/`-separated path relative to the source root.
    pub logical_name: String,
    /// File contents.
    pub bytes: Vec<u8>,
}

// Never embedded: key material, previous outputs, VCS internals.
const EXCLUDED_DIRS: [&str; 3] = [".git", "target", ".hull-build"];
const EXCLUDED_EXTENSIONS: [&str; 3] = ["key", "pub", "sig"];

/// Collect every embeddable file under `src_dir`, sorted by logical name.
///
/// # Errors
///
/// [`BuildError::Io`] when the walk or a read fails.
pub fn collect(src_dir: &Path) -> Result<Vec<Asset>, BuildError> {
    let mut assets = Vec::new();
    let walker = WalkDir::new(src_dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            !EXCLUDED_DIRS
                .iter()
                .any(|dir| e.file_name() == std::ffi::OsStr::new(dir))
        });

    for entry in walker {
        let entry = entry.map_err(|e| BuildError::Io(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            if EXCLUDED_EXTENSIONS.contains(&ext) {
                continue;
            }
        }
        let rel = path.strip_prefix(src_dir).unwrap_or(path);
        let logical_name = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let bytes = std::fs::read(path)
            .map_err(|e| BuildError::Io(format!("{}: {e}", path.display())))?;
        assets.push(Asset {
            logical_name,
            bytes,
        });
    }

    assets.sort_by(|a, b| a.logical_name.cmp(&b.logical_name));
    Ok(assets)
}
