// SPDX-License-Identifier: MIT OR Apache-2.0
//! Filesystem capability with containment validation.
//!
//! The validation algorithm resolves both the candidate path and the base
//! directory to canonical absolute form (following symlinks) and then
//! requires the former to sit under the latter at a path-component
//! boundary. A racing replacement of an ancestor between validation and
//! use cannot escape the unveiled set: the kernel sandbox re-checks at the
//! syscall layer on platforms that have one.

use hull_core::{CapError, CapResult};
use hull_manifest::Manifest;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Filesystem operations scoped to one app base directory.
#[derive(Debug, Clone)]
pub struct FsCap {
    base: PathBuf,
    read_allow: Vec<String>,
    write_allow: Vec<String>,
    restricted: bool,
}

impl FsCap {
    /// Build from the declared manifest; absent means default-deny.
    #[must_use]
    pub fn new(base: &Path, manifest: Option<&Manifest>) -> Self {
        match manifest {
            Some(m) => Self {
                base: base.to_path_buf(),
                read_allow: m.fs.read.clone(),
                write_allow: m.fs.write.clone(),
                restricted: true,
            },
            None => Self {
                base: base.to_path_buf(),
                read_allow: Vec::new(),
                write_allow: Vec::new(),
                restricted: true,
            },
        }
    }

    /// Tool-mode table: containment still applies, allowlists do not.
    #[must_use]
    pub fn unrestricted(base: &Path) -> Self {
        Self {
            base: base.to_path_buf(),
            read_allow: Vec::new(),
            write_allow: Vec::new(),
            restricted: false,
        }
    }

    /// The app base directory as configured.
    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Read a file inside the base directory.
    pub fn read(&self, path: &str) -> CapResult<Vec<u8>> {
        self.check_scope(path, &self.read_allow, "fs.read")?;
        let abs = validate(path, &self.base)?;
        Ok(fs::read(&abs)?)
    }

    /// Write a file inside the base directory.
    ///
    /// The parent directory must already exist; a missing terminal
    /// component is expected for fresh files.
    pub fn write(&self, path: &str, bytes: &[u8]) -> CapResult<()> {
        self.check_scope(path, &self.write_allow, "fs.write")?;
        let abs = validate_for_write(path, &self.base)?;
        fs::write(&abs, bytes)?;
        Ok(())
    }

    /// Whether a path exists inside the base directory.
    pub fn exists(&self, path: &str) -> CapResult<bool> {
        self.check_scope(path, &self.read_allow, "fs.read")?;
        match validate(path, &self.base) {
            Ok(abs) => Ok(abs.exists()),
            Err(CapError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Delete a file inside the base directory.
    pub fn delete(&self, path: &str) -> CapResult<()> {
        self.check_scope(path, &self.write_allow, "fs.write")?;
        let abs = validate(path, &self.base)?;
        fs::remove_file(&abs)?;
        Ok(())
    }

    /// List directory entries, sorted by name.
    pub fn list(&self, path: &str) -> CapResult<Vec<String>> {
        self.check_scope(path, &self.read_allow, "fs.read")?;
        let abs = validate(path, &self.base)?;
        let mut names = Vec::new();
        for entry in fs::read_dir(&abs)? {
            let entry = entry?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn check_scope(&self, path: &str, allow: &[String], section: &str) -> CapResult<()> {
        if !self.restricted {
            return Ok(());
        }
        if allow.iter().any(|entry| in_scope(path, entry)) {
            return Ok(());
        }
        debug!(path, section, "filesystem access outside declared scope");
        Err(CapError::Denied(format!(
            "'{path}' is not covered by any {section} entry"
        )))
    }
}

// Scope entries match at component boundaries: "data" covers "data/x.txt"
// and "data" itself, never "database".
fn in_scope(path: &str, entry: &str) -> bool {
    Path::new(path).starts_with(Path::new(entry))
}

/// The containment validation algorithm.
///
/// 1. Reject absolute paths.
/// 2. Reject any `..` segment.
/// 3. Canonicalize the candidate resolved against the base.
/// 4. Canonicalize the base.
/// 5. Require the candidate under the base at a component boundary.
///
/// # Errors
///
/// `Denied` for containment violations, `NotFound` when resolution hits a
/// missing component or broken symlink, `Invalid` for malformed input.
pub fn validate(path: &str, base_dir: &Path) -> CapResult<PathBuf> {
    let rel = precheck(path)?;
    let base_abs = canonical_base(base_dir)?;
    let abs = base_abs
        .join(rel)
        .canonicalize()
        .map_err(|e| resolve_error(path, &e))?;
    ensure_contained(&abs, &base_abs, path)?;
    Ok(abs)
}

/// Validation variant for write targets: a missing terminal component is
/// fine as long as the parent resolves inside the base.
pub fn validate_for_write(path: &str, base_dir: &Path) -> CapResult<PathBuf> {
    let rel = precheck(path)?;
    let base_abs = canonical_base(base_dir)?;

    let joined = base_abs.join(rel);
    if let Ok(abs) = joined.canonicalize() {
        ensure_contained(&abs, &base_abs, path)?;
        return Ok(abs);
    }

    let file_name = joined
        .file_name()
        .ok_or_else(|| CapError::Invalid(format!("no file name in '{path}'")))?
        .to_os_string();
    let parent = joined
        .parent()
        .ok_or_else(|| CapError::Invalid(format!("no parent for '{path}'")))?;
    let parent_abs = parent
        .canonicalize()
        .map_err(|e| resolve_error(path, &e))?;
    ensure_contained(&parent_abs, &base_abs, path)?;
    Ok(parent_abs.join(file_name))
}

fn precheck(path: &str) -> CapResult<&Path> {
    let rel = Path::new(path);
    if rel.is_absolute() {
        return Err(CapError::Denied(format!("absolute path: {path}")));
    }
    if rel.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(CapError::Denied(format!("parent traversal in: {path}")));
    }
    Ok(rel)
}

fn canonical_base(base_dir: &Path) -> CapResult<PathBuf> {
    base_dir
        .canonicalize()
        .map_err(|e| CapError::IoFailure(format!("base dir: {e}")))
}

fn ensure_contained(abs: &Path, base_abs: &Path, original: &str) -> CapResult<()> {
    if abs.starts_with(base_abs) {
        return Ok(());
    }
    debug!(path = original, "resolved path escapes base directory");
    Err(CapError::Denied(format!(
        "'{original}' resolves outside the base directory"
    )))
}

fn resolve_error(path: &str, err: &std::io::Error) -> CapError {
    match err.kind() {
        std::io::ErrorKind::NotFound => CapError::NotFound(format!("{path}: {err}")),
        _ => CapError::IoFailure(format!("{path}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hull_manifest::{FsCaps, Manifest};
    use std::fs as stdfs;

    fn manifest(read: &[&str], write: &[&str]) -> Manifest {
        Manifest {
            fs: FsCaps {
                read: read.iter().map(|s| s.to_string()).collect(),
                write: write.iter().map(|s| s.to_string()).collect(),
            },
            env: vec![],
            hosts: vec![],
        }
    }

    #[test]
    fn base_dir_itself_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let abs = validate("", dir.path());
        // Empty input joins to the base itself.
        assert_eq!(abs.unwrap(), dir.path().canonicalize().unwrap());
    }

    #[test]
    fn contained_file_resolves() {
        let dir = tempfile::tempdir().unwrap();
        stdfs::create_dir(dir.path().join("data")).unwrap();
        stdfs::write(dir.path().join("data/notes.txt"), b"x").unwrap();
        let abs = validate("data/notes.txt", dir.path()).unwrap();
        assert!(abs.ends_with("data/notes.txt"));
    }

    #[test]
    fn absolute_path_denied() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            validate("/etc/passwd", dir.path()),
            Err(CapError::Denied(_))
        ));
    }

    #[test]
    fn parent_traversal_denied() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            validate("../../etc/passwd", dir.path()),
            Err(CapError::Denied(_))
        ));
        assert!(matches!(
            validate("data/../../etc/passwd", dir.path()),
            Err(CapError::Denied(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escaping_base_denied() {
        let outer = tempfile::tempdir().unwrap();
        let base = outer.path().join("app");
        stdfs::create_dir(&base).unwrap();
        stdfs::write(outer.path().join("secret.txt"), b"s").unwrap();
        std::os::unix::fs::symlink(outer.path().join("secret.txt"), base.join("link")).unwrap();

        assert!(matches!(
            validate("link", &base),
            Err(CapError::Denied(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn broken_symlink_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(dir.path().join("gone"), dir.path().join("dangling")).unwrap();
        assert!(matches!(
            validate("dangling", dir.path()),
            Err(CapError::NotFound(_))
        ));
    }

    #[test]
    fn write_to_fresh_file_resolves_parent() {
        let dir = tempfile::tempdir().unwrap();
        stdfs::create_dir(dir.path().join("out")).unwrap();
        let abs = validate_for_write("out/new.txt", dir.path()).unwrap();
        assert!(abs.ends_with("out/new.txt"));
    }

    #[test]
    fn write_with_missing_parent_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            validate_for_write("missing/new.txt", dir.path()),
            Err(CapError::NotFound(_))
        ));
    }

    #[test]
    fn scope_matches_at_component_boundary() {
        assert!(in_scope("data/x.txt", "data"));
        assert!(in_scope("data", "data"));
        assert!(!in_scope("database/x.txt", "data"));
    }

    #[test]
    fn undeclared_read_denied_without_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        stdfs::create_dir(dir.path().join("private")).unwrap();
        stdfs::write(dir.path().join("private/key.pem"), b"k").unwrap();

        let cap = FsCap::new(dir.path(), Some(&manifest(&["data"], &[])));
        assert!(matches!(
            cap.read("private/key.pem"),
            Err(CapError::Denied(_))
        ));
    }

    #[test]
    fn absent_manifest_denies_everything() {
        let dir = tempfile::tempdir().unwrap();
        stdfs::write(dir.path().join("a.txt"), b"a").unwrap();
        let cap = FsCap::new(dir.path(), None);
        assert!(matches!(cap.read("a.txt"), Err(CapError::Denied(_))));
        assert!(matches!(cap.write("a.txt", b"x"), Err(CapError::Denied(_))));
    }

    #[test]
    fn declared_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        stdfs::create_dir(dir.path().join("data")).unwrap();
        let cap = FsCap::new(dir.path(), Some(&manifest(&["data"], &["data"])));

        cap.write("data/greeting.txt", b"hello").unwrap();
        assert_eq!(cap.read("data/greeting.txt").unwrap(), b"hello");
        assert!(cap.exists("data/greeting.txt").unwrap());
        assert_eq!(cap.list("data").unwrap(), vec!["greeting.txt"]);
        cap.delete("data/greeting.txt").unwrap();
        assert!(!cap.exists("data/greeting.txt").unwrap());
    }
}
