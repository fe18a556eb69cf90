// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod promises;

pub use promises::{Promises, UnveilPerm, derive_promises};

use hull_core::MAX_MANIFEST_ENTRIES;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation failures at declaration time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManifestError {
    /// `manifest()` was called a second time.
    #[error("manifest already declared")]
    AlreadyDeclared,
    /// An array exceeded [`MAX_MANIFEST_ENTRIES`].
    #[error("{section} has {count} entries, cap is {MAX_MANIFEST_ENTRIES}")]
    TooManyEntries {
        /// Which array overflowed.
        section: &'static str,
        /// How many entries it carried.
        count: usize,
    },
    /// A filesystem entry was empty after normalization.
    #[error("{section} contains an empty entry")]
    EmptyEntry {
        /// Which array held it.
        section: &'static str,
    },
    /// A filesystem entry was absolute.
    #[error("filesystem entry is absolute: {0}")]
    AbsolutePath(String),
    /// A filesystem entry contained a `..` segment.
    #[error("filesystem entry traverses upward: {0}")]
    ParentTraversal(String),
    /// A host entry was not plain DNS-label form.
    #[error("bad host entry: {0}")]
    BadHost(String),
    /// An env entry was not a plausible variable name.
    #[error("bad env entry: {0}")]
    BadEnvName(String),
}

/// Filesystem capability arrays.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsCaps {
    /// Paths the app may read, relative to its base directory.
    #[serde(default)]
    pub read: Vec<String>,
    /// Paths the app may write, relative to its base directory.
    #[serde(default)]
    pub write: Vec<String>,
}

/// The declared-capability record.
///
/// Entries are case-sensitive and order-preserving. A manifest is either
/// *present* (the app called the declaration API) or *absent*; absent means
/// default-deny at the capability layer and no kernel sandbox application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Filesystem read/write allowlists.
    #[serde(default)]
    pub fs: FsCaps,
    /// Environment variable names the app may read.
    #[serde(default)]
    pub env: Vec<String>,
    /// Egress hosts the app may contact (`"*"` opts out of filtering).
    #[serde(default)]
    pub hosts: Vec<String>,
}

impl Manifest {
    /// Validate and normalize a declaration, consuming the raw input.
    ///
    /// Filesystem entries are checked relative (no leading `/`, no `..`
    /// segment) and trailing slashes are trimmed. Hosts are lower-cased
    /// DNS-label form. Env names must be non-empty `[A-Za-z_][A-Za-z0-9_]*`.
    ///
    /// # Errors
    ///
    /// See [`ManifestError`].
    pub fn validated(raw: Manifest) -> Result<Self, ManifestError> {
        check_len("fs.read", &raw.fs.read)?;
        check_len("fs.write", &raw.fs.write)?;
        check_len("env", &raw.env)?;
        check_len("hosts", &raw.hosts)?;

        let read = raw
            .fs
            .read
            .into_iter()
            .map(|e| normalize_fs_entry("fs.read", e))
            .collect::<Result<Vec<_>, _>>()?;
        let write = raw
            .fs
            .write
            .into_iter()
            .map(|e| normalize_fs_entry("fs.write", e))
            .collect::<Result<Vec<_>, _>>()?;
        let env = raw
            .env
            .into_iter()
            .map(normalize_env_entry)
            .collect::<Result<Vec<_>, _>>()?;
        let hosts = raw
            .hosts
            .into_iter()
            .map(normalize_host_entry)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            fs: FsCaps { read, write },
            env,
            hosts,
        })
    }

    /// The value embedded in signed bundles: the manifest itself, or JSON
    /// `null` when absent. Absent and empty are distinguishable forever.
    #[must_use]
    pub fn to_signed_value(declared: Option<&Manifest>) -> serde_json::Value {
        match declared {
            Some(m) => serde_json::to_value(m).unwrap_or(serde_json::Value::Null),
            None => serde_json::Value::Null,
        }
    }

    /// True when the hosts list opts into unrestricted egress.
    #[must_use]
    pub fn allows_any_host(&self) -> bool {
        self.hosts.iter().any(|h| h == "*")
    }
}

fn check_len(section: &'static str, entries: &[String]) -> Result<(), ManifestError> {
    if entries.len() > MAX_MANIFEST_ENTRIES {
        return Err(ManifestError::TooManyEntries {
            section,
            count: entries.len(),
        });
    }
    Ok(())
}

fn normalize_fs_entry(section: &'static str, entry: String) -> Result<String, ManifestError> {
    if entry.starts_with('/') {
        return Err(ManifestError::AbsolutePath(entry));
    }
    let trimmed = entry.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ManifestError::EmptyEntry { section });
    }
    if trimmed.split('/').any(|seg| seg == "..") {
        return Err(ManifestError::ParentTraversal(entry));
    }
    Ok(trimmed.to_string())
}

fn normalize_env_entry(entry: String) -> Result<String, ManifestError> {
    let mut chars = entry.chars();
    let head_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !head_ok || !entry.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ManifestError::BadEnvName(entry));
    }
    Ok(entry)
}

fn normalize_host_entry(entry: String) -> Result<String, ManifestError> {
    if entry == "*" {
        return Ok(entry);
    }
    let host = entry.to_ascii_lowercase();
    let label_ok = |label: &str| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    };
    if host.is_empty() || !host.split('.').all(label_ok) {
        return Err(ManifestError::BadHost(entry));
    }
    Ok(host)
}

/// One-shot declaration slot owned by the startup sequence.
///
/// Constructed empty, filled exactly once during app load, frozen before
/// the sandbox is applied.
#[derive(Debug, Default)]
pub struct DeclarationSlot {
    declared: Option<Manifest>,
}

impl DeclarationSlot {
    /// An empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the app's declaration.
    ///
    /// # Errors
    ///
    /// [`ManifestError::AlreadyDeclared`] on the second call, or any
    /// validation failure from [`Manifest::validated`].
    pub fn declare(&mut self, raw: Manifest) -> Result<(), ManifestError> {
        if self.declared.is_some() {
            return Err(ManifestError::AlreadyDeclared);
        }
        self.declared = Some(Manifest::validated(raw)?);
        Ok(())
    }

    /// The declared manifest, if any.
    #[must_use]
    pub fn get(&self) -> Option<&Manifest> {
        self.declared.as_ref()
    }

    /// Freeze the slot, yielding the final declaration state.
    #[must_use]
    pub fn freeze(self) -> Option<Manifest> {
        self.declared
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("dir{i}")).collect()
    }

    #[test]
    fn thirty_two_entries_accepted() {
        let m = Manifest {
            fs: FsCaps {
                read: entries(32),
                write: vec![],
            },
            ..Manifest::default()
        };
        assert!(Manifest::validated(m).is_ok());
    }

    #[test]
    fn thirty_three_entries_rejected() {
        let m = Manifest {
            fs: FsCaps {
                read: entries(33),
                write: vec![],
            },
            ..Manifest::default()
        };
        assert_eq!(
            Manifest::validated(m),
            Err(ManifestError::TooManyEntries {
                section: "fs.read",
                count: 33
            })
        );
    }

    #[test]
    fn absolute_and_traversal_rejected() {
        let abs = Manifest {
            fs: FsCaps {
                read: vec!["/etc".into()],
                write: vec![],
            },
            ..Manifest::default()
        };
        assert!(matches!(
            Manifest::validated(abs),
            Err(ManifestError::AbsolutePath(_))
        ));

        let up = Manifest {
            fs: FsCaps {
                read: vec!["data/../../etc".into()],
                write: vec![],
            },
            ..Manifest::default()
        };
        assert!(matches!(
            Manifest::validated(up),
            Err(ManifestError::ParentTraversal(_))
        ));
    }

    #[test]
    fn trailing_slash_trimmed() {
        let m = Manifest {
            fs: FsCaps {
                read: vec!["data/".into()],
                write: vec![],
            },
            ..Manifest::default()
        };
        let v = Manifest::validated(m).unwrap();
        assert_eq!(v.fs.read, vec!["data"]);
    }

    #[test]
    fn hosts_lowercased_and_checked() {
        let m = Manifest {
            hosts: vec!["API.Example.COM".into(), "*".into()],
            ..Manifest::default()
        };
        let v = Manifest::validated(m).unwrap();
        assert_eq!(v.hosts, vec!["api.example.com", "*"]);
        assert!(v.allows_any_host());

        let bad = Manifest {
            hosts: vec!["no_underscores.example".into()],
            ..Manifest::default()
        };
        assert!(matches!(
            Manifest::validated(bad),
            Err(ManifestError::BadHost(_))
        ));
    }

    #[test]
    fn env_names_checked() {
        let ok = Manifest {
            env: vec!["API_TOKEN".into(), "_private".into()],
            ..Manifest::default()
        };
        assert!(Manifest::validated(ok).is_ok());

        let bad = Manifest {
            env: vec!["9LIVES".into()],
            ..Manifest::default()
        };
        assert!(matches!(
            Manifest::validated(bad),
            Err(ManifestError::BadEnvName(_))
        ));
    }

    #[test]
    fn declaration_is_one_shot() {
        let mut slot = DeclarationSlot::new();
        slot.declare(Manifest::default()).unwrap();
        assert_eq!(
            slot.declare(Manifest::default()),
            Err(ManifestError::AlreadyDeclared)
        );
    }

    #[test]
    fn absent_signs_as_null_not_empty_object() {
        assert_eq!(Manifest::to_signed_value(None), serde_json::Value::Null);
        let empty = Manifest::default();
        let v = Manifest::to_signed_value(Some(&empty));
        assert!(v.is_object());
    }
}
