// SPDX-License-Identifier: MIT OR Apache-2.0
//! Manifest-gated environment access.
//!
//! Scripted code can neither enumerate the environment nor read a
//! variable it did not declare; the check happens here, on the host side
//! of the boundary.

use hull_manifest::Manifest;
use tracing::debug;

/// Declared-env reader.
#[derive(Debug, Clone)]
pub struct EnvCap {
    allow: Vec<String>,
    restricted: bool,
}

impl EnvCap {
    /// Build from the declared manifest; absent means nothing is visible.
    #[must_use]
    pub fn new(manifest: Option<&Manifest>) -> Self {
        Self {
            allow: manifest.map(|m| m.env.clone()).unwrap_or_default(),
            restricted: true,
        }
    }

    /// Tool-mode reader without the allowlist gate.
    #[must_use]
    pub fn unrestricted() -> Self {
        Self {
            allow: Vec::new(),
            restricted: false,
        }
    }

    /// Read a variable, or `None` when undeclared or unset.
    ///
    /// Undeclared and unset are deliberately indistinguishable from the
    /// script's point of view.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        if self.restricted && !self.allow.iter().any(|n| n == name) {
            debug!(name, "env read outside declared allowlist");
            return None;
        }
        std::env::var(name).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hull_manifest::Manifest;

    #[test]
    fn declared_variable_is_readable() {
        // PATH is set in any environment the tests run under.
        let m = Manifest {
            env: vec!["PATH".into()],
            ..Manifest::default()
        };
        let cap = EnvCap::new(Some(&m));
        assert!(cap.get("PATH").is_some());
    }

    #[test]
    fn undeclared_variable_is_invisible() {
        let cap = EnvCap::new(Some(&Manifest::default()));
        assert_eq!(cap.get("PATH"), None);
    }

    #[test]
    fn absent_manifest_hides_everything() {
        let cap = EnvCap::new(None);
        assert_eq!(cap.get("PATH"), None);
    }

    #[test]
    fn declared_but_unset_is_none() {
        let m = Manifest {
            env: vec!["HULL_TEST_NEVER_SET_ANYWHERE".into()],
            ..Manifest::default()
        };
        let cap = EnvCap::new(Some(&m));
        assert_eq!(cap.get("HULL_TEST_NEVER_SET_ANYWHERE"), None);
    }

    #[test]
    fn unrestricted_reader_sees_process_env() {
        let cap = EnvCap::unrestricted();
        assert!(cap.get("PATH").is_some());
    }
}
