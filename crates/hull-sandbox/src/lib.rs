// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

#[cfg(target_os = "linux")]
mod polyfill;
#[cfg(target_os = "openbsd")]
mod native;
#[cfg(not(any(target_os = "openbsd", target_os = "linux")))]
mod stub;

#[cfg(target_os = "linux")]
use polyfill::Enforcer;
#[cfg(target_os = "openbsd")]
use native::Enforcer;
#[cfg(not(any(target_os = "openbsd", target_os = "linux")))]
use stub::Enforcer;

use hull_manifest::{Promises, UnveilPerm};
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Which enforcement level this build actually provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Direct kernel pledge/unveil.
    Native,
    /// Landlock + seccomp emulation.
    Polyfill,
    /// No kernel enforcement; capability-layer checks only.
    Stub,
}

impl Tier {
    /// The tier compiled into this binary.
    #[must_use]
    pub fn current() -> Self {
        #[cfg(target_os = "openbsd")]
        {
            Self::Native
        }
        #[cfg(target_os = "linux")]
        {
            Self::Polyfill
        }
        #[cfg(not(any(target_os = "openbsd", target_os = "linux")))]
        {
            Self::Stub
        }
    }
}

/// Sandbox application failures.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// An unveil addition arrived after sealing.
    #[error("sandbox already sealed")]
    AlreadySealed,
    /// The kernel rejected an unveil path.
    #[error("unveil {path}: {detail}")]
    Unveil {
        /// The path that failed.
        path: String,
        /// OS-level detail.
        detail: String,
    },
    /// The kernel rejected the pledge promise set.
    #[error("pledge '{line}': {detail}")]
    Pledge {
        /// The promise line handed to the kernel.
        line: String,
        /// OS-level detail.
        detail: String,
    },
}

/// Proof that the sandbox sequence completed.
///
/// Holding one means the process is confined (to whatever degree the tier
/// provides); nothing below the sandbox line runs without it.
#[derive(Debug)]
pub struct Sealed {
    tier: Tier,
}

impl Sealed {
    /// The tier that enforced the seal.
    #[must_use]
    pub fn tier(&self) -> Tier {
        self.tier
    }
}

/// The sandbox state machine.
///
/// Unveil additions are accepted until [`Sandbox::seal`]; after that every
/// addition fails with [`SandboxError::AlreadySealed`] regardless of tier.
pub struct Sandbox {
    enforcer: Enforcer,
    sealed: bool,
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Sandbox {
    /// A fresh, unsealed sandbox backed by the platform enforcer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            enforcer: Enforcer::new(true),
            sealed: false,
        }
    }

    /// A sandbox that runs the full state machine but never calls into
    /// the kernel. For tests and `--dev` dry runs.
    #[must_use]
    pub fn disarmed() -> Self {
        Self {
            enforcer: Enforcer::new(false),
            sealed: false,
        }
    }

    /// Add one unveil entry.
    ///
    /// # Errors
    ///
    /// [`SandboxError::AlreadySealed`] after sealing, or a kernel error.
    pub fn unveil(&mut self, path: &Path, perm: UnveilPerm) -> Result<(), SandboxError> {
        if self.sealed {
            return Err(SandboxError::AlreadySealed);
        }
        self.enforcer.unveil(path, perm)
    }

    /// Seal the unveil set; no further additions are possible.
    ///
    /// # Errors
    ///
    /// [`SandboxError::AlreadySealed`] on a second call, or a kernel error.
    pub fn seal(&mut self) -> Result<(), SandboxError> {
        if self.sealed {
            return Err(SandboxError::AlreadySealed);
        }
        self.enforcer.seal()?;
        self.sealed = true;
        Ok(())
    }

    /// Restrict syscalls to the pledged families.
    ///
    /// # Errors
    ///
    /// A kernel error from the pledge application.
    pub fn pledge(&mut self, tokens: &[&'static str]) -> Result<(), SandboxError> {
        self.enforcer.pledge(tokens)
    }

    /// Run the full application sequence for a set of derived promises:
    /// declared reads, declared writes, database file, binary path, seal,
    /// pledge. The order is part of the contract.
    ///
    /// # Errors
    ///
    /// The first kernel failure, or [`SandboxError::AlreadySealed`] if the
    /// sandbox was already used.
    pub fn apply(mut self, promises: &Promises) -> Result<Sealed, SandboxError> {
        let tier = Tier::current();
        info!(
            ?tier,
            unveils = promises.unveil_paths.len(),
            pledge = %promises.pledge_line(),
            "applying sandbox"
        );
        for (path, perm) in &promises.unveil_paths {
            self.unveil(path, *perm)?;
        }
        self.seal()?;
        self.pledge(&promises.pledge_tokens)?;
        Ok(Sealed { tier })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hull_manifest::{Manifest, derive_promises};

    // Disarmed sandboxes run the full state machine without confining the
    // test process; the enforcement calls themselves only run for real
    // inside a served app.

    #[test]
    fn additions_after_seal_fail() {
        let mut sandbox = Sandbox::disarmed();
        sandbox
            .unveil(Path::new("/srv/app/data"), UnveilPerm::Read)
            .unwrap();
        sandbox.seal().unwrap();
        let err = sandbox
            .unveil(Path::new("/tmp"), UnveilPerm::Read)
            .unwrap_err();
        assert!(matches!(err, SandboxError::AlreadySealed));
    }

    #[test]
    fn double_seal_fails() {
        let mut sandbox = Sandbox::disarmed();
        sandbox.seal().unwrap();
        assert!(matches!(sandbox.seal(), Err(SandboxError::AlreadySealed)));
    }

    #[test]
    fn apply_runs_the_whole_sequence() {
        let manifest = Manifest::default();
        let promises = derive_promises(
            &manifest,
            Path::new("/srv/app"),
            Path::new("/srv/app/data.db"),
            Path::new("/srv/app/hull"),
        );
        let sealed = Sandbox::disarmed().apply(&promises).unwrap();
        assert_eq!(sealed.tier(), Tier::current());
    }

    #[test]
    fn tier_is_consistent() {
        let tier = Tier::current();
        #[cfg(target_os = "linux")]
        assert_eq!(tier, Tier::Polyfill);
        #[cfg(target_os = "openbsd")]
        assert_eq!(tier, Tier::Native);
        #[cfg(not(any(target_os = "openbsd", target_os = "linux")))]
        assert_eq!(tier, Tier::Stub);
    }
}
