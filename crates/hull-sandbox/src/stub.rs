// SPDX-License-Identifier: MIT OR Apache-2.0
//! Stub tier: no kernel enforcement on this platform.

use crate::SandboxError;
use hull_manifest::UnveilPerm;
use std::path::Path;
use tracing::warn;

pub(crate) struct Enforcer {
    armed: bool,
    warned: bool,
}

impl Enforcer {
    pub(crate) fn new(armed: bool) -> Self {
        Self {
            armed,
            warned: false,
        }
    }

    pub(crate) fn unveil(&mut self, _path: &Path, _perm: UnveilPerm) -> Result<(), SandboxError> {
        self.warn_once();
        Ok(())
    }

    pub(crate) fn seal(&mut self) -> Result<(), SandboxError> {
        self.warn_once();
        Ok(())
    }

    pub(crate) fn pledge(&mut self, _tokens: &[&'static str]) -> Result<(), SandboxError> {
        self.warn_once();
        Ok(())
    }

    fn warn_once(&mut self) {
        if self.armed && !self.warned {
            warn!(
                "no kernel sandbox on this platform; capability-layer checks are the only defense"
            );
            self.warned = true;
        }
    }
}
