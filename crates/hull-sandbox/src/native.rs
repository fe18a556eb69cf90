// SPDX-License-Identifier: MIT OR Apache-2.0
//! Native tier: direct pledge(2)/unveil(2).

use crate::SandboxError;
use hull_manifest::UnveilPerm;
use std::ffi::CString;
use std::path::Path;

pub(crate) struct Enforcer {
    armed: bool,
}

impl Enforcer {
    pub(crate) fn new(armed: bool) -> Self {
        Self { armed }
    }

    pub(crate) fn unveil(&mut self, path: &Path, perm: UnveilPerm) -> Result<(), SandboxError> {
        if !self.armed {
            return Ok(());
        }
        let c_path = c_string(path.to_string_lossy().as_ref(), path)?;
        let c_perm = c_string(perm.as_str(), path)?;
        // SAFETY: both pointers reference live NUL-terminated buffers for
        // the duration of the call.
        let rc = unsafe { libc::unveil(c_path.as_ptr(), c_perm.as_ptr()) };
        if rc != 0 {
            return Err(SandboxError::Unveil {
                path: path.display().to_string(),
                detail: std::io::Error::last_os_error().to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn seal(&mut self) -> Result<(), SandboxError> {
        if !self.armed {
            return Ok(());
        }
        // unveil(NULL, NULL) locks further additions.
        let rc = unsafe { libc::unveil(std::ptr::null(), std::ptr::null()) };
        if rc != 0 {
            return Err(SandboxError::Unveil {
                path: "<seal>".into(),
                detail: std::io::Error::last_os_error().to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn pledge(&mut self, tokens: &[&'static str]) -> Result<(), SandboxError> {
        if !self.armed {
            return Ok(());
        }
        let line = tokens.join(" ");
        let c_line = CString::new(line.clone()).map_err(|_| SandboxError::Pledge {
            line: line.clone(),
            detail: "interior NUL".into(),
        })?;
        // SAFETY: promises points at a live NUL-terminated buffer;
        // execpromises NULL keeps exec behavior unchanged (tool mode never
        // reaches this path).
        let rc = unsafe { libc::pledge(c_line.as_ptr(), std::ptr::null()) };
        if rc != 0 {
            return Err(SandboxError::Pledge {
                line,
                detail: std::io::Error::last_os_error().to_string(),
            });
        }
        Ok(())
    }
}

fn c_string(text: &str, path: &Path) -> Result<CString, SandboxError> {
    CString::new(text).map_err(|_| SandboxError::Unveil {
        path: path.display().to_string(),
        detail: "interior NUL in path".into(),
    })
}
