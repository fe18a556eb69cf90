// SPDX-License-Identifier: MIT OR Apache-2.0
//! Build-mode compiler spawning.
//!
//! Only linked into tool mode (`build`, `verify`, `keygen`,
//! `sign-platform`); a running server never constructs this capability.
//! No shell is ever involved: argv goes to `exec` as-is, and argv[0] must
//! name an allowlisted compiler or archiver.

use hull_core::{CapError, CapResult};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// Executables tool mode may spawn. Fixed at compile time.
pub const ALLOWED_COMPILERS: [&str; 6] = ["cc", "gcc", "clang", "cosmocc", "cosmoar", "ar"];

/// Output of one tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Captured standard output.
    pub stdout: Vec<u8>,
    /// Captured standard error.
    pub stderr: Vec<u8>,
    /// Exit code; `-1` when terminated by a signal.
    pub exit_code: i32,
}

/// The compiler-spawn capability.
#[derive(Debug, Clone, Default)]
pub struct ToolCap;

impl ToolCap {
    /// Construct the tool capability. Tool-mode entry points only.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Spawn an allowlisted compiler and wait for it.
    ///
    /// # Errors
    ///
    /// `Denied` when argv[0] is not on the allowlist, `Invalid` for an
    /// empty argv, `IoFailure` when the process cannot be spawned.
    pub fn spawn(
        &self,
        argv: &[String],
        env: &BTreeMap<String, String>,
        cwd: &Path,
    ) -> CapResult<ToolOutput> {
        let program = argv
            .first()
            .ok_or_else(|| CapError::Invalid("empty argv".into()))?;
        check_allowed(program)?;

        debug!(program, args = argv.len() - 1, "spawning build tool");
        let output = Command::new(program)
            .args(&argv[1..])
            .envs(env)
            .current_dir(cwd)
            .output()
            .map_err(|e| CapError::IoFailure(format!("spawn {program}: {e}")))?;

        Ok(ToolOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

// The allowlist matches on the basename, so "/usr/bin/cc" and "cc" are
// both acceptable spellings of the same tool.
fn check_allowed(program: &str) -> CapResult<()> {
    let base = Path::new(program)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(program);
    if ALLOWED_COMPILERS.contains(&base) {
        return Ok(());
    }
    Err(CapError::Denied(format!(
        "'{program}' is not an allowlisted build tool"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowlist_is_fixed() {
        assert_eq!(
            ALLOWED_COMPILERS,
            ["cc", "gcc", "clang", "cosmocc", "cosmoar", "ar"]
        );
    }

    #[test]
    fn shell_and_arbitrary_binaries_denied() {
        for prog in ["sh", "bash", "/bin/sh", "python3", "curl"] {
            assert!(check_allowed(prog).is_err(), "{prog} must be denied");
        }
    }

    #[test]
    fn basename_resolution() {
        assert!(check_allowed("cc").is_ok());
        assert!(check_allowed("/usr/bin/gcc").is_ok());
        assert!(check_allowed("/opt/cosmo/bin/cosmocc").is_ok());
        // A directory named after a compiler does not smuggle through.
        assert!(check_allowed("/usr/bin/gcc/../sh").is_err());
    }

    #[test]
    fn empty_argv_is_invalid() {
        let cap = ToolCap::new();
        let err = cap
            .spawn(&[], &BTreeMap::new(), Path::new("."))
            .unwrap_err();
        assert!(matches!(err, CapError::Invalid(_)));
    }

    #[test]
    fn denied_spawn_never_executes() {
        let cap = ToolCap::new();
        let err = cap
            .spawn(
                &["sh".to_string(), "-c".to_string(), "echo pwned".to_string()],
                &BTreeMap::new(),
                Path::new("."),
            )
            .unwrap_err();
        assert!(matches!(err, CapError::Denied(_)));
    }
}
