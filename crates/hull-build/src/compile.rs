// SPDX-License-Identifier: MIT OR Apache-2.0
//! Compile and link through the tool capability.
//!
//! No timestamps reach the compiled output, the flag list is recorded
//! verbatim for the bundle, and the compiler executable must satisfy the
//! tool allowlist.

use crate::BuildError;
use hull_capability::tool::ToolCap;
use std::collections::BTreeMap;
use std::path::Path;

/// Flags every Hull app build passes, in bundle-recorded order.
pub const BASE_FLAGS: [&str; 4] = ["-O2", "-fno-asynchronous-unwind-tables", "-w", "-static"];

/// Result of the compile step.
#[derive(Debug, Clone)]
pub struct CompileOutput {
    /// First line of `<cc> --version`.
    pub cc_version: String,
    /// The flags as handed to the compiler.
    pub flags: Vec<String>,
}

/// Query the compiler's version line.
///
/// # Errors
///
/// [`BuildError::Tool`] when the spawn is denied or fails.
pub fn cc_version(tool: &ToolCap, cc: &str, cwd: &Path) -> Result<String, BuildError> {
    let output = tool
        .spawn(
            &[cc.to_string(), "--version".to_string()],
            &BTreeMap::new(),
            cwd,
        )
        .map_err(|e| BuildError::Tool(e.to_string()))?;
    if output.exit_code != 0 {
        return Err(BuildError::Tool(format!(
            "{cc} --version exited {}",
            output.exit_code
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .unwrap_or_default()
        .to_string())
}

/// Compile the generated sources and link the platform archive.
///
/// # Errors
///
/// [`BuildError::Compile`] with the compiler's stderr on failure.
pub fn compile_and_link(
    tool: &ToolCap,
    cc: &str,
    sources: &[&Path],
    platform_archive: &Path,
    out: &Path,
    cwd: &Path,
) -> Result<CompileOutput, BuildError> {
    let version = cc_version(tool, cc, cwd)?;

    let mut argv: Vec<String> = vec![cc.to_string()];
    let flags: Vec<String> = BASE_FLAGS.iter().map(|f| (*f).to_string()).collect();
    argv.extend(flags.iter().cloned());
    for source in sources {
        argv.push(source.display().to_string());
    }
    argv.push(platform_archive.display().to_string());
    argv.push("-o".to_string());
    argv.push(out.display().to_string());

    let output = tool
        .spawn(&argv, &BTreeMap::new(), cwd)
        .map_err(|e| BuildError::Tool(e.to_string()))?;
    if output.exit_code != 0 {
        return Err(BuildError::Compile(format!(
            "{cc} exited {}: {}",
            output.exit_code,
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    Ok(CompileOutput {
        cc_version: version,
        flags,
    })
}
