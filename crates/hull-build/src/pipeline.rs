// SPDX-License-Identifier: MIT OR Apache-2.0
//! The seven-step build pipeline.
//!
//! platform extract → asset collection → registry generation → trampoline
//! generation → compile + link → hash pass → bundle canonicalize + sign.
//! Every step produces a named artifact; a rebuild from the same inputs
//! with the same compiler produces byte-identical outputs.

use crate::assets::{self, Asset};
use crate::codegen;
use crate::compile::{self, CompileOutput};
use crate::platform;
use crate::region;
use crate::BuildError;
use hull_capability::tool::ToolCap;
use hull_manifest::Manifest;
use hull_signature::{Bundle, BuildInfo, FileEntry, PlatformBlock, sign_bundle};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Inputs to one pipeline run.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// App source directory.
    pub src_dir: PathBuf,
    /// Output binary path.
    pub out_path: PathBuf,
    /// App name stamped into the trampoline.
    pub app_name: String,
    /// Developer signing key file.
    pub signing_key: PathBuf,
    /// Platform archive path; `None` scans the current executable.
    pub platform_archive: Option<PathBuf>,
    /// The platform publisher's attestation to embed.
    pub platform_block: PlatformBlock,
    /// The manifest the app declares, as extracted by the caller.
    pub manifest: Option<Manifest>,
    /// Compiler executable (must satisfy the tool allowlist).
    pub compiler: String,
}

/// What a successful run produced.
#[derive(Debug)]
pub struct BuildArtifacts {
    /// The signed binary.
    pub binary: PathBuf,
    /// The `package.sig` sidecar.
    pub bundle_path: PathBuf,
    /// The bundle contents.
    pub bundle: Bundle,
    /// How many assets were embedded.
    pub asset_count: usize,
}

/// Run the pipeline.
///
/// # Errors
///
/// The first failing step, as a [`BuildError`].
pub fn run(options: &BuildOptions, tool: &ToolCap) -> Result<BuildArtifacts, BuildError> {
    let scratch = tempfile::tempdir()?;

    // The compiler runs with the scratch dir as cwd, so everything it
    // touches must be absolute.
    let out_path = absolutize(&options.out_path)?;

    // 1. Platform extract.
    let archive = platform::resolve_archive(
        options.platform_archive.as_deref(),
        std::env::current_exe().ok().as_deref(),
        scratch.path(),
    )?;
    let archive = absolutize(&archive)?;

    // 2. Asset collection (lexicographic; the order is signed).
    let collected = assets::collect(&options.src_dir)?;
    info!(assets = collected.len(), "collected app sources");

    // 3. Registry generation.
    let registry_path = scratch.path().join("hull_registry.c");
    fs::write(&registry_path, codegen::registry_source(&collected))?;

    // 4. Trampoline generation. The template hash is recorded before
    //    substitution.
    let trampoline_hash = codegen::trampoline_template_hash();
    let trampoline_path = scratch.path().join("hull_main.c");
    fs::write(
        &trampoline_path,
        codegen::trampoline_source(&options.app_name, collected.len()),
    )?;

    // 5. Compile + link.
    let compiled = compile::compile_and_link(
        tool,
        &options.compiler,
        &[&registry_path, &trampoline_path],
        &archive,
        &out_path,
        scratch.path(),
    )?;

    // Stamp the position-independent asset region onto the binary so
    // `inspect` and runtime verify can read the inventory back.
    let mut binary_bytes = fs::read(&out_path)?;
    binary_bytes.extend_from_slice(&region::encode(&collected));
    fs::write(&out_path, &binary_bytes)?;

    // 6 + 7. Hash pass, bundle, sign.
    let bundle = assemble_bundle(
        &collected,
        &binary_bytes,
        &compiled,
        options.platform_block.clone(),
        options.manifest.as_ref(),
        trampoline_hash,
    );
    let key = hull_canon::load_signing_key(&options.signing_key)
        .map_err(|e| BuildError::Signing(e.to_string()))?;
    let bundle = sign_bundle(bundle, &key).map_err(|e| BuildError::Signing(e.to_string()))?;

    let bundle_path = out_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("package.sig");
    bundle
        .save(&bundle_path)
        .map_err(|e| BuildError::Signing(e.to_string()))?;

    info!(binary = %out_path.display(), bundle = %bundle_path.display(), "build complete");
    Ok(BuildArtifacts {
        binary: out_path,
        bundle_path,
        bundle,
        asset_count: collected.len(),
    })
}

/// Assemble the unsigned bundle from pipeline outputs. Pure, so the
/// determinism property is testable without a compiler.
#[must_use]
pub fn assemble_bundle(
    collected: &[Asset],
    binary_bytes: &[u8],
    compiled: &CompileOutput,
    platform_block: PlatformBlock,
    manifest: Option<&Manifest>,
    trampoline_hash: String,
) -> Bundle {
    let files = collected
        .iter()
        .map(|asset| FileEntry {
            path: asset.logical_name.clone(),
            sha256: hull_canon::sha256_hex(&asset.bytes),
        })
        .collect();

    Bundle {
        binary_hash: hull_canon::sha256_hex(binary_bytes),
        build: BuildInfo {
            cc_version: compiled.cc_version.clone(),
            flags: compiled.flags.clone(),
            timestamp: build_timestamp(),
        },
        files,
        manifest: Manifest::to_signed_value(manifest),
        platform: platform_block,
        public_key: String::new(),
        signature: String::new(),
        trampoline_hash,
    }
}

fn absolutize(path: &Path) -> Result<PathBuf, BuildError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(path))
}

// SOURCE_DATE_EPOCH or zero; the wall clock never reaches a bundle.
fn build_timestamp() -> i64 {
    std::env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}
