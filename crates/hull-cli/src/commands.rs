// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared command implementations for the hull CLI.
//!
//! These functions are library-level so they can be tested without
//! spawning the binary; `main` only parses arguments, calls in here, and
//! maps errors to exit codes.

use anyhow::{Context, Result, anyhow, bail};
use hull_build::region;
use hull_canon::{load_signing_key, load_verifying_key};
use hull_manifest::Manifest;
use hull_runtime::{Runtime, RuntimeConfig, RuntimeKind, select};
use hull_signature::{
    Bundle, PlatformBlock, SignatureError, current_arch, pinned_platform_key, sign_platform,
    verify_app, verify_platform,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// How an app entry was resolved: the source text and the backend that
/// should run it.
pub struct ResolvedApp {
    /// Entry source text.
    pub source: String,
    /// The backend the entry targets.
    pub kind: RuntimeKind,
    /// Directory the app lives in (the capability base dir).
    pub base_dir: PathBuf,
}

/// Resolve an app path: a directory (containing `app.js` or `app.json`)
/// or a single entry file. A `.json` entry targets the register VM,
/// anything else the JS backend.
///
/// # Errors
///
/// When no entry can be found or read.
pub fn resolve_app(path: &Path, kind_override: Option<RuntimeKind>) -> Result<ResolvedApp> {
    let entry = if path.is_dir() {
        let js = path.join("app.js");
        let chunk = path.join("app.json");
        if js.exists() {
            js
        } else if chunk.exists() {
            chunk
        } else {
            bail!("no app.js or app.json under {}", path.display());
        }
    } else {
        path.to_path_buf()
    };

    let kind = kind_override.unwrap_or_else(|| {
        if entry.extension().is_some_and(|e| e == "json") {
            RuntimeKind::Vm
        } else {
            RuntimeKind::Js
        }
    });
    let source = fs::read_to_string(&entry)
        .with_context(|| format!("read app entry {}", entry.display()))?;
    let base_dir = entry
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    Ok(ResolvedApp {
        source,
        kind,
        base_dir,
    })
}

/// Load an app in tool mode and return its declared manifest.
///
/// # Errors
///
/// Load failures from the runtime.
pub fn extract_manifest(app: &ResolvedApp) -> Result<Option<Manifest>> {
    let config = RuntimeConfig {
        tool_mode: true,
        ..RuntimeConfig::default()
    };
    let mut runtime = select(app.kind, &config);
    runtime
        .load_app(&app.source)
        .map_err(|e| anyhow!("load app: {e}"))?;
    runtime
        .extract_manifest()
        .map_err(|e| anyhow!("extract manifest: {e}"))
}

/// `keygen PREFIX`: write `<prefix>.key` and `<prefix>.pub`.
///
/// # Errors
///
/// I/O failures creating either file.
pub fn keygen(prefix: &Path) -> Result<(PathBuf, PathBuf)> {
    let (sk, _pk) = hull_canon::generate_keypair();
    let paths = hull_canon::write_keypair(prefix, &sk)
        .with_context(|| format!("write keypair at {}", prefix.display()))?;
    Ok(paths)
}

/// `sign-platform LIB`: attest a platform archive for the current
/// architecture and write `<lib>.sig` beside it.
///
/// # Errors
///
/// Unreadable archive or key, or unwritable output.
pub fn sign_platform_archive(lib: &Path, key_path: &Path) -> Result<PathBuf> {
    let bytes = fs::read(lib).with_context(|| format!("read archive {}", lib.display()))?;
    let key = load_signing_key(key_path).map_err(|e| anyhow!("publisher key: {e}"))?;

    let mut hashes = BTreeMap::new();
    hashes.insert(current_arch(), hull_canon::sha256_hex(&bytes));
    let block = sign_platform(hashes, &key);

    let out = sig_path_for(lib);
    let value = serde_json::to_value(&block)?;
    fs::write(&out, hull_canon::canonicalize(&value).map_err(|e| anyhow!("{e}"))?)
        .with_context(|| format!("write {}", out.display()))?;
    Ok(out)
}

/// The attestation sidecar for a platform archive.
#[must_use]
pub fn sig_path_for(lib: &Path) -> PathBuf {
    let mut name = lib.file_name().unwrap_or_default().to_os_string();
    name.push(".sig");
    lib.with_file_name(name)
}

/// Load a platform attestation written by [`sign_platform_archive`].
///
/// # Errors
///
/// Unreadable or unparsable sidecar.
pub fn load_platform_block(lib: &Path) -> Result<PlatformBlock> {
    let path = sig_path_for(lib);
    let bytes = fs::read(&path).with_context(|| {
        format!(
            "platform attestation {} (run sign-platform first)",
            path.display()
        )
    })?;
    serde_json::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))
}

/// Inputs to `verify`, resolved from CLI flags.
pub struct VerifyTarget {
    /// Directory holding `package.sig` + sources, or a stamped binary.
    pub target: PathBuf,
    /// Developer public key file.
    pub developer_key: PathBuf,
    /// Platform publisher key override, if any.
    pub platform_key: Option<PathBuf>,
    /// Platform archive to hash, overriding embedded discovery.
    pub platform_lib: Option<PathBuf>,
}

/// An opened verification: the loaded bundle plus a resolver for the
/// embedded-file inventory. The two checks run in chain order; callers
/// report between them.
pub struct VerifySession {
    /// The loaded bundle.
    pub bundle: Bundle,
    read_file: Box<dyn FnMut(&str) -> Result<Vec<u8>, SignatureError>>,
}

impl VerifySession {
    /// Load `package.sig` and set up the file resolver: disk-relative
    /// for a directory target, embedded-region for a stamped binary.
    ///
    /// # Errors
    ///
    /// [`SignatureError::Io`] when the bundle is missing; a hard
    /// failure everywhere, including `--verify-sig` at startup.
    pub fn open(input: &VerifyTarget) -> Result<Self, SignatureError> {
        if input.target.is_dir() {
            let bundle = Bundle::load(&input.target.join("package.sig"))?;
            let dir = input.target.clone();
            Ok(Self {
                bundle,
                read_file: Box::new(move |path: &str| {
                    fs::read(dir.join(path))
                        .map_err(|e| SignatureError::Io(format!("{path}: {e}")))
                }),
            })
        } else {
            let bundle = Bundle::load(
                &input
                    .target
                    .parent()
                    .unwrap_or_else(|| Path::new("."))
                    .join("package.sig"),
            )?;
            let binary = fs::read(&input.target)
                .map_err(|e| SignatureError::Io(format!("{}: {e}", input.target.display())))?;
            let assets = region::find_in_binary(&binary)
                .ok_or_else(|| SignatureError::Malformed("no asset region in binary".into()))
                .and_then(|r| {
                    region::decode(r).map_err(|e| SignatureError::Malformed(e.to_string()))
                })?;
            let by_name: BTreeMap<String, Vec<u8>> = assets
                .into_iter()
                .map(|a| (a.logical_name, a.bytes))
                .collect();
            Ok(Self {
                bundle,
                read_file: Box::new(move |path: &str| {
                    by_name
                        .get(path)
                        .cloned()
                        .ok_or_else(|| SignatureError::Io(format!("not embedded: {path}")))
                }),
            })
        }
    }

    /// Verify the platform attestation. Returns the matched arch.
    ///
    /// # Errors
    ///
    /// Any platform-side [`SignatureError`].
    pub fn check_platform(&self, input: &VerifyTarget) -> Result<String, SignatureError> {
        let publisher_key = match &input.platform_key {
            Some(path) => load_verifying_key(path)
                .map_err(|e| SignatureError::Malformed(format!("platform key: {e}")))?,
            None => pinned_platform_key()
                .ok_or_else(|| SignatureError::Malformed("pinned platform key corrupt".into()))?,
        };
        let arch = current_arch();
        let platform_hash = platform_bytes_hash(input)?;
        verify_platform(&self.bundle.platform, &arch, &platform_hash, &publisher_key)?;
        Ok(arch)
    }

    /// Recompute every embedded-file hash and verify the app signature.
    /// Returns how many files were checked.
    ///
    /// # Errors
    ///
    /// Any app-side [`SignatureError`], `HashMismatch` naming the first
    /// divergent file.
    pub fn check_app(&mut self, input: &VerifyTarget) -> Result<usize, SignatureError> {
        let developer_key = load_verifying_key(&input.developer_key)
            .map_err(|e| SignatureError::Malformed(format!("developer key: {e}")))?;
        let verified = verify_app(&self.bundle, &developer_key, &mut self.read_file)?;
        Ok(verified.files_checked)
    }
}

fn platform_bytes_hash(input: &VerifyTarget) -> Result<String, SignatureError> {
    if let Some(lib) = &input.platform_lib {
        let bytes = fs::read(lib)
            .map_err(|e| SignatureError::Io(format!("{}: {e}", lib.display())))?;
        return Ok(hull_canon::sha256_hex(&bytes));
    }
    if input.target.is_file() {
        let binary = fs::read(&input.target)
            .map_err(|e| SignatureError::Io(format!("{}: {e}", input.target.display())))?;
        if let Some(archive) = hull_build::platform::find_embedded_archive(&binary) {
            return Ok(hull_canon::sha256_hex(archive));
        }
    }
    Err(SignatureError::Io(
        "platform bytes not found: pass --platform-lib or verify a distribution binary".into(),
    ))
}

/// `inspect`: manifest, signature fields, and the embedded inventory.
///
/// # Errors
///
/// When neither a bundle nor an app can be read at `target`.
pub fn inspect(target: &Path) -> Result<String> {
    let bundle_path = if target.is_dir() {
        target.join("package.sig")
    } else {
        target
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("package.sig")
    };

    let mut out = String::new();
    if bundle_path.exists() {
        let bundle = Bundle::load(&bundle_path).map_err(|e| anyhow!("{e}"))?;
        out.push_str(&format!("bundle: {}\n", bundle_path.display()));
        out.push_str(&format!("binary sha256: {}\n", bundle.binary_hash));
        out.push_str(&format!("developer key: {}\n", bundle.public_key));
        out.push_str(&format!(
            "platform key: {} ({} arches attested)\n",
            bundle.platform.public_key,
            bundle.platform.hashes.len()
        ));
        out.push_str(&format!(
            "manifest: {}\n",
            if bundle.manifest.is_null() {
                "absent".to_string()
            } else {
                bundle.manifest.to_string()
            }
        ));
        out.push_str(&format!("embedded files ({}):\n", bundle.files.len()));
        for file in &bundle.files {
            out.push_str(&format!("  {}  {}\n", file.sha256, file.path));
        }
    } else {
        let app = resolve_app(target, None)?;
        let manifest = extract_manifest(&app)?;
        out.push_str(&format!(
            "manifest: {}\n",
            Manifest::to_signed_value(manifest.as_ref())
        ));
    }
    Ok(out)
}

/// `manifest`: extract and emit the declared manifest as canonical JSON.
///
/// # Errors
///
/// Load failures from the runtime.
pub fn manifest_json(target: &Path, kind: Option<RuntimeKind>) -> Result<String> {
    let app = resolve_app(target, kind)?;
    let manifest = extract_manifest(&app)?;
    let value = Manifest::to_signed_value(manifest.as_ref());
    let bytes = hull_canon::canonicalize(&value).map_err(|e| anyhow!("{e}"))?;
    Ok(String::from_utf8(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_prefers_js_entry_in_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("app.js"), "route;").unwrap();
        fs::write(dir.path().join("app.json"), "{}").unwrap();
        let app = resolve_app(dir.path(), None).unwrap();
        assert_eq!(app.kind, RuntimeKind::Js);
        assert_eq!(app.source, "route;");
    }

    #[test]
    fn json_entry_targets_the_vm() {
        let dir = tempfile::tempdir().unwrap();
        let chunk = dir.path().join("app.json");
        fs::write(&chunk, r#"{"constants": [], "functions": []}"#).unwrap();
        let app = resolve_app(&chunk, None).unwrap();
        assert_eq!(app.kind, RuntimeKind::Vm);
    }

    #[test]
    fn missing_entry_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve_app(dir.path(), None).is_err());
    }

    #[test]
    fn keygen_writes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let (key, public) = keygen(&dir.path().join("dev")).unwrap();
        assert!(key.exists());
        assert!(public.exists());
        assert!(load_signing_key(&key).is_ok());
        assert!(load_verifying_key(&public).is_ok());
    }

    #[test]
    fn sign_platform_writes_loadable_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("libhull.a");
        fs::write(&lib, b"archive bytes").unwrap();
        let (key, _) = keygen(&dir.path().join("publisher")).unwrap();

        let sig = sign_platform_archive(&lib, &key).unwrap();
        assert_eq!(sig, dir.path().join("libhull.a.sig"));
        let block = load_platform_block(&lib).unwrap();
        assert_eq!(block.hashes.len(), 1);
        assert!(block.hashes.contains_key(&current_arch()));
    }

    #[test]
    fn manifest_command_emits_canonical_json() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("app.js"),
            r#"manifest({fs: {read: ["data"], write: []}, env: [], hosts: ["api.example.com"]});"#,
        )
        .unwrap();
        let json = manifest_json(dir.path(), None).unwrap();
        assert_eq!(
            json,
            r#"{"env":[],"fs":{"read":["data"],"write":[]},"hosts":["api.example.com"]}"#
        );
    }

    #[test]
    fn manifest_command_reports_absent_as_null() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("app.js"), "var x = 1;").unwrap();
        assert_eq!(manifest_json(dir.path(), None).unwrap(), "null");
    }
}
