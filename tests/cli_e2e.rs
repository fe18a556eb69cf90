// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end CLI tests that exercise the `hull` binary from the outside.

use assert_cmd::Command;
use hull_signature::{Bundle, BuildInfo, FileEntry, sign_bundle, sign_platform};
use predicates::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Helper: build a [`Command`] for the `hull` binary.
fn hull() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("hull").expect("binary `hull` should be built")
}

// ═══════════════════════════════════════════════════════════════════════
// Help and argument errors
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn help_flag_shows_all_subcommands() {
    hull()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("build"))
        .stdout(predicate::str::contains("verify"))
        .stdout(predicate::str::contains("inspect"))
        .stdout(predicate::str::contains("manifest"))
        .stdout(predicate::str::contains("keygen"))
        .stdout(predicate::str::contains("sign-platform"));
}

#[test]
fn unknown_flag_exits_two() {
    hull().args(["verify", "--bogus"]).assert().code(2);
}

#[test]
fn verify_without_developer_key_exits_two() {
    let tmp = tempfile::tempdir().unwrap();
    hull()
        .args(["verify", tmp.path().to_str().unwrap()])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--developer-key"));
}

// ═══════════════════════════════════════════════════════════════════════
// keygen / manifest / inspect
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn keygen_writes_keypair_files() {
    let tmp = tempfile::tempdir().unwrap();
    let prefix = tmp.path().join("dev");
    hull()
        .args(["keygen", prefix.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("dev.key"))
        .stdout(predicate::str::contains("dev.pub"));
    assert!(prefix.with_extension("key").exists());
    assert!(prefix.with_extension("pub").exists());
}

#[test]
fn manifest_subcommand_emits_canonical_json() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(
        tmp.path().join("app.js"),
        r#"manifest({fs: {read: ["data"], write: ["data"]}, env: ["API_TOKEN"], hosts: []});"#,
    )
    .unwrap();

    hull()
        .args(["manifest", tmp.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            r#"{"env":["API_TOKEN"],"fs":{"read":["data"],"write":["data"]},"hosts":[]}"#,
        ));
}

#[test]
fn inspect_shows_bundle_inventory() {
    let tmp = tempfile::tempdir().unwrap();
    let fixture = write_signed_app(tmp.path());

    hull()
        .args(["inspect", tmp.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("embedded files (2)"))
        .stdout(predicate::str::contains("app/init.js"))
        .stdout(predicate::str::contains(&fixture.developer_pub_hex));
}

// ═══════════════════════════════════════════════════════════════════════
// verify: the known-good and tampered-file scenarios
// ═══════════════════════════════════════════════════════════════════════

struct SignedApp {
    developer_pub_hex: String,
}

/// Lay out an app directory with two source files, a platform archive +
/// attestation, signing keys, and a valid `package.sig`.
fn write_signed_app(dir: &Path) -> SignedApp {
    fs::create_dir_all(dir.join("app")).unwrap();
    fs::write(dir.join("app/init.js"), b"route('/');\n").unwrap();
    fs::write(dir.join("app/lib.js"), b"exports.x = 1;\n").unwrap();
    fs::write(dir.join("platform.a"), b"!<arch>\nplatform bytes\n").unwrap();

    let (dev_sk, dev_pk) = hull_canon::generate_keypair();
    let (pub_sk, pub_pk) = hull_canon::generate_keypair();
    fs::write(
        dir.join("dev.pub"),
        format!("{}\n", hex::encode(dev_pk.to_bytes())),
    )
    .unwrap();
    fs::write(
        dir.join("publisher.pub"),
        format!("{}\n", hex::encode(pub_pk.to_bytes())),
    )
    .unwrap();

    let platform_bytes = fs::read(dir.join("platform.a")).unwrap();
    let mut hashes = BTreeMap::new();
    hashes.insert(
        hull_signature::current_arch(),
        hull_canon::sha256_hex(&platform_bytes),
    );
    let platform = sign_platform(hashes, &pub_sk);

    let files = ["app/init.js", "app/lib.js"]
        .iter()
        .map(|path| FileEntry {
            path: (*path).to_string(),
            sha256: hull_canon::sha256_hex(&fs::read(dir.join(path)).unwrap()),
        })
        .collect();

    let bundle = Bundle {
        binary_hash: "00".repeat(32),
        build: BuildInfo {
            cc_version: "cc (GCC) 14.2.0".into(),
            flags: vec!["-O2".into()],
            timestamp: 0,
        },
        files,
        manifest: serde_json::Value::Null,
        platform,
        public_key: String::new(),
        signature: String::new(),
        trampoline_hash: "11".repeat(32),
    };
    let bundle = sign_bundle(bundle, &dev_sk).unwrap();
    bundle.save(&dir.join("package.sig")).unwrap();

    SignedApp {
        developer_pub_hex: hex::encode(dev_pk.to_bytes()),
    }
}

fn verify_args(dir: &Path) -> Vec<String> {
    vec![
        "verify".into(),
        "--developer-key".into(),
        dir.join("dev.pub").display().to_string(),
        "--platform-key".into(),
        dir.join("publisher.pub").display().to_string(),
        "--platform-lib".into(),
        dir.join("platform.a").display().to_string(),
        dir.display().to_string(),
    ]
}

#[test]
fn verify_known_good_bundle_passes() {
    let tmp = tempfile::tempdir().unwrap();
    write_signed_app(tmp.path());

    hull()
        .args(verify_args(tmp.path()))
        .assert()
        .code(0)
        .stdout(predicate::str::contains("platform signature valid"))
        .stdout(predicate::str::contains("app signature valid"));
}

#[test]
fn verify_reports_tampered_file_by_path() {
    let tmp = tempfile::tempdir().unwrap();
    write_signed_app(tmp.path());

    // Flip one byte of one embedded source file on disk.
    let target = tmp.path().join("app/lib.js");
    let mut bytes = fs::read(&target).unwrap();
    bytes[0] ^= 1;
    fs::write(&target, bytes).unwrap();

    hull()
        .args(verify_args(tmp.path()))
        .assert()
        .code(1)
        // The platform attestation is untouched and still reports valid.
        .stdout(predicate::str::contains("platform signature valid"))
        .stderr(predicate::str::contains("HashMismatch{path=app/lib.js}"));
}

#[test]
fn verify_with_wrong_developer_key_fails() {
    let tmp = tempfile::tempdir().unwrap();
    write_signed_app(tmp.path());

    // Swap in an unrelated key.
    let (_, other_pk) = hull_canon::generate_keypair();
    fs::write(
        tmp.path().join("dev.pub"),
        format!("{}\n", hex::encode(other_pk.to_bytes())),
    )
    .unwrap();

    hull()
        .args(verify_args(tmp.path()))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("app signature mismatch"));
}

#[test]
fn verify_with_missing_bundle_fails() {
    let tmp = tempfile::tempdir().unwrap();
    write_signed_app(tmp.path());
    fs::remove_file(tmp.path().join("package.sig")).unwrap();

    hull().args(verify_args(tmp.path())).assert().code(1);
}
