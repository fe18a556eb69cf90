// SPDX-License-Identifier: MIT OR Apache-2.0
//! The platform's capability boundary cases, exercised end to end
//! through the public crate APIs.

use hull_capability::db::Db;
use hull_capability::fs::FsCap;
use hull_capability::http::HttpCap;
use hull_core::CapError;
use hull_manifest::{DeclarationSlot, FsCaps, Manifest, derive_promises};
use hull_sandbox::{Sandbox, SandboxError};
use serde_json::json;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

fn manifest(read: &[&str], write: &[&str], hosts: &[&str]) -> Manifest {
    Manifest {
        fs: FsCaps {
            read: read.iter().map(|s| s.to_string()).collect(),
            write: write.iter().map(|s| s.to_string()).collect(),
        },
        env: vec![],
        hosts: hosts.iter().map(|s| s.to_string()).collect(),
    }
}

#[test]
fn path_traversal_is_denied_before_any_syscall() {
    let base = tempfile::tempdir().unwrap();
    fs::create_dir(base.path().join("data")).unwrap();
    let cap = FsCap::new(base.path(), Some(&manifest(&["data"], &[], &[])));

    // The classic: read("../../etc/passwd") from inside the base.
    let err = cap.read("../../etc/passwd").unwrap_err();
    assert!(matches!(err, CapError::Denied(_)));

    // A declared-looking path that climbs out is equally dead.
    let err = cap.read("data/../../../etc/passwd").unwrap_err();
    assert!(matches!(err, CapError::Denied(_)));
}

#[cfg(unix)]
#[test]
fn symlink_that_escapes_the_base_is_denied() {
    let outer = tempfile::tempdir().unwrap();
    let base = outer.path().join("app");
    fs::create_dir_all(base.join("data")).unwrap();
    fs::write(outer.path().join("secret"), b"s").unwrap();
    std::os::unix::fs::symlink(outer.path().join("secret"), base.join("data/link")).unwrap();

    let cap = FsCap::new(&base, Some(&manifest(&["data"], &[], &[])));
    let err = cap.read("data/link").unwrap_err();
    assert!(matches!(err, CapError::Denied(_)));
}

#[test]
fn undeclared_host_never_reaches_the_network() {
    let cap = HttpCap::new(Some(&manifest(&[], &[], &["api.example.com"])));
    // evil.test has no DNS entry; Denied (not IoFailure) proves the gate
    // fired before any lookup.
    let err = cap
        .request("GET", "https://evil.test/", &BTreeMap::new(), None)
        .unwrap_err();
    assert!(matches!(err, CapError::Denied(_)), "{err}");
}

#[test]
fn hostile_sql_parameter_stays_literal() {
    let mut db = Db::open_in_memory().unwrap();
    db.exec(
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
        &[],
    )
    .unwrap();

    let hostile = "Robert'); DROP TABLE users;--";
    db.exec("INSERT INTO users (name) VALUES (?)", &[json!(hostile)])
        .unwrap();

    let rows = db
        .query("SELECT * FROM users WHERE name = ?", &[json!(hostile)])
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], json!(hostile));

    // The users table is intact and queryable.
    let count = db.query("SELECT COUNT(*) AS n FROM users", &[]).unwrap();
    assert_eq!(count[0]["n"], json!(1));
}

#[test]
fn statement_cache_hits_after_first_use() {
    let mut db = Db::open_in_memory().unwrap();
    db.exec("CREATE TABLE t (x)", &[]).unwrap();
    for i in 0..20 {
        db.query("SELECT x FROM t WHERE x = ?", &[json!(i)]).unwrap();
    }
    // First SELECT compiles; the nineteen repeats hit.
    assert_eq!(db.stats().cache_hits, 19);
}

#[test]
fn manifest_entry_cap_is_exactly_thirty_two() {
    let entries = |n: usize| (0..n).map(|i| format!("d{i}")).collect::<Vec<_>>();

    let mut slot = DeclarationSlot::new();
    slot.declare(Manifest {
        fs: FsCaps {
            read: entries(32),
            write: vec![],
        },
        ..Manifest::default()
    })
    .expect("32 entries are accepted");

    let mut slot = DeclarationSlot::new();
    assert!(
        slot.declare(Manifest {
            fs: FsCaps {
                read: entries(33),
                write: vec![],
            },
            ..Manifest::default()
        })
        .is_err(),
        "33 entries are rejected"
    );
}

#[test]
fn empty_hosts_keeps_inet_out_of_the_promises() {
    let promises = derive_promises(
        &manifest(&["data"], &["data"], &[]),
        Path::new("/srv/app"),
        Path::new("/srv/app/data.db"),
        Path::new("/srv/app/hull"),
    );
    assert!(!promises.pledge_tokens.contains(&"inet"));
    assert!(!promises.pledge_tokens.contains(&"dns"));

    let with_hosts = derive_promises(
        &manifest(&[], &[], &["api.example.com"]),
        Path::new("/srv/app"),
        Path::new("/srv/app/data.db"),
        Path::new("/srv/app/hull"),
    );
    assert!(with_hosts.pledge_tokens.contains(&"inet"));
    assert!(with_hosts.pledge_tokens.contains(&"dns"));
}

#[test]
fn sealed_sandbox_rejects_further_unveils() {
    let mut sandbox = Sandbox::disarmed();
    sandbox
        .unveil(Path::new("/srv/app/data"), hull_manifest::UnveilPerm::Read)
        .unwrap();
    sandbox.seal().unwrap();
    assert!(matches!(
        sandbox.unveil(Path::new("/etc"), hull_manifest::UnveilPerm::Read),
        Err(SandboxError::AlreadySealed)
    ));
}
