// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canonicalization throughput: the codec sits on every signature path,
//! so regressions here slow build, verify, and startup alike.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use serde_json::json;

fn bundle_like_value() -> serde_json::Value {
    let files: Vec<serde_json::Value> = (0..64)
        .map(|i| {
            json!({
                "path": format!("app/module_{i}.js"),
                "sha256": format!("{:064x}", i),
            })
        })
        .collect();
    json!({
        "binary_hash": "ab".repeat(32),
        "build": {"cc_version": "cc (GCC) 14.2.0", "flags": ["-O2", "-static"], "timestamp": 0},
        "files": files,
        "manifest": {"fs": {"read": ["data", "static"], "write": ["data"]}, "env": ["API_TOKEN"], "hosts": ["api.example.com"]},
        "platform": {
            "hashes": {"x86_64-linux": "cd".repeat(32), "aarch64-darwin": "ef".repeat(32)},
            "public_key": "11".repeat(32),
            "signature": "22".repeat(64),
            "version": "1",
        },
        "public_key": "33".repeat(32),
        "trampoline_hash": "44".repeat(32),
    })
}

fn bench_canonicalize(c: &mut Criterion) {
    let value = bundle_like_value();
    c.bench_function("canonicalize_bundle_payload", |b| {
        b.iter(|| hull_canon::canonicalize(black_box(&value)).unwrap());
    });

    let (sk, pk) = hull_canon::generate_keypair();
    let payload = hull_canon::canonicalize(&value).unwrap();
    c.bench_function("sign_bundle_payload", |b| {
        b.iter(|| hull_canon::sign(black_box(&payload), &sk));
    });
    let sig = hull_canon::sign(&payload, &sk);
    c.bench_function("verify_bundle_payload", |b| {
        b.iter(|| hull_canon::verify(black_box(&payload), &sig, &pk).unwrap());
    });
}

criterion_group!(benches, bench_canonicalize);
criterion_main!(benches);
