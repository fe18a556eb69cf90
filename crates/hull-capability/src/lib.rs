// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Bounded body buffering and multipart parsing.
pub mod body;
/// Cryptographic primitives.
pub mod crypto;
/// The embedded SQL database capability.
pub mod db;
/// Manifest-gated environment access.
pub mod env;
/// Filesystem access with containment validation.
pub mod fs;
/// Egress HTTP client with host allowlisting.
pub mod http;
/// Monotonic and wall-clock time.
pub mod time;
/// Build-mode compiler spawning.
pub mod tool;

pub use hull_core::{CapError, CapResult};

use hull_manifest::Manifest;
use std::path::Path;

/// The capability table handed to a runtime backend at dispatch time.
///
/// Owned by the dispatcher; there is exactly one per process and it never
/// crosses a thread boundary. Everything scripted code can do to the host
/// goes through a field of this struct.
pub struct Caps {
    /// Filesystem operations scoped to the app base directory.
    pub fs: fs::FsCap,
    /// The single database connection.
    pub db: db::Db,
    /// Declared-env access.
    pub env: env::EnvCap,
    /// Egress HTTP client.
    pub http: http::HttpCap,
    /// Clocks.
    pub clock: time::Clock,
    /// Compiler spawning; present only in tool mode.
    pub tool: Option<tool::ToolCap>,
}

impl Caps {
    /// Assemble the serve-mode capability table from a declared manifest.
    ///
    /// An absent manifest produces a default-deny table: every fs, env,
    /// and egress call fails with `Denied`.
    #[must_use]
    pub fn for_serve(base_dir: &Path, manifest: Option<&Manifest>, db: db::Db) -> Self {
        Self {
            fs: fs::FsCap::new(base_dir, manifest),
            db,
            env: env::EnvCap::new(manifest),
            http: http::HttpCap::new(manifest),
            clock: time::Clock::new(),
            tool: None,
        }
    }

    /// Assemble the tool-mode capability table.
    ///
    /// Tool mode exists for `build`, `verify`, `keygen`, and
    /// `sign-platform`; it adds the compiler-spawn primitive and is never
    /// constructed by the serve path.
    #[must_use]
    pub fn for_tool(base_dir: &Path, db: db::Db) -> Self {
        Self {
            fs: fs::FsCap::unrestricted(base_dir),
            db,
            env: env::EnvCap::unrestricted(),
            http: http::HttpCap::denied(),
            clock: time::Clock::new(),
            tool: Some(tool::ToolCap::new()),
        }
    }
}
