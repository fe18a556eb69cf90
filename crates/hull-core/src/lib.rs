// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Capability error taxonomy.
pub mod error;
/// Route registration records and pattern parsing.
pub mod route;
/// Request/response wire shapes shared by both runtime backends.
pub mod wire;

pub use error::{CapError, CapResult};
pub use route::{MiddlewareSpec, PatternError, RoutePattern, RouteSpec, Segment};
pub use wire::{Method, Request, Response};

/// Maximum entries in any one manifest array (`fs.read`, `fs.write`,
/// `env`, `hosts`).
pub const MAX_MANIFEST_ENTRIES: usize = 32;

/// Per-request body cap in bytes (1 MiB).
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Serialized request-context cap in bytes (64 KiB).
pub const MAX_CONTEXT_BYTES: usize = 64 * 1024;

/// Prepared-statement cache capacity.
pub const STMT_CACHE_CAP: usize = 32;

/// Default per-request instruction budget for the JS backend.
pub const DEFAULT_INSTRUCTION_BUDGET: u64 = 10_000_000;

/// Default heap cap for the register-VM backend (64 MiB).
pub const DEFAULT_VM_HEAP_BYTES: usize = 64 * 1024 * 1024;

/// Environment variables the host itself reads before manifest extraction.
///
/// Anything else comes from the manifest `env` allowlist or not at all.
pub const HOST_ENV_WHITELIST: [&str; 3] = ["HULL_PORT", "HULL_DB", "HULL_LOG_LEVEL"];

/// Process exit codes, shared by every subcommand.
pub mod exit {
    /// Full success.
    pub const OK: i32 = 0;
    /// A signature, hash, or manifest verification failed.
    pub const VERIFY_FAILED: i32 = 1;
    /// Invalid CLI arguments or configuration.
    pub const USAGE: i32 = 2;
    /// An I/O operation failed.
    pub const IO: i32 = 3;
    /// Unexpected internal error.
    pub const INTERNAL: i32 = 4;
}

#[cfg(test)]
mod tests {
    #[test]
    fn host_whitelist_is_fixed() {
        assert_eq!(
            super::HOST_ENV_WHITELIST,
            ["HULL_PORT", "HULL_DB", "HULL_LOG_LEVEL"]
        );
    }
}
