// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Ordered asset collection.
pub mod assets;
/// C registry and trampoline generation.
pub mod codegen;
/// Compile-and-link step over the tool capability.
pub mod compile;
/// The seven-step pipeline.
pub mod pipeline;
/// Platform archive location and extraction.
pub mod platform;
/// The embedded asset-region codec.
pub mod region;

use thiserror::Error;

/// Build pipeline failures.
#[derive(Debug, Error)]
pub enum BuildError {
    /// A source file or directory could not be read.
    #[error("io: {0}")]
    Io(String),
    /// The compiler exited nonzero or could not be spawned.
    #[error("compile: {0}")]
    Compile(String),
    /// The tool capability refused the spawn.
    #[error("tool: {0}")]
    Tool(String),
    /// The developer key could not be loaded or used.
    #[error("signing: {0}")]
    Signing(String),
    /// An embedded region or platform archive is malformed.
    #[error("layout: {0}")]
    Layout(String),
}

impl From<std::io::Error> for BuildError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
