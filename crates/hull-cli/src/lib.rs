// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]

/// Shared command implementations, library-level so they can be tested
/// without spawning the binary.
pub mod commands;
