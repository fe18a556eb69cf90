// SPDX-License-Identifier: MIT OR Apache-2.0
//! The embedded stdlib registry.
//!
//! Module resolution consults this registry before any other mechanism;
//! there is no filesystem fallback, so an app cannot be made to load a
//! module that was not compiled into the binary.

/// The prelude, evaluated once at JS-backend init to build the `hull`
/// namespace over the flat host bindings.
pub const PRELUDE: &str = include_str!("../assets/prelude.js");

static MODULES: [(&str, &str); 2] = [
    ("hull/encoding", include_str!("../assets/encoding.js")),
    ("hull/http", include_str!("../assets/http.js")),
];

/// Resolve an embedded module by name.
#[must_use]
pub fn resolve(name: &str) -> Option<&'static str> {
    MODULES
        .iter()
        .find(|(module, _)| *module == name)
        .map(|(_, source)| *source)
}

/// Names of every embedded module, for `inspect`.
#[must_use]
pub fn names() -> Vec<&'static str> {
    MODULES.iter().map(|(name, _)| *name).collect()
}
