// SPDX-License-Identifier: MIT OR Apache-2.0
//! Route registration records and path-pattern parsing.
//!
//! Patterns are a sequence of `/`-separated segments, each either a literal
//! or a single-segment capture written `:name`. There are no wildcards and
//! no multi-segment captures.

use crate::wire::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// A parse failure for a route pattern.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    /// Pattern did not start with `/`.
    #[error("pattern must start with '/': {0}")]
    NoLeadingSlash(String),
    /// A capture segment was just `:` with no name.
    #[error("capture segment has no name in: {0}")]
    EmptyCapture(String),
    /// The same capture name appeared twice.
    #[error("duplicate capture ':{0}'")]
    DuplicateCapture(String),
}

/// One parsed pattern segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Segment {
    /// Matches exactly this text.
    Literal(String),
    /// Matches any single segment, binding it to the name.
    Capture(String),
}

/// A parsed route pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutePattern {
    raw: String,
    segments: Vec<Segment>,
}

impl RoutePattern {
    /// Parse a pattern like `/users/:id/posts`.
    ///
    /// # Errors
    ///
    /// See [`PatternError`].
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        if !pattern.starts_with('/') {
            return Err(PatternError::NoLeadingSlash(pattern.to_string()));
        }
        let mut segments = Vec::new();
        let mut seen = std::collections::BTreeSet::new();
        for part in pattern.split('/').skip(1) {
            if let Some(name) = part.strip_prefix(':') {
                if name.is_empty() {
                    return Err(PatternError::EmptyCapture(pattern.to_string()));
                }
                if !seen.insert(name.to_string()) {
                    return Err(PatternError::DuplicateCapture(name.to_string()));
                }
                segments.push(Segment::Capture(name.to_string()));
            } else {
                segments.push(Segment::Literal(part.to_string()));
            }
        }
        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    /// The pattern text as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Parsed segments in order.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Match a request path, returning capture bindings on success.
    #[must_use]
    pub fn matches(&self, path: &str) -> Option<BTreeMap<String, String>> {
        let parts: Vec<&str> = path.split('/').skip(1).collect();
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut params = BTreeMap::new();
        for (segment, part) in self.segments.iter().zip(&parts) {
            match segment {
                Segment::Literal(lit) if lit == part => {}
                Segment::Literal(_) => return None,
                Segment::Capture(name) => {
                    params.insert(name.clone(), (*part).to_string());
                }
            }
        }
        Some(params)
    }
}

/// A route as registered by scripted code.
///
/// The handler ref is an opaque token the owning runtime resolves back to
/// a callable when the trampoline fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSpec {
    /// Request method this route answers.
    pub method: Method,
    /// Parsed path pattern.
    pub pattern: RoutePattern,
    /// Opaque handler token, runtime-specific.
    pub handler_ref: u32,
}

/// A middleware registration: a method filter, a path-prefix filter, and
/// the handler that runs before any matching route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiddlewareSpec {
    /// Only run for this method; `None` means every method.
    pub method: Option<Method>,
    /// Path prefix, matched at segment boundaries (`"/api"` covers
    /// `/api` and `/api/x`, never `/apix`).
    pub prefix: String,
    /// Opaque handler token, runtime-specific.
    pub handler_ref: u32,
}

impl MiddlewareSpec {
    /// Whether this middleware runs for the given request.
    #[must_use]
    pub fn applies_to(&self, method: Method, path: &str) -> bool {
        if self.method.is_some_and(|m| m != method) {
            return false;
        }
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => self.prefix == "/" || rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_pattern_matches_exact() {
        let p = RoutePattern::parse("/health").unwrap();
        assert!(p.matches("/health").is_some());
        assert!(p.matches("/healthz").is_none());
        assert!(p.matches("/health/x").is_none());
    }

    #[test]
    fn captures_bind_segments() {
        let p = RoutePattern::parse("/users/:id/posts/:post").unwrap();
        let params = p.matches("/users/42/posts/7").unwrap();
        assert_eq!(params["id"], "42");
        assert_eq!(params["post"], "7");
    }

    #[test]
    fn capture_does_not_cross_segments() {
        let p = RoutePattern::parse("/files/:name").unwrap();
        assert!(p.matches("/files/a/b").is_none());
    }

    #[test]
    fn root_pattern() {
        let p = RoutePattern::parse("/").unwrap();
        assert!(p.matches("/").is_some());
        assert!(p.matches("/x").is_none());
    }

    #[test]
    fn middleware_prefix_matches_segment_boundaries() {
        let mw = MiddlewareSpec {
            method: None,
            prefix: "/api".into(),
            handler_ref: 0,
        };
        assert!(mw.applies_to(Method::Get, "/api"));
        assert!(mw.applies_to(Method::Post, "/api/users"));
        assert!(!mw.applies_to(Method::Get, "/apix"));

        let root = MiddlewareSpec {
            method: Some(Method::Get),
            prefix: "/".into(),
            handler_ref: 0,
        };
        assert!(root.applies_to(Method::Get, "/anything"));
        assert!(!root.applies_to(Method::Post, "/anything"));
    }

    #[test]
    fn rejects_bad_patterns() {
        assert!(matches!(
            RoutePattern::parse("users/:id"),
            Err(PatternError::NoLeadingSlash(_))
        ));
        assert!(matches!(
            RoutePattern::parse("/users/:"),
            Err(PatternError::EmptyCapture(_))
        ));
        assert!(matches!(
            RoutePattern::parse("/a/:x/b/:x"),
            Err(PatternError::DuplicateCapture(_))
        ));
    }
}
