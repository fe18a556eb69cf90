// SPDX-License-Identifier: MIT OR Apache-2.0
//! Request/response wire shapes.
//!
//! Both runtime backends marshal exactly these records into and out of
//! scripted code, so handlers are semantically portable between them.
//! Everything here is JSON-compatible by construction: the context slot is
//! a string-keyed mapping of plain values, and there is no way to smuggle
//! a closure or host handle through it.

use crate::MAX_CONTEXT_BYTES;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// HTTP methods the router understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
    /// HEAD
    Head,
    /// OPTIONS
    Options,
}

impl Method {
    /// Canonical upper-case name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            "HEAD" => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            other => Err(format!("unknown method: {other}")),
        }
    }
}

/// One incoming request as seen by scripted handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Monotonic id assigned at dispatch; appears in every log record.
    pub id: u64,
    /// Request method.
    pub method: Method,
    /// Decoded path, always starting with `/`.
    pub path: String,
    /// Raw query string without the leading `?`, empty if none.
    pub query: String,
    /// Header map; names lower-cased, last value wins.
    pub headers: BTreeMap<String, String>,
    /// Captures from the route pattern, in pattern order.
    pub params: BTreeMap<String, String>,
    /// Buffered request body, already bounded by the body cap.
    #[serde(with = "serde_bytes_vec")]
    pub body: Vec<u8>,
    /// Opaque context slot round-tripped across middleware.
    pub context: BTreeMap<String, serde_json::Value>,
}

// Body bytes serialize as an array of numbers in JSON; a named module keeps
// the derive readable without pulling in another dependency.
mod serde_bytes_vec {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(val: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        val.serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        Vec::<u8>::deserialize(de)
    }
}

impl Request {
    /// Body interpreted as UTF-8, if it is.
    #[must_use]
    pub fn body_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Validate and serialize the context slot for the transport layer.
    ///
    /// The context must be a mapping of scalars and mappings, and its
    /// serialized form must fit in [`MAX_CONTEXT_BYTES`].
    ///
    /// # Errors
    ///
    /// A human-readable reason when either rule is violated.
    pub fn encode_context(&self) -> Result<Vec<u8>, String> {
        for (key, value) in &self.context {
            if value.is_array() {
                return Err(format!("context value for '{key}' is an array"));
            }
        }
        let bytes = serde_json::to_vec(&self.context).map_err(|e| e.to_string())?;
        if bytes.len() > MAX_CONTEXT_BYTES {
            return Err(format!(
                "context is {} bytes, cap is {MAX_CONTEXT_BYTES}",
                bytes.len()
            ));
        }
        Ok(bytes)
    }

    /// Restore the context slot from transport bytes.
    ///
    /// # Errors
    ///
    /// When the bytes are not a JSON mapping.
    pub fn decode_context(bytes: &[u8]) -> Result<BTreeMap<String, serde_json::Value>, String> {
        serde_json::from_slice(bytes).map_err(|e| e.to_string())
    }
}

/// A handler's answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,
    /// Response headers; names lower-cased.
    pub headers: BTreeMap<String, String>,
    /// Response body bytes.
    #[serde(with = "serde_bytes_vec")]
    pub body: Vec<u8>,
}

impl Response {
    /// Plain-text response with the given status.
    #[must_use]
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".into(), "text/plain; charset=utf-8".into());
        Self {
            status,
            headers,
            body: body.into().into_bytes(),
        }
    }

    /// JSON response with the given status.
    #[must_use]
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".into(), "application/json".into());
        Self {
            status,
            headers,
            body: serde_json::to_vec(value).unwrap_or_default(),
        }
    }

    /// Empty response with only a status code.
    #[must_use]
    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: Vec::new(),
        }
    }

    /// The sanitized answer for an uncaught handler failure.
    ///
    /// Production responses carry no detail; dev mode appends it.
    #[must_use]
    pub fn internal_error(dev_detail: Option<&str>) -> Self {
        match dev_detail {
            Some(detail) => Self::text(500, format!("internal error\n\n{detail}")),
            None => Self::text(500, "internal error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> Request {
        Request {
            id: 1,
            method: Method::Get,
            path: "/".into(),
            query: String::new(),
            headers: BTreeMap::new(),
            params: BTreeMap::new(),
            body: Vec::new(),
            context: BTreeMap::new(),
        }
    }

    #[test]
    fn method_round_trip() {
        for m in ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"] {
            assert_eq!(m.parse::<Method>().unwrap().as_str(), m);
        }
        assert!("TRACE".parse::<Method>().is_err());
    }

    #[test]
    fn context_round_trips() {
        let mut req = request();
        req.context.insert("user".into(), json!({"id": 7}));
        req.context.insert("flag".into(), json!(true));
        let bytes = req.encode_context().unwrap();
        let restored = Request::decode_context(&bytes).unwrap();
        assert_eq!(restored, req.context);
    }

    #[test]
    fn context_rejects_arrays() {
        let mut req = request();
        req.context.insert("xs".into(), json!([1, 2]));
        assert!(req.encode_context().is_err());
    }

    #[test]
    fn context_size_cap() {
        let mut req = request();
        req.context
            .insert("big".into(), json!("x".repeat(MAX_CONTEXT_BYTES)));
        assert!(req.encode_context().is_err());
    }

    #[test]
    fn sanitized_500_has_no_detail() {
        let resp = Response::internal_error(None);
        assert_eq!(resp.status, 500);
        assert_eq!(resp.body, b"internal error");

        let dev = Response::internal_error(Some("handler.js:3 boom"));
        assert!(String::from_utf8(dev.body).unwrap().contains("handler.js:3"));
    }
}
