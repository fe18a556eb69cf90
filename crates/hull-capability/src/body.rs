// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bounded request-body buffering and multipart parsing.
//!
//! Bodies are buffered up front against the per-request cap; multipart
//! parts are carved out of the same buffer, each part's size counting
//! against the same total.

use hull_core::{CapError, CapResult, MAX_BODY_BYTES};
use std::io::Read;

/// One decoded multipart part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    /// The form field name.
    pub field: String,
    /// Original filename, when the part carried one.
    pub filename: Option<String>,
    /// Declared content type, when present.
    pub content_type: Option<String>,
    /// Raw part bytes.
    pub bytes: Vec<u8>,
}

/// Read at most `cap` bytes from `reader`, failing on overflow.
///
/// # Errors
///
/// `Invalid` when the source holds more than `cap` bytes, `IoFailure` on
/// read errors.
pub fn buffer_body(reader: &mut impl Read, cap: usize) -> CapResult<Vec<u8>> {
    let mut buf = Vec::new();
    let mut limited = reader.take(cap as u64 + 1);
    limited
        .read_to_end(&mut buf)
        .map_err(|e| CapError::IoFailure(format!("reading body: {e}")))?;
    if buf.len() > cap {
        return Err(CapError::Invalid(format!(
            "body exceeds the {cap}-byte cap"
        )));
    }
    Ok(buf)
}

/// Convenience wrapper around [`buffer_body`] with the platform cap.
pub fn buffer_request_body(reader: &mut impl Read) -> CapResult<Vec<u8>> {
    buffer_body(reader, MAX_BODY_BYTES)
}

/// Parse a `multipart/form-data` body.
///
/// # Errors
///
/// `Invalid` for a missing or malformed boundary, malformed part headers,
/// or parts that overflow the total cap.
pub fn parse_multipart(content_type: &str, body: &[u8]) -> CapResult<Vec<Part>> {
    if body.len() > MAX_BODY_BYTES {
        return Err(CapError::Invalid(format!(
            "body exceeds the {MAX_BODY_BYTES}-byte cap"
        )));
    }
    let boundary = extract_boundary(content_type)?;
    let delimiter = format!("--{boundary}");

    let mut parts = Vec::new();
    let mut total = 0usize;
    let mut rest = body;

    // Skip the preamble up to the first delimiter.
    rest = match find(rest, delimiter.as_bytes()) {
        Some(pos) => &rest[pos + delimiter.len()..],
        None => return Err(CapError::Invalid("multipart boundary not found".into())),
    };

    loop {
        // A delimiter followed by "--" closes the body.
        if rest.starts_with(b"--") {
            break;
        }
        rest = strip_crlf(rest);

        let header_end = find(rest, b"\r\n\r\n")
            .ok_or_else(|| CapError::Invalid("part headers not terminated".into()))?;
        let headers = parse_part_headers(&rest[..header_end])?;
        rest = &rest[header_end + 4..];

        let next = find(rest, delimiter.as_bytes())
            .ok_or_else(|| CapError::Invalid("unterminated multipart part".into()))?;
        // Part content ends just before the CRLF preceding the delimiter.
        let mut content = &rest[..next];
        if content.ends_with(b"\r\n") {
            content = &content[..content.len() - 2];
        }

        total += content.len();
        if total > MAX_BODY_BYTES {
            return Err(CapError::Invalid(format!(
                "multipart parts exceed the {MAX_BODY_BYTES}-byte cap"
            )));
        }

        parts.push(Part {
            field: headers.field,
            filename: headers.filename,
            content_type: headers.content_type,
            bytes: content.to_vec(),
        });

        rest = &rest[next + delimiter.len()..];
    }

    Ok(parts)
}

/// Multipart parsing over JSON-marshaled request fields, for the
/// scripting bridges: `body` arrives as the wire-shape byte array (or a
/// plain string), parts come back as JSON records with lossy-UTF-8 text.
pub fn parse_multipart_value(
    content_type: &str,
    body: &serde_json::Value,
) -> CapResult<serde_json::Value> {
    let bytes = match body {
        serde_json::Value::String(s) => s.as_bytes().to_vec(),
        serde_json::Value::Array(xs) => xs
            .iter()
            .map(|v| {
                v.as_u64()
                    .and_then(|n| u8::try_from(n).ok())
                    .ok_or_else(|| CapError::Invalid("body array holds non-bytes".into()))
            })
            .collect::<CapResult<Vec<u8>>>()?,
        other => {
            return Err(CapError::Invalid(format!(
                "body must be bytes or text, got {other}"
            )));
        }
    };
    let parts = parse_multipart(content_type, &bytes)?;
    Ok(serde_json::Value::Array(
        parts
            .into_iter()
            .map(|part| {
                serde_json::json!({
                    "field": part.field,
                    "filename": part.filename,
                    "content_type": part.content_type,
                    "text": String::from_utf8_lossy(&part.bytes).into_owned(),
                })
            })
            .collect(),
    ))
}

struct PartHeaders {
    field: String,
    filename: Option<String>,
    content_type: Option<String>,
}

fn parse_part_headers(raw: &[u8]) -> CapResult<PartHeaders> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| CapError::Invalid("part headers are not UTF-8".into()))?;

    let mut field = None;
    let mut filename = None;
    let mut content_type = None;

    for line in text.split("\r\n").filter(|l| !l.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| CapError::Invalid(format!("malformed part header: {line}")))?;
        match name.trim().to_ascii_lowercase().as_str() {
            "content-disposition" => {
                for piece in value.split(';').map(str::trim) {
                    if let Some(v) = piece.strip_prefix("name=") {
                        field = Some(unquote(v));
                    } else if let Some(v) = piece.strip_prefix("filename=") {
                        filename = Some(unquote(v));
                    }
                }
            }
            "content-type" => content_type = Some(value.trim().to_string()),
            _ => {}
        }
    }

    Ok(PartHeaders {
        field: field.ok_or_else(|| CapError::Invalid("part has no field name".into()))?,
        filename,
        content_type,
    })
}

fn extract_boundary(content_type: &str) -> CapResult<&str> {
    let (kind, rest) = content_type
        .split_once(';')
        .ok_or_else(|| CapError::Invalid("content type has no boundary".into()))?;
    if !kind.trim().eq_ignore_ascii_case("multipart/form-data") {
        return Err(CapError::Invalid(format!(
            "not multipart/form-data: {kind}"
        )));
    }
    rest.split(';')
        .map(str::trim)
        .find_map(|p| p.strip_prefix("boundary="))
        .map(|b| b.trim_matches('"'))
        .filter(|b| !b.is_empty())
        .ok_or_else(|| CapError::Invalid("empty multipart boundary".into()))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn strip_crlf(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(b"\r\n").unwrap_or(bytes)
}

fn unquote(value: &str) -> String {
    value.trim_matches('"').to_string()
}
