// SPDX-License-Identifier: MIT OR Apache-2.0
//! Egress HTTP client.
//!
//! The host label is extracted and checked against the manifest allowlist
//! before any DNS lookup or socket work; a denied host never produces
//! network traffic of any kind.

use hull_core::{CapError, CapResult};
use hull_manifest::Manifest;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Default end-to-end timeout for one egress request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// An egress response as handed back to scripted code.
#[derive(Debug, Clone)]
pub struct EgressResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers, names lower-cased.
    pub headers: BTreeMap<String, String>,
    /// Response body bytes.
    pub body: Vec<u8>,
}

impl EgressResponse {
    /// JSON shape marshaled into the runtime.
    #[must_use]
    pub fn to_value(&self) -> Value {
        use base64::Engine as _;
        serde_json::json!({
            "status": self.status,
            "headers": self.headers,
            "body": String::from_utf8(self.body.clone()).unwrap_or_else(|_| {
                base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&self.body)
            }),
        })
    }
}

/// Host-allowlisted egress client.
pub struct HttpCap {
    allow: Vec<String>,
    any_host: bool,
    enabled: bool,
    client: reqwest::blocking::Client,
}

impl HttpCap {
    /// Build from the declared manifest; absent or empty means all egress
    /// is denied.
    #[must_use]
    pub fn new(manifest: Option<&Manifest>) -> Self {
        let (allow, any_host) = match manifest {
            Some(m) => (m.hosts.clone(), m.allows_any_host()),
            None => (Vec::new(), false),
        };
        Self {
            allow,
            any_host,
            enabled: true,
            client: client(),
        }
    }

    /// A client that denies every request (tool mode).
    #[must_use]
    pub fn denied() -> Self {
        Self {
            allow: Vec::new(),
            any_host: false,
            enabled: false,
            client: client(),
        }
    }

    /// Perform one egress request.
    ///
    /// # Errors
    ///
    /// `Denied` before any connection when the host is not declared,
    /// `Invalid` for unparseable input, `IoFailure` for transport errors.
    pub fn request(
        &self,
        method: &str,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: Option<Vec<u8>>,
    ) -> CapResult<EgressResponse> {
        if !self.enabled {
            return Err(CapError::Denied("egress is disabled".into()));
        }
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| CapError::Invalid(format!("bad url '{url}': {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| CapError::Invalid(format!("url has no host: {url}")))?
            .to_string();
        self.check_host(&host)?;

        let method: reqwest::Method = method
            .to_ascii_uppercase()
            .parse()
            .map_err(|_| CapError::Invalid(format!("bad method: {method}")))?;

        let mut req = self.client.request(method, parsed);
        for (name, value) in headers {
            req = req.header(name, value);
        }
        if let Some(bytes) = body {
            req = req.body(bytes);
        }

        let resp = req
            .send()
            .map_err(|e| CapError::IoFailure(format!("egress to {host}: {e}")))?;

        let status = resp.status().as_u16();
        let mut out_headers = BTreeMap::new();
        for (name, value) in resp.headers() {
            if let Ok(v) = value.to_str() {
                out_headers.insert(name.as_str().to_ascii_lowercase(), v.to_string());
            }
        }
        let body = resp
            .bytes()
            .map_err(|e| CapError::IoFailure(format!("egress body: {e}")))?
            .to_vec();

        Ok(EgressResponse {
            status,
            headers: out_headers,
            body,
        })
    }

    // Case-insensitive exact match; no wildcards except the opt-in "*".
    fn check_host(&self, host: &str) -> CapResult<()> {
        if self.any_host {
            return Ok(());
        }
        let lowered = host.to_ascii_lowercase();
        if self.allow.iter().any(|allowed| *allowed == lowered) {
            return Ok(());
        }
        debug!(host, "egress host not declared");
        Err(CapError::Denied(format!("host not declared: {host}")))
    }
}

fn client() -> reqwest::blocking::Client {
    reqwest::blocking::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_default()
}
