// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// The JavaScript backend.
pub mod js;
/// The embedded stdlib module registry.
pub mod stdlib;
/// The register-based bytecode backend.
pub mod vm;

use hull_capability::Caps;
use hull_core::{DEFAULT_INSTRUCTION_BUDGET, DEFAULT_VM_HEAP_BYTES, Request, Response, RouteSpec};
use hull_manifest::Manifest;
use std::cell::RefCell;
use std::rc::Rc;
use thiserror::Error;

/// Which backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeKind {
    /// Register-based bytecode interpreter.
    Vm,
    /// JavaScript engine.
    Js,
}

impl std::str::FromStr for RuntimeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vm" => Ok(Self::Vm),
            "js" => Ok(Self::Js),
            other => Err(format!("unknown runtime '{other}' (expected vm or js)")),
        }
    }
}

/// Backend construction knobs.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Per-request instruction budget (JS backend).
    pub instruction_budget: u64,
    /// Hard heap cap in bytes (VM backend).
    pub heap_cap_bytes: usize,
    /// Tool mode skips the sandboxed-globals hardening.
    pub tool_mode: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            instruction_budget: DEFAULT_INSTRUCTION_BUDGET,
            heap_cap_bytes: DEFAULT_VM_HEAP_BYTES,
            tool_mode: false,
        }
    }
}

/// Failures surfaced by a backend.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The entry unit failed to parse or evaluate.
    #[error("load: {0}")]
    Load(String),
    /// A handler raised or returned something unusable.
    #[error("dispatch: {0}")]
    Dispatch(String),
    /// The gas meter fired (instructions, heap, or stack).
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    /// A bug on the host side of the bridge.
    #[error("internal: {0}")]
    Internal(String),
}

/// Consumer of wired routes; implemented by the transport bridge.
pub trait RouteSink {
    /// Accept one route registration.
    fn register(&mut self, route: &RouteSpec);
}

impl<F: FnMut(&RouteSpec)> RouteSink for F {
    fn register(&mut self, route: &RouteSpec) {
        self(route);
    }
}

/// The polymorphic backend contract.
///
/// Lifecycle: construct (init) → [`load_app`](Runtime::load_app) →
/// [`extract_manifest`](Runtime::extract_manifest) →
/// [`install_caps`](Runtime::install_caps) →
/// [`wire_routes`](Runtime::wire_routes) → dispatch loop → drop (destroy).
/// Manifest strings are owned copies; nothing borrows VM memory past the
/// extraction call.
pub trait Runtime {
    /// Which backend this is.
    fn kind(&self) -> RuntimeKind;

    /// Parse and evaluate the entry unit. The app registers its routes
    /// and declares its manifest during this call.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Load`] with engine detail.
    fn load_app(&mut self, source: &str) -> Result<(), RuntimeError>;

    /// Copy the declared manifest out of the runtime.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Load`] if the declaration itself was invalid.
    fn extract_manifest(&mut self) -> Result<Option<Manifest>, RuntimeError>;

    /// Hand the backend its capability table. Called after the manifest
    /// is extracted and before the first dispatch.
    fn install_caps(&mut self, caps: Rc<RefCell<Caps>>);

    /// Walk registered routes into the transport bridge.
    fn wire_routes(&self, sink: &mut dyn RouteSink);

    /// Registered middleware, in declaration order.
    fn middleware(&self) -> Vec<hull_core::MiddlewareSpec>;

    /// Run one request to completion through the handler the route was
    /// registered with (`handler_ref` comes from the matched
    /// [`RouteSpec`]).
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Dispatch`] for script failures,
    /// [`RuntimeError::ResourceExhausted`] when a cap fired. The server
    /// turns either into a sanitized 500 and keeps serving.
    fn dispatch(&mut self, handler_ref: u32, request: &Request) -> Result<Response, RuntimeError>;
}

/// Construct the selected backend.
#[must_use]
pub fn select(kind: RuntimeKind, config: &RuntimeConfig) -> Box<dyn Runtime> {
    match kind {
        RuntimeKind::Vm => Box::new(vm::VmRuntime::new(config)),
        RuntimeKind::Js => Box::new(js::JsRuntime::new(config)),
    }
}

/// Interpret a handler's returned JSON value as a [`Response`].
///
/// Handlers may return a plain string (a 200 text response) or a mapping
/// with `status`, `headers`, and `body`/`json` fields. Anything else is a
/// dispatch error; both backends share this mapping so behavior cannot
/// drift between them.
pub(crate) fn response_from_value(value: serde_json::Value) -> Result<Response, RuntimeError> {
    use serde_json::Value;
    match value {
        Value::String(text) => Ok(Response::text(200, text)),
        Value::Object(map) => {
            let status = match map.get("status") {
                None => 200,
                Some(Value::Number(n)) => n
                    .as_u64()
                    .and_then(|s| u16::try_from(s).ok())
                    .ok_or_else(|| RuntimeError::Dispatch("bad status".into()))?,
                Some(other) => {
                    return Err(RuntimeError::Dispatch(format!(
                        "status must be a number, got {other}"
                    )));
                }
            };
            let mut response = if let Some(json) = map.get("json") {
                Response::json(status, json)
            } else {
                match map.get("body") {
                    None => Response::status(status),
                    Some(Value::String(text)) => Response::text(status, text.clone()),
                    Some(other) => Response::json(status, other),
                }
            };
            if let Some(Value::Object(headers)) = map.get("headers") {
                for (name, value) in headers {
                    if let Value::String(v) = value {
                        response
                            .headers
                            .insert(name.to_ascii_lowercase(), v.clone());
                    }
                }
            }
            Ok(response)
        }
        other => Err(RuntimeError::Dispatch(format!(
            "handler returned {other}, expected string or object"
        ))),
    }
}
