// SPDX-License-Identifier: MIT OR Apache-2.0
//! The JavaScript backend.
//!
//! Hardening happens at init: `eval` and the `Function` constructor are
//! deleted from the global scope in serve mode, the engine's runtime
//! limits provide the per-request instruction budget and stack caps, and
//! the only way to reach the host is the flat `__hull_*` bindings the
//! prelude assembles into the `hull` namespace. Tool mode keeps the
//! globals; it never serves requests.
//!
//! The engine accepts plain function pointers without traced captures,
//! so the bridge state lives in a thread local scoped to this runtime;
//! the dispatcher thread owns exactly one runtime at a time.

use crate::{
    Runtime, RuntimeConfig, RuntimeError, RuntimeKind, RouteSink, response_from_value, stdlib,
};
use boa_engine::object::builtins::JsFunction;
use boa_engine::{Context, JsError, JsNativeError, JsResult, JsValue, NativeFunction, Source};
use hull_capability::Caps;
use hull_core::{Method, Request, Response, RoutePattern, RouteSpec};
use hull_manifest::{DeclarationSlot, Manifest};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::debug;

thread_local! {
    static ACTIVE: RefCell<Option<Rc<RefCell<Shared>>>> = const { RefCell::new(None) };
}

struct Shared {
    routes: Vec<RouteSpec>,
    middleware: Vec<hull_core::MiddlewareSpec>,
    handlers: Vec<JsFunction>,
    manifest_slot: DeclarationSlot,
    caps: Option<Rc<RefCell<Caps>>>,
}

/// The JavaScript backend.
pub struct JsRuntime {
    context: Context<'static>,
    shared: Rc<RefCell<Shared>>,
}

impl JsRuntime {
    /// Create the engine, apply hardening and limits, and evaluate the
    /// prelude.
    ///
    /// # Panics
    ///
    /// Never; engine setup failures are deferred to [`Runtime::load_app`]
    /// as load errors. (Registration of host bindings cannot fail on a
    /// fresh context.)
    #[must_use]
    pub fn new(config: &RuntimeConfig) -> Self {
        let mut context = Context::default();
        context
            .runtime_limits_mut()
            .set_loop_iteration_limit(config.instruction_budget);
        context.runtime_limits_mut().set_recursion_limit(512);

        let shared = Rc::new(RefCell::new(Shared {
            routes: Vec::new(),
            middleware: Vec::new(),
            handlers: Vec::new(),
            manifest_slot: DeclarationSlot::new(),
            caps: None,
        }));

        register_host_bindings(&mut context);

        let mut runtime = Self { context, shared };
        runtime.with_active(|ctx| {
            if !config.tool_mode {
                // eval and the Function constructor are removed from the
                // global; the capability layer, not the engine, is the
                // security boundary.
                let _ = ctx.eval(Source::from_bytes(
                    "delete globalThis.eval; delete globalThis.Function;",
                ));
            }
            let _ = ctx.eval(Source::from_bytes(stdlib::PRELUDE));
        });
        runtime
    }

    fn with_active<R>(&mut self, f: impl FnOnce(&mut Context<'static>) -> R) -> R {
        ACTIVE.with(|slot| *slot.borrow_mut() = Some(self.shared.clone()));
        let result = f(&mut self.context);
        ACTIVE.with(|slot| *slot.borrow_mut() = None);
        result
    }
}

impl Runtime for JsRuntime {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Js
    }

    fn load_app(&mut self, source: &str) -> Result<(), RuntimeError> {
        let src = source.to_owned();
        let result = self.with_active(|ctx| {
            let outcome = ctx.eval(Source::from_bytes(&src));
            ctx.run_jobs();
            outcome
        });
        match result {
            Ok(_) => {
                debug!(routes = self.shared.borrow().routes.len(), "js app loaded");
                Ok(())
            }
            Err(err) => Err(RuntimeError::Load(err.to_string())),
        }
    }

    fn extract_manifest(&mut self) -> Result<Option<Manifest>, RuntimeError> {
        Ok(self.shared.borrow().manifest_slot.get().cloned())
    }

    fn install_caps(&mut self, caps: Rc<RefCell<Caps>>) {
        self.shared.borrow_mut().caps = Some(caps);
    }

    fn wire_routes(&self, sink: &mut dyn RouteSink) {
        for route in &self.shared.borrow().routes {
            sink.register(route);
        }
    }

    fn middleware(&self) -> Vec<hull_core::MiddlewareSpec> {
        self.shared.borrow().middleware.clone()
    }

    fn dispatch(&mut self, handler_ref: u32, request: &Request) -> Result<Response, RuntimeError> {
        let handler = self
            .shared
            .borrow()
            .handlers
            .get(handler_ref as usize)
            .cloned()
            .ok_or_else(|| RuntimeError::Internal(format!("no handler {handler_ref}")))?;
        let request_value =
            serde_json::to_value(request).map_err(|e| RuntimeError::Internal(e.to_string()))?;

        let result = self.with_active(|ctx| {
            let arg = JsValue::from_json(&request_value, ctx)
                .map_err(|e| RuntimeError::Internal(e.to_string()))?;
            let outcome = handler.call(&JsValue::undefined(), &[arg], ctx);
            // Microtasks drain per request: nothing scheduled by this
            // handler survives into the next dispatch.
            ctx.run_jobs();
            match outcome {
                Ok(value) => {
                    if value.is_undefined() || value.is_null() {
                        return Err(RuntimeError::Dispatch(
                            "handler returned nothing".into(),
                        ));
                    }
                    value
                        .to_json(ctx)
                        .map_err(|e| RuntimeError::Dispatch(e.to_string()))
                }
                Err(err) => Err(classify(&err)),
            }
        })?;
        response_from_value(result)
    }
}

// Engine limit errors come back as runtime-limit natives; everything else
// is an ordinary script failure.
fn classify(err: &JsError) -> RuntimeError {
    let text = err.to_string();
    if text.contains("limit") {
        RuntimeError::ResourceExhausted(text)
    } else {
        RuntimeError::Dispatch(text)
    }
}

// ---------------------------------------------------------------------------
// Host bindings
// ---------------------------------------------------------------------------

type HostFnPtr =
    for<'a, 'b, 'c, 'h> fn(&'a JsValue, &'b [JsValue], &'c mut Context<'h>) -> JsResult<JsValue>;

fn register_host_bindings(context: &mut Context<'_>) {
    let bindings: [(&str, usize, HostFnPtr); 24] = [
        ("__hull_log", 1, host_log),
        ("__hull_manifest", 1, host_manifest),
        ("__hull_route", 3, host_route),
        ("__hull_middleware", 3, host_middleware),
        ("__hull_require", 1, host_require),
        ("__hull_db_query", 2, host_db_query),
        ("__hull_db_exec", 2, host_db_exec),
        ("__hull_db_begin", 0, host_db_begin),
        ("__hull_db_commit", 0, host_db_commit),
        ("__hull_db_rollback", 0, host_db_rollback),
        ("__hull_fs_read", 1, host_fs_read),
        ("__hull_fs_write", 2, host_fs_write),
        ("__hull_fs_exists", 1, host_fs_exists),
        ("__hull_fs_list", 1, host_fs_list),
        ("__hull_fs_delete", 1, host_fs_delete),
        ("__hull_env_get", 1, host_env_get),
        ("__hull_multipart", 2, host_multipart),
        ("__hull_http_request", 1, host_http_request),
        ("__hull_time_now", 0, host_time_now),
        ("__hull_time_mono", 0, host_time_mono),
        ("__hull_time_format", 2, host_time_format),
        ("__hull_sha256_hex", 1, host_sha256_hex),
        ("__hull_random_id", 0, host_random_id),
        ("__hull_b64url_encode", 1, host_b64url_encode),
    ];
    for (name, length, body) in bindings {
        context
            .register_global_callable(name, length, NativeFunction::from_fn_ptr(body))
            .expect("fresh context accepts global registration");
    }
    // Registered separately to keep the array a fixed-size literal.
    context
        .register_global_callable(
            "__hull_b64url_decode",
            1,
            NativeFunction::from_fn_ptr(host_b64url_decode),
        )
        .expect("fresh context accepts global registration");
}

fn with_shared<R>(f: impl FnOnce(&mut Shared) -> R) -> JsResult<R> {
    ACTIVE.with(|slot| {
        let slot = slot.borrow();
        let shared = slot.as_ref().ok_or_else(|| {
            JsError::from(JsNativeError::error().with_message("no active hull runtime"))
        })?;
        Ok(f(&mut shared.borrow_mut()))
    })
}

fn with_caps<R>(f: impl FnOnce(&mut Caps) -> R) -> JsResult<R> {
    let caps = with_shared(|shared| shared.caps.clone())?.ok_or_else(|| {
        JsError::from(
            JsNativeError::error().with_message("capabilities are not installed yet"),
        )
    })?;
    let mut caps = caps.borrow_mut();
    Ok(f(&mut caps))
}

fn json_arg(args: &[JsValue], index: usize, ctx: &mut Context<'_>) -> JsResult<Value> {
    match args.get(index) {
        None => Ok(Value::Null),
        Some(v) if v.is_undefined() => Ok(Value::Null),
        Some(v) => v.to_json(ctx),
    }
}

fn string_arg(args: &[JsValue], index: usize, ctx: &mut Context<'_>) -> JsResult<String> {
    match json_arg(args, index, ctx)? {
        Value::String(s) => Ok(s),
        other => Err(JsNativeError::typ()
            .with_message(format!("expected string argument, got {other}"))
            .into()),
    }
}

fn params_arg(args: &[JsValue], index: usize, ctx: &mut Context<'_>) -> JsResult<Vec<Value>> {
    match json_arg(args, index, ctx)? {
        Value::Null => Ok(Vec::new()),
        Value::Array(xs) => Ok(xs),
        other => Err(JsNativeError::typ()
            .with_message(format!("expected parameter array, got {other}"))
            .into()),
    }
}

fn cap_err(err: hull_core::CapError) -> JsError {
    JsNativeError::error()
        .with_message(format!("{}: {err}", err.code()))
        .into()
}

fn json_out(value: Value, ctx: &mut Context<'_>) -> JsResult<JsValue> {
    JsValue::from_json(&value, ctx)
}

fn host_log(_this: &JsValue, args: &[JsValue], ctx: &mut Context<'_>) -> JsResult<JsValue> {
    let message = string_arg(args, 0, ctx).unwrap_or_else(|_| "<non-string>".into());
    debug!(target: "hull::app", %message);
    Ok(JsValue::undefined())
}

fn host_manifest(_this: &JsValue, args: &[JsValue], ctx: &mut Context<'_>) -> JsResult<JsValue> {
    let raw: Manifest = serde_json::from_value(json_arg(args, 0, ctx)?)
        .map_err(|e| JsNativeError::typ().with_message(format!("bad manifest shape: {e}")))?;
    with_shared(|shared| shared.manifest_slot.declare(raw))?
        .map_err(|e| JsNativeError::error().with_message(e.to_string()))?;
    Ok(JsValue::undefined())
}

fn host_route(_this: &JsValue, args: &[JsValue], ctx: &mut Context<'_>) -> JsResult<JsValue> {
    let method: Method = string_arg(args, 0, ctx)?
        .parse()
        .map_err(|e: String| JsNativeError::typ().with_message(e))?;
    let pattern = RoutePattern::parse(&string_arg(args, 1, ctx)?)
        .map_err(|e| JsNativeError::typ().with_message(e.to_string()))?;
    let handler = args
        .get(2)
        .and_then(|v| v.as_object())
        .and_then(|o| JsFunction::from_object(o.clone()))
        .ok_or_else(|| JsNativeError::typ().with_message("route handler must be a function"))?;

    with_shared(|shared| {
        let handler_ref = u32::try_from(shared.handlers.len()).unwrap_or(u32::MAX);
        shared.handlers.push(handler);
        shared.routes.push(RouteSpec {
            method,
            pattern,
            handler_ref,
        });
    })?;
    Ok(JsValue::undefined())
}

fn host_middleware(_this: &JsValue, args: &[JsValue], ctx: &mut Context<'_>) -> JsResult<JsValue> {
    let method = match json_arg(args, 0, ctx)? {
        Value::Null => None,
        Value::String(m) => Some(
            m.parse::<Method>()
                .map_err(|e| JsNativeError::typ().with_message(e))?,
        ),
        other => {
            return Err(JsNativeError::typ()
                .with_message(format!("method filter must be a string or null, got {other}"))
                .into());
        }
    };
    let prefix = string_arg(args, 1, ctx)?;
    let handler = args
        .get(2)
        .and_then(|v| v.as_object())
        .and_then(|o| JsFunction::from_object(o.clone()))
        .ok_or_else(|| {
            JsNativeError::typ().with_message("middleware handler must be a function")
        })?;

    with_shared(|shared| {
        let handler_ref = u32::try_from(shared.handlers.len()).unwrap_or(u32::MAX);
        shared.handlers.push(handler);
        shared.middleware.push(hull_core::MiddlewareSpec {
            method,
            prefix,
            handler_ref,
        });
    })?;
    Ok(JsValue::undefined())
}

fn host_require(_this: &JsValue, args: &[JsValue], ctx: &mut Context<'_>) -> JsResult<JsValue> {
    let name = string_arg(args, 0, ctx)?;
    // The embedded registry is consulted first and there is no second
    // place to look.
    let source = stdlib::resolve(&name).ok_or_else(|| {
        JsError::from(JsNativeError::error().with_message(format!("unknown module '{name}'")))
    })?;
    let wrapped = format!("(function () {{ const exports = {{}};\n{source}\nreturn exports; }})()");
    ctx.eval(Source::from_bytes(&wrapped))
}

fn host_db_query(_this: &JsValue, args: &[JsValue], ctx: &mut Context<'_>) -> JsResult<JsValue> {
    let sql = string_arg(args, 0, ctx)?;
    let params = params_arg(args, 1, ctx)?;
    let rows = with_caps(|caps| caps.db.query(&sql, &params))?.map_err(cap_err)?;
    json_out(serde_json::json!(rows), ctx)
}

fn host_db_exec(_this: &JsValue, args: &[JsValue], ctx: &mut Context<'_>) -> JsResult<JsValue> {
    let sql = string_arg(args, 0, ctx)?;
    let params = params_arg(args, 1, ctx)?;
    let affected = with_caps(|caps| caps.db.exec(&sql, &params))?.map_err(cap_err)?;
    json_out(serde_json::json!(affected), ctx)
}

fn host_db_begin(_this: &JsValue, _args: &[JsValue], _ctx: &mut Context<'_>) -> JsResult<JsValue> {
    with_caps(|caps| caps.db.begin())?.map_err(cap_err)?;
    Ok(JsValue::undefined())
}

fn host_db_commit(_this: &JsValue, _args: &[JsValue], _ctx: &mut Context<'_>) -> JsResult<JsValue> {
    with_caps(|caps| caps.db.commit())?.map_err(cap_err)?;
    Ok(JsValue::undefined())
}

fn host_db_rollback(
    _this: &JsValue,
    _args: &[JsValue],
    _ctx: &mut Context<'_>,
) -> JsResult<JsValue> {
    with_caps(|caps| caps.db.rollback())?.map_err(cap_err)?;
    Ok(JsValue::undefined())
}

fn host_fs_read(_this: &JsValue, args: &[JsValue], ctx: &mut Context<'_>) -> JsResult<JsValue> {
    let path = string_arg(args, 0, ctx)?;
    let bytes = with_caps(|caps| caps.fs.read(&path))?.map_err(cap_err)?;
    json_out(
        Value::String(String::from_utf8_lossy(&bytes).into_owned()),
        ctx,
    )
}

fn host_fs_write(_this: &JsValue, args: &[JsValue], ctx: &mut Context<'_>) -> JsResult<JsValue> {
    let path = string_arg(args, 0, ctx)?;
    let text = string_arg(args, 1, ctx)?;
    with_caps(|caps| caps.fs.write(&path, text.as_bytes()))?.map_err(cap_err)?;
    Ok(JsValue::undefined())
}

fn host_fs_exists(_this: &JsValue, args: &[JsValue], ctx: &mut Context<'_>) -> JsResult<JsValue> {
    let path = string_arg(args, 0, ctx)?;
    let exists = with_caps(|caps| caps.fs.exists(&path))?.map_err(cap_err)?;
    Ok(JsValue::from(exists))
}

fn host_fs_list(_this: &JsValue, args: &[JsValue], ctx: &mut Context<'_>) -> JsResult<JsValue> {
    let path = string_arg(args, 0, ctx)?;
    let names = with_caps(|caps| caps.fs.list(&path))?.map_err(cap_err)?;
    json_out(serde_json::json!(names), ctx)
}

fn host_fs_delete(_this: &JsValue, args: &[JsValue], ctx: &mut Context<'_>) -> JsResult<JsValue> {
    let path = string_arg(args, 0, ctx)?;
    with_caps(|caps| caps.fs.delete(&path))?.map_err(cap_err)?;
    Ok(JsValue::undefined())
}

fn host_env_get(_this: &JsValue, args: &[JsValue], ctx: &mut Context<'_>) -> JsResult<JsValue> {
    let name = string_arg(args, 0, ctx)?;
    let value = with_caps(|caps| caps.env.get(&name))?;
    Ok(match value {
        Some(v) => JsValue::from_json(&Value::String(v), ctx)?,
        None => JsValue::null(),
    })
}

fn host_multipart(_this: &JsValue, args: &[JsValue], ctx: &mut Context<'_>) -> JsResult<JsValue> {
    let content_type = string_arg(args, 0, ctx)?;
    let body = json_arg(args, 1, ctx)?;
    let parts = hull_capability::body::parse_multipart_value(&content_type, &body)
        .map_err(cap_err)?;
    json_out(parts, ctx)
}

fn host_http_request(_this: &JsValue, args: &[JsValue], ctx: &mut Context<'_>) -> JsResult<JsValue> {
    let spec = json_arg(args, 0, ctx)?;
    let method = spec["method"].as_str().unwrap_or("GET").to_string();
    let url = spec["url"]
        .as_str()
        .ok_or_else(|| JsNativeError::typ().with_message("http request needs a url"))?
        .to_string();
    let mut headers = BTreeMap::new();
    if let Value::Object(hs) = &spec["headers"] {
        for (k, v) in hs {
            if let Value::String(v) = v {
                headers.insert(k.clone(), v.clone());
            }
        }
    }
    let body = spec["body"].as_str().map(|s| s.as_bytes().to_vec());
    let response =
        with_caps(|caps| caps.http.request(&method, &url, &headers, body))?.map_err(cap_err)?;
    json_out(response.to_value(), ctx)
}

fn host_time_now(_this: &JsValue, _args: &[JsValue], ctx: &mut Context<'_>) -> JsResult<JsValue> {
    let now = with_caps(|caps| caps.clock.now_unix_ms())?;
    json_out(serde_json::json!(now), ctx)
}

fn host_time_mono(_this: &JsValue, _args: &[JsValue], ctx: &mut Context<'_>) -> JsResult<JsValue> {
    let mono = with_caps(|caps| caps.clock.monotonic_ms())?;
    json_out(serde_json::json!(mono), ctx)
}

fn host_time_format(_this: &JsValue, args: &[JsValue], ctx: &mut Context<'_>) -> JsResult<JsValue> {
    let ms = match json_arg(args, 0, ctx)? {
        Value::Number(n) => n.as_i64().unwrap_or_default(),
        other => {
            return Err(JsNativeError::typ()
                .with_message(format!("expected millisecond timestamp, got {other}"))
                .into());
        }
    };
    let fmt = string_arg(args, 1, ctx)?;
    let text = with_caps(|caps| caps.clock.format_utc(ms, &fmt))?.map_err(cap_err)?;
    json_out(Value::String(text), ctx)
}

fn host_sha256_hex(_this: &JsValue, args: &[JsValue], ctx: &mut Context<'_>) -> JsResult<JsValue> {
    let text = string_arg(args, 0, ctx)?;
    let digest = hex::encode(hull_capability::crypto::sha256(text.as_bytes()));
    json_out(Value::String(digest), ctx)
}

fn host_random_id(_this: &JsValue, _args: &[JsValue], ctx: &mut Context<'_>) -> JsResult<JsValue> {
    json_out(Value::String(hull_capability::crypto::new_id()), ctx)
}

fn host_b64url_encode(
    _this: &JsValue,
    args: &[JsValue],
    ctx: &mut Context<'_>,
) -> JsResult<JsValue> {
    let text = string_arg(args, 0, ctx)?;
    json_out(
        Value::String(hull_capability::crypto::b64url_encode(text.as_bytes())),
        ctx,
    )
}

fn host_b64url_decode(
    _this: &JsValue,
    args: &[JsValue],
    ctx: &mut Context<'_>,
) -> JsResult<JsValue> {
    let text = string_arg(args, 0, ctx)?;
    let bytes = hull_capability::crypto::b64url_decode(&text).map_err(cap_err)?;
    json_out(
        Value::String(String::from_utf8_lossy(&bytes).into_owned()),
        ctx,
    )
}
