// SPDX-License-Identifier: MIT OR Apache-2.0
//! The register-based bytecode backend.
//!
//! Programs are compiled elsewhere and shipped as a JSON chunk: a
//! constant pool plus a list of functions, each a flat instruction
//! sequence over a fixed register window. Evaluating the entry function
//! (index 0) is what registers routes and declares the manifest, through
//! host calls; there is no instruction that can reach the OS except
//! through the capability table.
//!
//! The only gas meter is the heap account: every allocating instruction
//! charges an estimate against the configured cap, and exhaustion
//! surfaces as a script error, never an abort.

use crate::{Runtime, RuntimeConfig, RuntimeError, RuntimeKind, RouteSink, response_from_value};
use hull_capability::Caps;
use hull_core::{Method, Request, Response, RoutePattern, RouteSpec};
use hull_manifest::{DeclarationSlot, Manifest};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::debug;

const MAX_CALL_DEPTH: usize = 64;

/// One instruction. Registers are frame-local; `offset` jumps are
/// relative to the next instruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    /// `dst = constants[index]`
    LoadConst {
        /// Destination register.
        dst: u8,
        /// Constant-pool index.
        index: u16,
    },
    /// `dst = src`
    Move {
        /// Destination register.
        dst: u8,
        /// Source register.
        src: u8,
    },
    /// `dst = a + b` (numbers) or concatenation (strings).
    Add {
        /// Destination register.
        dst: u8,
        /// Left operand register.
        a: u8,
        /// Right operand register.
        b: u8,
    },
    /// `dst = a - b`
    Sub {
        /// Destination register.
        dst: u8,
        /// Left operand register.
        a: u8,
        /// Right operand register.
        b: u8,
    },
    /// `dst = a == b` (deep equality).
    Eq {
        /// Destination register.
        dst: u8,
        /// Left operand register.
        a: u8,
        /// Right operand register.
        b: u8,
    },
    /// `dst = a < b` (numbers only).
    Lt {
        /// Destination register.
        dst: u8,
        /// Left operand register.
        a: u8,
        /// Right operand register.
        b: u8,
    },
    /// Skip `offset` instructions when `cond` is falsy.
    JumpIfFalse {
        /// Condition register.
        cond: u8,
        /// Relative offset from the next instruction.
        offset: i32,
    },
    /// Unconditional relative jump.
    Jump {
        /// Relative offset from the next instruction.
        offset: i32,
    },
    /// `dst = {}`
    NewMap {
        /// Destination register.
        dst: u8,
    },
    /// `map[key] = value` (key register must hold a string).
    MapSet {
        /// Map register.
        map: u8,
        /// Key register.
        key: u8,
        /// Value register.
        value: u8,
    },
    /// `dst = map[key]` (missing keys produce null).
    MapGet {
        /// Destination register.
        dst: u8,
        /// Map register.
        map: u8,
        /// Key register.
        key: u8,
    },
    /// `dst = []`
    NewList {
        /// Destination register.
        dst: u8,
    },
    /// Append `value` to the list in `list`.
    ListPush {
        /// List register.
        list: u8,
        /// Value register.
        value: u8,
    },
    /// Call another program function.
    Call {
        /// Destination register for the return value.
        dst: u8,
        /// Callee function index.
        func: u16,
        /// First argument register.
        args_start: u8,
        /// Argument count.
        args_len: u8,
    },
    /// Call a host capability.
    HostCall {
        /// Destination register for the result.
        dst: u8,
        /// Which host function.
        func: HostFn,
        /// First argument register.
        args_start: u8,
        /// Argument count.
        args_len: u8,
    },
    /// Return `src` to the caller.
    Return {
        /// Source register.
        src: u8,
    },
}

/// Host functions reachable from bytecode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum HostFn {
    Manifest,
    Route,
    Middleware,
    DbQuery,
    DbExec,
    DbBegin,
    DbCommit,
    DbRollback,
    FsRead,
    FsWrite,
    FsExists,
    FsList,
    FsDelete,
    EnvGet,
    MultipartParts,
    HttpRequest,
    TimeNowMs,
    TimeMonotonicMs,
    TimeFormat,
    Sha256Hex,
    RandomId,
    B64UrlEncode,
    B64UrlDecode,
    Log,
}

/// One program function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionChunk {
    /// Debug name.
    pub name: String,
    /// Register window size.
    pub registers: u8,
    /// Instruction sequence.
    pub code: Vec<Op>,
}

/// A complete program chunk as produced by the compiler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    /// Constant pool.
    pub constants: Vec<Value>,
    /// Functions; index 0 is the entry unit.
    pub functions: Vec<FunctionChunk>,
}

/// The register-VM backend.
pub struct VmRuntime {
    heap_cap: usize,
    program: Option<Program>,
    routes: Vec<RouteSpec>,
    middleware: Vec<hull_core::MiddlewareSpec>,
    manifest_slot: DeclarationSlot,
    caps: Option<Rc<RefCell<Caps>>>,
}

impl VmRuntime {
    /// Construct an empty VM with the configured heap cap.
    #[must_use]
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            heap_cap: config.heap_cap_bytes,
            program: None,
            routes: Vec::new(),
            middleware: Vec::new(),
            manifest_slot: DeclarationSlot::new(),
            caps: None,
        }
    }

    fn run_function(
        &mut self,
        func_index: usize,
        args: &[Value],
        heap: &mut HeapAccount,
        depth: usize,
    ) -> Result<Value, RuntimeError> {
        if depth > MAX_CALL_DEPTH {
            return Err(RuntimeError::Dispatch("call depth exceeded".into()));
        }
        let (registers, code) = {
            let program = self
                .program
                .as_ref()
                .ok_or_else(|| RuntimeError::Internal("no program loaded".into()))?;
            let function = program
                .functions
                .get(func_index)
                .ok_or_else(|| RuntimeError::Dispatch(format!("no function {func_index}")))?;
            (function.registers as usize, function.code.clone())
        };

        let mut regs = vec![Value::Null; registers.max(args.len())];
        regs[..args.len()].clone_from_slice(args);

        let mut pc = 0usize;
        while pc < code.len() {
            let op = &code[pc];
            pc += 1;
            match op {
                Op::LoadConst { dst, index } => {
                    let value = self
                        .program
                        .as_ref()
                        .and_then(|p| p.constants.get(*index as usize))
                        .cloned()
                        .ok_or_else(|| {
                            RuntimeError::Dispatch(format!("bad constant index {index}"))
                        })?;
                    heap.charge(&value)?;
                    set(&mut regs, *dst, value)?;
                }
                Op::Move { dst, src } => {
                    let value = get(&regs, *src)?.clone();
                    set(&mut regs, *dst, value)?;
                }
                Op::Add { dst, a, b } => {
                    let result = add_values(get(&regs, *a)?, get(&regs, *b)?)?;
                    heap.charge(&result)?;
                    set(&mut regs, *dst, result)?;
                }
                Op::Sub { dst, a, b } => {
                    let result = numeric(get(&regs, *a)?, get(&regs, *b)?, |x, y| x - y)?;
                    set(&mut regs, *dst, result)?;
                }
                Op::Eq { dst, a, b } => {
                    let result = Value::Bool(get(&regs, *a)? == get(&regs, *b)?);
                    set(&mut regs, *dst, result)?;
                }
                Op::Lt { dst, a, b } => {
                    let (x, y) = both_numbers(get(&regs, *a)?, get(&regs, *b)?)?;
                    set(&mut regs, *dst, Value::Bool(x < y))?;
                }
                Op::JumpIfFalse { cond, offset } => {
                    if !truthy(get(&regs, *cond)?) {
                        pc = jump(pc, *offset, code.len())?;
                    }
                }
                Op::Jump { offset } => {
                    pc = jump(pc, *offset, code.len())?;
                }
                Op::NewMap { dst } => {
                    heap.charge_bytes(32)?;
                    set(&mut regs, *dst, json!({}))?;
                }
                Op::MapSet { map, key, value } => {
                    let key = string_of(get(&regs, *key)?)?;
                    let value = get(&regs, *value)?.clone();
                    heap.charge(&value)?;
                    match regs.get_mut(*map as usize) {
                        Some(Value::Object(m)) => {
                            m.insert(key, value);
                        }
                        _ => return Err(RuntimeError::Dispatch("map_set on non-map".into())),
                    }
                }
                Op::MapGet { dst, map, key } => {
                    let key = string_of(get(&regs, *key)?)?;
                    let value = match get(&regs, *map)? {
                        Value::Object(m) => m.get(&key).cloned().unwrap_or(Value::Null),
                        _ => return Err(RuntimeError::Dispatch("map_get on non-map".into())),
                    };
                    set(&mut regs, *dst, value)?;
                }
                Op::NewList { dst } => {
                    heap.charge_bytes(32)?;
                    set(&mut regs, *dst, json!([]))?;
                }
                Op::ListPush { list, value } => {
                    let value = get(&regs, *value)?.clone();
                    heap.charge(&value)?;
                    match regs.get_mut(*list as usize) {
                        Some(Value::Array(xs)) => xs.push(value),
                        _ => return Err(RuntimeError::Dispatch("list_push on non-list".into())),
                    }
                }
                Op::Call {
                    dst,
                    func,
                    args_start,
                    args_len,
                } => {
                    let args = slice_args(&regs, *args_start, *args_len)?;
                    let result = self.run_function(*func as usize, &args, heap, depth + 1)?;
                    set(&mut regs, *dst, result)?;
                }
                Op::HostCall {
                    dst,
                    func,
                    args_start,
                    args_len,
                } => {
                    let args = slice_args(&regs, *args_start, *args_len)?;
                    let result = self.host_call(*func, &args)?;
                    heap.charge(&result)?;
                    set(&mut regs, *dst, result)?;
                }
                Op::Return { src } => {
                    return Ok(get(&regs, *src)?.clone());
                }
            }
        }
        Ok(Value::Null)
    }

    fn host_call(&mut self, func: HostFn, args: &[Value]) -> Result<Value, RuntimeError> {
        match func {
            HostFn::Manifest => {
                let raw: Manifest = serde_json::from_value(arg(args, 0)?.clone())
                    .map_err(|e| RuntimeError::Load(format!("bad manifest shape: {e}")))?;
                self.manifest_slot
                    .declare(raw)
                    .map_err(|e| RuntimeError::Load(e.to_string()))?;
                Ok(Value::Null)
            }
            HostFn::Route => {
                let method: Method = string_of(arg(args, 0)?)?
                    .parse()
                    .map_err(RuntimeError::Load)?;
                let pattern = RoutePattern::parse(&string_of(arg(args, 1)?)?)
                    .map_err(|e| RuntimeError::Load(e.to_string()))?;
                let handler = arg(args, 2)?
                    .as_u64()
                    .and_then(|i| u32::try_from(i).ok())
                    .ok_or_else(|| {
                        RuntimeError::Load("route handler must be a function index".into())
                    })?;
                self.routes.push(RouteSpec {
                    method,
                    pattern,
                    handler_ref: handler,
                });
                Ok(Value::Null)
            }
            HostFn::Middleware => {
                let method = match arg(args, 0)? {
                    Value::Null => None,
                    v => Some(
                        string_of(v)?
                            .parse::<Method>()
                            .map_err(RuntimeError::Load)?,
                    ),
                };
                let prefix = string_of(arg(args, 1)?)?;
                let handler = arg(args, 2)?
                    .as_u64()
                    .and_then(|i| u32::try_from(i).ok())
                    .ok_or_else(|| {
                        RuntimeError::Load("middleware handler must be a function index".into())
                    })?;
                self.middleware.push(hull_core::MiddlewareSpec {
                    method,
                    prefix,
                    handler_ref: handler,
                });
                Ok(Value::Null)
            }
            other => self.capability_call(other, args),
        }
    }

    fn capability_call(&mut self, func: HostFn, args: &[Value]) -> Result<Value, RuntimeError> {
        let caps = self
            .caps
            .as_ref()
            .ok_or_else(|| RuntimeError::Internal("capabilities not installed".into()))?
            .clone();
        let mut caps = caps.borrow_mut();
        let result = match func {
            HostFn::DbQuery => {
                let sql = string_of(arg(args, 0)?)?;
                let params = list_of(args.get(1));
                caps.db.query(&sql, &params).map(|rows| json!(rows))
            }
            HostFn::DbExec => {
                let sql = string_of(arg(args, 0)?)?;
                let params = list_of(args.get(1));
                caps.db.exec(&sql, &params).map(|n| json!(n))
            }
            HostFn::DbBegin => caps.db.begin().map(|()| Value::Null),
            HostFn::DbCommit => caps.db.commit().map(|()| Value::Null),
            HostFn::DbRollback => caps.db.rollback().map(|()| Value::Null),
            HostFn::FsRead => {
                let path = string_of(arg(args, 0)?)?;
                caps.fs.read(&path).map(|bytes| {
                    json!(String::from_utf8_lossy(&bytes).into_owned())
                })
            }
            HostFn::FsWrite => {
                let path = string_of(arg(args, 0)?)?;
                let text = string_of(arg(args, 1)?)?;
                caps.fs.write(&path, text.as_bytes()).map(|()| Value::Null)
            }
            HostFn::FsExists => {
                let path = string_of(arg(args, 0)?)?;
                caps.fs.exists(&path).map(|b| json!(b))
            }
            HostFn::FsList => {
                let path = string_of(arg(args, 0)?)?;
                caps.fs.list(&path).map(|names| json!(names))
            }
            HostFn::FsDelete => {
                let path = string_of(arg(args, 0)?)?;
                caps.fs.delete(&path).map(|()| Value::Null)
            }
            HostFn::EnvGet => {
                let name = string_of(arg(args, 0)?)?;
                Ok(caps.env.get(&name).map_or(Value::Null, Value::String))
            }
            HostFn::MultipartParts => {
                let content_type = string_of(arg(args, 0)?)?;
                hull_capability::body::parse_multipart_value(&content_type, arg(args, 1)?)
            }
            HostFn::HttpRequest => {
                let spec = arg(args, 0)?;
                let method = spec["method"].as_str().unwrap_or("GET").to_string();
                let url = spec["url"]
                    .as_str()
                    .ok_or_else(|| RuntimeError::Dispatch("http request needs url".into()))?
                    .to_string();
                let mut headers = std::collections::BTreeMap::new();
                if let Value::Object(hs) = &spec["headers"] {
                    for (k, v) in hs {
                        if let Value::String(v) = v {
                            headers.insert(k.clone(), v.clone());
                        }
                    }
                }
                let body = spec["body"].as_str().map(|s| s.as_bytes().to_vec());
                caps.http
                    .request(&method, &url, &headers, body)
                    .map(|resp| resp.to_value())
            }
            HostFn::TimeNowMs => Ok(json!(caps.clock.now_unix_ms())),
            HostFn::TimeMonotonicMs => Ok(json!(caps.clock.monotonic_ms())),
            HostFn::TimeFormat => {
                let ms = arg(args, 0)?
                    .as_i64()
                    .ok_or_else(|| RuntimeError::Dispatch("time_format needs ms".into()))?;
                let fmt = string_of(arg(args, 1)?)?;
                caps.clock.format_utc(ms, &fmt).map(Value::String)
            }
            HostFn::Sha256Hex => {
                let text = string_of(arg(args, 0)?)?;
                Ok(json!(hex::encode(hull_capability::crypto::sha256(
                    text.as_bytes()
                ))))
            }
            HostFn::RandomId => Ok(json!(hull_capability::crypto::new_id())),
            HostFn::B64UrlEncode => {
                let text = string_of(arg(args, 0)?)?;
                Ok(json!(hull_capability::crypto::b64url_encode(
                    text.as_bytes()
                )))
            }
            HostFn::B64UrlDecode => {
                let text = string_of(arg(args, 0)?)?;
                hull_capability::crypto::b64url_decode(&text)
                    .map(|bytes| json!(String::from_utf8_lossy(&bytes).into_owned()))
            }
            HostFn::Log => {
                debug!(target: "hull::app", message = %string_of(arg(args, 0)?)?);
                return Ok(Value::Null);
            }
            HostFn::Manifest | HostFn::Route | HostFn::Middleware => {
                unreachable!("handled in host_call")
            }
        };
        // Capability errors become script errors carrying the stable code.
        result.map_err(|e| RuntimeError::Dispatch(format!("{}: {e}", e.code())))
    }
}

impl Runtime for VmRuntime {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Vm
    }

    fn load_app(&mut self, source: &str) -> Result<(), RuntimeError> {
        let program: Program =
            serde_json::from_str(source).map_err(|e| RuntimeError::Load(e.to_string()))?;
        if program.functions.is_empty() {
            return Err(RuntimeError::Load("program has no entry function".into()));
        }
        self.program = Some(program);
        let mut heap = HeapAccount::new(self.heap_cap);
        self.run_function(0, &[], &mut heap, 0)?;
        debug!(routes = self.routes.len(), "vm app loaded");
        Ok(())
    }

    fn extract_manifest(&mut self) -> Result<Option<Manifest>, RuntimeError> {
        Ok(self.manifest_slot.get().cloned())
    }

    fn install_caps(&mut self, caps: Rc<RefCell<Caps>>) {
        self.caps = Some(caps);
    }

    fn wire_routes(&self, sink: &mut dyn RouteSink) {
        for route in &self.routes {
            sink.register(route);
        }
    }

    fn middleware(&self) -> Vec<hull_core::MiddlewareSpec> {
        self.middleware.clone()
    }

    fn dispatch(&mut self, handler_ref: u32, request: &Request) -> Result<Response, RuntimeError> {
        let request_value =
            serde_json::to_value(request).map_err(|e| RuntimeError::Internal(e.to_string()))?;
        let mut heap = HeapAccount::new(self.heap_cap);
        let result =
            self.run_function(handler_ref as usize, &[request_value], &mut heap, 0)?;
        response_from_value(result)
    }
}

// ---------------------------------------------------------------------------
// Heap accounting
// ---------------------------------------------------------------------------

struct HeapAccount {
    cap: usize,
    used: usize,
}

impl HeapAccount {
    fn new(cap: usize) -> Self {
        Self { cap, used: 0 }
    }

    fn charge(&mut self, value: &Value) -> Result<(), RuntimeError> {
        self.charge_bytes(estimate_size(value))
    }

    fn charge_bytes(&mut self, bytes: usize) -> Result<(), RuntimeError> {
        self.used = self.used.saturating_add(bytes);
        if self.used > self.cap {
            return Err(RuntimeError::ResourceExhausted(format!(
                "heap account exceeded {} bytes",
                self.cap
            )));
        }
        Ok(())
    }
}

// Rough per-value cost; precision matters less than monotonicity.
fn estimate_size(value: &Value) -> usize {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) => 16,
        Value::String(s) => 24 + s.len(),
        Value::Array(xs) => 32 + xs.iter().map(estimate_size).sum::<usize>(),
        Value::Object(map) => {
            32 + map
                .iter()
                .map(|(k, v)| 24 + k.len() + estimate_size(v))
                .sum::<usize>()
        }
    }
}

// ---------------------------------------------------------------------------
// Small helpers
// ---------------------------------------------------------------------------

fn get(regs: &[Value], index: u8) -> Result<&Value, RuntimeError> {
    regs.get(index as usize)
        .ok_or_else(|| RuntimeError::Dispatch(format!("register {index} out of window")))
}

fn set(regs: &mut [Value], index: u8, value: Value) -> Result<(), RuntimeError> {
    match regs.get_mut(index as usize) {
        Some(slot) => {
            *slot = value;
            Ok(())
        }
        None => Err(RuntimeError::Dispatch(format!(
            "register {index} out of window"
        ))),
    }
}

fn slice_args(regs: &[Value], start: u8, len: u8) -> Result<Vec<Value>, RuntimeError> {
    let start = start as usize;
    let end = start + len as usize;
    regs.get(start..end)
        .map(<[Value]>::to_vec)
        .ok_or_else(|| RuntimeError::Dispatch("argument window out of range".into()))
}

fn jump(pc: usize, offset: i32, len: usize) -> Result<usize, RuntimeError> {
    let target = i64::try_from(pc).unwrap_or(i64::MAX) + i64::from(offset);
    if target < 0 || target as usize > len {
        return Err(RuntimeError::Dispatch(format!("jump to {target} escapes code")));
    }
    Ok(target as usize)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => false,
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

fn string_of(value: &Value) -> Result<String, RuntimeError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| RuntimeError::Dispatch(format!("expected string, got {value}")))
}

fn list_of(value: Option<&Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(xs)) => xs.clone(),
        _ => Vec::new(),
    }
}

fn arg(args: &[Value], index: usize) -> Result<&Value, RuntimeError> {
    args.get(index)
        .ok_or_else(|| RuntimeError::Dispatch(format!("missing argument {index}")))
}

fn add_values(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Ok(Value::String(format!("{x}{y}"))),
        _ => numeric(a, b, |x, y| x + y),
    }
}

fn both_numbers(a: &Value, b: &Value) -> Result<(f64, f64), RuntimeError> {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => Ok((x, y)),
        _ => Err(RuntimeError::Dispatch(format!(
            "arithmetic on non-numbers: {a}, {b}"
        ))),
    }
}

fn numeric(
    a: &Value,
    b: &Value,
    f: impl FnOnce(f64, f64) -> f64,
) -> Result<Value, RuntimeError> {
    let (x, y) = both_numbers(a, b)?;
    let out = f(x, y);
    if out.fract() == 0.0 && out.abs() < 9e15 {
        Ok(json!(out as i64))
    } else {
        Ok(json!(out))
    }
}

#[cfg(test)]
mod tests;
