// SPDX-License-Identifier: MIT OR Apache-2.0
//! The cooperative dispatcher loop.
//!
//! One thread, one loop: requests arrive over the job channel and run to
//! completion in the scripting VM, in arrival order. Scheduled work (the
//! session expiry sweep) fires only between dispatches. There is no
//! preemption anywhere; a handler that loops forever is stopped only by
//! its backend's gas meter.

use crate::session::SessionStore;
use hull_capability::Caps;
use hull_core::{MiddlewareSpec, Request, Response};
use hull_runtime::{Runtime, RuntimeError};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

const IDLE_TICK: Duration = Duration::from_millis(250);
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Work delivered to the dispatcher.
pub enum Job {
    /// One request to run to completion.
    Dispatch {
        /// Resolved handler token from the matched route.
        handler_ref: u32,
        /// The marshaled request.
        request: Request,
        /// Where the reply goes.
        reply: oneshot::Sender<Response>,
    },
    /// Stop the loop.
    Shutdown,
}

/// The dispatcher.
pub struct EventLoop {
    runtime: Box<dyn Runtime>,
    caps: Rc<RefCell<Caps>>,
    middleware: Vec<MiddlewareSpec>,
    sessions: SessionStore,
    dev_mode: bool,
    jobs: Receiver<Job>,
    last_sweep: Instant,
}

impl EventLoop {
    /// Assemble a loop around a loaded runtime and its capability table.
    #[must_use]
    pub fn new(
        runtime: Box<dyn Runtime>,
        caps: Rc<RefCell<Caps>>,
        middleware: Vec<MiddlewareSpec>,
        dev_mode: bool,
        jobs: Receiver<Job>,
    ) -> Self {
        Self {
            runtime,
            caps,
            middleware,
            sessions: SessionStore::default(),
            dev_mode,
            jobs,
            last_sweep: Instant::now(),
        }
    }

    /// Run until shutdown. Consumes the loop; the runtime is destroyed
    /// on the way out.
    pub fn run(mut self) {
        info!("dispatcher running");
        loop {
            match self.jobs.recv_timeout(IDLE_TICK) {
                Ok(Job::Dispatch {
                    handler_ref,
                    request,
                    reply,
                }) => {
                    let response = self.dispatch(handler_ref, request);
                    let _ = reply.send(response);
                    self.between_dispatches();
                }
                Ok(Job::Shutdown) => {
                    info!("dispatcher stopping");
                    break;
                }
                Err(RecvTimeoutError::Timeout) => self.between_dispatches(),
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("transport hung up; stopping");
                    break;
                }
            }
        }
    }

    /// Run one request through middleware and its handler.
    pub fn dispatch(&mut self, handler_ref: u32, mut request: Request) -> Response {
        let id = request.id;
        debug!(id, method = %request.method, path = %request.path, "dispatch");

        // Middleware first, in declaration order; each may short-circuit
        // or mutate the context the next one (and the handler) sees.
        let middleware: Vec<MiddlewareSpec> = self
            .middleware
            .iter()
            .filter(|mw| mw.applies_to(request.method, &request.path))
            .cloned()
            .collect();
        for mw in middleware {
            match self.call(mw.handler_ref, &request) {
                Ok(outcome) => match apply_middleware_outcome(&mut request, outcome) {
                    MiddlewareFlow::Continue => {}
                    MiddlewareFlow::Respond(response) => return response,
                },
                Err(err) => {
                    self.abort_open_transaction();
                    return self.failure(id, &err);
                }
            }
        }

        match self.call(handler_ref, &request) {
            Ok(response) => response,
            Err(err) => {
                self.abort_open_transaction();
                self.failure(id, &err)
            }
        }
    }

    // Transactions roll back automatically when a handler dies mid-way.
    fn abort_open_transaction(&self) {
        let mut caps = self.caps.borrow_mut();
        if caps.db.in_transaction() {
            warn!("rolling back transaction left open by a failed handler");
            let _ = caps.db.rollback();
        }
    }

    fn call(&mut self, handler_ref: u32, request: &Request) -> Result<Response, RuntimeError> {
        self.runtime.dispatch(handler_ref, request)
    }

    fn failure(&self, id: u64, err: &RuntimeError) -> Response {
        match err {
            RuntimeError::ResourceExhausted(detail) => {
                error!(id, %detail, "handler hit a resource cap");
            }
            other => {
                error!(id, error = %other, "handler failed");
            }
        }
        // Production responses carry no stack traces; dev mode includes
        // the detail that just went to the log sink.
        let detail = self.dev_mode.then(|| err.to_string());
        Response::internal_error(detail.as_deref())
    }

    fn between_dispatches(&mut self) {
        if self.last_sweep.elapsed() < SWEEP_INTERVAL {
            return;
        }
        self.last_sweep = Instant::now();
        let mut caps = self.caps.borrow_mut();
        let now = caps.clock.now_unix_ms() / 1000;
        match self.sessions.sweep(&mut caps.db, now) {
            Ok(0) => {}
            Ok(n) => debug!(expired = n, "session sweep"),
            Err(err) => warn!(%err, "session sweep failed"),
        }
    }
}

enum MiddlewareFlow {
    Continue,
    Respond(Response),
}

// A middleware's return value either forwards (optionally mutating the
// context) or responds. The convention: `{next: true, context: {...}}`
// forwards; anything else is the response itself.
fn apply_middleware_outcome(request: &mut Request, outcome: Response) -> MiddlewareFlow {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&outcome.body) {
        if value.get("next").and_then(serde_json::Value::as_bool) == Some(true) {
            if let Some(serde_json::Value::Object(ctx)) = value.get("context") {
                for (key, val) in ctx {
                    request.context.insert(key.clone(), val.clone());
                }
            }
            return MiddlewareFlow::Continue;
        }
    }
    MiddlewareFlow::Respond(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hull_capability::db::Db;
    use hull_core::Method;
    use hull_runtime::{RuntimeConfig, RuntimeKind, select};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn request(path: &str) -> Request {
        Request {
            id: 1,
            method: Method::Get,
            path: path.into(),
            query: String::new(),
            headers: BTreeMap::new(),
            params: BTreeMap::new(),
            body: Vec::new(),
            context: BTreeMap::new(),
        }
    }

    fn caps() -> Rc<RefCell<Caps>> {
        let dir = tempfile::tempdir().unwrap();
        Rc::new(RefCell::new(Caps::for_serve(
            dir.path(),
            None,
            Db::open_in_memory().unwrap(),
        )))
    }

    fn loaded_runtime(source: &str) -> Box<dyn Runtime> {
        let mut runtime = select(RuntimeKind::Js, &RuntimeConfig::default());
        runtime.load_app(source).unwrap();
        runtime
    }

    fn event_loop(source: &str) -> (EventLoop, std::sync::mpsc::Sender<Job>) {
        let mut runtime = loaded_runtime(source);
        let caps = caps();
        runtime.install_caps(caps.clone());
        let middleware = runtime.middleware();
        let (tx, rx) = std::sync::mpsc::channel();
        (EventLoop::new(runtime, caps, middleware, false, rx), tx)
    }

    #[test]
    fn failed_handler_becomes_sanitized_500_and_loop_survives() {
        let (mut el, _tx) = event_loop(
            r#"
route("GET", "/boom", function () { throw new Error("kaboom secret detail"); });
route("GET", "/ok", function () { return "fine"; });
"#,
        );

        let resp = el.dispatch(0, request("/boom"));
        assert_eq!(resp.status, 500);
        let body = String::from_utf8(resp.body).unwrap();
        assert!(!body.contains("kaboom"), "500 body must be sanitized: {body}");

        // The next request on the same loop succeeds.
        let resp = el.dispatch(1, request("/ok"));
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, b"fine");
    }

    #[test]
    fn dev_mode_includes_detail() {
        let mut runtime = loaded_runtime(
            r#"route("GET", "/boom", function () { throw new Error("kaboom"); });"#,
        );
        let caps = caps();
        runtime.install_caps(caps.clone());
        let (_tx, rx) = std::sync::mpsc::channel();
        let mut el = EventLoop::new(runtime, caps, Vec::new(), true, rx);

        let resp = el.dispatch(0, request("/boom"));
        assert!(String::from_utf8(resp.body).unwrap().contains("kaboom"));
    }

    #[test]
    fn open_transaction_rolls_back_on_handler_error() {
        let (mut el, _tx) = event_loop(
            r#"
route("GET", "/boom", function () {
    hull.db.exec("CREATE TABLE IF NOT EXISTS t (x)", []);
    hull.db.begin();
    hull.db.exec("INSERT INTO t (x) VALUES (?)", [1]);
    throw new Error("mid-transaction failure");
});
route("GET", "/count", function () {
    var rows = hull.db.query("SELECT COUNT(*) AS n FROM t", []);
    return {json: {n: rows[0].n}};
});
"#,
        );

        let resp = el.dispatch(0, request("/boom"));
        assert_eq!(resp.status, 500);

        let resp = el.dispatch(1, request("/count"));
        assert_eq!(resp.status, 200);
        let body: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(body["n"], json!(0));
    }

    #[test]
    fn middleware_short_circuits_and_mutates_context() {
        let (mut el, _tx) = event_loop(
            r#"
middleware(null, "/", function (req) {
    if (req.headers["x-block"] === "yes") {
        return {status: 403, body: "blocked"};
    }
    return {json: {next: true, context: {seen: true}}};
});
route("GET", "/data", function (req) {
    return {json: {ctx: req.context}};
});
"#,
        );

        // Handler refs: middleware handler is 0, route handler is 1.
        let mut blocked = request("/data");
        blocked.headers.insert("x-block".into(), "yes".into());
        let resp = el.dispatch(1, blocked);
        assert_eq!(resp.status, 403);

        let resp = el.dispatch(1, request("/data"));
        assert_eq!(resp.status, 200);
        let body: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(body["ctx"], json!({"seen": true}));
    }
}
