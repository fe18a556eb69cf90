// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// The axum transport adapter.
pub mod bridge;
/// The cooperative dispatcher loop.
pub mod event_loop;
/// Session records and the expiry sweep.
pub mod session;

use event_loop::{EventLoop, Job};
use hull_capability::Caps;
use hull_runtime::Runtime;
use std::cell::RefCell;
use std::net::TcpListener;
use std::rc::Rc;
use thiserror::Error;
use tracing::info;

/// Server-side failures.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listen socket could not be bound.
    #[error("bind {addr}: {detail}")]
    Bind {
        /// The address that failed.
        addr: String,
        /// OS-level detail.
        detail: String,
    },
    /// The transport thread died unexpectedly.
    #[error("transport: {0}")]
    Transport(String),
}

/// Everything `serve` needs beyond the runtime itself.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// Dev mode adds error detail to responses.
    pub dev_mode: bool,
}

/// Bind the listen socket.
///
/// Separate from [`serve`] so the caller can order it correctly: after
/// signature verification (a failed verify must never open the socket)
/// and before the sandbox line (socket creation is not among the pledged
/// syscall families).
///
/// # Errors
///
/// [`ServerError::Bind`] when the port is unavailable.
pub fn bind(port: u16) -> Result<TcpListener, ServerError> {
    let addr = format!("127.0.0.1:{port}");
    let listener = TcpListener::bind(&addr).map_err(|e| ServerError::Bind {
        addr: addr.clone(),
        detail: e.to_string(),
    })?;
    info!(%addr, "listening");
    Ok(listener)
}

/// Start the transport thread over a pre-bound listener and run the
/// event loop on the calling thread until shutdown.
///
/// Once here, the dispatcher owns the runtime and capability table for
/// the life of the process.
///
/// # Errors
///
/// [`ServerError::Transport`] when the transport thread cannot start.
pub fn serve(
    listener: TcpListener,
    runtime: Box<dyn Runtime>,
    caps: Rc<RefCell<Caps>>,
    options: &ServeOptions,
) -> Result<(), ServerError> {
    let (jobs_tx, jobs_rx) = std::sync::mpsc::channel::<Job>();

    let mut routes = Vec::new();
    runtime.wire_routes(&mut |route: &hull_core::RouteSpec| routes.push(route.clone()));
    let middleware = runtime.middleware();

    let transport =
        bridge::spawn_transport(listener, routes, jobs_tx).map_err(ServerError::Transport)?;

    EventLoop::new(runtime, caps, middleware, options.dev_mode, jobs_rx).run();

    transport
        .join()
        .map_err(|_| ServerError::Transport("transport thread panicked".into()))?;
    Ok(())
}
