// SPDX-License-Identifier: MIT OR Apache-2.0
//! The axum transport adapter.
//!
//! Translates registered route patterns into the transport's capture
//! syntax, buffers bodies against the platform cap, marshals each hit
//! into a [`Job`] for the dispatcher thread, and renders the reply. The
//! transport never touches the runtime or the database.

use crate::event_loop::Job;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path as AxumPath, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response as AxumResponse};
use axum::routing::MethodFilter;
use hull_core::{MAX_BODY_BYTES, Method, Request, RouteSpec, Segment};
use std::collections::BTreeMap;
use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::thread::JoinHandle;
use tokio::sync::oneshot;
use tracing::{debug, error};

struct TransportState {
    jobs: Sender<Job>,
    next_request_id: AtomicU64,
}

/// Convert a hull pattern to the transport's capture syntax:
/// `/users/:id` becomes `/users/{id}`.
#[must_use]
pub fn transport_pattern(route: &RouteSpec) -> String {
    let mut out = String::new();
    for segment in route.pattern.segments() {
        out.push('/');
        match segment {
            Segment::Literal(lit) => out.push_str(lit),
            Segment::Capture(name) => {
                out.push('{');
                out.push_str(name);
                out.push('}');
            }
        }
    }
    if out.is_empty() { "/".into() } else { out }
}

fn method_filter(method: Method) -> MethodFilter {
    match method {
        Method::Get => MethodFilter::GET,
        Method::Post => MethodFilter::POST,
        Method::Put => MethodFilter::PUT,
        Method::Patch => MethodFilter::PATCH,
        Method::Delete => MethodFilter::DELETE,
        Method::Head => MethodFilter::HEAD,
        Method::Options => MethodFilter::OPTIONS,
    }
}

/// Build the transport router for the wired routes.
#[must_use]
pub fn build_router(routes: Vec<RouteSpec>, jobs: Sender<Job>) -> Router {
    let state = Arc::new(TransportState {
        jobs,
        next_request_id: AtomicU64::new(1),
    });

    // Routes sharing a path merge into one method router.
    let mut by_path: BTreeMap<String, Vec<RouteSpec>> = BTreeMap::new();
    for route in routes {
        by_path
            .entry(transport_pattern(&route))
            .or_default()
            .push(route);
    }

    let mut router = Router::<Arc<TransportState>>::new();
    for (path, routes_at_path) in by_path {
        let mut method_router = axum::routing::MethodRouter::<Arc<TransportState>>::new();
        for route in routes_at_path {
            let method = route.method;
            let handler_ref = route.handler_ref;
            method_router = method_router.on(
                method_filter(method),
                move |State(state): State<Arc<TransportState>>,
                      AxumPath(params): AxumPath<BTreeMap<String, String>>,
                      uri: Uri,
                      headers: HeaderMap,
                      body: Bytes| async move {
                    handle(state, method, handler_ref, params, &uri, headers, body).await
                },
            );
        }
        router = router.route(&path, method_router);
    }
    router
        .layer(axum::extract::DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

#[allow(clippy::too_many_arguments)]
async fn handle(
    state: Arc<TransportState>,
    method: Method,
    handler_ref: u32,
    params: BTreeMap<String, String>,
    uri: &Uri,
    headers: HeaderMap,
    body: Bytes,
) -> AxumResponse {
    if body.len() > MAX_BODY_BYTES {
        return StatusCode::PAYLOAD_TOO_LARGE.into_response();
    }

    let id = state.next_request_id.fetch_add(1, Ordering::Relaxed);
    let mut header_map = BTreeMap::new();
    for (name, value) in &headers {
        if let Ok(v) = value.to_str() {
            header_map.insert(name.as_str().to_ascii_lowercase(), v.to_string());
        }
    }

    let request = Request {
        id,
        method,
        path: uri.path().to_string(),
        query: uri.query().unwrap_or_default().to_string(),
        headers: header_map,
        params,
        body: body.to_vec(),
        context: BTreeMap::new(),
    };

    let (reply_tx, reply_rx) = oneshot::channel();
    let job = Job::Dispatch {
        handler_ref,
        request,
        reply: reply_tx,
    };
    if state.jobs.send(job).is_err() {
        error!(id, "dispatcher is gone");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    match reply_rx.await {
        Ok(response) => {
            debug!(id, status = response.status, "reply");
            render(response)
        }
        Err(_) => {
            error!(id, "dispatcher dropped the reply");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn render(response: hull_core::Response) -> AxumResponse {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut out = (status, response.body).into_response();
    for (name, value) in response.headers {
        if let (Ok(name), Ok(value)) = (
            axum::http::HeaderName::try_from(name.as_str()),
            axum::http::HeaderValue::try_from(value.as_str()),
        ) {
            out.headers_mut().insert(name, value);
        }
    }
    out
}

/// Start the transport on its own thread with its own async runtime.
///
/// # Errors
///
/// A human-readable reason when the thread or runtime cannot start.
pub fn spawn_transport(
    listener: TcpListener,
    routes: Vec<RouteSpec>,
    jobs: Sender<Job>,
) -> Result<JoinHandle<()>, String> {
    listener
        .set_nonblocking(true)
        .map_err(|e| format!("listener nonblocking: {e}"))?;

    let router = build_router(routes, jobs.clone());
    let handle = std::thread::Builder::new()
        .name("hull-transport".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(err) => {
                    error!(%err, "tokio runtime failed to start");
                    let _ = jobs.send(Job::Shutdown);
                    return;
                }
            };
            runtime.block_on(async move {
                let listener = match tokio::net::TcpListener::from_std(listener) {
                    Ok(l) => l,
                    Err(err) => {
                        error!(%err, "listener handoff failed");
                        let _ = jobs.send(Job::Shutdown);
                        return;
                    }
                };
                let shutdown_jobs = jobs.clone();
                let result = axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        let _ = tokio::signal::ctrl_c().await;
                        let _ = shutdown_jobs.send(Job::Shutdown);
                    })
                    .await;
                if let Err(err) = result {
                    error!(%err, "transport stopped");
                }
                let _ = jobs.send(Job::Shutdown);
            });
        })
        .map_err(|e| format!("transport thread: {e}"))?;
    Ok(handle)
}
