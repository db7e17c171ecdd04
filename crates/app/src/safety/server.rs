//! Actix Web monitor server exposing the status page, JSON APIs and SSE.
//!
//! The server runs on a dedicated thread with its own Actix system so the
//! workers never share a runtime with HTTP concerns. When enabled, the TCP
//! command socket is served from the same system.

use std::{sync::Arc, time::Duration};

use actix_web::{
    App, HttpResponse, HttpServer,
    http::header,
    web::{self, Bytes},
};
use anyhow::{Context, Result};
use async_stream::stream;
use safety_core::{EventKind, EventLog};
use tokio::{net::TcpListener, sync::broadcast::error::RecvError, sync::oneshot};
use tracing::{error, info, warn};

use crate::safety::{
    config::TransportOptions,
    hub::StatusHub,
    socket::{CommandContext, serve_commands},
    telemetry,
};

/// Entries returned by `GET /api/logs`.
pub(crate) const HTTP_LOG_ENTRIES: usize = 50;
const SSE_KEEP_ALIVE: Duration = Duration::from_secs(5);

/// Shared state backing HTTP handlers.
pub(crate) struct ServerState {
    pub(crate) hub: Arc<StatusHub>,
    pub(crate) events: Arc<EventLog>,
}

/// Handle for the monitor server thread.
pub(crate) struct MonitorServer {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl MonitorServer {
    /// Signal the server to stop and block until the thread exits.
    pub(crate) fn stop(self) {
        if let Some(tx) = self.shutdown {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle {
            let _ = handle.join();
        }
    }
}

/// Spawn the monitor server thread and return a handle that can stop it.
pub(crate) fn spawn_monitor_server(
    transport: &TransportOptions,
    ctx: CommandContext,
) -> Result<MonitorServer> {
    let bind = transport.bind;
    let web_port = transport.web_port;
    let socket_port = transport.socket_port;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let handle = telemetry::spawn_thread("monitor-server", move || {
        let events = ctx.events.clone();
        if let Err(err) = actix_web::rt::System::new().block_on(async move {
            if let Some(port) = socket_port {
                match TcpListener::bind((bind, port)).await {
                    Ok(listener) => {
                        info!("command socket listening on {bind}:{port}");
                        actix_web::rt::spawn(serve_commands(listener, ctx.clone()));
                    }
                    Err(err) => {
                        error!("command socket bind {bind}:{port} failed: {err}");
                        ctx.events.record(
                            EventKind::Error,
                            format!("Command socket unavailable: {err}"),
                        );
                    }
                }
            }

            let hub = ctx.hub.clone();
            let log = ctx.events.clone();
            let server = HttpServer::new(move || {
                App::new()
                    .app_data(web::Data::new(ServerState {
                        hub: hub.clone(),
                        events: log.clone(),
                    }))
                    .configure(routes)
            })
            .workers(1)
            .bind((bind, web_port))?
            .run();
            info!("monitor listening on http://{bind}:{web_port}");

            let srv_handle = server.handle();
            actix_web::rt::spawn(async move {
                let _ = shutdown_rx.await;
                srv_handle.stop(true).await;
            });

            server.await
        }) {
            error!("HTTP server error: {err}");
            events.record(EventKind::Error, format!("Monitor server failed: {err}"));
        }
    })
    .context("Failed to spawn monitor server thread")?;

    Ok(MonitorServer {
        shutdown: Some(shutdown_tx),
        handle: Some(handle),
    })
}

pub(crate) fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index_route))
        .route("/api/status", web::get().to(status_handler))
        .route("/api/logs", web::get().to(logs_handler))
        .route("/api/stream", web::get().to(stream_handler))
        .route("/metrics", web::get().to(metrics_handler));
}

/// Serve the monitoring page.
async fn index_route() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(crate::html::monitor::MONITOR_INDEX_HTML)
}

/// Return the latest status snapshot as JSON.
async fn status_handler(state: web::Data<ServerState>) -> HttpResponse {
    match state.hub.latest_json() {
        Some(json) => HttpResponse::Ok()
            .content_type("application/json")
            .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
            .body(json.to_string()),
        None => HttpResponse::NoContent().finish(),
    }
}

/// Return the most recent event log entries, oldest first.
async fn logs_handler(state: web::Data<ServerState>) -> HttpResponse {
    HttpResponse::Ok()
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .json(state.events.recent(HTTP_LOG_ENTRIES))
}

/// Render the Prometheus exposition.
async fn metrics_handler() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::ServiceUnavailable().body("metrics recorder not installed"),
    }
}

/// Stream status snapshots as Server-Sent Events.
async fn stream_handler(state: web::Data<ServerState>) -> HttpResponse {
    let mut updates = state.hub.subscribe();
    let latest = state.hub.latest_json();
    let stream = stream! {
        yield Ok::<Bytes, actix_web::Error>(Bytes::from_static(b"retry: 500\n\n"));
        let mut id: u64 = 0;
        if let Some(json) = latest {
            yield Ok::<Bytes, actix_web::Error>(Bytes::from(sse_chunk(id, &json)));
        }
        loop {
            match actix_web::rt::time::timeout(SSE_KEEP_ALIVE, updates.recv()).await {
                Ok(Ok(json)) => {
                    id += 1;
                    yield Ok::<Bytes, actix_web::Error>(Bytes::from(sse_chunk(id, &json)));
                }
                Ok(Err(RecvError::Lagged(skipped))) => {
                    warn!("SSE client lagged by {skipped} updates");
                }
                Ok(Err(RecvError::Closed)) => break,
                Err(_) => {
                    yield Ok::<Bytes, actix_web::Error>(Bytes::from_static(b": keep-alive\n\n"));
                }
            }
        }
    };

    HttpResponse::Ok()
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .insert_header((header::ACCESS_CONTROL_ALLOW_HEADERS, "*"))
        .insert_header((header::ACCESS_CONTROL_ALLOW_METHODS, "GET"))
        .insert_header((header::ACCESS_CONTROL_EXPOSE_HEADERS, "Content-Type"))
        .append_header(("Cache-Control", "no-cache"))
        .append_header(("Content-Type", "text/event-stream"))
        .append_header(("Connection", "keep-alive"))
        .streaming(stream)
}

fn sse_chunk(id: u64, json: &str) -> String {
    let mut chunk = String::with_capacity(json.len() + 32);
    chunk.push_str("id: ");
    chunk.push_str(&id.to_string());
    chunk.push('\n');
    chunk.push_str("data: ");
    chunk.push_str(json);
    chunk.push_str("\n\n");
    chunk
}
