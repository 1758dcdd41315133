//! Read-only operator dashboard
//!
//! Serves the honeypot status and replays the three log channels. Handlers
//! only ever read the log files.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::catalog::RecordStore;
use crate::config::{DashboardConfig, LoggingConfig};
use crate::session::SessionRegistry;

#[derive(Clone)]
pub struct DashboardState {
    registry: Arc<SessionRegistry>,
    store: Arc<RecordStore>,
    detailed_log: PathBuf,
    simplified_log: PathBuf,
    exception_log: PathBuf,
}

impl DashboardState {
    pub fn new(
        registry: Arc<SessionRegistry>,
        store: Arc<RecordStore>,
        logging: &LoggingConfig,
    ) -> Self {
        Self {
            registry,
            store,
            detailed_log: logging.detailed_log_path(),
            simplified_log: logging.simplified_log_path(),
            exception_log: logging.exception_log_path(),
        }
    }
}

pub fn build_router(state: DashboardState) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/logs/all", get(all_logs))
        .route("/logs/simplified", get(simplified_logs))
        .route("/logs/exceptions", get(exception_logs))
        .fallback(not_found)
        .with_state(state)
}

/// Bind the dashboard port and serve until `shutdown` fires
pub async fn start(
    config: &DashboardConfig,
    state: DashboardState,
    shutdown: CancellationToken,
) -> anyhow::Result<JoinHandle<()>> {
    let bind_addr = SocketAddr::new(config.bind_address, config.bind_port);
    let listener = TcpListener::bind(bind_addr).await?;
    let app = build_router(state);

    tracing::info!("🚀 Dashboard started on {}", bind_addr);

    Ok(tokio::spawn(async move {
        let graceful_shutdown = async move {
            shutdown.cancelled().await;
        };

        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(graceful_shutdown)
            .await
        {
            tracing::error!("Dashboard encountered error: {}", e);
        }

        tracing::info!("Dashboard shut down");
    }))
}

async fn status(State(state): State<DashboardState>) -> Json<Value> {
    Json(json!({
        "status": "running",
        "associations": state.registry.len(),
        "records": state.store.len(),
        "sessions": state.registry.sessions(),
    }))
}

async fn all_logs(State(state): State<DashboardState>) -> Response {
    match tokio::fs::read_to_string(&state.detailed_log).await {
        Ok(content) => Html(format!("<pre>{}</pre>", escape_html(&content))).into_response(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Log file not found" })),
        )
            .into_response(),
        Err(e) => read_failure(&state.detailed_log, e),
    }
}

async fn simplified_logs(State(state): State<DashboardState>) -> Response {
    let content = match tokio::fs::read_to_string(&state.simplified_log).await {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return read_failure(&state.simplified_log, e),
    };

    let entries: Vec<Value> = content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Invalid JSON in simplified log: {}", e);
                None
            }
        })
        .collect();

    Json(entries).into_response()
}

async fn exception_logs(State(state): State<DashboardState>) -> Response {
    match tokio::fs::read_to_string(&state.exception_log).await {
        Ok(content) => {
            ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], content).into_response()
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], String::new()).into_response()
        }
        Err(e) => read_failure(&state.exception_log, e),
    }
}

async fn not_found() -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not Found" })))
}

fn read_failure(path: &std::path::Path, error: io::Error) -> Response {
    tracing::error!("Error reading log file {}: {}", path.display(), error);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Failed to read log file" })),
    )
        .into_response()
}

/// Logged values come from peers and must not be rendered as markup
fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
