// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! HTTP surface a sync service exposes to its peers.
//!
//! Two routes: `GET /` for health checks and `POST /read` to page
//! through the event log from a set of cursors.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::HttpServerConfig;
use crate::cursor::Cursor;
use crate::error::{Result, SyncError};
use crate::event_store::{EventStore, MAX_READ_LIMIT};

use super::wire::{ReadRequest, ReadResponse};

/// Routes backed by the given event store.
pub fn router(store: Arc<dyn EventStore>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/read", post(read))
        .with_state(store)
}

/// Serve until the shutdown signal fires.
pub async fn serve(
    config: &HttpServerConfig,
    store: Arc<dyn EventStore>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| SyncError::http("bind", format!("{addr}: {e}")))?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, router(store))
        .with_graceful_shutdown(async move {
            // Channel closure also counts as shutdown.
            let _ = shutdown.changed().await;
        })
        .await
        .map_err(|e| SyncError::http("serve", e.to_string()))?;
    info!("HTTP server stopped");
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn read(State(store): State<Arc<dyn EventStore>>, body: Bytes) -> Response {
    // Parse by hand so malformed bodies produce a 400 with a reason.
    let request: ReadRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Rejected malformed read request");
            return bad_request(format!("invalid request body: {e}"));
        }
    };

    if let Some(limit) = request.limit {
        if limit == 0 || limit > MAX_READ_LIMIT {
            return bad_request(format!(
                "limit must be between 1 and {MAX_READ_LIMIT}, got {limit}"
            ));
        }
    }

    let cursors: Vec<Cursor> = request.cursors.into_iter().map(Into::into).collect();
    match store.read(&cursors, request.limit).await {
        Ok(operations) => {
            crate::metrics::record_http_request("/read", 200);
            Json(ReadResponse { operations }).into_response()
        }
        Err(e) => {
            error!(error = %e, "Event store read failed");
            crate::metrics::record_http_request("/read", 500);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "internal server error" })),
            )
                .into_response()
        }
    }
}

fn bad_request(message: String) -> Response {
    crate::metrics::record_http_request("/read", 400);
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}
