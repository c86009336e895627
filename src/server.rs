//! HTTP front end.
//!
//! A single fallback handler turns each HTTP request into a router
//! [`Request`]; route matching lives in the router, not here.

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::engine::ReservationEngine;
use crate::router::{Request, RequestRouter};

pub fn app(router: RequestRouter) -> Router {
    Router::new()
        .route("/health", get(health))
        .fallback(handle)
        .layer(TraceLayer::new_for_http())
        .with_state(router)
}

/// Serve until Ctrl-C. Starts the reservation sweeper when a hold is configured.
pub async fn serve(
    listener: TcpListener,
    router: RequestRouter,
    sweep_every: Duration,
) -> std::io::Result<()> {
    if router.engine().settings().max_hold.is_some() {
        tokio::spawn(sweep_loop(router.engine().clone(), sweep_every));
    }

    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, app(router))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn handle(
    State(router): State<RequestRouter>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let body = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or_else(|e| {
            debug!(error = %e, "request body is not JSON, ignoring it");
            Value::Null
        })
    };

    let mut request = Request::new(method.as_str(), uri.path()).with_body(body);
    if let Some(token) = header_token(&headers) {
        request = request.with_token(token);
    }

    let response = router.dispatch(request).await;
    let status =
        StatusCode::from_u16(response.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(response.body))
}

/// `Authorization: Bearer <token>` (scheme matched case-insensitively) or
/// `x-auth-token: <token>`.
fn header_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
        .map(|(_, token)| token);
    let plain = headers.get("x-auth-token").and_then(|v| v.to_str().ok());

    bearer
        .or(plain)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

async fn sweep_loop(engine: ReservationEngine, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        match engine.release_expired_reservations(Utc::now()).await {
            Ok(released) if !released.is_empty() => {
                info!(count = released.len(), "released expired reservations");
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "reservation sweep failed"),
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
