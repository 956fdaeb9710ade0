use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Extension, Json, State},
    http::{HeaderMap, StatusCode},
    middleware,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::models::{ScrapeRequest, ScrapeResponse, SessionView, UnlockRequest};
use crate::api::session::{attach_session, SESSION_HEADER};
use crate::api::ui;
use crate::error::{AppError, Result};
use crate::payments::{webhook::CHECKOUT_COMPLETED, verify_event, CheckoutSession, PaymentError};
use crate::tier::SessionId;
use crate::AppState;

pub fn create_router(app_state: AppState) -> Router {
    let session_routes = Router::new()
        .route("/scrape", post(scrape_handler))
        .route("/session", get(session_handler).delete(end_session_handler))
        .route("/session/unlock", post(unlock_handler))
        .route_layer(middleware::from_fn(attach_session));

    Router::new()
        .route("/", get(ui::index))
        .route("/health", get(health_handler))
        .route("/create-checkout-session", post(checkout_handler))
        .route("/webhook", post(webhook_handler))
        .merge(session_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers([SESSION_HEADER]),
        )
        .with_state(app_state)
}

async fn scrape_handler(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
    payload: std::result::Result<Json<ScrapeRequest>, JsonRejection>,
) -> Result<Json<ScrapeResponse>> {
    let Json(req) = payload.map_err(|e| AppError::InvalidRequest(e.body_text()))?;
    let job = req.into_job(session)?;
    info!(%session, url = %job.url, "Processing scrape request");
    let start_time = Instant::now();

    // Dropping the handler (client went away) cancels the pipeline task
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let timeout = state.config.request_timeout;
    let result = tokio::time::timeout(timeout, state.pipeline.spawn(job, cancel)).await;
    info!(%session, elapsed = ?start_time.elapsed(), "Scrape request finished");

    match result {
        Ok(outcome) => Ok(Json(ScrapeResponse { result: outcome? })),
        Err(_) => Err(AppError::Timeout(timeout)),
    }
}

async fn session_handler(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
) -> Json<SessionView> {
    let gate = state.pipeline.gate();
    Json(SessionView::new(session, gate.usage(session), gate))
}

async fn unlock_handler(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
    payload: std::result::Result<Json<UnlockRequest>, JsonRejection>,
) -> Result<Json<SessionView>> {
    let Json(req) = payload.map_err(|e| AppError::InvalidRequest(e.body_text()))?;
    let gate = state.pipeline.gate();

    if !gate.unlock(session, req.license_key.trim()) {
        return Err(AppError::InvalidLicense);
    }
    Ok(Json(SessionView::new(session, gate.usage(session), gate)))
}

async fn end_session_handler(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
) -> StatusCode {
    state.pipeline.gate().end(session);
    info!(%session, "Session ended");
    StatusCode::NO_CONTENT
}

async fn checkout_handler(State(state): State<AppState>) -> Result<Json<CheckoutSession>> {
    let session = state.payments.create_checkout_session().await?;
    Ok(Json(session))
}

async fn webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>> {
    let secret = state
        .payments
        .webhook_secret()
        .ok_or(PaymentError::NotConfigured("STRIPE_WEBHOOK_SECRET is not set"))?;
    let signature = headers
        .get("stripe-signature")
        .and_then(|value| value.to_str().ok());

    let event = verify_event(&body, signature, secret, Utc::now().timestamp())?;

    if event.event_type == CHECKOUT_COMPLETED {
        info!(
            checkout_session = event.object_id().unwrap_or("unknown"),
            "Payment successful"
        );
    } else {
        info!(event_type = %event.event_type, "Ignoring webhook event");
    }

    Ok(Json(json!({ "status": "success" })))
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
