use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};

use crate::tier::SessionId;

pub const SESSION_HEADER: HeaderName = HeaderName::from_static("x-session-id");

/// Resolves the caller's session from `x-session-id`, starting a new one
/// when the header is missing or not a UUID. The id is echoed back on every
/// response so clients can pick it up.
pub async fn attach_session(mut req: Request, next: Next) -> Response {
    let session = req
        .headers()
        .get(&SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(SessionId::parse)
        .unwrap_or_else(|| {
            let session = SessionId::new();
            tracing::debug!(%session, "Started new session");
            session
        });

    req.extensions_mut().insert(session);
    let mut response = next.run(req).await;

    if let Ok(value) = HeaderValue::from_str(&session.to_string()) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}
