use std::time::Duration;

use axum::{
    response::{IntoResponse, Response},
    Json,
    http::StatusCode,
};
use serde::Serialize;

use crate::payments::{PaymentError, WebhookError};
use crate::pipeline::PipelineError;

/// Body of every non-2xx response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Request processing timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid license key")]
    InvalidLicense,

    #[error(transparent)]
    Webhook(#[from] WebhookError),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Pipeline(PipelineError::QuotaExceeded(_)) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Pipeline(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            AppError::InvalidLicense => StatusCode::FORBIDDEN,
            AppError::Webhook(_) => StatusCode::BAD_REQUEST,
            AppError::Payment(PaymentError::NotConfigured(_)) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Payment(_) => StatusCode::BAD_GATEWAY,
            AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "Request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "Request rejected");
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
        });

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
