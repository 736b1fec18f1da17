//! Gateway error type mapping to HTTP status codes and the JSON error body.

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use sandgate_core::locator::LocatorError;
use sandgate_core::target::TargetError;
use sandgate_core::wake::WakeError;
use sandgate_infra::oidc::OidcError;
use sandgate_types::error::{ControlPlaneError, GatewayError};

/// Seconds a client should wait before retrying a sandbox that is starting.
pub const RETRY_AFTER_SECS: u64 = 5;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub struct AppError {
    error: GatewayError,
    path: Option<String>,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        GatewayError::BadRequest(message.into()).into()
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        GatewayError::Unauthorized(message.into()).into()
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        GatewayError::NotFound(message.into()).into()
    }

    pub fn internal(message: impl Into<String>) -> Self {
        GatewayError::Internal(message.into()).into()
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        GatewayError::UpstreamUnavailable {
            message: message.into(),
            retry_after_secs: RETRY_AFTER_SECS,
        }
        .into()
    }

    /// Attach the request path to the error body.
    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        match &self.error {
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::UpstreamUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn code(&self) -> &'static str {
        match &self.error {
            GatewayError::BadRequest(_) => "BAD_REQUEST",
            GatewayError::Unauthorized(_) => "UNAUTHORIZED",
            GatewayError::NotFound(_) => "NOT_FOUND",
            GatewayError::Internal(_) => "INTERNAL_ERROR",
            GatewayError::UpstreamUnavailable { .. } => "SERVICE_UNAVAILABLE",
        }
    }

    fn message(&self) -> &str {
        match &self.error {
            GatewayError::BadRequest(m)
            | GatewayError::Unauthorized(m)
            | GatewayError::NotFound(m)
            | GatewayError::Internal(m) => m,
            GatewayError::UpstreamUnavailable { message, .. } => message,
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error.fmt(f)
    }
}

impl From<GatewayError> for AppError {
    fn from(error: GatewayError) -> Self {
        Self { error, path: None }
    }
}

impl From<TargetError> for AppError {
    fn from(e: TargetError) -> Self {
        AppError::bad_request(e.to_string())
    }
}

impl From<ControlPlaneError> for AppError {
    fn from(e: ControlPlaneError) -> Self {
        match e.status() {
            Some(404) => AppError::not_found("sandbox not found"),
            _ => AppError::internal(e.to_string()),
        }
    }
}

impl From<LocatorError> for AppError {
    fn from(e: LocatorError) -> Self {
        match e {
            LocatorError::ControlPlane(e) => e.into(),
            other => AppError::internal(other.to_string()),
        }
    }
}

impl From<WakeError> for AppError {
    fn from(e: WakeError) -> Self {
        match e {
            WakeError::Unrecoverable(state) => {
                AppError::internal(format!("sandbox failed to start (state: {state})"))
            }
            other => AppError::unavailable(other.to_string()),
        }
    }
}

impl From<OidcError> for AppError {
    fn from(e: OidcError) -> Self {
        match e {
            OidcError::NotConfigured => AppError::unauthorized("authentication required"),
            OidcError::Exchange { .. } => {
                AppError::unauthorized("failed to exchange authorization code")
            }
            other => AppError::internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.error, path = ?self.path, "request failed");
        } else {
            tracing::debug!(error = %self.error, path = ?self.path, "request rejected");
        }

        let mut body = json!({
            "statusCode": status.as_u16(),
            "message": self.message(),
            "code": self.code(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        if let Some(path) = &self.path {
            body["path"] = json!(path);
        }

        let mut response = (
            status,
            [(header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response();

        if let GatewayError::UpstreamUnavailable {
            retry_after_secs, ..
        } = &self.error
        {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_secs));
        }
        response
    }
}
