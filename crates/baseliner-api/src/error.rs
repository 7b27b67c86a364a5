use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use tracing::error;

use baseliner_compiler::CompileError;
use baseliner_ingest::IngestError;
use baseliner_store::StoreError;

/// The fixed error-kind vocabulary surfaced as `{error: {type, message}}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AuthMissing,
    AuthInvalid,
    AuthRevoked,
    AuthDeviceInactive,
    InputMalformed,
    InputSchema,
    InputTooLarge,
    RateLimited,
    ResourceNotFound,
    ResourceConflict,
    ServerInternal,
    ServerTimeout,
}

impl ErrorKind {
    fn wire(self) -> &'static str {
        match self {
            ErrorKind::AuthMissing => "auth.missing",
            ErrorKind::AuthInvalid => "auth.invalid",
            ErrorKind::AuthRevoked => "auth.revoked",
            ErrorKind::AuthDeviceInactive => "auth.device_inactive",
            ErrorKind::InputMalformed => "input.malformed",
            ErrorKind::InputSchema => "input.schema",
            ErrorKind::InputTooLarge => "input.too_large",
            ErrorKind::RateLimited => "rate.limited",
            ErrorKind::ResourceNotFound => "resource.not_found",
            ErrorKind::ResourceConflict => "resource.conflict",
            ErrorKind::ServerInternal => "server.internal",
            ErrorKind::ServerTimeout => "server.timeout",
        }
    }

    fn status(self) -> StatusCode {
        match self {
            ErrorKind::AuthMissing | ErrorKind::AuthInvalid => StatusCode::UNAUTHORIZED,
            ErrorKind::AuthRevoked | ErrorKind::AuthDeviceInactive => StatusCode::FORBIDDEN,
            ErrorKind::InputMalformed => StatusCode::BAD_REQUEST,
            ErrorKind::InputSchema => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::InputTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::ResourceNotFound => StatusCode::NOT_FOUND,
            ErrorKind::ResourceConflict => StatusCode::CONFLICT,
            ErrorKind::ServerInternal => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::ServerTimeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    pub retry_after_secs: Option<u64>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        ApiError { kind, message: message.into(), retry_after_secs: None }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceNotFound, msg)
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceConflict, msg)
    }

    pub fn unprocessable(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InputSchema, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InputMalformed, msg)
    }

    /// `429` with the `Retry-After` the spec requires (4.4: seconds until
    /// the bucket refills enough for one more call).
    pub fn rate_limited(retry_after_secs: u64) -> Self {
        ApiError {
            kind: ErrorKind::RateLimited,
            message: "rate limit exceeded".to_string(),
            retry_after_secs: Some(retry_after_secs),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.kind.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error_kind = self.kind.wire(), message = %self.message, "request failed");
        }
        let body = Json(json!({ "error": { "type": self.kind.wire(), "message": self.message } }));
        let mut response = (status, body).into_response();
        if let Some(secs) = self.retry_after_secs {
            if let Ok(value) = axum::http::HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
            }
        }
        response
    }
}

// Database errors are logged with full detail above and never leak SQL text
// to the client -- the client only ever sees "internal store error".
impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DeviceNotFound(_)
            | StoreError::PolicyNotFound(_)
            | StoreError::RunNotFound(_)
            | StoreError::EnrollTokenNotFound(_) => ApiError::not_found(e.to_string()),
            StoreError::DeviceKeyConflict { .. } | StoreError::PolicyNameConflict { .. } => {
                ApiError::conflict(e.to_string())
            }
            StoreError::InvalidCursor => ApiError::bad_request(e.to_string()),
            StoreError::Serialization(_) | StoreError::Internal(_) => {
                error!(error = %e, "store error");
                ApiError::new(ErrorKind::ServerInternal, "internal store error")
            }
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        ApiError::unprocessable(e.to_string())
    }
}

impl From<CompileError> for ApiError {
    fn from(e: CompileError) -> Self {
        ApiError::not_found(e.to_string())
    }
}
