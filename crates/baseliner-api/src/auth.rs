use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use baseliner_crypto::hash_token;
use baseliner_domain::TokenVerification;

use crate::error::{ApiError, ErrorKind};
use crate::state::AppState;

/// Correlation id for this request, threaded through request extensions so
/// handlers can stamp it onto `runs`/`audit_logs` without re-parsing headers.
#[derive(Debug, Clone)]
pub struct CorrelationId(pub String);

/// Reads `X-Correlation-ID` if present, else mints one. Echoed back on the
/// response so a caller that didn't send one can still correlate its logs.
pub async fn request_id(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get("X-Correlation-ID")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(CorrelationId(id.clone()));
    let mut response = next.run(request).await;
    if let Ok(value) = axum::http::HeaderValue::from_str(&id) {
        response.headers_mut().insert("X-Correlation-ID", value);
    }
    response
}

/// `/api/v1/admin/*`: requires `X-Admin-Key` exactly matching
/// [`BaselinerConfig::admin_key`]. Generalizes the teacher's single
/// bearer-token check to a header comparison.
pub async fn admin_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    match request.headers().get("X-Admin-Key").and_then(|v| v.to_str().ok()) {
        Some(key) if key == state.config.admin_key => next.run(request).await,
        Some(_) => ApiError::new(ErrorKind::AuthInvalid, "invalid admin key").into_response(),
        None => ApiError::new(ErrorKind::AuthMissing, "missing X-Admin-Key header").into_response(),
    }
}

/// `/api/v1/device/*`: requires `Authorization: Bearer <token>` resolving to
/// an un-revoked [`baseliner_domain::DeviceAuthToken`] whose device is
/// active. Verified device and token are stashed in request extensions for
/// handlers to read.
pub async fn device_auth(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let provided = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let Some(token) = provided else {
        return ApiError::new(ErrorKind::AuthMissing, "missing bearer token").into_response();
    };

    let hash = hash_token(&state.config.token_pepper, token.as_bytes());
    match state.store.verify_device_token(&hash).await {
        Ok(TokenVerification::Valid((device, auth_token))) => {
            request.extensions_mut().insert(device);
            request.extensions_mut().insert(auth_token);
            next.run(request).await
        }
        Ok(TokenVerification::Revoked) => {
            ApiError::new(ErrorKind::AuthRevoked, "device token has been revoked").into_response()
        }
        Ok(TokenVerification::DeviceInactive) => {
            ApiError::new(ErrorKind::AuthDeviceInactive, "device is inactive").into_response()
        }
        Ok(TokenVerification::NotFound | TokenVerification::Expired | TokenVerification::Used) => {
            ApiError::new(ErrorKind::AuthInvalid, "invalid device token").into_response()
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Per-device-token bucket for `/api/v1/device/*` (spec 5: "keyed by
/// device-id or IP"; the raw token is unguessable so it is safe to key on
/// before it has been verified).
pub async fn rate_limit_reports(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if !state.config.rate_limit_enabled {
        return next.run(request).await;
    }
    let token = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("anonymous");
    let key = format!("reports:{token}");
    match state.limiter.check(&key, state.config.rate_limit_reports_per_minute, state.config.rate_limit_reports_burst) {
        Ok(()) => next.run(request).await,
        Err(retry_after_secs) => ApiError::rate_limited(retry_after_secs).into_response(),
    }
}

/// Per-IP bucket for everything else (public + admin routes).
pub async fn rate_limit_ip(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if !state.config.rate_limit_enabled {
        return next.run(request).await;
    }
    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let key = format!("ip:{ip}");
    match state.limiter.check(&key, state.config.rate_limit_ip_per_minute, state.config.rate_limit_ip_burst) {
        Ok(()) => next.run(request).await,
        Err(retry_after_secs) => ApiError::rate_limited(retry_after_secs).into_response(),
    }
}
