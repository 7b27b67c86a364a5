use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use baseliner_config::BaselinerConfig;
use baseliner_store::Store;

use crate::auth::{admin_auth, device_auth, rate_limit_ip, rate_limit_reports};
use crate::handlers;
use crate::rate_limit::RateLimiter;
use crate::state::AppState;

pub fn build_app(store: Arc<dyn Store>, config: Arc<BaselinerConfig>, limiter: Arc<dyn RateLimiter>) -> Router {
    let state = AppState { store, config: config.clone(), limiter };

    let public = Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/enroll", post(handlers::enroll))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit_ip))
        .layer(RequestBodyLimitLayer::new(config.max_request_body_bytes_default))
        .layer(DefaultBodyLimit::disable());

    let device = Router::new()
        .route("/api/v1/device/policy", get(handlers::get_device_policy))
        .route_layer(middleware::from_fn_with_state(state.clone(), device_auth))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit_ip))
        .layer(RequestBodyLimitLayer::new(config.max_request_body_bytes_default))
        .layer(DefaultBodyLimit::disable());

    let device_reports = Router::new()
        .route("/api/v1/device/reports", post(handlers::post_device_report))
        .route_layer(middleware::from_fn_with_state(state.clone(), device_auth))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit_reports))
        .layer(RequestBodyLimitLayer::new(config.max_request_body_bytes_device_reports))
        .layer(DefaultBodyLimit::disable());

    let admin = Router::new()
        .route("/api/v1/admin/enroll-tokens", post(handlers::create_enroll_token).get(handlers::list_enroll_tokens))
        .route("/api/v1/admin/enroll-tokens/:id/revoke", post(handlers::revoke_enroll_token))
        .route("/api/v1/admin/devices", get(handlers::list_devices))
        .route("/api/v1/admin/devices/:id/debug", get(handlers::get_device_debug))
        .route("/api/v1/admin/devices/:id", axum::routing::delete(handlers::delete_device))
        .route("/api/v1/admin/devices/:id/restore", post(handlers::restore_device))
        .route("/api/v1/admin/devices/:id/revoke-token", post(handlers::revoke_device_token))
        .route("/api/v1/admin/devices/:id/tokens", get(handlers::list_device_tokens))
        .route("/api/v1/admin/policies", post(handlers::upsert_policy).get(handlers::list_policies))
        .route("/api/v1/admin/policies/:id", get(handlers::get_policy))
        .route("/api/v1/admin/assign-policy", post(handlers::assign_policy))
        .route(
            "/api/v1/admin/devices/:id/assignments",
            get(handlers::list_assignments).delete(handlers::clear_assignments),
        )
        .route(
            "/api/v1/admin/devices/:id/assignments/:policy_id",
            axum::routing::delete(handlers::delete_assignment),
        )
        .route("/api/v1/admin/runs", get(handlers::list_runs))
        .route("/api/v1/admin/runs/:id", get(handlers::get_run))
        .route("/api/v1/admin/audit", get(handlers::list_audit))
        .route("/api/v1/admin/maintenance/prune", post(handlers::prune))
        .route_layer(middleware::from_fn_with_state(state.clone(), admin_auth))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit_ip))
        .layer(RequestBodyLimitLayer::new(config.max_request_body_bytes_default))
        .layer(DefaultBodyLimit::disable());

    public
        .merge(device)
        .merge(device_reports)
        .merge(admin)
        .layer(middleware::from_fn(crate::auth::request_id))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::util::ServiceExt;

    use baseliner_config::BaselinerConfig;
    use baseliner_store::InMemoryStore;

    use crate::rate_limit::TokenBucketLimiter;

    fn test_config() -> BaselinerConfig {
        BaselinerConfig {
            database_url: String::new(),
            admin_key: "test-admin-key".to_string(),
            token_pepper: b"test-pepper".to_vec(),
            max_request_body_bytes_default: 1024 * 1024,
            max_request_body_bytes_device_reports: 10 * 1024 * 1024,
            max_run_items: 5_000,
            max_log_events: 20_000,
            rate_limit_enabled: false,
            rate_limit_reports_per_minute: 30,
            rate_limit_reports_burst: 10,
            rate_limit_ip_per_minute: 120,
            rate_limit_ip_burst: 40,
            bind: String::new(),
            port: 0,
            maintenance_interval_seconds: 3600,
            maintenance_keep_days: 90,
            maintenance_keep_runs_per_device: 200,
            maintenance_batch_size: 500,
        }
    }

    fn test_app() -> Router {
        let store = Arc::new(InMemoryStore::new());
        let config = Arc::new(test_config());
        let limiter = Arc::new(TokenBucketLimiter::new());
        build_app(store, config, limiter)
    }

    #[tokio::test]
    async fn health_returns_200_without_auth() {
        let app = test_app();
        let resp = app.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn admin_route_without_key_returns_401() {
        let app = test_app();
        let resp = app
            .oneshot(Request::builder().uri("/api/v1/admin/devices").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn admin_route_with_wrong_key_returns_401() {
        let app = test_app();
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/admin/devices")
                    .header("X-Admin-Key", "wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn admin_route_with_correct_key_returns_200() {
        let app = test_app();
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/admin/devices")
                    .header("X-Admin-Key", "test-admin-key")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn device_route_without_token_returns_401() {
        let app = test_app();
        let resp = app
            .oneshot(Request::builder().uri("/api/v1/device/policy").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    async fn json_body(resp: axum::response::Response) -> serde_json::Value {
        use http_body_util::BodyExt;
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn admin_post(app: &Router, path: &str, body: serde_json::Value) -> serde_json::Value {
        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(path)
                    .header("X-Admin-Key", "test-admin-key")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(resp.status().is_success(), "{path} returned {}", resp.status());
        json_body(resp).await
    }

    #[tokio::test]
    async fn full_enroll_policy_report_lifecycle() {
        let app = test_app();

        let minted = admin_post(
            &app,
            "/api/v1/admin/enroll-tokens",
            serde_json::json!({ "note": "laptop fleet" }),
        )
        .await;
        let enroll_token = minted["token"].as_str().unwrap().to_string();

        let enrolled = admin_post(
            &app,
            "/api/v1/enroll",
            serde_json::json!({
                "enroll_token": enroll_token,
                "device_key": "laptop-001",
                "metadata": { "hostname": "LAPTOP-001", "os": "windows", "os_version": "11", "arch": "x86_64", "agent_version": "1.0.0" },
            }),
        )
        .await;
        assert_eq!(enrolled["status"], "created");
        let device_token = enrolled["token"].as_str().unwrap().to_string();

        let policy_resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/device/policy")
                    .header("Authorization", format!("Bearer {device_token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(policy_resp.status(), StatusCode::OK);
        let policy = json_body(policy_resp).await;
        assert_eq!(policy["resources"].as_array().unwrap().len(), 0);

        let report_resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/device/reports")
                    .header("Authorization", format!("Bearer {device_token}"))
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({
                            "started_at": "2026-01-01T00:00:00Z",
                            "ended_at": "2026-01-01T00:00:05Z",
                            "status": "succeeded",
                            "agent_version": "1.0.0",
                            "effective_policy_hash": policy["hash"],
                            "policy_snapshot": {},
                            "summary": {},
                            "items": [],
                            "logs": [],
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(report_resp.status(), StatusCode::CREATED);
        let report = json_body(report_resp).await;
        assert!(report["run_id"].is_string());

        let runs = admin_post(&app, "/api/v1/admin/maintenance/prune", serde_json::json!({ "keep_days": 365, "keep_runs_per_device": 10, "dry_run": true })).await;
        assert_eq!(runs["runs_deleted"], 0);
    }

    async fn enroll_device(app: &Router, device_key: &str) -> (String, String) {
        let minted = admin_post(app, "/api/v1/admin/enroll-tokens", serde_json::json!({})).await;
        let enroll_token = minted["token"].as_str().unwrap().to_string();
        let enrolled = admin_post(
            app,
            "/api/v1/enroll",
            serde_json::json!({
                "enroll_token": enroll_token,
                "device_key": device_key,
                "metadata": { "hostname": "h", "os": "windows", "os_version": "11", "arch": "x86_64", "agent_version": "1.0.0" },
            }),
        )
        .await;
        let device_id = enrolled["device_id"].as_str().unwrap().to_string();
        let device_token = enrolled["token"].as_str().unwrap().to_string();
        (device_id, device_token)
    }

    async fn get_policy_status(app: &Router, device_token: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/device/policy")
                    .header("Authorization", format!("Bearer {device_token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        (status, json_body(resp).await)
    }

    #[tokio::test]
    async fn rotated_device_token_is_rejected_as_revoked_not_inactive() {
        let app = test_app();
        let (device_id, device_token) = enroll_device(&app, "laptop-002").await;

        admin_post(&app, &format!("/api/v1/admin/devices/{device_id}/revoke-token"), serde_json::json!({})).await;

        let (status, body) = get_policy_status(&app, &device_token).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["type"], "auth.revoked");
    }

    #[tokio::test]
    async fn soft_deleted_device_token_is_rejected() {
        let app = test_app();
        let (device_id, device_token) = enroll_device(&app, "laptop-003").await;

        app.clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/v1/admin/devices/{device_id}"))
                    .header("X-Admin-Key", "test-admin-key")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        // soft-delete cascades into revoking the device's active token, so
        // the rejection surfaces as auth.revoked here -- the device_inactive
        // path is covered at the store layer for devices that go inactive
        // without a token revocation alongside it.
        let (status, body) = get_policy_status(&app, &device_token).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["type"], "auth.revoked");
    }

    #[tokio::test]
    async fn rate_limited_response_carries_retry_after() {
        let mut config = test_config();
        config.rate_limit_enabled = true;
        config.rate_limit_ip_per_minute = 60;
        config.rate_limit_ip_burst = 1;
        let store = Arc::new(InMemoryStore::new());
        let limiter = Arc::new(TokenBucketLimiter::new());
        let app = build_app(store, Arc::new(config), limiter);

        let first = app.clone().oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry_after = second.headers().get(axum::http::header::RETRY_AFTER).expect("Retry-After header");
        assert!(retry_after.to_str().unwrap().parse::<u64>().unwrap() >= 1);
    }
}
