use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use baseliner_audit::AuditContext;
use baseliner_compiler::{compile, AssignmentInput};
use baseliner_crypto::{hash_token, mint_token};
use baseliner_domain::{
    Actor, AssignmentId, AssignmentMode, Device, DeviceAuthToken, DeviceId, DeviceMetadata,
    DeviceStatus, EnrollTokenId, PolicyDocument, PolicyId, DEFAULT_TENANT_ID,
};
use baseliner_ingest::{validate, RunSubmission};
use baseliner_store::{EnrollOutcome, IngestOutcome};

use crate::auth::CorrelationId;
use crate::error::{ApiError, ErrorKind};
use crate::state::AppState;

fn ctx(actor: Actor, correlation: &Option<Extension<CorrelationId>>) -> AuditContext {
    AuditContext::new(DEFAULT_TENANT_ID, actor, correlation.as_ref().map(|c| c.0 .0.clone()))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
pub struct EnrollRequest {
    pub enroll_token: String,
    pub device_key: String,
    #[serde(default)]
    pub metadata: DeviceMetadata,
}

pub async fn enroll(
    State(state): State<AppState>,
    correlation: Option<Extension<CorrelationId>>,
    Json(req): Json<EnrollRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let hash = hash_token(&state.config.token_pepper, req.enroll_token.as_bytes());
    let token = state
        .store
        .find_enroll_token_by_hash(&hash)
        .await?
        .ok_or_else(|| ApiError::new(ErrorKind::AuthInvalid, "invalid enroll token"))?;

    let minted = mint_token(&state.config.token_pepper);
    let audit_ctx = ctx(Actor::Device, &correlation);
    let (device_id, outcome, verification) = state
        .store
        .enroll_device(DEFAULT_TENANT_ID, token.id, &req.device_key, &req.metadata, &minted, &audit_ctx)
        .await?;

    use baseliner_domain::TokenVerification;
    match verification {
        TokenVerification::Valid(()) => {
            let status = match outcome {
                EnrollOutcome::Created => StatusCode::CREATED,
                EnrollOutcome::Reenrolled => StatusCode::OK,
            };
            let outcome_str = match outcome {
                EnrollOutcome::Created => "created",
                EnrollOutcome::Reenrolled => "reenrolled",
            };
            Ok((status, Json(json!({ "device_id": device_id, "token": minted.raw, "status": outcome_str }))))
        }
        TokenVerification::Revoked => Err(ApiError::new(ErrorKind::AuthRevoked, "enroll token revoked")),
        TokenVerification::Expired
        | TokenVerification::Used
        | TokenVerification::NotFound
        | TokenVerification::DeviceInactive => {
            Err(ApiError::new(ErrorKind::AuthInvalid, "enroll token is no longer usable"))
        }
    }
}

pub async fn get_device_policy(
    State(state): State<AppState>,
    Extension(device): Extension<Device>,
) -> Result<Json<Value>, ApiError> {
    let assignments = state.store.list_assignments_for_device(device.id).await?;
    let inputs =
        assignments.into_iter().map(|(assignment, policy)| AssignmentInput { assignment, policy }).collect();
    let compiled = compile(inputs);
    state.store.touch_device_last_seen(device.id).await?;

    Ok(Json(json!({
        "hash": compiled.hash,
        "resources": compiled.document.resources,
    })))
}

pub async fn post_device_report(
    State(state): State<AppState>,
    Extension(device): Extension<Device>,
    correlation: Option<Extension<CorrelationId>>,
    Json(submission): Json<RunSubmission>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    validate(&submission, &state.config)?;
    let correlation_id = correlation.map(|c| c.0 .0);
    let outcome =
        state.store.ingest_run(device.tenant_id, device.id, &submission, correlation_id).await?;
    state.store.touch_device_last_seen(device.id).await?;

    let (status, run_id) = match outcome {
        IngestOutcome::Created(id) => (StatusCode::CREATED, id),
        IngestOutcome::Duplicate(id) => (StatusCode::OK, id),
    };
    Ok((status, Json(json!({ "run_id": run_id }))))
}

#[derive(Debug, Deserialize)]
pub struct CreateEnrollTokenRequest {
    pub expires_in_seconds: Option<i64>,
    pub note: Option<String>,
}

pub async fn create_enroll_token(
    State(state): State<AppState>,
    correlation: Option<Extension<CorrelationId>>,
    Json(req): Json<CreateEnrollTokenRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let minted = mint_token(&state.config.token_pepper);
    let expires_at = req.expires_in_seconds.map(|secs| Utc::now() + Duration::seconds(secs));
    let audit_ctx = ctx(Actor::Admin, &correlation);
    let id = state
        .store
        .create_enroll_token(DEFAULT_TENANT_ID, &minted, expires_at, req.note, &audit_ctx)
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id, "token": minted.raw, "expires_at": expires_at }))))
}

pub async fn list_enroll_tokens(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let tokens = state.store.list_enroll_tokens(DEFAULT_TENANT_ID).await?;
    let now = Utc::now();
    let view: Vec<Value> = tokens
        .iter()
        .map(|t| {
            json!({
                "id": t.id,
                "expires_at": t.expires_at,
                "used_at": t.used_at,
                "revoked_at": t.revoked_at,
                "note": t.note,
                "created_at": t.created_at,
                "is_live": t.is_live(now),
            })
        })
        .collect();
    Ok(Json(json!({ "items": view })))
}

pub async fn revoke_enroll_token(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    correlation: Option<Extension<CorrelationId>>,
) -> Result<Json<Value>, ApiError> {
    let audit_ctx = ctx(Actor::Admin, &correlation);
    state.store.revoke_enroll_token(EnrollTokenId(id), &audit_ctx).await?;
    Ok(Json(json!({})))
}

#[derive(Debug, Deserialize)]
pub struct ListDevicesQuery {
    pub status: Option<DeviceStatus>,
    pub cursor: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

pub async fn list_devices(
    State(state): State<AppState>,
    Query(q): Query<ListDevicesQuery>,
) -> Result<Json<Value>, ApiError> {
    let page = state
        .store
        .list_devices(DEFAULT_TENANT_ID, q.status, q.cursor.as_deref(), q.limit)
        .await?;
    Ok(Json(json!({ "items": page.items, "next_cursor": page.next_cursor })))
}

pub async fn get_device_debug(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let device_id = DeviceId(id);
    let device = state
        .store
        .get_device(device_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("device not found: {device_id}")))?;

    let assignments = state.store.list_assignments_for_device(device_id).await?;
    let inputs: Vec<AssignmentInput> = assignments
        .iter()
        .cloned()
        .map(|(assignment, policy)| AssignmentInput { assignment, policy })
        .collect();
    let compiled = compile(inputs);

    let runs_page = state.store.list_runs(device.tenant_id, Some(device_id), None, 1).await?;
    let (last_run, last_run_items) = match runs_page.items.into_iter().next() {
        Some(run) => {
            let detail = state.store.get_run(run.id).await?;
            match detail {
                Some((run, items, _logs)) => (Some(run), items),
                None => (None, Vec::new()),
            }
        }
        None => (None, Vec::new()),
    };

    Ok(Json(json!({
        "device": device,
        "assignments": assignments.iter().map(|(a, p)| json!({
            "assignment": a,
            "policy_name": p.as_ref().map(|p| p.name.clone()),
        })).collect::<Vec<_>>(),
        "effective_policy": {
            "hash": compiled.hash,
            "compile": {
                "resources": compiled.document.resources,
                "conflicts": compiled.conflicts,
                "skipped": compiled.skipped,
            },
        },
        "last_run": last_run,
        "last_run_items": last_run_items,
    })))
}

pub async fn delete_device(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    correlation: Option<Extension<CorrelationId>>,
) -> Result<Json<Value>, ApiError> {
    let audit_ctx = ctx(Actor::Admin, &correlation);
    state.store.soft_delete_device(DeviceId(id), &audit_ctx).await?;
    Ok(Json(json!({})))
}

pub async fn restore_device(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    correlation: Option<Extension<CorrelationId>>,
) -> Result<Json<Value>, ApiError> {
    let device_id = DeviceId(id);
    let device = state
        .store
        .get_device(device_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("device not found: {device_id}")))?;
    if device.is_active() {
        return Err(ApiError::conflict("device is already active"));
    }

    let audit_ctx = ctx(Actor::Admin, &correlation);
    state.store.restore_device(device_id, &audit_ctx).await?;
    let minted = mint_token(&state.config.token_pepper);
    state.store.rotate_device_token(device_id, &minted, &audit_ctx).await?;
    Ok(Json(json!({ "device_id": device_id, "token": minted.raw })))
}

pub async fn revoke_device_token(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    correlation: Option<Extension<CorrelationId>>,
) -> Result<Json<Value>, ApiError> {
    let device_id = DeviceId(id);
    let audit_ctx = ctx(Actor::Admin, &correlation);
    let minted = mint_token(&state.config.token_pepper);
    state.store.rotate_device_token(device_id, &minted, &audit_ctx).await?;
    Ok(Json(json!({ "device_id": device_id, "token": minted.raw })))
}

pub async fn list_device_tokens(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let tokens = state.store.list_device_tokens(DeviceId(id)).await?;
    let view: Vec<Value> = tokens
        .iter()
        .map(|t: &DeviceAuthToken| {
            json!({
                "id": t.id,
                "prefix": t.prefix,
                "issued_at": t.issued_at,
                "revoked_at": t.revoked_at,
                "last_used_at": t.last_used_at,
                "is_active": t.is_active(),
            })
        })
        .collect();
    Ok(Json(json!({ "items": view })))
}

#[derive(Debug, Deserialize)]
pub struct UpsertPolicyRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub document: PolicyDocument,
}

pub async fn upsert_policy(
    State(state): State<AppState>,
    correlation: Option<Extension<CorrelationId>>,
    Json(req): Json<UpsertPolicyRequest>,
) -> Result<Json<Value>, ApiError> {
    let audit_ctx = ctx(Actor::Admin, &correlation);
    let id = state
        .store
        .upsert_policy(DEFAULT_TENANT_ID, &req.name, &req.description, &req.document, &audit_ctx)
        .await?;
    Ok(Json(json!({ "id": id })))
}

pub async fn list_policies(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let policies = state.store.list_policies(DEFAULT_TENANT_ID).await?;
    Ok(Json(json!({ "items": policies })))
}

pub async fn get_policy(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Value>, ApiError> {
    let policy = state
        .store
        .get_policy(PolicyId(id))
        .await?
        .ok_or_else(|| ApiError::not_found(format!("policy not found: {id}")))?;
    Ok(Json(json!(policy)))
}

#[derive(Debug, Deserialize)]
pub struct AssignPolicyRequest {
    pub device_id: Uuid,
    pub policy_id: Uuid,
    pub priority: i32,
    pub mode: AssignmentMode,
}

pub async fn assign_policy(
    State(state): State<AppState>,
    correlation: Option<Extension<CorrelationId>>,
    Json(req): Json<AssignPolicyRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let audit_ctx = ctx(Actor::Admin, &correlation);
    let id = state
        .store
        .upsert_assignment(DeviceId(req.device_id), PolicyId(req.policy_id), req.priority, req.mode, &audit_ctx)
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

pub async fn list_assignments(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let assignments = state.store.list_assignments_for_device(DeviceId(id)).await?;
    let view: Vec<Value> = assignments
        .iter()
        .map(|(a, p)| json!({ "assignment": a, "policy_name": p.as_ref().map(|p| p.name.clone()) }))
        .collect();
    Ok(Json(json!({ "items": view })))
}

pub async fn clear_assignments(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    correlation: Option<Extension<CorrelationId>>,
) -> Result<Json<Value>, ApiError> {
    let audit_ctx = ctx(Actor::Admin, &correlation);
    let assignments = state.store.list_assignments_for_device(DeviceId(id)).await?;
    for (assignment, _policy) in &assignments {
        state.store.delete_assignment(assignment.id, &audit_ctx).await?;
    }
    Ok(Json(json!({ "removed": assignments.len() })))
}

pub async fn delete_assignment(
    State(state): State<AppState>,
    Path((id, policy_id)): Path<(Uuid, Uuid)>,
    correlation: Option<Extension<CorrelationId>>,
) -> Result<Json<Value>, ApiError> {
    let policy_id = PolicyId(policy_id);
    let assignments = state.store.list_assignments_for_device(DeviceId(id)).await?;
    let target = assignments
        .iter()
        .find(|(a, _)| a.policy_id == policy_id)
        .ok_or_else(|| ApiError::not_found("no assignment for that policy on this device"))?;

    let audit_ctx = ctx(Actor::Admin, &correlation);
    let assignment_id: AssignmentId = target.0.id;
    state.store.delete_assignment(assignment_id, &audit_ctx).await?;
    Ok(Json(json!({})))
}

#[derive(Debug, Deserialize)]
pub struct ListRunsQuery {
    pub device_id: Option<Uuid>,
    pub cursor: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

pub async fn list_runs(
    State(state): State<AppState>,
    Query(q): Query<ListRunsQuery>,
) -> Result<Json<Value>, ApiError> {
    let page = state
        .store
        .list_runs(DEFAULT_TENANT_ID, q.device_id.map(DeviceId), q.cursor.as_deref(), q.limit)
        .await?;
    Ok(Json(json!({ "items": page.items, "next_cursor": page.next_cursor })))
}

pub async fn get_run(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Value>, ApiError> {
    let (run, items, logs) = state
        .store
        .get_run(baseliner_domain::RunId(id))
        .await?
        .ok_or_else(|| ApiError::not_found(format!("run not found: {id}")))?;
    Ok(Json(json!({ "run": run, "items": items, "logs": logs })))
}

#[derive(Debug, Deserialize)]
pub struct ListAuditQuery {
    pub action: Option<String>,
    pub target_type: Option<String>,
    pub target_id: Option<String>,
    pub cursor: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

pub async fn list_audit(
    State(state): State<AppState>,
    Query(q): Query<ListAuditQuery>,
) -> Result<Json<Value>, ApiError> {
    let filter = baseliner_domain::AuditFilter {
        action: q.action,
        target_type: q.target_type,
        target_id: q.target_id,
    };
    let page = state.store.list_audit(DEFAULT_TENANT_ID, &filter, q.cursor.as_deref(), q.limit).await?;
    Ok(Json(json!({ "items": page.items, "next_cursor": page.next_cursor })))
}

#[derive(Debug, Deserialize)]
pub struct PruneRequest {
    pub keep_days: i64,
    pub keep_runs_per_device: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default)]
    pub dry_run: bool,
}

fn default_batch_size() -> u32 {
    500
}

pub async fn prune(
    State(state): State<AppState>,
    Json(req): Json<PruneRequest>,
) -> Result<Json<Value>, ApiError> {
    let report = state
        .store
        .prune(req.keep_days, req.keep_runs_per_device, req.batch_size, req.dry_run)
        .await?;
    Ok(Json(json!(report)))
}
