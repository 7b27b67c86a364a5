use async_trait::async_trait;

use baseliner_audit::AuditContext;
use baseliner_domain::{
    AuditLogEntry, DeviceAuthToken, DeviceId, DeviceMetadata, DeviceStatus, EnrollToken,
    EnrollTokenId, MintedToken, Policy, PolicyAssignment, PolicyDocument, PolicyId, Run, RunId,
    RunItem, TenantId, TokenVerification,
};
use baseliner_ingest::RunSubmission;

use crate::error::StoreError;
use crate::page::Page;

/// A single mutating outcome from an idempotent enroll call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollOutcome {
    Created,
    Reenrolled,
}

/// The full result of ingesting one run: its id and whether this call wrote
/// a new row or returned an existing one (spec 4.4 idempotency).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Created(RunId),
    Duplicate(RunId),
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PruneReport {
    pub runs_deleted: u64,
    pub run_items_deleted: u64,
    pub log_events_deleted: u64,
    pub dry_run: bool,
}

/// Storage abstraction for the whole control plane. Every mutating method
/// takes an [`AuditContext`] and writes exactly one [`AuditLogEntry`] in the
/// same transaction as the mutation it describes (spec 4.6, Testable
/// Property 7) -- auditing is an explicit argument, never a hook.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    // ---- Token service (spec 4.1) ------------------------------------

    async fn create_enroll_token(
        &self,
        tenant_id: TenantId,
        minted: &MintedToken,
        expires_at: Option<chrono::DateTime<chrono::Utc>>,
        note: Option<String>,
        ctx: &AuditContext,
    ) -> Result<EnrollTokenId, StoreError>;

    async fn find_enroll_token_by_hash(
        &self,
        token_hash: &[u8],
    ) -> Result<Option<EnrollToken>, StoreError>;

    async fn list_enroll_tokens(&self, tenant_id: TenantId) -> Result<Vec<EnrollToken>, StoreError>;

    /// Expire a token immediately regardless of remaining lifetime (spec
    /// 4.1: "revoke sets `expires_at := now`").
    async fn revoke_enroll_token(
        &self,
        id: EnrollTokenId,
        ctx: &AuditContext,
    ) -> Result<(), StoreError>;

    /// Enroll (or re-enroll) a device by consuming a live enroll token and
    /// minting a fresh device auth token, all in one transaction. Re-using
    /// an existing `device_key` within the tenant re-enrolls that device
    /// rather than erroring (spec 4.2 idempotency).
    async fn enroll_device(
        &self,
        tenant_id: TenantId,
        enroll_token_id: EnrollTokenId,
        device_key: &str,
        metadata: &DeviceMetadata,
        device_token: &MintedToken,
        ctx: &AuditContext,
    ) -> Result<(DeviceId, EnrollOutcome, TokenVerification<()>), StoreError>;

    /// Verify a presented device bearer token, returning the owning device
    /// alongside the verification outcome. `Valid` is only returned for an
    /// un-revoked token whose device is active.
    async fn verify_device_token(
        &self,
        raw_token_hash: &[u8],
    ) -> Result<TokenVerification<(baseliner_domain::Device, DeviceAuthToken)>, StoreError>;

    async fn rotate_device_token(
        &self,
        device_id: DeviceId,
        new_token: &MintedToken,
        ctx: &AuditContext,
    ) -> Result<(), StoreError>;

    async fn revoke_device_token(
        &self,
        device_id: DeviceId,
        ctx: &AuditContext,
    ) -> Result<(), StoreError>;

    /// Every auth token a device has ever held, newest first (spec 4.2
    /// debug surface).
    async fn list_device_tokens(&self, device_id: DeviceId) -> Result<Vec<DeviceAuthToken>, StoreError>;

    // ---- Device registry (spec 4.2) -----------------------------------

    async fn get_device(&self, id: DeviceId) -> Result<Option<baseliner_domain::Device>, StoreError>;

    async fn list_devices(
        &self,
        tenant_id: TenantId,
        status: Option<DeviceStatus>,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<Page<baseliner_domain::Device>, StoreError>;

    async fn soft_delete_device(
        &self,
        device_id: DeviceId,
        ctx: &AuditContext,
    ) -> Result<(), StoreError>;

    async fn restore_device(&self, device_id: DeviceId, ctx: &AuditContext) -> Result<(), StoreError>;

    async fn touch_device_last_seen(&self, device_id: DeviceId) -> Result<(), StoreError>;

    // ---- Policy & assignment store (spec 2, 3) ------------------------

    async fn upsert_policy(
        &self,
        tenant_id: TenantId,
        name: &str,
        description: &str,
        document: &PolicyDocument,
        ctx: &AuditContext,
    ) -> Result<PolicyId, StoreError>;

    async fn get_policy(&self, id: PolicyId) -> Result<Option<Policy>, StoreError>;

    async fn list_policies(&self, tenant_id: TenantId) -> Result<Vec<Policy>, StoreError>;

    async fn upsert_assignment(
        &self,
        device_id: DeviceId,
        policy_id: PolicyId,
        priority: i32,
        mode: baseliner_domain::AssignmentMode,
        ctx: &AuditContext,
    ) -> Result<baseliner_domain::AssignmentId, StoreError>;

    async fn delete_assignment(
        &self,
        id: baseliner_domain::AssignmentId,
        ctx: &AuditContext,
    ) -> Result<(), StoreError>;

    /// Assignments for a device joined to their policy, in the canonical
    /// order from spec 4.3 (`priority ASC, created_at ASC, id ASC`). A
    /// `None` policy means the assignment references a policy row that no
    /// longer exists; an inactive policy is still returned so the compiler
    /// can record it as skipped.
    async fn list_assignments_for_device(
        &self,
        device_id: DeviceId,
    ) -> Result<Vec<(PolicyAssignment, Option<Policy>)>, StoreError>;

    // ---- Run ingestion (spec 4.4) --------------------------------------

    async fn ingest_run(
        &self,
        tenant_id: TenantId,
        device_id: DeviceId,
        submission: &RunSubmission,
        correlation_id: Option<String>,
    ) -> Result<IngestOutcome, StoreError>;

    async fn get_run(&self, id: RunId) -> Result<Option<(Run, Vec<RunItem>, Vec<baseliner_domain::LogEvent>)>, StoreError>;

    async fn list_runs(
        &self,
        tenant_id: TenantId,
        device_id: Option<DeviceId>,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<Page<Run>, StoreError>;

    // ---- Audit log (spec 4.6) ------------------------------------------

    async fn append_audit(&self, entry: AuditLogEntry) -> Result<(), StoreError>;

    async fn list_audit(
        &self,
        tenant_id: TenantId,
        filter: &baseliner_domain::AuditFilter,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<Page<AuditLogEntry>, StoreError>;

    // ---- Maintenance (spec 4.7) -----------------------------------------

    async fn prune(
        &self,
        keep_days: i64,
        keep_runs_per_device: u32,
        batch_size: u32,
        dry_run: bool,
    ) -> Result<PruneReport, StoreError>;
}
