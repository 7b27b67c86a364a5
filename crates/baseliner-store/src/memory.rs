use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use baseliner_audit::{AuditContext, Cursor};
use baseliner_domain::{
    AssignmentId, AssignmentMode, AuditFilter, AuditLogEntry, Device, DeviceAuthToken,
    DeviceAuthTokenId, DeviceId, DeviceMetadata, DeviceStatus, EnrollToken, EnrollTokenId,
    LogEvent, LogEventId, MintedToken, Policy, PolicyAssignment, PolicyDocument, PolicyId, Run,
    RunId, RunItem, RunItemId, TenantId, TokenVerification,
};
use baseliner_ingest::RunSubmission;

use crate::error::StoreError;
use crate::page::Page;
use crate::store::{EnrollOutcome, IngestOutcome, PruneReport, Store};

#[derive(Debug, Default)]
struct Inner {
    enroll_tokens: HashMap<EnrollTokenId, EnrollToken>,
    devices: HashMap<DeviceId, Device>,
    device_tokens: HashMap<DeviceAuthTokenId, DeviceAuthToken>,
    policies: HashMap<PolicyId, Policy>,
    assignments: HashMap<AssignmentId, PolicyAssignment>,
    runs: HashMap<RunId, Run>,
    run_items: HashMap<RunId, Vec<RunItem>>,
    run_logs: HashMap<RunId, Vec<LogEvent>>,
    audit: Vec<AuditLogEntry>,
}

/// In-memory [`Store`]. All data is lost on process exit. Used for unit
/// tests and local development without a Postgres instance.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_enroll_token(
        &self,
        tenant_id: TenantId,
        minted: &MintedToken,
        expires_at: Option<chrono::DateTime<Utc>>,
        note: Option<String>,
        ctx: &AuditContext,
    ) -> Result<EnrollTokenId, StoreError> {
        let id = EnrollTokenId::new();
        let token = EnrollToken {
            id,
            tenant_id,
            token_hash: minted.hash.clone(),
            expires_at,
            used_at: None,
            revoked_at: None,
            note,
            created_at: Utc::now(),
        };
        let mut guard = self.inner.write().await;
        guard.enroll_tokens.insert(id, token);
        guard.audit.push(ctx.entry(
            "enroll_token.create",
            "enroll_token",
            id.to_string(),
            None::<()>,
            None::<()>,
        ));
        Ok(id)
    }

    async fn find_enroll_token_by_hash(
        &self,
        token_hash: &[u8],
    ) -> Result<Option<EnrollToken>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.enroll_tokens.values().find(|t| t.token_hash == token_hash).cloned())
    }

    async fn list_enroll_tokens(&self, tenant_id: TenantId) -> Result<Vec<EnrollToken>, StoreError> {
        let guard = self.inner.read().await;
        let mut tokens: Vec<EnrollToken> =
            guard.enroll_tokens.values().filter(|t| t.tenant_id == tenant_id).cloned().collect();
        tokens.sort_by_key(|t| std::cmp::Reverse(t.created_at));
        Ok(tokens)
    }

    async fn revoke_enroll_token(&self, id: EnrollTokenId, ctx: &AuditContext) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let token = guard.enroll_tokens.get_mut(&id).ok_or(StoreError::EnrollTokenNotFound(id))?;
        let now = Utc::now();
        token.revoked_at = Some(now);
        token.expires_at = Some(token.expires_at.map_or(now, |e| e.min(now)));
        guard.audit.push(ctx.entry("enroll_token.revoke", "enroll_token", id.to_string(), None::<()>, None::<()>));
        Ok(())
    }

    async fn enroll_device(
        &self,
        tenant_id: TenantId,
        enroll_token_id: EnrollTokenId,
        device_key: &str,
        metadata: &DeviceMetadata,
        device_token: &MintedToken,
        ctx: &AuditContext,
    ) -> Result<(DeviceId, EnrollOutcome, TokenVerification<()>), StoreError> {
        let mut guard = self.inner.write().await;

        let Some(token) = guard.enroll_tokens.get(&enroll_token_id).cloned() else {
            return Ok((DeviceId::default(), EnrollOutcome::Created, TokenVerification::NotFound));
        };
        if token.revoked_at.is_some() {
            return Ok((DeviceId::default(), EnrollOutcome::Created, TokenVerification::Revoked));
        }
        if token.used_at.is_some() {
            return Ok((DeviceId::default(), EnrollOutcome::Created, TokenVerification::Used));
        }
        if !token.is_live(Utc::now()) {
            return Ok((DeviceId::default(), EnrollOutcome::Created, TokenVerification::Expired));
        }

        let existing = guard
            .devices
            .values()
            .find(|d| d.tenant_id == tenant_id && d.device_key == device_key)
            .map(|d| d.id);

        let (device_id, outcome) = match existing {
            Some(id) => {
                let device = guard.devices.get_mut(&id).expect("just found");
                device.hostname = metadata.hostname.clone();
                device.os = metadata.os.clone();
                device.os_version = metadata.os_version.clone();
                device.arch = metadata.arch.clone();
                device.agent_version = metadata.agent_version.clone();
                device.tags = metadata.tags.clone();
                device.status = DeviceStatus::Active;
                device.deleted_at = None;
                (id, EnrollOutcome::Reenrolled)
            }
            None => {
                let id = DeviceId::new();
                let device = Device {
                    id,
                    tenant_id,
                    device_key: device_key.to_string(),
                    hostname: metadata.hostname.clone(),
                    os: metadata.os.clone(),
                    os_version: metadata.os_version.clone(),
                    arch: metadata.arch.clone(),
                    agent_version: metadata.agent_version.clone(),
                    tags: metadata.tags.clone(),
                    status: DeviceStatus::Active,
                    last_seen_at: None,
                    deleted_at: None,
                    created_at: Utc::now(),
                };
                guard.devices.insert(id, device);
                (id, EnrollOutcome::Created)
            }
        };

        for existing_token in guard.device_tokens.values_mut() {
            if existing_token.device_id == device_id && existing_token.revoked_at.is_none() {
                existing_token.revoked_at = Some(Utc::now());
            }
        }
        let auth_token_id = DeviceAuthTokenId::new();
        guard.device_tokens.insert(
            auth_token_id,
            DeviceAuthToken {
                id: auth_token_id,
                device_id,
                tenant_id,
                token_hash: device_token.hash.clone(),
                prefix: device_token.prefix.clone(),
                issued_at: Utc::now(),
                revoked_at: None,
                last_used_at: None,
            },
        );

        let enroll_token = guard.enroll_tokens.get_mut(&enroll_token_id).expect("checked above");
        enroll_token.used_at = Some(Utc::now());

        guard.audit.push(ctx.entry(
            "device.enroll",
            "device",
            device_id.to_string(),
            None::<()>,
            None::<()>,
        ));

        Ok((device_id, outcome, TokenVerification::Valid(())))
    }

    async fn verify_device_token(
        &self,
        raw_token_hash: &[u8],
    ) -> Result<TokenVerification<(Device, DeviceAuthToken)>, StoreError> {
        let guard = self.inner.read().await;
        let Some(token) = guard.device_tokens.values().find(|t| t.token_hash == raw_token_hash) else {
            return Ok(TokenVerification::NotFound);
        };
        if token.revoked_at.is_some() {
            return Ok(TokenVerification::Revoked);
        }
        let Some(device) = guard.devices.get(&token.device_id) else {
            return Ok(TokenVerification::NotFound);
        };
        if !device.is_active() {
            return Ok(TokenVerification::DeviceInactive);
        }
        Ok(TokenVerification::Valid((device.clone(), token.clone())))
    }

    async fn rotate_device_token(
        &self,
        device_id: DeviceId,
        new_token: &MintedToken,
        ctx: &AuditContext,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        for token in guard.device_tokens.values_mut() {
            if token.device_id == device_id && token.revoked_at.is_none() {
                token.revoked_at = Some(Utc::now());
            }
        }
        let id = DeviceAuthTokenId::new();
        let tenant_id = guard
            .devices
            .get(&device_id)
            .map(|d| d.tenant_id)
            .ok_or(StoreError::DeviceNotFound(device_id))?;
        guard.device_tokens.insert(
            id,
            DeviceAuthToken {
                id,
                device_id,
                tenant_id,
                token_hash: new_token.hash.clone(),
                prefix: new_token.prefix.clone(),
                issued_at: Utc::now(),
                revoked_at: None,
                last_used_at: None,
            },
        );
        guard.audit.push(ctx.entry(
            "device.rotate_token",
            "device",
            device_id.to_string(),
            None::<()>,
            None::<()>,
        ));
        Ok(())
    }

    async fn revoke_device_token(&self, device_id: DeviceId, ctx: &AuditContext) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        for token in guard.device_tokens.values_mut() {
            if token.device_id == device_id && token.revoked_at.is_none() {
                token.revoked_at = Some(Utc::now());
            }
        }
        guard.audit.push(ctx.entry(
            "device.revoke_token",
            "device",
            device_id.to_string(),
            None::<()>,
            None::<()>,
        ));
        Ok(())
    }

    async fn list_device_tokens(&self, device_id: DeviceId) -> Result<Vec<DeviceAuthToken>, StoreError> {
        let guard = self.inner.read().await;
        let mut tokens: Vec<DeviceAuthToken> =
            guard.device_tokens.values().filter(|t| t.device_id == device_id).cloned().collect();
        tokens.sort_by_key(|t| std::cmp::Reverse(t.issued_at));
        Ok(tokens)
    }

    async fn get_device(&self, id: DeviceId) -> Result<Option<Device>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.devices.get(&id).cloned())
    }

    async fn list_devices(
        &self,
        tenant_id: TenantId,
        status: Option<DeviceStatus>,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<Page<Device>, StoreError> {
        let guard = self.inner.read().await;
        let after = cursor.map(Cursor::decode).transpose().map_err(|_| StoreError::InvalidCursor)?;

        let mut devices: Vec<Device> = guard
            .devices
            .values()
            .filter(|d| d.tenant_id == tenant_id)
            .filter(|d| status.is_none_or(|s| d.status == s))
            .cloned()
            .collect();
        devices.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.0.cmp(&a.id.0)));

        if let Some(after) = after {
            devices.retain(|d| (d.created_at, d.id.0) < (after.ts, after.id));
        }

        let has_more = devices.len() > limit as usize;
        devices.truncate(limit as usize);
        let next_cursor = if has_more {
            devices.last().map(|d| Cursor { ts: d.created_at, id: d.id.0 }.encode())
        } else {
            None
        };
        Ok(Page { items: devices, next_cursor })
    }

    async fn soft_delete_device(&self, device_id: DeviceId, ctx: &AuditContext) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        {
            let device = guard.devices.get_mut(&device_id).ok_or(StoreError::DeviceNotFound(device_id))?;
            device.status = DeviceStatus::Inactive;
            device.deleted_at = Some(Utc::now());
        }
        for token in guard.device_tokens.values_mut() {
            if token.device_id == device_id && token.revoked_at.is_none() {
                token.revoked_at = Some(Utc::now());
            }
        }
        guard.audit.push(ctx.entry("device.soft_delete", "device", device_id.to_string(), None::<()>, None::<()>));
        Ok(())
    }

    async fn restore_device(&self, device_id: DeviceId, ctx: &AuditContext) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let device = guard.devices.get_mut(&device_id).ok_or(StoreError::DeviceNotFound(device_id))?;
        device.status = DeviceStatus::Active;
        device.deleted_at = None;
        guard.audit.push(ctx.entry("device.restore", "device", device_id.to_string(), None::<()>, None::<()>));
        Ok(())
    }

    async fn touch_device_last_seen(&self, device_id: DeviceId) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let device = guard.devices.get_mut(&device_id).ok_or(StoreError::DeviceNotFound(device_id))?;
        let now = Utc::now();
        device.last_seen_at = Some(device.last_seen_at.map_or(now, |prev| prev.max(now)));
        Ok(())
    }

    async fn upsert_policy(
        &self,
        tenant_id: TenantId,
        name: &str,
        description: &str,
        document: &PolicyDocument,
        ctx: &AuditContext,
    ) -> Result<PolicyId, StoreError> {
        let mut guard = self.inner.write().await;
        let existing = guard.policies.values().find(|p| p.tenant_id == tenant_id && p.name == name).map(|p| p.id);
        let id = match existing {
            Some(id) => {
                let policy = guard.policies.get_mut(&id).expect("just found");
                policy.description = description.to_string();
                policy.document = document.clone();
                policy.updated_at = Utc::now();
                policy.schema_version += 1;
                id
            }
            None => {
                let id = PolicyId::new();
                let now = Utc::now();
                guard.policies.insert(
                    id,
                    Policy {
                        id,
                        tenant_id,
                        name: name.to_string(),
                        description: description.to_string(),
                        schema_version: 1,
                        is_active: true,
                        document: document.clone(),
                        created_at: now,
                        updated_at: now,
                    },
                );
                id
            }
        };
        guard.audit.push(ctx.entry("policy.upsert", "policy", id.to_string(), None::<()>, None::<()>));
        Ok(id)
    }

    async fn get_policy(&self, id: PolicyId) -> Result<Option<Policy>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.policies.get(&id).cloned())
    }

    async fn list_policies(&self, tenant_id: TenantId) -> Result<Vec<Policy>, StoreError> {
        let guard = self.inner.read().await;
        let mut policies: Vec<Policy> = guard.policies.values().filter(|p| p.tenant_id == tenant_id).cloned().collect();
        policies.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(policies)
    }

    async fn upsert_assignment(
        &self,
        device_id: DeviceId,
        policy_id: PolicyId,
        priority: i32,
        mode: AssignmentMode,
        ctx: &AuditContext,
    ) -> Result<AssignmentId, StoreError> {
        let mut guard = self.inner.write().await;
        let tenant_id = guard.devices.get(&device_id).map(|d| d.tenant_id).ok_or(StoreError::DeviceNotFound(device_id))?;
        let existing = guard
            .assignments
            .values()
            .find(|a| a.device_id == device_id && a.policy_id == policy_id)
            .map(|a| a.id);
        let id = match existing {
            Some(id) => {
                let assignment = guard.assignments.get_mut(&id).expect("just found");
                assignment.priority = priority;
                assignment.mode = mode;
                id
            }
            None => {
                let id = AssignmentId::new();
                guard.assignments.insert(
                    id,
                    PolicyAssignment { id, tenant_id, device_id, policy_id, priority, mode, created_at: Utc::now() },
                );
                id
            }
        };
        guard.audit.push(ctx.entry("assignment.upsert", "assignment", id.to_string(), None::<()>, None::<()>));
        Ok(id)
    }

    async fn delete_assignment(&self, id: AssignmentId, ctx: &AuditContext) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.assignments.remove(&id);
        guard.audit.push(ctx.entry("assignment.delete", "assignment", id.to_string(), None::<()>, None::<()>));
        Ok(())
    }

    async fn list_assignments_for_device(
        &self,
        device_id: DeviceId,
    ) -> Result<Vec<(PolicyAssignment, Option<Policy>)>, StoreError> {
        let guard = self.inner.read().await;
        let mut assignments: Vec<PolicyAssignment> =
            guard.assignments.values().filter(|a| a.device_id == device_id).cloned().collect();
        assignments.sort_by(|a, b| {
            a.priority.cmp(&b.priority).then(a.created_at.cmp(&b.created_at)).then(a.id.0.cmp(&b.id.0))
        });
        Ok(assignments.into_iter().map(|a| {
            let policy = guard.policies.get(&a.policy_id).cloned();
            (a, policy)
        }).collect())
    }

    async fn ingest_run(
        &self,
        tenant_id: TenantId,
        device_id: DeviceId,
        submission: &RunSubmission,
        correlation_id: Option<String>,
    ) -> Result<IngestOutcome, StoreError> {
        let mut guard = self.inner.write().await;

        if let Some(cid) = &correlation_id {
            if let Some(existing) = guard.runs.values().find(|r| r.device_id == device_id && r.correlation_id.as_deref() == Some(cid.as_str())) {
                return Ok(IngestOutcome::Duplicate(existing.id));
            }
        }

        let run_id = RunId::new();
        let run = Run {
            id: run_id,
            tenant_id,
            device_id,
            started_at: submission.started_at,
            ended_at: submission.ended_at,
            status: submission.status,
            agent_version: submission.agent_version.clone(),
            effective_policy_hash: submission.effective_policy_hash.clone(),
            policy_snapshot: submission.policy_snapshot.clone(),
            summary: submission.summary.clone(),
            correlation_id,
            created_at: Utc::now(),
        };
        guard.runs.insert(run_id, run);

        let items: Vec<RunItem> = submission
            .items
            .iter()
            .enumerate()
            .map(|(ordinal, item)| RunItem {
                id: RunItemId::new(),
                run_id,
                ordinal: ordinal as i32,
                resource_type: item.resource_type.clone(),
                resource_id: item.resource_id.clone(),
                name: item.name.clone(),
                status_detect: item.status_detect.clone(),
                status_remediate: item.status_remediate.clone(),
                status_validate: item.status_validate.clone(),
                compliant_before: item.compliant_before,
                compliant_after: item.compliant_after,
                changed: item.changed,
                evidence: item.evidence.clone(),
                error: item.error.clone(),
            })
            .collect();
        guard.run_items.insert(run_id, items);

        let logs: Vec<LogEvent> = submission
            .logs
            .iter()
            .map(|log| LogEvent {
                id: LogEventId::new(),
                run_id,
                ts: log.ts,
                level: log.level,
                message: log.message.clone(),
                data: log.data.clone(),
            })
            .collect();
        guard.run_logs.insert(run_id, logs);

        if let Some(device) = guard.devices.get_mut(&device_id) {
            let now = Utc::now();
            device.last_seen_at = Some(device.last_seen_at.map_or(now, |prev| prev.max(now)));
        }
        for token in guard.device_tokens.values_mut() {
            if token.device_id == device_id && token.revoked_at.is_none() {
                token.last_used_at = Some(Utc::now());
            }
        }

        Ok(IngestOutcome::Created(run_id))
    }

    async fn get_run(&self, id: RunId) -> Result<Option<(Run, Vec<RunItem>, Vec<LogEvent>)>, StoreError> {
        let guard = self.inner.read().await;
        let Some(run) = guard.runs.get(&id).cloned() else { return Ok(None) };
        let items = guard.run_items.get(&id).cloned().unwrap_or_default();
        let logs = guard.run_logs.get(&id).cloned().unwrap_or_default();
        Ok(Some((run, items, logs)))
    }

    async fn list_runs(
        &self,
        tenant_id: TenantId,
        device_id: Option<DeviceId>,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<Page<Run>, StoreError> {
        let guard = self.inner.read().await;
        let after = cursor.map(Cursor::decode).transpose().map_err(|_| StoreError::InvalidCursor)?;

        let mut runs: Vec<Run> = guard
            .runs
            .values()
            .filter(|r| r.tenant_id == tenant_id)
            .filter(|r| device_id.is_none_or(|d| r.device_id == d))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.0.cmp(&a.id.0)));

        if let Some(after) = after {
            runs.retain(|r| (r.created_at, r.id.0) < (after.ts, after.id));
        }

        let has_more = runs.len() > limit as usize;
        runs.truncate(limit as usize);
        let next_cursor = if has_more {
            runs.last().map(|r| Cursor { ts: r.created_at, id: r.id.0 }.encode())
        } else {
            None
        };
        Ok(Page { items: runs, next_cursor })
    }

    async fn append_audit(&self, entry: AuditLogEntry) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.audit.push(entry);
        Ok(())
    }

    async fn list_audit(
        &self,
        tenant_id: TenantId,
        filter: &AuditFilter,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<Page<AuditLogEntry>, StoreError> {
        let guard = self.inner.read().await;
        let after = cursor.map(Cursor::decode).transpose().map_err(|_| StoreError::InvalidCursor)?;

        let mut entries: Vec<AuditLogEntry> = guard
            .audit
            .iter()
            .filter(|e| e.tenant_id == tenant_id)
            .filter(|e| filter.action.as_deref().is_none_or(|a| e.action == a))
            .filter(|e| filter.target_type.as_deref().is_none_or(|t| e.target_type == t))
            .filter(|e| filter.target_id.as_deref().is_none_or(|t| e.target_id == t))
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.ts.cmp(&a.ts).then(b.id.0.cmp(&a.id.0)));

        if let Some(after) = after {
            entries.retain(|e| (e.ts, e.id.0) < (after.ts, after.id));
        }

        let has_more = entries.len() > limit as usize;
        entries.truncate(limit as usize);
        let next_cursor = if has_more {
            entries.last().map(|e| Cursor { ts: e.ts, id: e.id.0 }.encode())
        } else {
            None
        };
        Ok(Page { items: entries, next_cursor })
    }

    async fn prune(
        &self,
        keep_days: i64,
        keep_runs_per_device: u32,
        _batch_size: u32,
        dry_run: bool,
    ) -> Result<PruneReport, StoreError> {
        let mut guard = self.inner.write().await;
        let cutoff = Utc::now() - chrono::Duration::days(keep_days);

        let mut by_device: HashMap<DeviceId, Vec<RunId>> = HashMap::new();
        let mut ordered: Vec<&Run> = guard.runs.values().collect();
        ordered.sort_by_key(|r| std::cmp::Reverse(r.created_at));
        for run in &ordered {
            by_device.entry(run.device_id).or_default().push(run.id);
        }

        let mut to_delete = Vec::new();
        for run in &ordered {
            let kept_recent = by_device
                .get(&run.device_id)
                .map(|ids| ids.iter().position(|id| *id == run.id).unwrap_or(usize::MAX) < keep_runs_per_device as usize)
                .unwrap_or(false);
            if run.created_at < cutoff && !kept_recent {
                to_delete.push(run.id);
            }
        }

        let mut report = PruneReport { dry_run, ..Default::default() };
        for id in &to_delete {
            report.runs_deleted += 1;
            report.run_items_deleted += guard.run_items.get(id).map(|v| v.len() as u64).unwrap_or(0);
            report.log_events_deleted += guard.run_logs.get(id).map(|v| v.len() as u64).unwrap_or(0);
        }

        if !dry_run {
            for id in &to_delete {
                guard.runs.remove(id);
                guard.run_items.remove(id);
                guard.run_logs.remove(id);
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use baseliner_domain::{Actor, DEFAULT_TENANT_ID};
    use baseliner_ingest::{LogEventSubmission, RunItemSubmission};
    use serde_json::json;

    fn ctx() -> AuditContext {
        AuditContext::new(DEFAULT_TENANT_ID, Actor::Admin, None)
    }

    fn token(raw: &str) -> MintedToken {
        MintedToken { raw: raw.to_string(), hash: raw.as_bytes().to_vec(), prefix: raw.chars().take(6).collect() }
    }

    fn metadata() -> DeviceMetadata {
        DeviceMetadata {
            hostname: "host-1".to_string(),
            os: "windows".to_string(),
            os_version: "11".to_string(),
            arch: "x86_64".to_string(),
            agent_version: "1.0.0".to_string(),
            tags: HashMap::new(),
        }
    }

    fn submission(correlation_id: Option<&str>) -> RunSubmission {
        RunSubmission {
            started_at: Utc::now(),
            ended_at: Utc::now(),
            status: baseliner_domain::RunStatus::Succeeded,
            agent_version: "1.0.0".to_string(),
            effective_policy_hash: "deadbeef".to_string(),
            policy_snapshot: json!({}),
            summary: json!({}),
            items: vec![RunItemSubmission {
                resource_type: "winget.package".to_string(),
                resource_id: "7zip".to_string(),
                name: "7-Zip".to_string(),
                status_detect: "absent".to_string(),
                status_remediate: Some("installed".to_string()),
                status_validate: Some("present".to_string()),
                compliant_before: Some(false),
                compliant_after: Some(true),
                changed: true,
                evidence: json!({}),
                error: None,
            }],
            logs: vec![LogEventSubmission {
                ts: Utc::now(),
                level: baseliner_domain::LogLevel::Info,
                message: "ok".to_string(),
                data: json!({}),
            }],
            correlation_id: correlation_id.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn enroll_token_rejects_reuse_after_success() {
        let store = InMemoryStore::new();
        let minted = token("enroll-a");
        let id = store.create_enroll_token(DEFAULT_TENANT_ID, &minted, None, None, &ctx()).await.unwrap();

        let (device_id, outcome, verification) = store
            .enroll_device(DEFAULT_TENANT_ID, id, "device-key-1", &metadata(), &token("dev-a"), &ctx())
            .await
            .unwrap();
        assert_eq!(outcome, EnrollOutcome::Created);
        assert!(matches!(verification, TokenVerification::Valid(())));

        let (_, _, second) = store
            .enroll_device(DEFAULT_TENANT_ID, id, "device-key-2", &metadata(), &token("dev-b"), &ctx())
            .await
            .unwrap();
        assert!(matches!(second, TokenVerification::Used));

        let device = store.get_device(device_id).await.unwrap().unwrap();
        assert!(device.is_active());
    }

    #[tokio::test]
    async fn reenrolling_same_device_key_updates_in_place_and_revokes_prior_token() {
        let store = InMemoryStore::new();
        let t1 = store.create_enroll_token(DEFAULT_TENANT_ID, &token("e1"), None, None, &ctx()).await.unwrap();
        let (device_id, outcome1, _) = store
            .enroll_device(DEFAULT_TENANT_ID, t1, "same-key", &metadata(), &token("dev-1"), &ctx())
            .await
            .unwrap();
        assert_eq!(outcome1, EnrollOutcome::Created);

        let t2 = store.create_enroll_token(DEFAULT_TENANT_ID, &token("e2"), None, None, &ctx()).await.unwrap();
        let mut meta2 = metadata();
        meta2.hostname = "host-2".to_string();
        let (device_id2, outcome2, _) = store
            .enroll_device(DEFAULT_TENANT_ID, t2, "same-key", &meta2, &token("dev-2"), &ctx())
            .await
            .unwrap();
        assert_eq!(outcome2, EnrollOutcome::Reenrolled);
        assert_eq!(device_id, device_id2);

        let device = store.get_device(device_id).await.unwrap().unwrap();
        assert_eq!(device.hostname, "host-2");

        // first device token must now be revoked -- only the newest is valid.
        let old = store.verify_device_token(b"dev-1").await.unwrap();
        assert!(matches!(old, TokenVerification::Revoked | TokenVerification::NotFound));
        let current = store.verify_device_token(b"dev-2").await.unwrap();
        assert!(matches!(current, TokenVerification::Valid(_)));
    }

    #[tokio::test]
    async fn soft_deleted_device_token_no_longer_verifies() {
        let store = InMemoryStore::new();
        let t1 = store.create_enroll_token(DEFAULT_TENANT_ID, &token("e1"), None, None, &ctx()).await.unwrap();
        let (device_id, _, _) = store
            .enroll_device(DEFAULT_TENANT_ID, t1, "k1", &metadata(), &token("dev-1"), &ctx())
            .await
            .unwrap();

        store.soft_delete_device(device_id, &ctx()).await.unwrap();
        let verification = store.verify_device_token(b"dev-1").await.unwrap();
        assert!(matches!(verification, TokenVerification::Revoked));

        // restoring the device does not resurrect the revoked token -- a
        // caller must rotate a fresh one before the device can call in again.
        store.restore_device(device_id, &ctx()).await.unwrap();
        let verification = store.verify_device_token(b"dev-1").await.unwrap();
        assert!(matches!(verification, TokenVerification::Revoked));

        store.rotate_device_token(device_id, &token("dev-2"), &ctx()).await.unwrap();
        let verification = store.verify_device_token(b"dev-2").await.unwrap();
        assert!(matches!(verification, TokenVerification::Valid(_)));
    }

    #[tokio::test]
    async fn inactive_device_with_unrevoked_token_reports_device_inactive_not_revoked() {
        let store = InMemoryStore::new();
        let t1 = store.create_enroll_token(DEFAULT_TENANT_ID, &token("e1"), None, None, &ctx()).await.unwrap();
        let (device_id, _, _) = store
            .enroll_device(DEFAULT_TENANT_ID, t1, "k1", &metadata(), &token("dev-1"), &ctx())
            .await
            .unwrap();

        // Simulate a device going inactive through a path that doesn't also
        // revoke its token, distinct from `soft_delete_device`'s cascade.
        {
            let mut guard = store.inner.write().await;
            guard.devices.get_mut(&device_id).unwrap().status = baseliner_domain::DeviceStatus::Inactive;
        }

        let verification = store.verify_device_token(b"dev-1").await.unwrap();
        assert!(matches!(verification, TokenVerification::DeviceInactive));
    }

    #[tokio::test]
    async fn assignments_for_device_come_back_in_canonical_order() {
        let store = InMemoryStore::new();
        let t1 = store.create_enroll_token(DEFAULT_TENANT_ID, &token("e1"), None, None, &ctx()).await.unwrap();
        let (device_id, _, _) =
            store.enroll_device(DEFAULT_TENANT_ID, t1, "k1", &metadata(), &token("dev-1"), &ctx()).await.unwrap();

        let doc = PolicyDocument::default();
        let p_low = store.upsert_policy(DEFAULT_TENANT_ID, "low", "", &doc, &ctx()).await.unwrap();
        let p_high = store.upsert_policy(DEFAULT_TENANT_ID, "high", "", &doc, &ctx()).await.unwrap();

        store.upsert_assignment(device_id, p_high, 20, AssignmentMode::Enforce, &ctx()).await.unwrap();
        store.upsert_assignment(device_id, p_low, 10, AssignmentMode::Enforce, &ctx()).await.unwrap();

        let assignments = store.list_assignments_for_device(device_id).await.unwrap();
        assert_eq!(assignments.len(), 2);
        assert_eq!(assignments[0].1.as_ref().unwrap().name, "low");
        assert_eq!(assignments[1].1.as_ref().unwrap().name, "high");
    }

    #[tokio::test]
    async fn ingest_run_is_idempotent_by_device_and_correlation_id() {
        let store = InMemoryStore::new();
        let t1 = store.create_enroll_token(DEFAULT_TENANT_ID, &token("e1"), None, None, &ctx()).await.unwrap();
        let (device_id, _, _) =
            store.enroll_device(DEFAULT_TENANT_ID, t1, "k1", &metadata(), &token("dev-1"), &ctx()).await.unwrap();

        let sub = submission(Some("corr-1"));
        let first = store.ingest_run(DEFAULT_TENANT_ID, device_id, &sub, Some("corr-1".to_string())).await.unwrap();
        let IngestOutcome::Created(run_id) = first else { panic!("expected Created") };

        let second = store.ingest_run(DEFAULT_TENANT_ID, device_id, &sub, Some("corr-1".to_string())).await.unwrap();
        assert_eq!(second, IngestOutcome::Duplicate(run_id));

        let (run, items, logs) = store.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.device_id, device_id);
        assert_eq!(items.len(), 1);
        assert_eq!(logs.len(), 1);

        let device = store.get_device(device_id).await.unwrap().unwrap();
        assert!(device.last_seen_at.is_some());
    }

    #[tokio::test]
    async fn list_runs_paginates_newest_first() {
        let store = InMemoryStore::new();
        let t1 = store.create_enroll_token(DEFAULT_TENANT_ID, &token("e1"), None, None, &ctx()).await.unwrap();
        let (device_id, _, _) =
            store.enroll_device(DEFAULT_TENANT_ID, t1, "k1", &metadata(), &token("dev-1"), &ctx()).await.unwrap();

        for i in 0..3 {
            store
                .ingest_run(DEFAULT_TENANT_ID, device_id, &submission(None), Some(format!("corr-{i}")))
                .await
                .unwrap();
        }

        let page1 = store.list_runs(DEFAULT_TENANT_ID, None, None, 2).await.unwrap();
        assert_eq!(page1.items.len(), 2);
        assert!(page1.next_cursor.is_some());

        let page2 = store.list_runs(DEFAULT_TENANT_ID, None, page1.next_cursor.as_deref(), 2).await.unwrap();
        assert_eq!(page2.items.len(), 1);
        assert!(page2.next_cursor.is_none());
    }

    #[tokio::test]
    async fn prune_keeps_recent_runs_per_device_even_past_cutoff() {
        let store = InMemoryStore::new();
        let t1 = store.create_enroll_token(DEFAULT_TENANT_ID, &token("e1"), None, None, &ctx()).await.unwrap();
        let (device_id, _, _) =
            store.enroll_device(DEFAULT_TENANT_ID, t1, "k1", &metadata(), &token("dev-1"), &ctx()).await.unwrap();

        for i in 0..3 {
            store
                .ingest_run(DEFAULT_TENANT_ID, device_id, &submission(None), Some(format!("corr-{i}")))
                .await
                .unwrap();
        }

        // keep_days = 0 puts every run past the cutoff; keep_runs_per_device
        // still protects the most recent one from deletion.
        let dry = store.prune(0, 1, 100, true).await.unwrap();
        assert_eq!(dry.runs_deleted, 2);
        assert!(dry.dry_run);

        let page = store.list_runs(DEFAULT_TENANT_ID, None, None, 10).await.unwrap();
        assert_eq!(page.items.len(), 3, "dry run must not mutate state");

        let real = store.prune(0, 1, 100, false).await.unwrap();
        assert_eq!(real.runs_deleted, 2);
        let page = store.list_runs(DEFAULT_TENANT_ID, None, None, 10).await.unwrap();
        assert_eq!(page.items.len(), 1);
    }

    #[tokio::test]
    async fn audit_log_records_one_entry_per_mutation() {
        let store = InMemoryStore::new();
        let t1 = store.create_enroll_token(DEFAULT_TENANT_ID, &token("e1"), None, None, &ctx()).await.unwrap();
        store.enroll_device(DEFAULT_TENANT_ID, t1, "k1", &metadata(), &token("dev-1"), &ctx()).await.unwrap();

        let page = store.list_audit(DEFAULT_TENANT_ID, &AuditFilter::default(), None, 10).await.unwrap();
        let actions: Vec<&str> = page.items.iter().map(|e| e.action.as_str()).collect();
        assert!(actions.contains(&"enroll_token.create"));
        assert!(actions.contains(&"device.enroll"));
    }
}
