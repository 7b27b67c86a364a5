use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use baseliner_domain::{Actor, AuditLogEntry, AuditLogId, TenantId};

/// Carries the "who" and "why" of a mutation through a call chain so every
/// command handler can append exactly one audit row without reaching into
/// process-wide state (spec design note: audit is an explicit step, not a
/// hook).
#[derive(Debug, Clone)]
pub struct AuditContext {
    pub tenant_id: TenantId,
    pub actor: Actor,
    pub correlation_id: Option<String>,
}

impl AuditContext {
    pub fn new(tenant_id: TenantId, actor: Actor, correlation_id: Option<String>) -> Self {
        AuditContext { tenant_id, actor, correlation_id }
    }

    pub fn system(tenant_id: TenantId) -> Self {
        AuditContext::new(tenant_id, Actor::System, None)
    }

    /// Build the row for a mutation. Call once per mutation, inside the same
    /// transaction that performs it -- the caller is responsible for writing
    /// it and rolling back the whole transaction if the write fails.
    pub fn entry(
        &self,
        action: impl Into<String>,
        target_type: impl Into<String>,
        target_id: impl Into<String>,
        before: Option<impl Serialize>,
        after: Option<impl Serialize>,
    ) -> AuditLogEntry {
        AuditLogEntry {
            id: AuditLogId(Uuid::new_v4()),
            tenant_id: self.tenant_id,
            ts: chrono::Utc::now(),
            actor: self.actor,
            action: action.into(),
            target_type: target_type.into(),
            target_id: target_id.into(),
            before: before.map(|v| serde_json::to_value(v).unwrap_or(Value::Null)),
            after: after.map(|v| serde_json::to_value(v).unwrap_or(Value::Null)),
            correlation_id: self.correlation_id.clone(),
        }
    }
}
