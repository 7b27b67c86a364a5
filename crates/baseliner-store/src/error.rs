use thiserror::Error;

use baseliner_domain::{DeviceId, EnrollTokenId, PolicyId, RunId, TenantId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("device not found: {0}")]
    DeviceNotFound(DeviceId),

    #[error("enroll token not found: {0}")]
    EnrollTokenNotFound(EnrollTokenId),

    #[error("device key already enrolled in tenant {tenant_id}: {device_key}")]
    DeviceKeyConflict { tenant_id: TenantId, device_key: String },

    #[error("policy not found: {0}")]
    PolicyNotFound(PolicyId),

    #[error("policy name already exists in tenant {tenant_id}: {name}")]
    PolicyNameConflict { tenant_id: TenantId, name: String },

    #[error("run not found: {0}")]
    RunNotFound(RunId),

    #[error("invalid cursor")]
    InvalidCursor,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal store error: {0}")]
    Internal(String),
}
