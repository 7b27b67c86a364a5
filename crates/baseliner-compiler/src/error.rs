use thiserror::Error;

use baseliner_domain::DeviceId;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("device not found: {0}")]
    DeviceNotFound(DeviceId),

    #[error("tenant mismatch for device {0}")]
    TenantMismatch(DeviceId),
}
