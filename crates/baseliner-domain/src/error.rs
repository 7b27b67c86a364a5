use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid device key: {0}")]
    InvalidDeviceKey(String),

    #[error("invalid policy name: {0}")]
    InvalidPolicyName(String),

    #[error("unknown resource type: {0}")]
    UnknownResourceType(String),

    #[error("invalid priority: {0}")]
    InvalidPriority(i32),
}
