use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("invalid pagination cursor")]
    InvalidCursor,
}
