use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("too many items: {count} exceeds cap of {cap}")]
    TooManyItems { count: usize, cap: usize },

    #[error("too many log events: {count} exceeds cap of {cap}")]
    TooManyLogEvents { count: usize, cap: usize },

    #[error("ended_at is before started_at")]
    EndedBeforeStarted,
}
