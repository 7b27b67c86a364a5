pub mod error;
mod submission;
mod validate;

pub use error::IngestError;
pub use submission::{LogEventSubmission, RunItemSubmission, RunSubmission};
pub use validate::validate;
