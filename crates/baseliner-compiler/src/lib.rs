mod compile;
pub mod error;
mod report;

pub use compile::{compile, empty_hash, AssignmentInput};
pub use error::CompileError;
pub use report::{CompiledEffectivePolicy, Conflict, Source, SkippedAssignment};
