mod context;
mod cursor;
pub mod error;

pub use context::AuditContext;
pub use cursor::Cursor;
pub use error::AuditError;
