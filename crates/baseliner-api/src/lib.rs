pub mod app;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod state;

pub use app::build_app;
pub use state::AppState;
