use std::sync::Arc;

use baseliner_config::BaselinerConfig;
use baseliner_store::Store;

use crate::rate_limit::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Arc<BaselinerConfig>,
    pub limiter: Arc<dyn RateLimiter>,
}
