use std::env;

use tracing::debug;

use crate::error::ConfigError;

/// Runtime configuration loaded once at startup from the environment
/// variables named in the external interfaces section of the spec. Never
/// logs `admin_key` or `token_pepper`.
#[derive(Clone)]
pub struct BaselinerConfig {
    pub database_url: String,
    pub admin_key: String,
    pub token_pepper: Vec<u8>,

    pub max_request_body_bytes_default: usize,
    pub max_request_body_bytes_device_reports: usize,
    pub max_run_items: usize,
    pub max_log_events: usize,

    pub rate_limit_enabled: bool,
    pub rate_limit_reports_per_minute: u32,
    pub rate_limit_reports_burst: u32,
    pub rate_limit_ip_per_minute: u32,
    pub rate_limit_ip_burst: u32,

    pub bind: String,
    pub port: u16,

    pub maintenance_interval_seconds: u64,
    pub maintenance_keep_days: i64,
    pub maintenance_keep_runs_per_device: u32,
    pub maintenance_batch_size: u32,
}

impl std::fmt::Debug for BaselinerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaselinerConfig")
            .field("database_url", &self.database_url)
            .field("admin_key", &"<redacted>")
            .field("token_pepper", &"<redacted>")
            .field("max_request_body_bytes_default", &self.max_request_body_bytes_default)
            .field(
                "max_request_body_bytes_device_reports",
                &self.max_request_body_bytes_device_reports,
            )
            .field("max_run_items", &self.max_run_items)
            .field("max_log_events", &self.max_log_events)
            .field("rate_limit_enabled", &self.rate_limit_enabled)
            .field("bind", &self.bind)
            .field("port", &self.port)
            .field("maintenance_interval_seconds", &self.maintenance_interval_seconds)
            .field("maintenance_keep_days", &self.maintenance_keep_days)
            .field("maintenance_keep_runs_per_device", &self.maintenance_keep_runs_per_device)
            .field("maintenance_batch_size", &self.maintenance_batch_size)
            .finish()
    }
}

impl BaselinerConfig {
    /// Parse configuration from the process environment. Fails closed: a
    /// missing `DATABASE_URL`, `BASELINER_ADMIN_KEY`, or
    /// `BASELINER_TOKEN_PEPPER` is a startup error, not a default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = require("DATABASE_URL")?;
        let admin_key = require("BASELINER_ADMIN_KEY")?;
        let token_pepper = require("BASELINER_TOKEN_PEPPER")?.into_bytes();

        let cfg = BaselinerConfig {
            database_url,
            admin_key,
            token_pepper,
            max_request_body_bytes_default: parse_or(
                "MAX_REQUEST_BODY_BYTES_DEFAULT",
                1024 * 1024,
            )?,
            max_request_body_bytes_device_reports: parse_or(
                "MAX_REQUEST_BODY_BYTES_DEVICE_REPORTS",
                10 * 1024 * 1024,
            )?,
            max_run_items: parse_or("MAX_RUN_ITEMS", 5_000)?,
            max_log_events: parse_or("MAX_LOG_EVENTS", 20_000)?,
            rate_limit_enabled: parse_or("RATE_LIMIT_ENABLED", true)?,
            rate_limit_reports_per_minute: parse_or("RATE_LIMIT_REPORTS_PER_MINUTE", 30)?,
            rate_limit_reports_burst: parse_or("RATE_LIMIT_REPORTS_BURST", 10)?,
            rate_limit_ip_per_minute: parse_or("RATE_LIMIT_IP_PER_MINUTE", 120)?,
            rate_limit_ip_burst: parse_or("RATE_LIMIT_IP_BURST", 40)?,
            bind: env::var("BASELINER_BIND").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_or("BASELINER_PORT", 8080)?,

            maintenance_interval_seconds: parse_or("MAINTENANCE_INTERVAL_SECONDS", 3600)?,
            maintenance_keep_days: parse_or("MAINTENANCE_KEEP_DAYS", 90)?,
            maintenance_keep_runs_per_device: parse_or("MAINTENANCE_KEEP_RUNS_PER_DEVICE", 200)?,
            maintenance_batch_size: parse_or("MAINTENANCE_BATCH_SIZE", 500)?,
        };
        debug!(
            max_request_body_bytes_default = cfg.max_request_body_bytes_default,
            rate_limit_enabled = cfg.rate_limit_enabled,
            "loaded configuration from environment"
        );
        Ok(cfg)
    }
}

fn require(name: &str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name.to_string()))
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.parse::<T>().map_err(|_| ConfigError::Invalid {
            name: name.to_string(),
            value: raw,
            reason: "could not parse".to_string(),
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variable mutation races across tests in the same process;
    // serialize with a lock rather than relying on --test-threads=1 globally.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_all() {
        for var in [
            "DATABASE_URL",
            "BASELINER_ADMIN_KEY",
            "BASELINER_TOKEN_PEPPER",
            "MAX_REQUEST_BODY_BYTES_DEFAULT",
            "RATE_LIMIT_ENABLED",
        ] {
            env::remove_var(var);
        }
    }

    #[test]
    fn missing_required_var_is_an_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        let err = BaselinerConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing(ref v) if v == "DATABASE_URL"));
    }

    #[test]
    fn defaults_apply_when_optional_vars_absent() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        env::set_var("DATABASE_URL", "postgres://localhost/baseliner");
        env::set_var("BASELINER_ADMIN_KEY", "test-admin-key");
        env::set_var("BASELINER_TOKEN_PEPPER", "test-pepper");

        let cfg = BaselinerConfig::from_env().unwrap();
        assert_eq!(cfg.max_request_body_bytes_default, 1024 * 1024);
        assert_eq!(cfg.max_request_body_bytes_device_reports, 10 * 1024 * 1024);
        assert!(cfg.rate_limit_enabled);
        clear_all();
    }

    #[test]
    fn explicit_override_wins_over_default() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        env::set_var("DATABASE_URL", "postgres://localhost/baseliner");
        env::set_var("BASELINER_ADMIN_KEY", "test-admin-key");
        env::set_var("BASELINER_TOKEN_PEPPER", "test-pepper");
        env::set_var("RATE_LIMIT_ENABLED", "false");

        let cfg = BaselinerConfig::from_env().unwrap();
        assert!(!cfg.rate_limit_enabled);
        clear_all();
    }
}
