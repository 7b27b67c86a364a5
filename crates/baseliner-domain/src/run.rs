use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{DeviceId, LogEventId, RunId, RunItemId, TenantId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Succeeded,
    Partial,
    Failed,
    Error,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
            RunStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// A single execution of the agent: header persisted atomically with its
/// items and logs (spec invariant 4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub tenant_id: TenantId,
    pub device_id: DeviceId,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub status: RunStatus,
    pub agent_version: String,
    pub effective_policy_hash: String,
    pub policy_snapshot: Value,
    pub summary: Value,
    pub correlation_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunItemError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunItem {
    pub id: RunItemId,
    pub run_id: RunId,
    pub ordinal: i32,
    pub resource_type: String,
    pub resource_id: String,
    pub name: String,
    pub status_detect: String,
    pub status_remediate: Option<String>,
    pub status_validate: Option<String>,
    pub compliant_before: Option<bool>,
    pub compliant_after: Option<bool>,
    pub changed: bool,
    pub evidence: Value,
    pub error: Option<RunItemError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub id: LogEventId,
    pub run_id: RunId,
    pub ts: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub data: Value,
}
