use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use baseliner_domain::{LogLevel, RunItemError, RunStatus};

/// Wire shape of `POST /api/v1/device/reports` (spec 4.4). Distinct from
/// the persisted `Run`/`RunItem`/`LogEvent` domain types: those carry
/// server-assigned ids and `run_id` foreign keys that do not exist until
/// the row is inserted.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunSubmission {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub status: RunStatus,
    pub agent_version: String,
    pub effective_policy_hash: String,
    pub policy_snapshot: Value,
    pub summary: Value,
    #[serde(default)]
    pub items: Vec<RunItemSubmission>,
    #[serde(default)]
    pub logs: Vec<LogEventSubmission>,
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunItemSubmission {
    pub resource_type: String,
    pub resource_id: String,
    pub name: String,
    pub status_detect: String,
    #[serde(default)]
    pub status_remediate: Option<String>,
    #[serde(default)]
    pub status_validate: Option<String>,
    #[serde(default)]
    pub compliant_before: Option<bool>,
    #[serde(default)]
    pub compliant_after: Option<bool>,
    #[serde(default)]
    pub changed: bool,
    #[serde(default)]
    pub evidence: Value,
    #[serde(default)]
    pub error: Option<RunItemError>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogEventSubmission {
    pub ts: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub data: Value,
}
