use baseliner_config::BaselinerConfig;

use crate::error::IngestError;
use crate::submission::RunSubmission;

/// Soft caps on `items[]`/`logs[]` length (spec 4.4). Body-size ceiling
/// (`413`) is enforced by the HTTP layer before the body is even
/// deserialized; this only covers the count caps, which map to `422`.
pub fn validate(submission: &RunSubmission, config: &BaselinerConfig) -> Result<(), IngestError> {
    if submission.ended_at < submission.started_at {
        return Err(IngestError::EndedBeforeStarted);
    }
    if submission.items.len() > config.max_run_items {
        return Err(IngestError::TooManyItems {
            count: submission.items.len(),
            cap: config.max_run_items,
        });
    }
    if submission.logs.len() > config.max_log_events {
        return Err(IngestError::TooManyLogEvents {
            count: submission.logs.len(),
            cap: config.max_log_events,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    use baseliner_domain::RunStatus;

    fn config() -> BaselinerConfig {
        BaselinerConfig {
            database_url: String::new(),
            admin_key: String::new(),
            token_pepper: vec![],
            max_request_body_bytes_default: 1024,
            max_request_body_bytes_device_reports: 1024,
            max_run_items: 2,
            max_log_events: 2,
            rate_limit_enabled: false,
            rate_limit_reports_per_minute: 0,
            rate_limit_reports_burst: 0,
            rate_limit_ip_per_minute: 0,
            rate_limit_ip_burst: 0,
            bind: String::new(),
            port: 0,
            maintenance_interval_seconds: 3600,
            maintenance_keep_days: 90,
            maintenance_keep_runs_per_device: 200,
            maintenance_batch_size: 500,
        }
    }

    fn submission() -> RunSubmission {
        RunSubmission {
            started_at: Utc::now(),
            ended_at: Utc::now(),
            status: RunStatus::Succeeded,
            agent_version: "1.0.0".to_string(),
            effective_policy_hash: "deadbeef".to_string(),
            policy_snapshot: json!({}),
            summary: json!({}),
            items: vec![],
            logs: vec![],
            correlation_id: None,
        }
    }

    #[test]
    fn rejects_too_many_items() {
        let mut s = submission();
        for _ in 0..3 {
            s.items.push(crate::submission::RunItemSubmission {
                resource_type: "winget.package".to_string(),
                resource_id: "x".to_string(),
                name: "x".to_string(),
                status_detect: "present".to_string(),
                status_remediate: None,
                status_validate: None,
                compliant_before: None,
                compliant_after: None,
                changed: false,
                evidence: json!({}),
                error: None,
            });
        }
        let err = validate(&s, &config()).unwrap_err();
        assert!(matches!(err, IngestError::TooManyItems { count: 3, cap: 2 }));
    }

    #[test]
    fn rejects_ended_before_started() {
        let mut s = submission();
        s.ended_at = s.started_at - chrono::Duration::seconds(1);
        assert!(matches!(validate(&s, &config()), Err(IngestError::EndedBeforeStarted)));
    }

    #[test]
    fn accepts_within_caps() {
        assert!(validate(&submission(), &config()).is_ok());
    }
}
