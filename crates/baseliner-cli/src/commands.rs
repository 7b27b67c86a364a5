use anyhow::{bail, Result};
use serde_json::{json, Value};

async fn show(resp: reqwest::Response) -> Result<()> {
    let status = resp.status();
    let body: Value = resp.json().await.unwrap_or(Value::Null);
    if !status.is_success() {
        bail!("server returned {status}: {}", serde_json::to_string_pretty(&body)?);
    }
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

pub async fn mint_enroll_token(
    url: &str,
    admin_key: &str,
    note: Option<String>,
    expires_in_seconds: Option<i64>,
) -> Result<()> {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{url}/api/v1/admin/enroll-tokens"))
        .header("X-Admin-Key", admin_key)
        .json(&json!({ "note": note, "expires_in_seconds": expires_in_seconds }))
        .send()
        .await?;
    show(resp).await
}

pub async fn enroll(url: &str, enroll_token: String, device_key: String, hostname: String) -> Result<()> {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{url}/api/v1/enroll"))
        .json(&json!({
            "enroll_token": enroll_token,
            "device_key": device_key,
            "metadata": {
                "hostname": hostname,
                "os": std::env::consts::OS,
                "os_version": "",
                "arch": std::env::consts::ARCH,
                "agent_version": env!("CARGO_PKG_VERSION"),
            },
        }))
        .send()
        .await?;
    show(resp).await
}

pub async fn get_policy(url: &str, device_token: &str) -> Result<()> {
    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{url}/api/v1/device/policy"))
        .bearer_auth(device_token)
        .send()
        .await?;
    show(resp).await
}

pub async fn list_devices(url: &str, admin_key: &str, status: Option<String>) -> Result<()> {
    let client = reqwest::Client::new();
    let mut req = client.get(format!("{url}/api/v1/admin/devices")).header("X-Admin-Key", admin_key);
    if let Some(status) = status {
        req = req.query(&[("status", status)]);
    }
    show(req.send().await?).await
}

pub async fn prune(url: &str, admin_key: &str, keep_days: i64, keep_runs_per_device: u32, dry_run: bool) -> Result<()> {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{url}/api/v1/admin/maintenance/prune"))
        .header("X-Admin-Key", admin_key)
        .json(&json!({ "keep_days": keep_days, "keep_runs_per_device": keep_runs_per_device, "dry_run": dry_run }))
        .send()
        .await?;
    show(resp).await
}
