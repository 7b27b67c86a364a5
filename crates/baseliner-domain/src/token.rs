use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{DeviceAuthTokenId, DeviceId, EnrollTokenId, TenantId};

/// A single-use credential exchanged for a device token via `POST /enroll`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollToken {
    pub id: EnrollTokenId,
    pub tenant_id: TenantId,
    /// `HMAC-SHA256(pepper, raw_token_bytes)`. The raw token is never stored.
    pub token_hash: Vec<u8>,
    pub expires_at: Option<DateTime<Utc>>,
    pub used_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl EnrollToken {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.used_at.is_none()
            && self.revoked_at.is_none()
            && self.expires_at.is_none_or(|exp| exp > now)
    }
}

/// Long-lived bearer credential for device -> server calls. History table:
/// exactly one row per device has `revoked_at IS NULL` at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceAuthToken {
    pub id: DeviceAuthTokenId,
    pub device_id: DeviceId,
    pub tenant_id: TenantId,
    pub token_hash: Vec<u8>,
    /// First few characters of the raw (base32) token, kept for admin display.
    pub prefix: String,
    pub issued_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl DeviceAuthToken {
    pub fn is_active(&self) -> bool {
        self.revoked_at.is_none()
    }
}

/// Outcome of verifying a presented token against stored history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenVerification<T> {
    Valid(T),
    Expired,
    /// The token itself has been revoked (rotated out or explicitly revoked).
    Revoked,
    /// The token is still live but its device has been soft-deleted.
    DeviceInactive,
    NotFound,
    Used,
}

/// A freshly minted token: the plaintext is returned to the caller exactly
/// once and is never persisted.
#[derive(Debug, Clone)]
pub struct MintedToken {
    pub raw: String,
    pub hash: Vec<u8>,
    pub prefix: String,
}
