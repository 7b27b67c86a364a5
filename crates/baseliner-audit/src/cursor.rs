use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AuditError;

/// Opaque pagination cursor over `(ts, id)`, strictly decreasing. Never
/// exposed to callers as a structured field -- only as the base64 string.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Cursor {
    pub ts: DateTime<Utc>,
    pub id: Uuid,
}

impl Cursor {
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).expect("Cursor serialization is infallible");
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(s: &str) -> Result<Self, AuditError> {
        let bytes = URL_SAFE_NO_PAD.decode(s).map_err(|_| AuditError::InvalidCursor)?;
        serde_json::from_slice(&bytes).map_err(|_| AuditError::InvalidCursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_round_trips() {
        let c = Cursor { ts: Utc::now(), id: Uuid::new_v4() };
        let encoded = c.encode();
        let decoded = Cursor::decode(&encoded).unwrap();
        assert_eq!(c.ts, decoded.ts);
        assert_eq!(c.id, decoded.id);
    }

    #[test]
    fn garbage_cursor_is_rejected() {
        assert!(Cursor::decode("not-a-real-cursor!!").is_err());
    }
}
