use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                $name(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(u: Uuid) -> Self {
                $name(u)
            }
        }
    };
}

uuid_id!(TenantId);
uuid_id!(DeviceId);
uuid_id!(EnrollTokenId);
uuid_id!(DeviceAuthTokenId);
uuid_id!(PolicyId);
uuid_id!(AssignmentId);
uuid_id!(RunId);
uuid_id!(RunItemId);
uuid_id!(LogEventId);
uuid_id!(AuditLogId);

/// Phase-0 has exactly one tenant; every row is scoped to it regardless of
/// whether a caller ever sets `X-Tenant-ID`.
pub const DEFAULT_TENANT_ID: TenantId = TenantId(Uuid::from_u128(0x0000_0000_0000_0000_0000_0000_0000_0001));
