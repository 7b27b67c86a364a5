use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{AssignmentId, DeviceId, PolicyId, TenantId};

/// A versioned policy document, identified by a stable `name` unique within
/// a tenant. Mutated in place; the content hash (computed by the compiler,
/// not stored here) captures the effective version a device last saw.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: PolicyId,
    pub tenant_id: TenantId,
    pub name: String,
    pub description: String,
    pub schema_version: i32,
    pub is_active: bool,
    pub document: PolicyDocument,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `{resources: [Resource]}` -- the opaque-to-the-compiler document schema
/// from spec 4.3, made concrete as a typed envelope over a tagged variant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub resources: Vec<Resource>,
}

/// One managed resource inside a policy document. `key()` is `(type, id)`,
/// the unit of conflict resolution in the compiler.
///
/// Unknown `type` values round-trip losslessly via `Unknown` so a document
/// authored against a newer schema version never silently loses fields when
/// passed through an older server. Mirrors the custom `Deserialize` impl
/// used for backend variants elsewhere in this codebase: parse to `Value`
/// first, dispatch on a discriminant field, fall back to verbatim storage.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    Known(KnownResource),
    Unknown(Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum KnownResource {
    #[serde(rename = "winget.package")]
    WingetPackage {
        id: String,
        name: String,
        package_id: String,
        #[serde(default)]
        ensure: PackageEnsure,
        #[serde(default)]
        version: Option<String>,
        #[serde(default)]
        allow_upgrade: bool,
        #[serde(default)]
        min_version: Option<String>,
    },
    #[serde(rename = "script.powershell")]
    PowershellScript {
        id: String,
        name: String,
        #[serde(default)]
        detect: Option<String>,
        #[serde(default)]
        remediate: Option<String>,
        #[serde(default)]
        validate: Option<String>,
        #[serde(default = "default_timeout_seconds")]
        timeout_seconds: u32,
    },
}

fn default_timeout_seconds() -> u32 {
    300
}

const KNOWN_TYPES: &[&str] = &["winget.package", "script.powershell"];

impl serde::Serialize for Resource {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Resource::Known(k) => k.serialize(serializer),
            Resource::Unknown(v) => v.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Resource {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        use serde::de::Error;
        let v = Value::deserialize(d)?;
        let is_known = v.get("type").and_then(Value::as_str).is_some_and(|t| KNOWN_TYPES.contains(&t));
        if is_known {
            let known: KnownResource = serde_json::from_value(v).map_err(D::Error::custom)?;
            Ok(Resource::Known(known))
        } else {
            Ok(Resource::Unknown(v))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageEnsure {
    #[default]
    Present,
    Absent,
}

impl Resource {
    /// The `(type, id)` conflict-resolution key for this resource.
    pub fn key(&self) -> (String, String) {
        match self {
            Resource::Known(KnownResource::WingetPackage { id, .. }) => {
                ("winget.package".to_string(), id.clone())
            }
            Resource::Known(KnownResource::PowershellScript { id, .. }) => {
                ("script.powershell".to_string(), id.clone())
            }
            Resource::Unknown(v) => (
                v.get("type").and_then(Value::as_str).unwrap_or("unknown").to_string(),
                v.get("id").and_then(Value::as_str).unwrap_or("").to_string(),
            ),
        }
    }

    pub fn name(&self) -> String {
        match self {
            Resource::Known(KnownResource::WingetPackage { name, .. }) => name.clone(),
            Resource::Known(KnownResource::PowershellScript { name, .. }) => name.clone(),
            Resource::Unknown(v) => v.get("name").and_then(Value::as_str).unwrap_or("").to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentMode {
    Enforce,
    Audit,
}

impl std::fmt::Display for AssignmentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssignmentMode::Enforce => write!(f, "enforce"),
            AssignmentMode::Audit => write!(f, "audit"),
        }
    }
}

/// Binds a policy to a device with a priority (lower wins) and a mode.
/// Immutable once created except for `priority`/`mode` updates (spec 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyAssignment {
    pub id: AssignmentId,
    pub tenant_id: TenantId,
    pub device_id: DeviceId,
    pub policy_id: PolicyId,
    pub priority: i32,
    pub mode: AssignmentMode,
    pub created_at: DateTime<Utc>,
}
