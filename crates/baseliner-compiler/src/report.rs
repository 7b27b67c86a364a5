use serde::{Deserialize, Serialize};

use baseliner_domain::{AssignmentId, AssignmentMode, PolicyDocument, PolicyId};

/// Where an effective resource came from: which assignment and policy won
/// the conflict-resolution pass for its `(type, id)` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub assignment_id: AssignmentId,
    pub policy_id: PolicyId,
    pub policy_name: String,
    pub priority: i32,
    pub mode: AssignmentMode,
}

/// One dropped resource: a later assignment defined the same `(type, id)`
/// as an earlier, higher-precedence one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// `"{resource_type}/{resource_id}"` of the contested resource.
    pub key: String,
    pub winner_policy: String,
    pub loser_policy: String,
    pub reason: String,
}

/// An assignment dropped before compilation because it references a policy
/// that is inactive or no longer exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedAssignment {
    pub assignment_id: AssignmentId,
    pub policy_id: PolicyId,
    pub reason: String,
}

/// Output of the policy compiler: the conflict-resolved document, its
/// content hash, and a full accounting of how it was derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledEffectivePolicy {
    pub document: PolicyDocument,
    pub hash: String,
    /// Source of each resource, keyed by `"type/id"` for JSON-friendliness.
    pub sources_by_key: Vec<(String, Source)>,
    pub conflicts: Vec<Conflict>,
    pub skipped: Vec<SkippedAssignment>,
}

impl CompiledEffectivePolicy {
    pub fn empty(hash: String) -> Self {
        CompiledEffectivePolicy {
            document: PolicyDocument::default(),
            hash,
            sources_by_key: Vec::new(),
            conflicts: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn source_for(&self, resource_type: &str, resource_id: &str) -> Option<&Source> {
        let key = format!("{resource_type}/{resource_id}");
        self.sources_by_key.iter().find(|(k, _)| k == &key).map(|(_, s)| s)
    }
}
