use std::collections::HashMap;

use serde_json::json;
use tracing::debug;

use baseliner_crypto::content_hash;
use baseliner_domain::{Policy, PolicyAssignment, PolicyDocument};

use crate::report::{CompiledEffectivePolicy, Conflict, SkippedAssignment, Source};

/// One assignment joined to its policy, or `None` if the policy is inactive
/// or no longer exists (spec 4.3 step 1: such assignments are dropped and
/// recorded as `skipped`, never an error).
pub struct AssignmentInput {
    pub assignment: PolicyAssignment,
    pub policy: Option<Policy>,
}

/// Deterministically merge a device's ordered assignments into an effective
/// policy. Pure function of its input -- never inspects agent state, never
/// performs I/O (spec 4.3 determinism guarantees).
pub fn compile(mut inputs: Vec<AssignmentInput>) -> CompiledEffectivePolicy {
    // Canonical order: priority ascending, then created_at ascending, then
    // assignment_id lexicographic. This total order is what makes the
    // compiled result independent of fetch/iteration order.
    inputs.sort_by(|a, b| {
        a.assignment
            .priority
            .cmp(&b.assignment.priority)
            .then(a.assignment.created_at.cmp(&b.assignment.created_at))
            .then(a.assignment.id.to_string().cmp(&b.assignment.id.to_string()))
    });

    let mut skipped = Vec::new();
    let mut sources_by_key: Vec<(String, Source)> = Vec::new();
    let mut conflicts = Vec::new();
    let mut resource_order: Vec<String> = Vec::new();
    let mut resources_by_key: HashMap<String, baseliner_domain::Resource> = HashMap::new();

    for input in inputs {
        let Some(policy) = input.policy else {
            skipped.push(SkippedAssignment {
                assignment_id: input.assignment.id,
                policy_id: input.assignment.policy_id,
                reason: "policy not found".to_string(),
            });
            continue;
        };
        if !policy.is_active {
            skipped.push(SkippedAssignment {
                assignment_id: input.assignment.id,
                policy_id: policy.id,
                reason: "policy inactive".to_string(),
            });
            continue;
        }

        let source = Source {
            assignment_id: input.assignment.id,
            policy_id: policy.id,
            policy_name: policy.name.clone(),
            priority: input.assignment.priority,
            mode: input.assignment.mode,
        };

        for resource in &policy.document.resources {
            let (rtype, rid) = resource.key();
            let key = format!("{rtype}/{rid}");

            match sources_by_key.iter().find(|(k, _)| k == &key) {
                None => {
                    resource_order.push(key.clone());
                    resources_by_key.insert(key.clone(), resource.clone());
                    sources_by_key.push((key, source.clone()));
                }
                Some((_, winner)) => {
                    conflicts.push(Conflict {
                        key: key.clone(),
                        winner_policy: winner.policy_name.clone(),
                        loser_policy: policy.name.clone(),
                        reason: "first-wins-by-priority".to_string(),
                    });
                }
            }
        }
    }

    let document = PolicyDocument {
        resources: resource_order
            .iter()
            .map(|k| resources_by_key.remove(k).expect("key was just inserted"))
            .collect(),
    };

    let hash = content_hash(&json!({ "resources": &document.resources }));
    debug!(resources = document.resources.len(), conflicts = conflicts.len(), "compiled effective policy");

    CompiledEffectivePolicy { document, hash, sources_by_key, conflicts, skipped }
}

/// Content hash of the empty effective policy -- the result for a device
/// with no active assignments (spec 4.3: never an error).
pub fn empty_hash() -> String {
    content_hash(&json!({ "resources": Vec::<serde_json::Value>::new() }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use baseliner_domain::{
        AssignmentId, AssignmentMode, KnownResource, PackageEnsure, PolicyId, Resource,
        DEFAULT_TENANT_ID,
    };

    fn policy(name: &str, resources: Vec<Resource>) -> Policy {
        Policy {
            id: PolicyId(Uuid::new_v4()),
            tenant_id: DEFAULT_TENANT_ID,
            name: name.to_string(),
            description: String::new(),
            schema_version: 1,
            is_active: true,
            document: PolicyDocument { resources },
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn winget(id: &str, name: &str) -> Resource {
        Resource::Known(KnownResource::WingetPackage {
            id: id.to_string(),
            name: name.to_string(),
            package_id: format!("Vendor.{name}"),
            ensure: PackageEnsure::Present,
            version: None,
            allow_upgrade: false,
            min_version: None,
        })
    }

    fn assignment(
        policy_id: PolicyId,
        priority: i32,
        created_at: chrono::DateTime<Utc>,
        id: Uuid,
    ) -> PolicyAssignment {
        PolicyAssignment {
            id: AssignmentId(id),
            tenant_id: DEFAULT_TENANT_ID,
            device_id: baseliner_domain::DeviceId(Uuid::new_v4()),
            policy_id,
            priority,
            mode: AssignmentMode::Enforce,
            created_at,
        }
    }

    #[test]
    fn s1_conflict_first_wins_by_priority() {
        let t0 = Utc::now() - Duration::hours(1);
        let t1 = Utc::now();
        let pa = policy("P_A", vec![winget("putty", "PuTTY")]);
        let pb = policy("P_B", vec![winget("putty", "PuTTY newer")]);

        let result = compile(vec![
            AssignmentInput {
                assignment: assignment(pa.id, 100, t0, Uuid::from_u128(1)),
                policy: Some(pa),
            },
            AssignmentInput {
                assignment: assignment(pb.id, 100, t1, Uuid::from_u128(2)),
                policy: Some(pb),
            },
        ]);

        assert_eq!(result.document.resources.len(), 1);
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].winner_policy, "P_A");
        assert_eq!(result.conflicts[0].loser_policy, "P_B");
        assert_eq!(result.conflicts[0].reason, "first-wins-by-priority");
    }

    #[test]
    fn s2_lower_priority_number_wins_regardless_of_order() {
        let t0 = Utc::now() - Duration::hours(1);
        let t1 = Utc::now();
        let pa = policy("P_A", vec![winget("marker", "A")]);
        let pb = policy("P_B", vec![winget("marker", "B")]);

        let result = compile(vec![
            AssignmentInput {
                assignment: assignment(pa.id, 200, t0, Uuid::from_u128(1)),
                policy: Some(pa),
            },
            AssignmentInput {
                assignment: assignment(pb.id, 100, t1, Uuid::from_u128(2)),
                policy: Some(pb.clone()),
            },
        ]);

        assert_eq!(result.document.resources.len(), 1);
        let source = result.source_for("winget.package", "marker").unwrap();
        assert_eq!(source.policy_name, "P_B");
    }

    #[test]
    fn no_active_assignments_yields_empty_document_not_error() {
        let result = compile(vec![]);
        assert!(result.document.resources.is_empty());
        assert_eq!(result.hash, empty_hash());
    }

    #[test]
    fn inactive_policy_is_skipped_not_errored() {
        let mut p = policy("P_INACTIVE", vec![winget("x", "X")]);
        p.is_active = false;
        let a = assignment(p.id, 100, Utc::now(), Uuid::from_u128(1));
        let result = compile(vec![AssignmentInput { assignment: a, policy: Some(p) }]);
        assert!(result.document.resources.is_empty());
        assert_eq!(result.skipped.len(), 1);
    }

    #[test]
    fn compile_is_deterministic_across_runs() {
        let t0 = Utc::now() - Duration::hours(1);
        let pa = policy("P_A", vec![winget("a", "A"), winget("b", "B")]);
        let a = assignment(pa.id, 100, t0, Uuid::from_u128(1));
        let inputs_for = || {
            vec![AssignmentInput { assignment: a.clone(), policy: Some(pa.clone()) }]
        };
        let first = compile(inputs_for());
        let second = compile(inputs_for());
        assert_eq!(first.hash, second.hash);
        assert_eq!(
            first.document.resources.iter().map(|r| r.key()).collect::<Vec<_>>(),
            second.document.resources.iter().map(|r| r.key()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn tied_priority_and_created_at_break_on_assignment_id() {
        let t0 = Utc::now();
        let pa = policy("P_A", vec![winget("marker", "A")]);
        let pb = policy("P_B", vec![winget("marker", "B")]);

        // assignment id "00..01" < "00..02" lexicographically either direction we pass them in
        let low_id = Uuid::from_u128(1);
        let high_id = Uuid::from_u128(2);

        let forward = compile(vec![
            AssignmentInput { assignment: assignment(pa.id, 100, t0, low_id), policy: Some(pa.clone()) },
            AssignmentInput { assignment: assignment(pb.id, 100, t0, high_id), policy: Some(pb.clone()) },
        ]);
        let reversed = compile(vec![
            AssignmentInput { assignment: assignment(pb.id, 100, t0, high_id), policy: Some(pb) },
            AssignmentInput { assignment: assignment(pa.id, 100, t0, low_id), policy: Some(pa) },
        ]);

        assert_eq!(forward.hash, reversed.hash);
        assert_eq!(
            forward.source_for("winget.package", "marker").unwrap().policy_name,
            reversed.source_for("winget.package", "marker").unwrap().policy_name,
        );
    }
}
