use crate::policy::{KnownResource, PackageEnsure, PolicyDocument, Resource};

#[test]
fn winget_resource_key_is_type_and_id() {
    let r = Resource::Known(KnownResource::WingetPackage {
        id: "putty".into(),
        name: "PuTTY".into(),
        package_id: "PuTTY.PuTTY".into(),
        ensure: PackageEnsure::Present,
        version: None,
        allow_upgrade: false,
        min_version: None,
    });
    assert_eq!(r.key(), ("winget.package".to_string(), "putty".to_string()));
}

#[test]
fn unknown_resource_round_trips_verbatim() {
    let raw = serde_json::json!({
        "type": "registry.value",
        "id": "telemetry-opt-out",
        "name": "Disable telemetry",
        "path": "HKLM:\\Software\\Vendor",
        "value_name": "OptOut",
        "value": 1
    });
    let doc_json = serde_json::json!({ "resources": [raw.clone()] });
    let doc: PolicyDocument = serde_json::from_value(doc_json).unwrap();
    assert_eq!(doc.resources.len(), 1);
    match &doc.resources[0] {
        Resource::Unknown(v) => assert_eq!(v, &raw),
        other => panic!("expected Unknown, got {other:?}"),
    }

    let round_tripped = serde_json::to_value(&doc.resources[0]).unwrap();
    assert_eq!(round_tripped, raw);
}

#[test]
fn known_resource_key_uses_declared_id() {
    let r = Resource::Known(KnownResource::PowershellScript {
        id: "marker".into(),
        name: "Marker".into(),
        detect: None,
        remediate: None,
        validate: None,
        timeout_seconds: 120,
    });
    assert_eq!(r.key(), ("script.powershell".to_string(), "marker".to_string()));
}
