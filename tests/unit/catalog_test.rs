//! Tests for the operation catalog and cooldown policy

use prometheus_call_budget::core::{
    cooldown_for_response, default_api_types, ApiType, ApiTypeCatalog, LookupStep, OperationCatalog,
};

#[test]
fn test_seeded_ids_are_stable() {
    let names: Vec<_> = default_api_types().into_iter().map(|t| (t.id, t.name)).collect();
    assert_eq!(
        names,
        vec![
            (1, "list_page_posts".to_string()),
            (2, "ads_insights".to_string()),
            (3, "ads_campaigns".to_string()),
        ]
    );
}

#[test]
fn test_custom_operation_can_be_defined() {
    let mut catalog = ApiTypeCatalog::with_defaults();
    catalog.insert(ApiType {
        id: 10,
        name: "page_insights".into(),
        description: None,
    });
    catalog.define(
        "page_insights",
        Some(LookupStep {
            path: "/me/accounts".into(),
            id_keys: vec!["id".into()],
        }),
        "/{id}/insights",
        vec![("metric".into(), "page_impressions".into())],
    );

    let op = catalog.resolve(10).unwrap();
    assert_eq!(op.target_path(Some("55")), "/55/insights");
    assert_eq!(op.params.len(), 1);
    assert_eq!(catalog.name_of(10), "page_insights");
    assert_eq!(catalog.name_of(11), "unknown:11");
}

#[test]
fn test_rate_limit_signal_drives_cooldown() {
    assert_eq!(cooldown_for_response(Some(4), None, Some(400)).unwrap().seconds, 900);
    assert_eq!(cooldown_for_response(Some(190), None, Some(400)).unwrap().seconds, 300);
    assert!(cooldown_for_response(None, None, Some(503)).is_none());
}
