use super::*;
use rand::SeedableRng;
use rand::rngs::StdRng;

/// (label, `last_audited_at`)
type Item = (&'static str, Option<i64>);

fn last(item: &Item) -> Option<i64> {
    item.1
}

fn rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

fn shed_a() -> Vec<Item> {
    vec![
        ("never-1", None),
        ("old-1", Some(100)),
        ("never-2", None),
        ("old-2", Some(200)),
        ("old-3", Some(300)),
        ("never-3", None),
        ("old-4", Some(400)),
        ("old-5", Some(500)),
        ("old-6", Some(600)),
        ("old-7", Some(700)),
        ("old-8", Some(800)),
        ("old-9", Some(900)),
        ("old-10", Some(1000)),
    ]
}

// =============================================================================
// clamp_quantity
// =============================================================================

#[test]
fn clamp_quantity_defaults_to_five() {
    assert_eq!(clamp_quantity(None), 5);
}

#[test]
fn clamp_quantity_bounds() {
    assert_eq!(clamp_quantity(Some(0)), 1);
    assert_eq!(clamp_quantity(Some(-4)), 1);
    assert_eq!(clamp_quantity(Some(7)), 7);
    assert_eq!(clamp_quantity(Some(20)), 20);
    assert_eq!(clamp_quantity(Some(500)), 20);
}

// =============================================================================
// select_audit_set
// =============================================================================

#[test]
fn three_never_audited_plus_two_least_recent() {
    let selected = select_audit_set(shed_a(), 5, last, &mut rng(1));
    assert_eq!(selected.len(), 5);

    let labels: Vec<&str> = selected.iter().map(|i| i.0).collect();
    for never in ["never-1", "never-2", "never-3"] {
        assert!(labels.contains(&never), "missing {never} in {labels:?}");
    }
    assert_eq!(&labels[3..], &["old-1", "old-2"]);
}

#[test]
fn never_audited_come_first_in_order() {
    for seed in 0..20 {
        let selected = select_audit_set(shed_a(), 8, last, &mut rng(seed));
        let first_audited = selected.iter().position(|i| i.1.is_some()).unwrap();
        assert!(selected[first_audited..].iter().all(|i| i.1.is_some()));
        assert_eq!(first_audited, 3);
    }
}

#[test]
fn previously_audited_fill_in_ascending_order() {
    let selected = select_audit_set(shed_a(), 8, last, &mut rng(3));
    let tail: Vec<i64> = selected.iter().filter_map(|i| i.1).collect();
    assert_eq!(tail, vec![100, 200, 300, 400, 500]);
}

#[test]
fn small_pool_returns_everything_without_padding() {
    let pool: Vec<Item> = vec![("a", None), ("b", Some(5)), ("c", Some(1)), ("d", None)];
    let selected = select_audit_set(pool, 20, last, &mut rng(9));
    assert_eq!(selected.len(), 4);
    let mut labels: Vec<&str> = selected.iter().map(|i| i.0).collect();
    labels.sort_unstable();
    assert_eq!(labels, vec!["a", "b", "c", "d"]);
}

#[test]
fn empty_pool_returns_empty() {
    let selected = select_audit_set(Vec::<Item>::new(), 5, last, &mut rng(0));
    assert!(selected.is_empty());
}

#[test]
fn zero_quantity_returns_empty() {
    assert!(select_audit_set(shed_a(), 0, last, &mut rng(0)).is_empty());
}

#[test]
fn surplus_never_audited_is_sampled_to_exact_quantity() {
    let pool: Vec<Item> = (0..12)
        .map(|i| (["n0", "n1", "n2", "n3", "n4", "n5", "n6", "n7", "n8", "n9", "n10", "n11"][i], None))
        .chain([("old", Some(1))])
        .collect();
    for seed in 0..20 {
        let selected = select_audit_set(pool.clone(), 5, last, &mut rng(seed));
        assert_eq!(selected.len(), 5);
        assert!(selected.iter().all(|i| i.1.is_none()), "audited tool chosen over never-audited");
        for item in &selected {
            assert!(pool.contains(item));
        }
        let mut labels: Vec<&str> = selected.iter().map(|i| i.0).collect();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), 5, "duplicates in selection");
    }
}

#[test]
fn repeated_sampling_varies_but_respects_priority() {
    let pool: Vec<Item> = vec![
        ("n0", None),
        ("n1", None),
        ("n2", None),
        ("n3", None),
        ("n4", None),
        ("n5", None),
        ("n6", None),
        ("n7", None),
    ];
    let mut seen = HashSet::new();
    for seed in 0..30 {
        let selected = select_audit_set(pool.clone(), 3, last, &mut rng(seed));
        let mut labels: Vec<&str> = selected.iter().map(|i| i.0).collect();
        labels.sort_unstable();
        seen.insert(labels);
    }
    assert!(seen.len() > 1, "sampling never varied across seeds");
}

#[test]
fn exact_fit_returns_whole_pool() {
    let pool: Vec<Item> = vec![("a", None), ("b", Some(2)), ("c", Some(1))];
    let selected = select_audit_set(pool, 3, last, &mut rng(4));
    let labels: Vec<&str> = selected.iter().map(|i| i.0).collect();
    assert_eq!(labels, vec!["a", "c", "b"]);
}

// =============================================================================
// status_after_audit
// =============================================================================

#[test]
fn missing_tool_becomes_unable_to_find() {
    assert_eq!(status_after_audit(ToolStatus::Available, false), ToolStatus::UnableToFind);
    assert_eq!(status_after_audit(ToolStatus::Unavailable, false), ToolStatus::UnableToFind);
}

#[test]
fn found_tool_recovers_from_unable_to_find() {
    assert_eq!(status_after_audit(ToolStatus::UnableToFind, true), ToolStatus::Available);
}

#[test]
fn found_tool_keeps_status() {
    assert_eq!(status_after_audit(ToolStatus::Available, true), ToolStatus::Available);
    assert_eq!(status_after_audit(ToolStatus::Unavailable, true), ToolStatus::Unavailable);
}

#[test]
fn checked_out_tool_is_untouched() {
    assert_eq!(status_after_audit(ToolStatus::CheckedOut, false), ToolStatus::CheckedOut);
    assert_eq!(status_after_audit(ToolStatus::CheckedOut, true), ToolStatus::CheckedOut);
}

// =============================================================================
// order_session_tools
// =============================================================================

fn tool_with_id(id: Uuid) -> ToolRow {
    ToolRow {
        id,
        organization_id: Uuid::nil(),
        name: format!("tool-{id}"),
        description: None,
        category: None,
        condition: None,
        status: "available".into(),
        storage_vicinity: Some("Shed A".into()),
        storage_location: None,
        serial_number: None,
        manual_url: None,
        image_url: None,
        last_audited_at: None,
        created_by: None,
        created_at: 0,
        updated_at: 0,
    }
}

#[test]
fn order_session_tools_follows_snapshot_and_flags_progress() {
    let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
    let fetched = vec![tool_with_id(ids[2]), tool_with_id(ids[0]), tool_with_id(ids[1])];
    let audited: HashSet<Uuid> = [ids[1]].into_iter().collect();

    let ordered = order_session_tools(&ids, fetched, &audited);
    let order: Vec<Uuid> = ordered.iter().map(|t| t.tool.id).collect();
    assert_eq!(order, ids);
    assert_eq!(ordered.iter().map(|t| t.audited).collect::<Vec<_>>(), vec![false, true, false]);
}

#[test]
fn order_session_tools_drops_missing_tools() {
    let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
    let ordered = order_session_tools(&ids, vec![tool_with_id(ids[1])], &HashSet::new());
    assert_eq!(ordered.len(), 1);
    assert_eq!(ordered[0].tool.id, ids[1]);
}

#[test]
fn tool_audit_request_defaults_photos() {
    let request: ToolAuditRequest = serde_json::from_str(r#"{"found":true}"#).unwrap();
    assert!(request.found);
    assert!(request.photo_urls.is_empty());
    assert!(request.audit_session_id.is_none());
}

// =============================================================================
// ensure_session_accepts
// =============================================================================

fn session(tool_ids: Vec<Uuid>, completed_at: Option<i64>) -> AuditSession {
    AuditSession {
        id: Uuid::new_v4(),
        organization_id: Uuid::nil(),
        vicinity: "Shed A".into(),
        requested_quantity: 5,
        tool_ids,
        created_by: None,
        created_at: 0,
        completed_at,
    }
}

#[test]
fn open_session_accepts_its_own_tools() {
    let tool_id = Uuid::new_v4();
    assert!(ensure_session_accepts(&session(vec![tool_id], None), tool_id).is_ok());
}

#[test]
fn completed_session_rejects_results() {
    let tool_id = Uuid::new_v4();
    let result = ensure_session_accepts(&session(vec![tool_id], Some(10)), tool_id);
    assert!(matches!(result, Err(AuditError::SessionCompleted(_))));
}

#[test]
fn session_rejects_foreign_tool() {
    let result = ensure_session_accepts(&session(vec![Uuid::new_v4()], None), Uuid::new_v4());
    assert!(matches!(result, Err(AuditError::ToolNotInSession { .. })));
}

#[cfg(feature = "live-db-tests")]
#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL/live Postgres"]
async fn result_after_completion_is_rejected() {
    use crate::db::test_helpers::{integration_pool, seed_org};
    use crate::services::tool::{self, NewTool};

    let pool = integration_pool().await;
    let (org_id, user_id) = seed_org(&pool, "audit").await;
    let row = tool::create_tool(
        &pool,
        org_id,
        user_id,
        NewTool { name: "Pruner".into(), storage_vicinity: Some("Shed A".into()), ..Default::default() },
    )
    .await
    .expect("create_tool should succeed");
    let view = generate_audit(&pool, org_id, user_id, "Shed A", Some(1))
        .await
        .expect("generate_audit should succeed");
    let session_id = view.session.id;

    let request = |found: bool| ToolAuditRequest {
        audit_session_id: Some(session_id),
        found,
        condition: None,
        notes: None,
        photo_urls: Vec::new(),
    };
    let (recorded, completed) = tokio::join!(
        record_tool_audit(&pool, org_id, user_id, row.id, request(true)),
        complete_session(&pool, org_id, session_id),
    );
    completed.expect("complete should succeed");
    if let Ok(audit) = recorded {
        assert_eq!(audit.audit_session_id, Some(session_id));
    }

    let late = record_tool_audit(&pool, org_id, user_id, row.id, request(false)).await;
    assert!(matches!(late, Err(AuditError::SessionCompleted(_))));
}
