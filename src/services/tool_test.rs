use super::*;

fn dummy_tool() -> ToolRow {
    ToolRow {
        id: Uuid::new_v4(),
        organization_id: Uuid::new_v4(),
        name: "Post Hole Digger".into(),
        description: Some("Two-handle manual digger".into()),
        category: Some("hand_tools".into()),
        condition: Some("good".into()),
        status: "available".into(),
        storage_vicinity: Some("Shed A".into()),
        storage_location: Some("Rack 2".into()),
        serial_number: None,
        manual_url: None,
        image_url: None,
        last_audited_at: None,
        created_by: None,
        created_at: 1_700_000_000_000,
        updated_at: 1_700_000_000_000,
    }
}

// =============================================================================
// ToolStatus
// =============================================================================

#[test]
fn tool_status_round_trips_through_str() {
    for status in [ToolStatus::Available, ToolStatus::CheckedOut, ToolStatus::Unavailable, ToolStatus::UnableToFind] {
        assert_eq!(ToolStatus::parse(status.as_str()), Some(status));
    }
    assert_eq!(ToolStatus::parse("lost"), None);
}

#[test]
fn editable_status_rejects_checked_out() {
    assert!(matches!(parse_editable_status("checked_out"), Err(ToolError::Validation(_))));
    assert!(matches!(parse_editable_status("broken"), Err(ToolError::Validation(_))));
    assert_eq!(parse_editable_status("unavailable").unwrap(), ToolStatus::Unavailable);
}

// =============================================================================
// validate_new_tool
// =============================================================================

#[test]
fn validate_new_tool_trims_and_drops_blank_fields() {
    let tool = NewTool {
        name: "  Chainsaw ".into(),
        category: Some("   ".into()),
        storage_vicinity: Some(" Barn ".into()),
        ..NewTool::default()
    };
    let tool = validate_new_tool(tool).unwrap();
    assert_eq!(tool.name, "Chainsaw");
    assert!(tool.category.is_none());
    assert_eq!(tool.storage_vicinity.as_deref(), Some("Barn"));
    assert!(tool.status.is_none());
}

#[test]
fn validate_new_tool_requires_name() {
    let tool = NewTool { name: "  ".into(), ..NewTool::default() };
    assert!(matches!(validate_new_tool(tool), Err(ToolError::Validation(_))));
}

// =============================================================================
// apply_update
// =============================================================================

#[test]
fn apply_update_clears_optional_fields() {
    let mut row = dummy_tool();
    let update = ToolUpdate { description: Some(None), storage_location: Some(Some("Rack 9".into())), ..Default::default() };
    apply_update(&mut row, update).unwrap();
    assert!(row.description.is_none());
    assert_eq!(row.storage_location.as_deref(), Some("Rack 9"));
    assert_eq!(row.name, "Post Hole Digger");
}

#[test]
fn apply_update_refuses_status_edit_while_checked_out() {
    let mut row = dummy_tool();
    row.status = "checked_out".into();
    let update = ToolUpdate { status: Some("available".into()), ..Default::default() };
    assert!(matches!(apply_update(&mut row, update), Err(ToolError::Validation(_))));
    assert_eq!(row.status, "checked_out");
}

#[test]
fn apply_update_sets_status() {
    let mut row = dummy_tool();
    let update = ToolUpdate { status: Some("unavailable".into()), ..Default::default() };
    apply_update(&mut row, update).unwrap();
    assert_eq!(row.status, "unavailable");
}

#[test]
fn tool_update_distinguishes_null_from_missing() {
    let update: ToolUpdate = serde_json::from_str(r#"{"description":null}"#).unwrap();
    assert!(matches!(update.description, Some(None)));
    assert!(update.category.is_none());
}

#[test]
fn json_null_update_clears_description() {
    let mut row = dummy_tool();
    row.description = Some("16 inch bar".into());
    row.category = Some("power".into());
    let update: ToolUpdate = serde_json::from_str(r#"{"description":null,"manual_url":null}"#).unwrap();
    apply_update(&mut row, update).unwrap();
    assert!(row.description.is_none());
    assert_eq!(row.category.as_deref(), Some("power"));
}

// =============================================================================
// escape_like
// =============================================================================

#[test]
fn escape_like_escapes_wildcards() {
    assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    assert_eq!(escape_like("rake"), "rake");
}

// =============================================================================
// JSONL
// =============================================================================

#[test]
fn export_lines_start_with_meta() {
    let org_id = Uuid::new_v4();
    let tools = vec![dummy_tool(), dummy_tool()];
    let lines = export_lines(org_id, &tools, 42).unwrap();
    assert_eq!(lines.len(), 3);
    let meta: serde_json::Value = serde_json::from_str(lines[0].trim()).unwrap();
    assert_eq!(meta["type"], "tool_export_meta");
    assert_eq!(meta["tool_count"], 2);
    let first: serde_json::Value = serde_json::from_str(lines[1].trim()).unwrap();
    assert_eq!(first["type"], "tool");
    assert_eq!(first["name"], "Post Hole Digger");
    assert!(lines.iter().all(|l| l.ends_with('\n')));
}

#[test]
fn exported_tool_line_imports_back() {
    let tools = vec![dummy_tool()];
    let lines = export_lines(Uuid::nil(), &tools, 0).unwrap();
    let parsed = parse_import_line(lines[1].trim()).unwrap().unwrap();
    assert_eq!(parsed.name, "Post Hole Digger");
    assert_eq!(parsed.storage_vicinity.as_deref(), Some("Shed A"));
    assert_eq!(parsed.status.as_deref(), Some("available"));
}

#[test]
fn parse_import_skips_meta_line() {
    let line = r#"{"type":"tool_export_meta","version":1}"#;
    assert!(parse_import_line(line).unwrap().is_none());
}

#[test]
fn parse_import_skips_nameless_and_non_objects() {
    assert!(parse_import_line(r#"{"type":"tool","category":"x"}"#).unwrap().is_none());
    assert!(parse_import_line("42").unwrap().is_none());
}

#[test]
fn parse_import_accepts_untyped_line() {
    let parsed = parse_import_line(r#"{"name":"Wheelbarrow","condition":"worn"}"#).unwrap().unwrap();
    assert_eq!(parsed.name, "Wheelbarrow");
    assert_eq!(parsed.condition.as_deref(), Some("worn"));
    assert!(parsed.status.is_none());
}

#[test]
fn parse_import_downgrades_checked_out() {
    let parsed = parse_import_line(r#"{"name":"Drill","status":"checked_out"}"#).unwrap().unwrap();
    assert_eq!(parsed.status.as_deref(), Some("available"));
}

#[test]
fn parse_import_drops_unknown_status() {
    let parsed = parse_import_line(r#"{"name":"Drill","status":"stolen"}"#).unwrap().unwrap();
    assert!(parsed.status.is_none());
}

#[test]
fn parse_import_invalid_json_returns_error() {
    assert!(parse_import_line("not json").is_err());
}

// =============================================================================
// Live database
// =============================================================================

#[cfg(feature = "live-db-tests")]
#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL/live Postgres"]
async fn field_edit_keeps_checked_out_status() {
    use crate::db::test_helpers::{integration_pool, seed_org};
    use crate::services::checkout::{self, CheckoutRequest};

    let pool = integration_pool().await;
    let (org_id, user_id) = seed_org(&pool, "tooledit").await;
    let row = create_tool(&pool, org_id, user_id, NewTool { name: "Post driver".into(), ..Default::default() })
        .await
        .expect("create_tool should succeed");
    checkout::checkout_tool(&pool, org_id, row.id, user_id, "Sam", CheckoutRequest::default())
        .await
        .expect("checkout should succeed");

    let update: ToolUpdate = serde_json::from_str(r#"{"description":"needs new sleeve"}"#).unwrap();
    let updated = update_tool(&pool, org_id, row.id, update).await.expect("update should succeed");
    assert_eq!(updated.status, "checked_out");
    assert_eq!(updated.description.as_deref(), Some("needs new sleeve"));

    let blocked: ToolUpdate = serde_json::from_str(r#"{"status":"available"}"#).unwrap();
    assert!(matches!(update_tool(&pool, org_id, row.id, blocked).await, Err(ToolError::Validation(_))));
}
