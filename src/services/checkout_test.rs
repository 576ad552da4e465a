use super::*;

#[test]
fn validate_checkout_accepts_missing_return_date() {
    assert!(validate_checkout(&CheckoutRequest::default(), 1_000).is_ok());
}

#[test]
fn validate_checkout_accepts_future_return_date() {
    let request = CheckoutRequest { expected_return_at: Some(2_000), ..Default::default() };
    assert!(validate_checkout(&request, 1_000).is_ok());
}

#[test]
fn validate_checkout_rejects_past_return_date() {
    let request = CheckoutRequest { expected_return_at: Some(999), ..Default::default() };
    assert!(matches!(validate_checkout(&request, 1_000), Err(CheckoutError::Validation(_))));
}

#[test]
fn checkin_returns_tool_to_available_by_default() {
    assert_eq!(status_after_checkin(&CheckinRequest::default()), ToolStatus::Available);
}

#[test]
fn broken_checkin_marks_tool_unavailable() {
    let request = CheckinRequest { tool_broken: true, ..Default::default() };
    assert_eq!(status_after_checkin(&request), ToolStatus::Unavailable);
}

#[test]
fn checkin_request_defaults_tool_broken() {
    let request: CheckinRequest = serde_json::from_str(r#"{"checkin_notes":"all good"}"#).unwrap();
    assert!(!request.tool_broken);
    assert_eq!(request.checkin_notes.as_deref(), Some("all good"));
}

#[test]
fn trimmed_drops_blank() {
    assert_eq!(trimmed(Some("  ")), None);
    assert_eq!(trimmed(Some(" fence repair ")), Some("fence repair".into()));
    assert_eq!(trimmed(None), None);
}

#[test]
fn not_available_error_names_status() {
    let err = CheckoutError::NotAvailable { tool_id: Uuid::nil(), status: "checked_out".into() };
    assert!(err.to_string().contains("checked_out"));
}

#[cfg(feature = "live-db-tests")]
#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL/live Postgres"]
async fn second_checkout_conflicts_until_checkin() {
    use crate::db::test_helpers::{integration_pool, seed_org};
    use crate::services::tool;

    let pool = integration_pool().await;
    let (org_id, user_id) = seed_org(&pool, "checkout").await;
    let new_tool = tool::NewTool { name: "Chainsaw".into(), ..Default::default() };
    let row = tool::create_tool(&pool, org_id, user_id, new_tool)
        .await
        .expect("create_tool should succeed");

    let open = checkout_tool(&pool, org_id, row.id, user_id, "Rosa", CheckoutRequest::default())
        .await
        .expect("first checkout should succeed");
    assert_eq!(open.user_name, "Rosa");
    assert!(open.returned_at.is_none());

    let again = checkout_tool(&pool, org_id, row.id, user_id, "Rosa", CheckoutRequest::default()).await;
    assert!(matches!(again, Err(CheckoutError::NotAvailable { .. })));

    let closed = checkin_tool(&pool, org_id, row.id, CheckinRequest::default())
        .await
        .expect("checkin should succeed");
    assert!(closed.returned_at.is_some());
    let reloaded = tool::get_tool(&pool, org_id, row.id).await.expect("get_tool should succeed");
    assert_eq!(reloaded.status, "available");

    let history = tool_history(&pool, org_id, row.id).await.expect("history should load");
    assert_eq!(history.len(), 1);
}
