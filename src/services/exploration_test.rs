use super::*;

fn policy(status: &str) -> PolicyRow {
    PolicyRow {
        id: Uuid::new_v4(),
        organization_id: Uuid::nil(),
        title: "Rotate compost weekly".into(),
        description: String::new(),
        status: status.into(),
        created_by: None,
        created_at: 0,
        updated_at: 0,
    }
}

fn exploration() -> ExplorationRow {
    ExplorationRow {
        id: Uuid::new_v4(),
        organization_id: Uuid::nil(),
        exploration_code: "EX-20231114-01".into(),
        state_text: "Soil is compacted near the east gate".into(),
        exploration_notes_text: Some("tested with a penetrometer".into()),
        metrics_text: None,
        public_benefit: None,
        key_photos: Json(vec!["https://img.example/1.jpg".into()]),
        policy_id: None,
        created_by: None,
        created_at: 0,
        updated_at: 0,
    }
}

// =============================================================================
// Codes
// =============================================================================

#[test]
fn code_prefix_uses_utc_date() {
    assert_eq!(code_prefix(0), "EX-19700101-");
    assert_eq!(code_prefix(1_700_000_000_000), "EX-20231114-");
}

#[test]
fn first_code_of_the_day_is_01() {
    assert_eq!(next_code("EX-20231114-", &[]).as_deref(), Some("EX-20231114-01"));
}

#[test]
fn next_code_follows_highest_sequence() {
    let existing = vec!["EX-20231114-01".to_owned(), "EX-20231114-07".to_owned(), "EX-20231114-03".to_owned()];
    assert_eq!(next_code("EX-20231114-", &existing).as_deref(), Some("EX-20231114-08"));
}

#[test]
fn next_code_ignores_custom_suffixes() {
    let existing = vec!["EX-20231114-01".to_owned(), "EX-20231114-north".to_owned()];
    assert_eq!(next_code("EX-20231114-", &existing).as_deref(), Some("EX-20231114-02"));
}

#[test]
fn next_code_grows_past_two_digits() {
    let existing = vec!["EX-20231114-99".to_owned()];
    assert_eq!(next_code("EX-20231114-", &existing).as_deref(), Some("EX-20231114-100"));
}

#[test]
fn next_code_stops_at_largest_sequence() {
    let existing = vec!["EX-20231114-4294967295".to_owned()];
    assert_eq!(next_code("EX-20231114-", &existing), None);
}

#[test]
fn next_code_skips_sequences_too_large_to_parse() {
    let existing = vec!["EX-20231114-05".to_owned(), "EX-20231114-99999999999".to_owned()];
    assert_eq!(next_code("EX-20231114-", &existing).as_deref(), Some("EX-20231114-06"));
}

#[test]
fn supplied_code_is_uppercased() {
    assert_eq!(normalize_code(" ex-custom-1 ").unwrap(), "EX-CUSTOM-1");
}

#[test]
fn supplied_code_rejects_inner_whitespace() {
    assert!(matches!(normalize_code("EX 1"), Err(ExplorationError::Validation(_))));
}

// =============================================================================
// Updates
// =============================================================================

#[test]
fn exploration_update_clears_and_cleans() {
    let mut row = exploration();
    apply_exploration_update(
        &mut row,
        ExplorationUpdate {
            exploration_notes_text: Some(None),
            key_photos: Some(vec![" ".into(), "https://img.example/2.jpg".into()]),
            ..Default::default()
        },
    );
    assert!(row.exploration_notes_text.is_none());
    assert_eq!(row.key_photos.0, vec!["https://img.example/2.jpg".to_owned()]);
    assert_eq!(row.state_text, "Soil is compacted near the east gate");
}

#[test]
fn exploration_json_null_clears_notes() {
    let mut row = exploration();
    row.metrics_text = Some("3 beds".into());
    let update: ExplorationUpdate = serde_json::from_str(r#"{"exploration_notes_text":null}"#).unwrap();
    apply_exploration_update(&mut row, update);
    assert!(row.exploration_notes_text.is_none());
    assert_eq!(row.metrics_text.as_deref(), Some("3 beds"));
}

#[test]
fn policy_status_defaults_to_draft() {
    assert_eq!(parse_policy_status(None).unwrap(), PolicyStatus::Draft);
}

#[test]
fn policy_update_validates_status() {
    let mut row = policy("draft");
    apply_policy_update(&mut row, PolicyUpdate { status: Some("active".into()), ..Default::default() }).unwrap();
    assert_eq!(row.status, "active");
    assert!(apply_policy_update(&mut row, PolicyUpdate { status: Some("archived".into()), ..Default::default() }).is_err());
}

#[test]
fn policy_update_rejects_blank_title() {
    let mut row = policy("draft");
    let result = apply_policy_update(&mut row, PolicyUpdate { title: Some("  ".into()), ..Default::default() });
    assert!(result.is_err());
    assert_eq!(row.title, "Rotate compost weekly");
}
