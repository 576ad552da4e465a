use super::*;

fn part(current: f64, minimum: f64) -> PartRow {
    PartRow {
        id: Uuid::new_v4(),
        organization_id: Uuid::nil(),
        name: "Hose clamp".into(),
        description: None,
        category: None,
        unit: "each".into(),
        current_quantity: current,
        minimum_quantity: minimum,
        storage_vicinity: None,
        storage_location: None,
        cost_per_unit: None,
        created_at: 0,
        updated_at: 0,
    }
}

fn delta(value: f64) -> QuantityAdjustment {
    QuantityAdjustment { delta: Some(value), ..Default::default() }
}

#[test]
fn positive_delta_is_an_add() {
    let (next, change) = resolve_adjustment(Uuid::nil(), 3.0, &delta(2.5)).unwrap();
    assert!((next - 5.5).abs() < f64::EPSILON);
    assert_eq!(change, ChangeType::Add);
}

#[test]
fn negative_delta_is_a_remove() {
    let (next, change) = resolve_adjustment(Uuid::nil(), 3.0, &delta(-3.0)).unwrap();
    assert!(next.abs() < f64::EPSILON);
    assert_eq!(change, ChangeType::Remove);
}

#[test]
fn delta_below_zero_is_rejected() {
    let err = resolve_adjustment(Uuid::nil(), 1.0, &delta(-2.0)).unwrap_err();
    assert!(matches!(err, PartError::InsufficientStock { .. }));
}

#[test]
fn zero_or_nan_delta_is_rejected() {
    assert!(matches!(resolve_adjustment(Uuid::nil(), 1.0, &delta(0.0)), Err(PartError::Validation(_))));
    assert!(matches!(resolve_adjustment(Uuid::nil(), 1.0, &delta(f64::NAN)), Err(PartError::Validation(_))));
}

#[test]
fn recount_sets_absolute_quantity() {
    let recount = QuantityAdjustment { set_to: Some(12.0), ..Default::default() };
    let (next, change) = resolve_adjustment(Uuid::nil(), 3.0, &recount).unwrap();
    assert!((next - 12.0).abs() < f64::EPSILON);
    assert_eq!(change, ChangeType::Adjust);
}

#[test]
fn recount_below_zero_is_rejected() {
    let recount = QuantityAdjustment { set_to: Some(-1.0), ..Default::default() };
    assert!(matches!(resolve_adjustment(Uuid::nil(), 3.0, &recount), Err(PartError::Validation(_))));
}

#[test]
fn adjustment_needs_exactly_one_mode() {
    let both = QuantityAdjustment { delta: Some(1.0), set_to: Some(2.0), reason: None };
    assert!(resolve_adjustment(Uuid::nil(), 3.0, &both).is_err());
    assert!(resolve_adjustment(Uuid::nil(), 3.0, &QuantityAdjustment::default()).is_err());
}

#[test]
fn low_stock_is_strictly_below_minimum() {
    assert!(is_low_stock(&part(1.0, 2.0)));
    assert!(!is_low_stock(&part(2.0, 2.0)));
    assert!(!is_low_stock(&part(5.0, 0.0)));
}

#[test]
fn new_part_defaults_unit_and_trims() {
    let part = validate_new_part(NewPart { name: "  Drip line ".into(), unit: Some(" ".into()), ..Default::default() })
        .unwrap();
    assert_eq!(part.name, "Drip line");
    assert_eq!(part.unit.as_deref(), Some("each"));
}

#[test]
fn new_part_rejects_negative_quantity() {
    let part = NewPart { name: "Seed".into(), current_quantity: -1.0, ..Default::default() };
    assert!(matches!(validate_new_part(part), Err(PartError::Validation(_))));
}

#[test]
fn new_part_rejects_blank_name() {
    assert!(validate_new_part(NewPart::default()).is_err());
}

#[test]
fn update_clears_optional_fields() {
    let mut row = part(1.0, 0.0);
    row.category = Some("plumbing".into());
    apply_part_update(&mut row, PartUpdate { category: Some(None), ..Default::default() }).unwrap();
    assert!(row.category.is_none());
}

#[test]
fn json_null_clears_cost_and_description() {
    let mut row = part(1.0, 0.0);
    row.description = Some("stainless".into());
    row.cost_per_unit = Some(0.75);
    let update: PartUpdate =
        serde_json::from_str(r#"{"description":null,"cost_per_unit":null}"#).unwrap();
    apply_part_update(&mut row, update).unwrap();
    assert!(row.description.is_none());
    assert!(row.cost_per_unit.is_none());
}

#[test]
fn json_missing_fields_leave_columns_alone() {
    let mut row = part(1.0, 0.0);
    row.category = Some("plumbing".into());
    let update: PartUpdate = serde_json::from_str(r#"{"name":"Pipe clamp"}"#).unwrap();
    apply_part_update(&mut row, update).unwrap();
    assert_eq!(row.name, "Pipe clamp");
    assert_eq!(row.category.as_deref(), Some("plumbing"));
}

#[test]
fn update_rejects_blank_unit() {
    let mut row = part(1.0, 0.0);
    let result = apply_part_update(&mut row, PartUpdate { unit: Some("  ".into()), ..Default::default() });
    assert!(result.is_err());
    assert_eq!(row.unit, "each");
}

#[test]
fn update_does_not_touch_current_quantity() {
    let mut row = part(4.0, 0.0);
    apply_part_update(&mut row, PartUpdate { minimum_quantity: Some(6.0), ..Default::default() }).unwrap();
    assert!((row.current_quantity - 4.0).abs() < f64::EPSILON);
    assert!(is_low_stock(&row));
}
