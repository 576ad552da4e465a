use super::*;

// =============================================================================
// OrgRole / OrgPermission
// =============================================================================

#[test]
fn role_round_trips_through_str() {
    for role in [OrgRole::Contributor, OrgRole::Leadership, OrgRole::Admin] {
        assert_eq!(OrgRole::parse(role.as_str()), Some(role));
    }
}

#[test]
fn role_parse_is_case_insensitive_and_trimmed() {
    assert_eq!(OrgRole::parse(" Admin "), Some(OrgRole::Admin));
    assert_eq!(OrgRole::parse("LEADERSHIP"), Some(OrgRole::Leadership));
    assert_eq!(OrgRole::parse("owner"), None);
}

#[test]
fn contributor_can_view_and_contribute_only() {
    let role = OrgRole::Contributor;
    assert!(role.allows(OrgPermission::View));
    assert!(role.allows(OrgPermission::Contribute));
    assert!(!role.allows(OrgPermission::Lead));
    assert!(!role.allows(OrgPermission::Admin));
}

#[test]
fn leadership_can_lead_but_not_admin() {
    let role = OrgRole::Leadership;
    assert!(role.allows(OrgPermission::Lead));
    assert!(!role.allows(OrgPermission::Admin));
}

#[test]
fn admin_allows_everything() {
    for permission in [OrgPermission::View, OrgPermission::Contribute, OrgPermission::Lead, OrgPermission::Admin] {
        assert!(OrgRole::Admin.allows(permission));
    }
}

#[test]
fn role_serializes_snake_case() {
    assert_eq!(serde_json::to_value(OrgRole::Leadership).unwrap(), "leadership");
}

// =============================================================================
// normalize_subdomain
// =============================================================================

#[test]
fn subdomain_is_lowercased_and_trimmed() {
    assert_eq!(normalize_subdomain("  Stargazer-Farm ").unwrap(), "stargazer-farm");
}

#[test]
fn subdomain_rejects_bad_shapes() {
    let long = "a".repeat(64);
    for raw in ["ab", "-farm", "farm-", "farm_one", "farm one", "", long.as_str()] {
        assert!(
            matches!(normalize_subdomain(raw), Err(OrgError::Validation(_))),
            "expected rejection for {raw:?}"
        );
    }
}

#[test]
fn subdomain_accepts_digits() {
    assert_eq!(normalize_subdomain("farm42").unwrap(), "farm42");
}

// =============================================================================
// require_name / normalize_attributes
// =============================================================================

#[test]
fn require_name_rejects_blank() {
    assert!(require_name("   ", "name").is_err());
    assert_eq!(require_name(" North Field ", "name").unwrap(), "North Field");
}

#[test]
fn normalize_attributes_sorts_and_lowercases() {
    let attrs = vec![
        MemberAttribute { attribute_type: "Welding".into(), level: 4 },
        MemberAttribute { attribute_type: " electrical".into(), level: 2 },
    ];
    let out = normalize_attributes(&attrs).unwrap();
    assert_eq!(out[0].attribute_type, "electrical");
    assert_eq!(out[1].attribute_type, "welding");
}

#[test]
fn normalize_attributes_rejects_out_of_range() {
    let attrs = vec![MemberAttribute { attribute_type: "welding".into(), level: 11 }];
    assert!(matches!(normalize_attributes(&attrs), Err(OrgError::Validation(_))));
    let attrs = vec![MemberAttribute { attribute_type: "welding".into(), level: -1 }];
    assert!(matches!(normalize_attributes(&attrs), Err(OrgError::Validation(_))));
}

#[test]
fn normalize_attributes_rejects_duplicates() {
    let attrs = vec![
        MemberAttribute { attribute_type: "welding".into(), level: 1 },
        MemberAttribute { attribute_type: "WELDING".into(), level: 3 },
    ];
    assert!(matches!(normalize_attributes(&attrs), Err(OrgError::Validation(_))));
}

// =============================================================================
// Last admin
// =============================================================================

#[test]
fn sole_admin_cannot_be_demoted_or_removed() {
    let admin = Uuid::new_v4();
    assert!(strips_last_admin(&[admin], admin, Some(OrgRole::Leadership)));
    assert!(strips_last_admin(&[admin], admin, None));
    assert!(!strips_last_admin(&[admin], admin, Some(OrgRole::Admin)));
}

#[test]
fn other_members_never_strip_the_last_admin() {
    let admin = Uuid::new_v4();
    assert!(!strips_last_admin(&[admin], Uuid::new_v4(), None));
    assert!(!strips_last_admin(&[admin, Uuid::new_v4()], admin, Some(OrgRole::Contributor)));
}

#[cfg(feature = "live-db-tests")]
#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL/live Postgres"]
async fn racing_demotions_leave_one_admin() {
    use crate::db::test_helpers::{integration_pool, seed_org};
    use crate::services::session;

    let pool = integration_pool().await;
    let (org_id, first) = seed_org(&pool, "admins").await;
    let second = session::upsert_dev_user(&pool, &format!("admins-{}", Uuid::new_v4()))
        .await
        .expect("user upsert should succeed");
    upsert_member(&pool, org_id, second, OrgRole::Admin).await.expect("second admin should be added");

    let (a, b) = tokio::join!(
        upsert_member(&pool, org_id, first, OrgRole::Contributor),
        upsert_member(&pool, org_id, second, OrgRole::Contributor),
    );
    assert_eq!(u8::from(a.is_ok()) + u8::from(b.is_ok()), 1);
    assert!(matches!(a.err().or(b.err()), Some(OrgError::Conflict(_))));

    let admins: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM organization_members WHERE organization_id = $1 AND role = 'admin'")
            .bind(org_id)
            .fetch_one(&pool)
            .await
            .expect("count should load");
    assert_eq!(admins, 1);
}
