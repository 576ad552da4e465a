use super::*;

fn photo(url: &str) -> ObservationPhoto {
    ObservationPhoto { photo_url: url.into(), photo_description: None, photo_order: 99 }
}

#[test]
fn photos_are_renumbered_in_given_order() {
    let ordered = order_photos(vec![photo("b.jpg"), photo("a.jpg"), photo("c.jpg")]);
    let urls: Vec<&str> = ordered.iter().map(|p| p.photo_url.as_str()).collect();
    let orders: Vec<i32> = ordered.iter().map(|p| p.photo_order).collect();
    assert_eq!(urls, vec!["b.jpg", "a.jpg", "c.jpg"]);
    assert_eq!(orders, vec![0, 1, 2]);
}

#[test]
fn blank_photo_urls_are_dropped_without_gaps() {
    let ordered = order_photos(vec![photo("a.jpg"), photo("  "), photo("c.jpg")]);
    assert_eq!(ordered.len(), 2);
    assert_eq!(ordered[1].photo_url, "c.jpg");
    assert_eq!(ordered[1].photo_order, 1);
}

#[test]
fn blank_descriptions_become_none() {
    let mut p = photo("a.jpg");
    p.photo_description = Some("   ".into());
    assert!(order_photos(vec![p])[0].photo_description.is_none());
}

#[test]
fn duplicate_links_are_collapsed() {
    let tool = EntityLink { entity_type: EntityType::Tool, entity_id: Uuid::new_v4() };
    let part = EntityLink { entity_type: EntityType::Part, entity_id: Uuid::new_v4() };
    assert_eq!(dedup_links(&[tool, part, tool]), vec![tool, part]);
}

#[test]
fn same_id_different_type_is_distinct() {
    let id = Uuid::new_v4();
    let links = [
        EntityLink { entity_type: EntityType::Tool, entity_id: id },
        EntityLink { entity_type: EntityType::Part, entity_id: id },
    ];
    assert_eq!(dedup_links(&links).len(), 2);
}

#[test]
fn author_can_delete() {
    let author = Uuid::new_v4();
    assert!(can_delete(Some(author), author, OrgRole::Contributor));
}

#[test]
fn admin_can_delete_anyone() {
    assert!(can_delete(Some(Uuid::new_v4()), Uuid::new_v4(), OrgRole::Admin));
    assert!(can_delete(None, Uuid::new_v4(), OrgRole::Admin));
}

#[test]
fn leadership_cannot_delete_others() {
    assert!(!can_delete(Some(Uuid::new_v4()), Uuid::new_v4(), OrgRole::Leadership));
}

#[test]
fn empty_observation_is_rejected() {
    assert!(validate_content("  ", &[]).is_err());
    assert!(validate_content("", &[photo("a.jpg")]).is_ok());
    assert!(validate_content("fence down", &[]).is_ok());
}

#[test]
fn entity_link_deserializes_snake_case() {
    let id = Uuid::new_v4();
    let link: EntityLink = serde_json::from_str(&format!(r#"{{"entity_type":"part","entity_id":"{id}"}}"#)).unwrap();
    assert_eq!(link.entity_type, EntityType::Part);
    assert_eq!(link.entity_id, id);
}
