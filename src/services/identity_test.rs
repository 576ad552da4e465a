use super::*;

fn identity(name: Option<&str>, email: Option<&str>) -> ExternalIdentity {
    ExternalIdentity { subject: "auth0|abc123".into(), name: name.map(Into::into), email: email.map(Into::into) }
}

#[test]
fn display_name_prefers_name() {
    assert_eq!(identity(Some("Stefan"), Some("s@farm.test")).display_name(), "Stefan");
}

#[test]
fn display_name_falls_back_to_email_local_part() {
    assert_eq!(identity(Some("   "), Some("maria@farm.test")).display_name(), "maria");
    assert_eq!(identity(None, Some("maria@farm.test")).display_name(), "maria");
}

#[test]
fn display_name_falls_back_to_subject() {
    assert_eq!(identity(None, None).display_name(), "auth0|abc123");
    assert_eq!(identity(None, Some("@farm.test")).display_name(), "auth0|abc123");
}

#[test]
fn external_identity_accepts_sub_alias() {
    let parsed: ExternalIdentity =
        serde_json::from_str(r#"{"sub":"user-7","name":"Lee","email":"lee@farm.test"}"#).unwrap();
    assert_eq!(parsed.subject, "user-7");
    assert_eq!(parsed.name.as_deref(), Some("Lee"));
}

#[test]
fn external_identity_missing_optional_fields() {
    let parsed: ExternalIdentity = serde_json::from_str(r#"{"id":"42"}"#).unwrap();
    assert_eq!(parsed.subject, "42");
    assert!(parsed.name.is_none());
    assert!(parsed.email.is_none());
}

#[test]
fn http_provider_builds_from_config() {
    let config = IdentityConfig { userinfo_url: "https://id.example.test/userinfo".into(), timeout_secs: 3 };
    let provider = HttpIdentityProvider::new(&config).unwrap();
    assert_eq!(provider.userinfo_url, "https://id.example.test/userinfo");
}
