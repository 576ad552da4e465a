use super::*;

// =============================================================================
// bytes_to_hex
// =============================================================================

#[test]
fn bytes_to_hex_empty() {
    assert_eq!(bytes_to_hex(&[]), "");
}

#[test]
fn bytes_to_hex_leading_zero() {
    assert_eq!(bytes_to_hex(&[0x0a]), "0a");
}

#[test]
fn bytes_to_hex_multi_byte() {
    assert_eq!(bytes_to_hex(&[0xde, 0xad, 0xbe, 0xef]), "deadbeef");
}

// =============================================================================
// generate_token / hash_token
// =============================================================================

#[test]
fn generate_token_is_64_hex_chars() {
    let token = generate_token();
    assert_eq!(token.len(), 64);
    assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn generate_token_two_calls_differ() {
    assert_ne!(generate_token(), generate_token());
}

#[test]
fn hash_token_matches_known_sha256() {
    assert_eq!(hash_token("abc"), "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
}

#[test]
fn hash_token_differs_from_token() {
    let token = generate_token();
    let hashed = hash_token(&token);
    assert_eq!(hashed.len(), 64);
    assert_ne!(hashed, token);
    assert_eq!(hashed, hash_token(&token));
}

// =============================================================================
// SessionUser
// =============================================================================

#[test]
fn session_user_serializes_fields() {
    let user = SessionUser {
        id: Uuid::nil(),
        name: "charlie".into(),
        email: None,
        auth_method: "session".into(),
    };
    let value = serde_json::to_value(&user).unwrap();
    assert_eq!(value["name"], "charlie");
    assert_eq!(value["auth_method"], "session");
    assert!(value["email"].is_null());
}
