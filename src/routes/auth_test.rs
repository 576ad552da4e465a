use super::*;
use axum::http::HeaderValue;
use axum::http::header::COOKIE;

fn headers(pairs: &[(axum::http::HeaderName, &str)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in pairs {
        map.append(name.clone(), HeaderValue::from_str(value).unwrap());
    }
    map
}

// =============================================================================
// extract_token
// =============================================================================

#[test]
fn bearer_header_is_used() {
    let map = headers(&[(AUTHORIZATION, "Bearer abc123")]);
    assert_eq!(extract_token(&map).as_deref(), Some("abc123"));
}

#[test]
fn bearer_scheme_is_case_insensitive() {
    let map = headers(&[(AUTHORIZATION, "bearer   abc123  ")]);
    assert_eq!(extract_token(&map).as_deref(), Some("abc123"));
}

#[test]
fn cookie_is_used_without_header() {
    let map = headers(&[(COOKIE, "theme=dark; session_token=cookie-tok")]);
    assert_eq!(extract_token(&map).as_deref(), Some("cookie-tok"));
}

#[test]
fn header_wins_over_cookie() {
    let map = headers(&[(AUTHORIZATION, "Bearer header-tok"), (COOKIE, "session_token=cookie-tok")]);
    assert_eq!(extract_token(&map).as_deref(), Some("header-tok"));
}

#[test]
fn basic_auth_falls_back_to_cookie() {
    let map = headers(&[(AUTHORIZATION, "Basic dXNlcjpwYXNz"), (COOKIE, "session_token=cookie-tok")]);
    assert_eq!(extract_token(&map).as_deref(), Some("cookie-tok"));
}

#[test]
fn empty_values_yield_none() {
    assert_eq!(extract_token(&HeaderMap::new()), None);
    assert_eq!(extract_token(&headers(&[(AUTHORIZATION, "Bearer ")])), None);
    assert_eq!(extract_token(&headers(&[(COOKIE, "session_token=")])), None);
}

#[test]
fn session_cookie_is_http_only_and_scoped() {
    let cookie = session_cookie("tok".into(), true, Duration::hours(1));
    assert_eq!(cookie.name(), COOKIE_NAME);
    assert_eq!(cookie.path(), Some("/"));
    assert_eq!(cookie.http_only(), Some(true));
    assert_eq!(cookie.secure(), Some(true));
    assert_eq!(cookie.same_site(), Some(SameSite::Lax));
}

// =============================================================================
// verify_external
// =============================================================================

struct MockProvider {
    result: fn() -> Result<ExternalIdentity, IdentityError>,
}

#[async_trait::async_trait]
impl IdentityProvider for MockProvider {
    async fn verify(&self, _token: &str) -> Result<ExternalIdentity, IdentityError> {
        (self.result)()
    }
}

#[tokio::test]
async fn verified_token_returns_identity() {
    let provider = MockProvider {
        result: || Ok(ExternalIdentity { subject: "sub-1".into(), name: Some("Ana".into()), email: None }),
    };
    let identity = verify_external(&provider, "tok").await.unwrap();
    assert_eq!(identity.subject, "sub-1");
}

#[tokio::test]
async fn rejected_token_is_unauthorized() {
    let provider = MockProvider { result: || Err(IdentityError::Rejected) };
    assert_eq!(verify_external(&provider, "tok").await.unwrap_err(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn provider_failure_is_bad_gateway() {
    let provider = MockProvider { result: || Err(IdentityError::Provider("timeout".into())) };
    assert_eq!(verify_external(&provider, "tok").await.unwrap_err(), StatusCode::BAD_GATEWAY);
}
