use super::*;
use axum::body::Body;
use axum::http::{Method, Request, header};
use tower::ServiceExt;

use crate::config::Config;
use crate::state::test_helpers::{test_app_state, test_app_state_with_config};

fn request(method: Method, uri: &str, body: Option<&str>) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_owned()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

#[tokio::test]
async fn healthz_is_ok() {
    let response = app(test_app_state())
        .oneshot(request(Method::GET, "/healthz", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn org_routes_require_a_token() {
    let org = uuid::Uuid::new_v4();
    let tool = uuid::Uuid::new_v4();
    let uris = [
        (Method::GET, "/api/orgs".to_owned()),
        (Method::GET, "/api/auth/me".to_owned()),
        (Method::GET, format!("/api/orgs/{org}")),
        (Method::GET, format!("/api/orgs/{org}/tools")),
        (Method::GET, format!("/api/orgs/{org}/tools/{tool}")),
        (Method::GET, format!("/api/orgs/{org}/tools/export.jsonl")),
        (Method::GET, format!("/api/orgs/{org}/missions")),
        (Method::GET, format!("/api/orgs/{org}/analytics")),
        (Method::DELETE, format!("/api/orgs/{org}/observations/{tool}")),
    ];
    for (method, uri) in uris {
        let response = app(test_app_state())
            .oneshot(request(method.clone(), &uri, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{method} {uri}");
    }
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let response = app(test_app_state())
        .oneshot(request(Method::GET, "/api/nope", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn dev_session_hidden_when_bypass_disabled() {
    let response = app(test_app_state())
        .oneshot(request(Method::POST, "/api/dev/session", Some(r#"{"name":"Rosa"}"#)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn dev_session_rejects_blank_name() {
    let config = Config { dev_auth_bypass: true, ..Config::for_tests() };
    let response = app(test_app_state_with_config(config))
        .oneshot(request(Method::POST, "/api/dev/session", Some(r#"{"name":"   "}"#)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
