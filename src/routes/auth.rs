//! Request authentication, session management, and the dev bootstrap.

use axum::extract::{FromRef, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use time::Duration;
use tracing::{error, warn};

use crate::services::identity::{self, ExternalIdentity, IdentityError, IdentityProvider};
use crate::services::session;
use crate::state::AppState;

pub(crate) const COOKIE_NAME: &str = "session_token";

/// Bearer token from the `Authorization` header, else the session cookie.
pub(crate) fn extract_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            let (scheme, token) = value.trim().split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
        })
        .filter(|token| !token.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_owned());
    }

    let jar = CookieJar::from_headers(headers);
    jar.get(COOKIE_NAME)
        .map(Cookie::value)
        .filter(|token| !token.is_empty())
        .map(str::to_owned)
}

fn session_cookie(value: String, secure: bool, max_age: Duration) -> Cookie<'static> {
    Cookie::build((COOKIE_NAME, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(max_age)
        .build()
}

/// Verify a token with the identity provider. A rejected token is 401; a
/// provider that cannot answer is 502.
pub(crate) async fn verify_external(
    provider: &dyn IdentityProvider,
    token: &str,
) -> Result<ExternalIdentity, StatusCode> {
    provider.verify(token).await.map_err(|e| match e {
        IdentityError::Rejected => StatusCode::UNAUTHORIZED,
        other => {
            warn!(error = %other, "identity provider verification failed");
            StatusCode::BAD_GATEWAY
        }
    })
}

// =============================================================================
// AUTH EXTRACTOR
// =============================================================================

/// Authenticated user extracted from a bearer token or the session cookie.
/// Use as a handler parameter to require authentication.
pub struct AuthUser {
    pub user: session::SessionUser,
    pub token: String,
}

impl<S> axum::extract::FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut axum::http::request::Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Some(token) = extract_token(&parts.headers) else {
            return Err(StatusCode::UNAUTHORIZED);
        };

        let app_state = AppState::from_ref(state);
        if let Some(user) = session::validate_session(&app_state.pool, &token).await.map_err(|e| {
            error!(error = %e, "session lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })? {
            return Ok(Self { user, token });
        }

        let Some(provider) = app_state.identity.as_ref() else {
            return Err(StatusCode::UNAUTHORIZED);
        };
        let external = verify_external(provider.as_ref(), &token).await?;

        let user_id = identity::upsert_external_user(&app_state.pool, &external).await.map_err(|e| {
            error!(error = %e, "external user upsert failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
        let user = session::load_user(&app_state.pool, user_id)
            .await
            .map_err(|e| {
                error!(error = %e, "user load failed");
                StatusCode::INTERNAL_SERVER_ERROR
            })?
            .ok_or(StatusCode::UNAUTHORIZED)?;

        Ok(Self { user, token })
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

/// `GET /api/auth/me`: return current user.
pub async fn me(auth: AuthUser) -> Json<session::SessionUser> {
    Json(auth.user)
}

/// `POST /api/auth/logout`: delete session, clear cookie.
pub async fn logout(State(state): State<AppState>, auth: AuthUser) -> impl IntoResponse {
    if let Err(e) = session::delete_session(&state.pool, &auth.token).await {
        warn!(error = %e, "session delete failed during logout");
    }
    let jar = CookieJar::new().add(session_cookie(String::new(), state.config.cookie_secure, Duration::ZERO));
    (jar, StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct DevSessionBody {
    pub name: String,
}

#[derive(Serialize)]
pub struct DevSessionResponse {
    pub token: String,
    pub user: session::SessionUser,
}

/// `POST /api/dev/session`: issue a local session for a named user.
///
/// Enabled only when `DEV_AUTH_BYPASS=true`.
pub async fn dev_session(
    State(state): State<AppState>,
    Json(body): Json<DevSessionBody>,
) -> Result<impl IntoResponse, StatusCode> {
    if !state.config.dev_auth_bypass {
        return Err(StatusCode::NOT_FOUND);
    }
    let name = body.name.trim();
    if name.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let internal = |e: sqlx::Error| {
        error!(error = %e, "dev session bootstrap failed");
        StatusCode::INTERNAL_SERVER_ERROR
    };
    let user_id = session::upsert_dev_user(&state.pool, name).await.map_err(internal)?;
    let token = session::create_session(&state.pool, user_id, state.config.session_ttl_hours)
        .await
        .map_err(internal)?;
    let mut user = session::load_user(&state.pool, user_id)
        .await
        .map_err(internal)?
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;
    "session".clone_into(&mut user.auth_method);

    let cookie = session_cookie(
        token.clone(),
        state.config.cookie_secure,
        Duration::hours(state.config.session_ttl_hours),
    );
    let jar = CookieJar::new().add(cookie);
    Ok((jar, Json(DevSessionResponse { token, user })))
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
