//! Delegated identity verification.
//!
//! ARCHITECTURE
//! ============
//! Login itself happens at an external provider. Clients present the
//! provider's access token as a bearer token; when no local session matches,
//! the token is verified by calling the provider's userinfo endpoint. The
//! provider sits behind a trait so route tests can swap in a mock.

use std::time::Duration;

use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::config::IdentityConfig;

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("token rejected by identity provider")]
    Rejected,
    #[error("identity provider error: {0}")]
    Provider(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Profile returned by the identity provider for a valid token.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct ExternalIdentity {
    #[serde(alias = "sub", alias = "id")]
    pub subject: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl ExternalIdentity {
    /// Display name fallback chain: name, email local part, subject.
    #[must_use]
    pub fn display_name(&self) -> String {
        if let Some(name) = self.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            return name.to_owned();
        }
        if let Some(local) = self
            .email
            .as_deref()
            .and_then(|e| e.split('@').next())
            .filter(|l| !l.is_empty())
        {
            return local.to_owned();
        }
        self.subject.clone()
    }
}

#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve a bearer token to the provider's identity for it.
    async fn verify(&self, token: &str) -> Result<ExternalIdentity, IdentityError>;
}

/// Userinfo-endpoint provider over HTTPS.
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    userinfo_url: String,
}

impl HttpIdentityProvider {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &IdentityConfig) -> Result<Self, IdentityError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("farmhand")
            .build()
            .map_err(|e| IdentityError::Provider(e.to_string()))?;
        Ok(Self { client, userinfo_url: config.userinfo_url.clone() })
    }
}

#[async_trait::async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn verify(&self, token: &str) -> Result<ExternalIdentity, IdentityError> {
        let resp = self
            .client
            .get(&self.userinfo_url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| IdentityError::Provider(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(IdentityError::Rejected);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(IdentityError::Provider(format!("{status}: {body}")));
        }

        resp.json::<ExternalIdentity>()
            .await
            .map_err(|e| IdentityError::Provider(e.to_string()))
    }
}

/// Upsert a user from a verified external identity. Returns the user's UUID.
pub async fn upsert_external_user(pool: &PgPool, identity: &ExternalIdentity) -> Result<Uuid, IdentityError> {
    let row = sqlx::query(
        r"INSERT INTO users (id, name, email, external_subject, created_at)
          VALUES ($1, $2, $3, $4, $5)
          ON CONFLICT (external_subject) DO UPDATE SET name = EXCLUDED.name, email = EXCLUDED.email
          RETURNING id",
    )
    .bind(Uuid::new_v4())
    .bind(identity.display_name())
    .bind(&identity.email)
    .bind(&identity.subject)
    .bind(crate::db::now_ms())
    .fetch_one(pool)
    .await?;
    Ok(row.get("id"))
}

#[cfg(test)]
#[path = "identity_test.rs"]
mod tests;
