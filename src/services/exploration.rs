//! Exploration and policy service.
//!
//! DESIGN
//! ======
//! Explorations carry a human-readable code, `EX-YYYYMMDD-NN`, unique within
//! the organization. When the caller does not supply one, the next free
//! sequence number for the current UTC day is chosen; a concurrent insert that
//! takes the same code trips the unique index and the generator retries.
//!
//! An exploration links to at most one policy. A policy can be created
//! directly from an exploration, which inserts and links in one transaction.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use sqlx::types::Json;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::now_ms;
use crate::services::is_unique_violation;

const CODE_PREFIX: &str = "EX";
const CODE_INSERT_ATTEMPTS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum ExplorationError {
    #[error("exploration not found: {0}")]
    NotFound(Uuid),
    #[error("policy not found: {0}")]
    PolicyNotFound(Uuid),
    #[error("exploration code already in use: {0}")]
    CodeTaken(String),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyStatus {
    Draft,
    Active,
    Deprecated,
}

impl PolicyStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Deprecated => "deprecated",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "draft" => Some(Self::Draft),
            "active" => Some(Self::Active),
            "deprecated" => Some(Self::Deprecated),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ExplorationRow {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub exploration_code: String,
    pub state_text: String,
    pub exploration_notes_text: Option<String>,
    pub metrics_text: Option<String>,
    pub public_benefit: Option<String>,
    pub key_photos: Json<Vec<String>>,
    pub policy_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
    pub created_at: i64,
    pub updated_at: i64,
}

const EXPLORATION_COLUMNS: &str = "id, organization_id, exploration_code, state_text, exploration_notes_text, \
     metrics_text, public_benefit, key_photos, policy_id, created_by, created_at, updated_at";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PolicyRow {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub title: String,
    pub description: String,
    pub status: String,
    pub created_by: Option<Uuid>,
    pub created_at: i64,
    pub updated_at: i64,
}

const POLICY_COLUMNS: &str = "id, organization_id, title, description, status, created_by, created_at, updated_at";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewExploration {
    pub exploration_code: Option<String>,
    #[serde(default)]
    pub state_text: String,
    pub exploration_notes_text: Option<String>,
    pub metrics_text: Option<String>,
    pub public_benefit: Option<String>,
    #[serde(default)]
    pub key_photos: Vec<String>,
}

/// Text-field update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExplorationUpdate {
    pub state_text: Option<String>,
    #[serde(default, deserialize_with = "crate::services::double_option")]
    pub exploration_notes_text: Option<Option<String>>,
    #[serde(default, deserialize_with = "crate::services::double_option")]
    pub metrics_text: Option<Option<String>>,
    #[serde(default, deserialize_with = "crate::services::double_option")]
    pub public_benefit: Option<Option<String>>,
    pub key_photos: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewPolicy {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
}

// =============================================================================
// CODES
// =============================================================================

/// `EX-YYYYMMDD-` for the UTC day containing `at_ms`.
pub(crate) fn code_prefix(at_ms: i64) -> String {
    let at = OffsetDateTime::from_unix_timestamp_nanos(i128::from(at_ms) * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH);
    format!("{CODE_PREFIX}-{:04}{:02}{:02}-", at.year(), u8::from(at.month()), at.day())
}

/// Next code after the highest sequence already used under `prefix`, or
/// `None` once a supplied code has taken the largest sequence number.
pub(crate) fn next_code(prefix: &str, existing: &[String]) -> Option<String> {
    let highest = existing
        .iter()
        .filter_map(|code| code.strip_prefix(prefix))
        .filter_map(|seq| seq.parse::<u32>().ok())
        .max()
        .unwrap_or(0);
    let next = highest.checked_add(1)?;
    Some(format!("{prefix}{next:02}"))
}

fn normalize_code(raw: &str) -> Result<String, ExplorationError> {
    let code = raw.trim().to_ascii_uppercase();
    if code.is_empty() || code.len() > 64 || code.chars().any(char::is_whitespace) {
        return Err(ExplorationError::Validation(format!("invalid exploration code: {raw:?}")));
    }
    Ok(code)
}

fn clean(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_owned()).filter(|v| !v.is_empty())
}

pub(crate) fn clean_photos(photos: Vec<String>) -> Vec<String> {
    photos.into_iter().filter_map(|p| clean(Some(p))).collect()
}

fn parse_policy_status(raw: Option<&str>) -> Result<PolicyStatus, ExplorationError> {
    match raw {
        None => Ok(PolicyStatus::Draft),
        Some(raw) => PolicyStatus::parse(raw)
            .ok_or_else(|| ExplorationError::Validation(format!("unknown policy status: {raw}"))),
    }
}

fn require_title(raw: &str) -> Result<String, ExplorationError> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(ExplorationError::Validation("title is required".into()));
    }
    Ok(title.to_owned())
}

// =============================================================================
// EXPLORATIONS
// =============================================================================

async fn insert_exploration(
    pool: &PgPool,
    org_id: Uuid,
    created_by: Uuid,
    code: &str,
    exploration: &NewExploration,
    key_photos: &[String],
    now: i64,
) -> Result<ExplorationRow, sqlx::Error> {
    sqlx::query_as::<_, ExplorationRow>(&format!(
        "INSERT INTO explorations (id, organization_id, exploration_code, state_text, exploration_notes_text, \
             metrics_text, public_benefit, key_photos, created_by, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10) \
         RETURNING {EXPLORATION_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(org_id)
    .bind(code)
    .bind(exploration.state_text.trim())
    .bind(clean(exploration.exploration_notes_text.clone()))
    .bind(clean(exploration.metrics_text.clone()))
    .bind(clean(exploration.public_benefit.clone()))
    .bind(Json(key_photos))
    .bind(created_by)
    .bind(now)
    .fetch_one(pool)
    .await
}

/// Create an exploration, generating its code when none is supplied.
///
/// # Errors
///
/// `CodeTaken` when a supplied code already exists in the organization.
pub async fn create_exploration(
    pool: &PgPool,
    org_id: Uuid,
    created_by: Uuid,
    exploration: NewExploration,
) -> Result<ExplorationRow, ExplorationError> {
    let now = now_ms();
    let key_photos = clean_photos(exploration.key_photos.clone());

    if let Some(raw) = exploration.exploration_code.as_deref().filter(|c| !c.trim().is_empty()) {
        let code = normalize_code(raw)?;
        return match insert_exploration(pool, org_id, created_by, &code, &exploration, &key_photos, now).await {
            Ok(row) => {
                info!(%org_id, exploration_id = %row.id, code = %row.exploration_code, "exploration created");
                Ok(row)
            }
            Err(e) if is_unique_violation(&e) => Err(ExplorationError::CodeTaken(code)),
            Err(e) => Err(e.into()),
        };
    }

    let prefix = code_prefix(now);
    for attempt in 1..=CODE_INSERT_ATTEMPTS {
        let existing: Vec<String> = sqlx::query_scalar(
            "SELECT exploration_code FROM explorations WHERE organization_id = $1 AND exploration_code LIKE $2",
        )
        .bind(org_id)
        .bind(format!("{prefix}%"))
        .fetch_all(pool)
        .await?;
        let Some(code) = next_code(&prefix, &existing) else {
            warn!(%org_id, %prefix, "exploration code sequence exhausted");
            return Err(ExplorationError::CodeTaken(prefix));
        };
        match insert_exploration(pool, org_id, created_by, &code, &exploration, &key_photos, now).await {
            Ok(row) => {
                info!(%org_id, exploration_id = %row.id, code = %row.exploration_code, "exploration created");
                return Ok(row);
            }
            Err(e) if is_unique_violation(&e) => {
                warn!(%org_id, %code, attempt, "generated exploration code collided; retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(ExplorationError::CodeTaken(prefix))
}

/// List explorations, newest first.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn list_explorations(pool: &PgPool, org_id: Uuid) -> Result<Vec<ExplorationRow>, ExplorationError> {
    let rows = sqlx::query_as::<_, ExplorationRow>(&format!(
        "SELECT {EXPLORATION_COLUMNS} FROM explorations WHERE organization_id = $1 ORDER BY created_at DESC"
    ))
    .bind(org_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Fetch one exploration.
///
/// # Errors
///
/// `NotFound` if absent.
pub async fn get_exploration(pool: &PgPool, org_id: Uuid, exploration_id: Uuid) -> Result<ExplorationRow, ExplorationError> {
    sqlx::query_as::<_, ExplorationRow>(&format!(
        "SELECT {EXPLORATION_COLUMNS} FROM explorations WHERE id = $1 AND organization_id = $2"
    ))
    .bind(exploration_id)
    .bind(org_id)
    .fetch_optional(pool)
    .await?
    .ok_or(ExplorationError::NotFound(exploration_id))
}

pub(crate) fn apply_exploration_update(row: &mut ExplorationRow, update: ExplorationUpdate) {
    if let Some(state_text) = update.state_text {
        state_text.trim().clone_into(&mut row.state_text);
    }
    if let Some(notes) = update.exploration_notes_text {
        row.exploration_notes_text = clean(notes);
    }
    if let Some(metrics) = update.metrics_text {
        row.metrics_text = clean(metrics);
    }
    if let Some(benefit) = update.public_benefit {
        row.public_benefit = clean(benefit);
    }
    if let Some(photos) = update.key_photos {
        row.key_photos = Json(clean_photos(photos));
    }
}

/// Update an exploration's text fields and photos.
///
/// # Errors
///
/// `NotFound` if absent.
pub async fn update_exploration(
    pool: &PgPool,
    org_id: Uuid,
    exploration_id: Uuid,
    update: ExplorationUpdate,
) -> Result<ExplorationRow, ExplorationError> {
    let mut row = get_exploration(pool, org_id, exploration_id).await?;
    apply_exploration_update(&mut row, update);
    row.updated_at = now_ms();
    sqlx::query(
        "UPDATE explorations SET state_text = $2, exploration_notes_text = $3, metrics_text = $4, \
             public_benefit = $5, key_photos = $6, updated_at = $7 \
         WHERE id = $1",
    )
    .bind(exploration_id)
    .bind(&row.state_text)
    .bind(&row.exploration_notes_text)
    .bind(&row.metrics_text)
    .bind(&row.public_benefit)
    .bind(&row.key_photos)
    .bind(row.updated_at)
    .execute(pool)
    .await?;
    Ok(row)
}

/// Create a policy from an exploration and link the two.
///
/// # Errors
///
/// `NotFound` if the exploration is absent.
pub async fn create_policy_from_exploration(
    pool: &PgPool,
    org_id: Uuid,
    exploration_id: Uuid,
    created_by: Uuid,
    policy: NewPolicy,
) -> Result<(PolicyRow, ExplorationRow), ExplorationError> {
    let title = require_title(&policy.title)?;
    let status = parse_policy_status(policy.status.as_deref())?;
    let now = now_ms();

    let mut tx = pool.begin().await?;
    let exists: Option<Uuid> =
        sqlx::query_scalar("SELECT id FROM explorations WHERE id = $1 AND organization_id = $2 FOR UPDATE")
            .bind(exploration_id)
            .bind(org_id)
            .fetch_optional(tx.as_mut())
            .await?;
    if exists.is_none() {
        return Err(ExplorationError::NotFound(exploration_id));
    }

    let policy_row = sqlx::query_as::<_, PolicyRow>(&format!(
        "INSERT INTO policies (id, organization_id, title, description, status, created_by, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $7) \
         RETURNING {POLICY_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(org_id)
    .bind(&title)
    .bind(policy.description.trim())
    .bind(status.as_str())
    .bind(created_by)
    .bind(now)
    .fetch_one(tx.as_mut())
    .await?;

    let exploration_row = sqlx::query_as::<_, ExplorationRow>(&format!(
        "UPDATE explorations SET policy_id = $2, updated_at = $3 WHERE id = $1 RETURNING {EXPLORATION_COLUMNS}"
    ))
    .bind(exploration_id)
    .bind(policy_row.id)
    .bind(now)
    .fetch_one(tx.as_mut())
    .await?;
    tx.commit().await?;

    info!(%org_id, %exploration_id, policy_id = %policy_row.id, "policy created from exploration");
    Ok((policy_row, exploration_row))
}

/// Link an existing policy to an exploration.
///
/// # Errors
///
/// `PolicyNotFound` if the policy is not in the same organization.
pub async fn link_policy(
    pool: &PgPool,
    org_id: Uuid,
    exploration_id: Uuid,
    policy_id: Uuid,
) -> Result<ExplorationRow, ExplorationError> {
    get_policy(pool, org_id, policy_id).await?;
    let row = set_policy_link(pool, org_id, exploration_id, Some(policy_id)).await?;
    info!(%org_id, %exploration_id, %policy_id, "policy linked");
    Ok(row)
}

/// Remove an exploration's policy link.
///
/// # Errors
///
/// `NotFound` if the exploration is absent.
pub async fn unlink_policy(pool: &PgPool, org_id: Uuid, exploration_id: Uuid) -> Result<ExplorationRow, ExplorationError> {
    set_policy_link(pool, org_id, exploration_id, None).await
}

async fn set_policy_link(
    pool: &PgPool,
    org_id: Uuid,
    exploration_id: Uuid,
    policy_id: Option<Uuid>,
) -> Result<ExplorationRow, ExplorationError> {
    sqlx::query_as::<_, ExplorationRow>(&format!(
        "UPDATE explorations SET policy_id = $3, updated_at = $4 \
         WHERE id = $1 AND organization_id = $2 \
         RETURNING {EXPLORATION_COLUMNS}"
    ))
    .bind(exploration_id)
    .bind(org_id)
    .bind(policy_id)
    .bind(now_ms())
    .fetch_optional(pool)
    .await?
    .ok_or(ExplorationError::NotFound(exploration_id))
}

// =============================================================================
// POLICIES
// =============================================================================

/// Create a standalone policy.
///
/// # Errors
///
/// `Validation` for a blank title or unknown status.
pub async fn create_policy(
    pool: &PgPool,
    org_id: Uuid,
    created_by: Uuid,
    policy: NewPolicy,
) -> Result<PolicyRow, ExplorationError> {
    let title = require_title(&policy.title)?;
    let status = parse_policy_status(policy.status.as_deref())?;
    let row = sqlx::query_as::<_, PolicyRow>(&format!(
        "INSERT INTO policies (id, organization_id, title, description, status, created_by, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $7) \
         RETURNING {POLICY_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(org_id)
    .bind(&title)
    .bind(policy.description.trim())
    .bind(status.as_str())
    .bind(created_by)
    .bind(now_ms())
    .fetch_one(pool)
    .await?;
    info!(%org_id, policy_id = %row.id, "policy created");
    Ok(row)
}

/// List policies, optionally by status.
///
/// # Errors
///
/// `Validation` for an unknown status filter.
pub async fn list_policies(pool: &PgPool, org_id: Uuid, status: Option<&str>) -> Result<Vec<PolicyRow>, ExplorationError> {
    let status = match status.filter(|s| !s.is_empty()) {
        Some(raw) => Some(parse_policy_status(Some(raw))?.as_str()),
        None => None,
    };
    let rows = sqlx::query_as::<_, PolicyRow>(&format!(
        "SELECT {POLICY_COLUMNS} FROM policies \
         WHERE organization_id = $1 AND ($2::TEXT IS NULL OR status = $2) \
         ORDER BY updated_at DESC"
    ))
    .bind(org_id)
    .bind(status)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Fetch one policy.
///
/// # Errors
///
/// `PolicyNotFound` if absent.
pub async fn get_policy(pool: &PgPool, org_id: Uuid, policy_id: Uuid) -> Result<PolicyRow, ExplorationError> {
    sqlx::query_as::<_, PolicyRow>(&format!(
        "SELECT {POLICY_COLUMNS} FROM policies WHERE id = $1 AND organization_id = $2"
    ))
    .bind(policy_id)
    .bind(org_id)
    .fetch_optional(pool)
    .await?
    .ok_or(ExplorationError::PolicyNotFound(policy_id))
}

pub(crate) fn apply_policy_update(row: &mut PolicyRow, update: PolicyUpdate) -> Result<(), ExplorationError> {
    if let Some(title) = update.title {
        row.title = require_title(&title)?;
    }
    if let Some(description) = update.description {
        description.trim().clone_into(&mut row.description);
    }
    if let Some(status) = update.status {
        row.status = parse_policy_status(Some(&status))?.as_str().to_owned();
    }
    Ok(())
}

/// Update a policy.
///
/// # Errors
///
/// `PolicyNotFound` if absent, `Validation` for bad fields.
pub async fn update_policy(
    pool: &PgPool,
    org_id: Uuid,
    policy_id: Uuid,
    update: PolicyUpdate,
) -> Result<PolicyRow, ExplorationError> {
    let mut row = get_policy(pool, org_id, policy_id).await?;
    apply_policy_update(&mut row, update)?;
    row.updated_at = now_ms();
    sqlx::query("UPDATE policies SET title = $2, description = $3, status = $4, updated_at = $5 WHERE id = $1")
        .bind(policy_id)
        .bind(&row.title)
        .bind(&row.description)
        .bind(&row.status)
        .bind(row.updated_at)
        .execute(pool)
        .await?;
    Ok(row)
}

#[cfg(test)]
#[path = "exploration_test.rs"]
mod tests;
