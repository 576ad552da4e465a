//! Field observations with ordered photos, linked to tools and parts.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use tracing::info;
use uuid::Uuid;

use crate::db::now_ms;
use crate::services::organization::{OrgPermission, OrgRole};

#[derive(Debug, thiserror::Error)]
pub enum ObservationError {
    #[error("observation not found: {0}")]
    NotFound(Uuid),
    #[error("{entity_type} not found: {entity_id}")]
    EntityNotFound { entity_type: &'static str, entity_id: Uuid },
    #[error("only the author or an admin can delete an observation")]
    Forbidden,
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Tool,
    Part,
}

impl EntityType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::Part => "part",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "tool" => Some(Self::Tool),
            "part" => Some(Self::Part),
            _ => None,
        }
    }

    fn table(self) -> &'static str {
        match self {
            Self::Tool => "tools",
            Self::Part => "parts",
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ObservationRow {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub observation_text: String,
    pub observed_by: Option<Uuid>,
    pub observed_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ObservationPhoto {
    pub photo_url: String,
    #[serde(default)]
    pub photo_description: Option<String>,
    #[serde(default)]
    pub photo_order: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityLink {
    pub entity_type: EntityType,
    pub entity_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct ObservationDetail {
    #[serde(flatten)]
    pub observation: ObservationRow,
    pub photos: Vec<ObservationPhoto>,
    pub links: Vec<EntityLink>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewObservation {
    #[serde(default)]
    pub observation_text: String,
    /// Photos in display order; any `photo_order` sent by the client is ignored.
    #[serde(default)]
    pub photos: Vec<ObservationPhoto>,
    #[serde(default)]
    pub links: Vec<EntityLink>,
    pub observed_at: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObservationUpdate {
    pub observation_text: Option<String>,
    /// Replaces every photo when present.
    pub photos: Option<Vec<ObservationPhoto>>,
}

// =============================================================================
// PURE HELPERS
// =============================================================================

/// Drop blank URLs and renumber photos densely from 0 in the given order.
pub(crate) fn order_photos(photos: Vec<ObservationPhoto>) -> Vec<ObservationPhoto> {
    photos
        .into_iter()
        .filter_map(|p| {
            let url = p.photo_url.trim().to_owned();
            if url.is_empty() {
                return None;
            }
            let description = p.photo_description.map(|d| d.trim().to_owned()).filter(|d| !d.is_empty());
            Some((url, description))
        })
        .zip(0..)
        .map(|((photo_url, photo_description), photo_order)| ObservationPhoto {
            photo_url,
            photo_description,
            photo_order,
        })
        .collect()
}

/// Remove duplicate links, keeping first-seen order.
pub(crate) fn dedup_links(links: &[EntityLink]) -> Vec<EntityLink> {
    let mut out: Vec<EntityLink> = Vec::with_capacity(links.len());
    for link in links {
        if !out.contains(link) {
            out.push(*link);
        }
    }
    out
}

/// Whether `caller` may delete an observation authored by `author`.
pub(crate) fn can_delete(author: Option<Uuid>, caller: Uuid, caller_role: OrgRole) -> bool {
    author == Some(caller) || caller_role.allows(OrgPermission::Admin)
}

fn validate_content(text: &str, photos: &[ObservationPhoto]) -> Result<(), ObservationError> {
    if text.trim().is_empty() && photos.is_empty() {
        return Err(ObservationError::Validation("an observation needs text or at least one photo".into()));
    }
    Ok(())
}

// =============================================================================
// OPERATIONS
// =============================================================================

async fn insert_photos(
    conn: &mut PgConnection,
    observation_id: Uuid,
    photos: &[ObservationPhoto],
) -> Result<(), ObservationError> {
    for photo in photos {
        sqlx::query(
            "INSERT INTO observation_photos (id, observation_id, photo_url, photo_description, photo_order)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(Uuid::new_v4())
        .bind(observation_id)
        .bind(&photo.photo_url)
        .bind(&photo.photo_description)
        .bind(photo.photo_order)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn ensure_entity(conn: &mut PgConnection, org_id: Uuid, link: EntityLink) -> Result<(), ObservationError> {
    let found: Option<Uuid> = sqlx::query_scalar(&format!(
        "SELECT id FROM {} WHERE id = $1 AND organization_id = $2",
        link.entity_type.table()
    ))
    .bind(link.entity_id)
    .bind(org_id)
    .fetch_optional(conn)
    .await?;
    found
        .map(|_| ())
        .ok_or(ObservationError::EntityNotFound { entity_type: link.entity_type.as_str(), entity_id: link.entity_id })
}

/// Record an observation with its photos and links.
///
/// # Errors
///
/// `Validation` when there is neither text nor a photo, `EntityNotFound`
/// for a link to a tool or part outside the organization.
pub async fn create_observation(
    pool: &PgPool,
    org_id: Uuid,
    observed_by: Uuid,
    observation: NewObservation,
) -> Result<ObservationDetail, ObservationError> {
    let photos = order_photos(observation.photos);
    validate_content(&observation.observation_text, &photos)?;
    let links = dedup_links(&observation.links);

    let mut tx = pool.begin().await?;
    for link in &links {
        ensure_entity(tx.as_mut(), org_id, *link).await?;
    }
    let row = sqlx::query_as::<_, ObservationRow>(
        "INSERT INTO observations (id, organization_id, observation_text, observed_by, observed_at)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING id, organization_id, observation_text, observed_by, observed_at",
    )
    .bind(Uuid::new_v4())
    .bind(org_id)
    .bind(observation.observation_text.trim())
    .bind(observed_by)
    .bind(observation.observed_at.unwrap_or_else(now_ms))
    .fetch_one(tx.as_mut())
    .await?;
    insert_photos(tx.as_mut(), row.id, &photos).await?;
    for link in &links {
        sqlx::query(
            "INSERT INTO observation_links (id, observation_id, entity_type, entity_id) VALUES ($1, $2, $3, $4)",
        )
        .bind(Uuid::new_v4())
        .bind(row.id)
        .bind(link.entity_type.as_str())
        .bind(link.entity_id)
        .execute(tx.as_mut())
        .await?;
    }
    tx.commit().await?;

    info!(%org_id, observation_id = %row.id, photos = photos.len(), links = links.len(), "observation recorded");
    Ok(ObservationDetail { observation: row, photos, links })
}

async fn load_details(pool: &PgPool, rows: Vec<ObservationRow>) -> Result<Vec<ObservationDetail>, ObservationError> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();

    let photo_rows: Vec<(Uuid, String, Option<String>, i32)> = sqlx::query_as(
        "SELECT observation_id, photo_url, photo_description, photo_order FROM observation_photos
         WHERE observation_id = ANY($1) ORDER BY photo_order ASC",
    )
    .bind(&ids)
    .fetch_all(pool)
    .await?;
    let link_rows: Vec<(Uuid, String, Uuid)> = sqlx::query_as(
        "SELECT observation_id, entity_type, entity_id FROM observation_links WHERE observation_id = ANY($1)",
    )
    .bind(&ids)
    .fetch_all(pool)
    .await?;

    let mut photos: HashMap<Uuid, Vec<ObservationPhoto>> = HashMap::new();
    for (observation_id, photo_url, photo_description, photo_order) in photo_rows {
        photos
            .entry(observation_id)
            .or_default()
            .push(ObservationPhoto { photo_url, photo_description, photo_order });
    }
    let mut links: HashMap<Uuid, Vec<EntityLink>> = HashMap::new();
    for (observation_id, entity_type, entity_id) in link_rows {
        if let Some(entity_type) = EntityType::parse(&entity_type) {
            links.entry(observation_id).or_default().push(EntityLink { entity_type, entity_id });
        }
    }

    Ok(rows
        .into_iter()
        .map(|observation| ObservationDetail {
            photos: photos.remove(&observation.id).unwrap_or_default(),
            links: links.remove(&observation.id).unwrap_or_default(),
            observation,
        })
        .collect())
}

/// Observations linked to one tool or part, newest first.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn list_for_entity(
    pool: &PgPool,
    org_id: Uuid,
    link: EntityLink,
) -> Result<Vec<ObservationDetail>, ObservationError> {
    let rows = sqlx::query_as::<_, ObservationRow>(
        "SELECT o.id, o.organization_id, o.observation_text, o.observed_by, o.observed_at
         FROM observations o
         JOIN observation_links l ON l.observation_id = o.id
         WHERE o.organization_id = $1 AND l.entity_type = $2 AND l.entity_id = $3
         ORDER BY o.observed_at DESC",
    )
    .bind(org_id)
    .bind(link.entity_type.as_str())
    .bind(link.entity_id)
    .fetch_all(pool)
    .await?;
    load_details(pool, rows).await
}

async fn load_observation(pool: &PgPool, org_id: Uuid, observation_id: Uuid) -> Result<ObservationRow, ObservationError> {
    sqlx::query_as::<_, ObservationRow>(
        "SELECT id, organization_id, observation_text, observed_by, observed_at
         FROM observations WHERE id = $1 AND organization_id = $2",
    )
    .bind(observation_id)
    .bind(org_id)
    .fetch_optional(pool)
    .await?
    .ok_or(ObservationError::NotFound(observation_id))
}

/// Fetch one observation with photos and links.
///
/// # Errors
///
/// `NotFound` if absent.
pub async fn get_observation(
    pool: &PgPool,
    org_id: Uuid,
    observation_id: Uuid,
) -> Result<ObservationDetail, ObservationError> {
    let row = load_observation(pool, org_id, observation_id).await?;
    load_details(pool, vec![row])
        .await?
        .pop()
        .ok_or(ObservationError::NotFound(observation_id))
}

/// Update text and optionally replace the photo set.
///
/// # Errors
///
/// `NotFound` if absent, `Validation` if the result would be empty.
pub async fn update_observation(
    pool: &PgPool,
    org_id: Uuid,
    observation_id: Uuid,
    update: ObservationUpdate,
) -> Result<ObservationDetail, ObservationError> {
    let current = get_observation(pool, org_id, observation_id).await?;
    let text = update
        .observation_text
        .map_or(current.observation.observation_text, |t| t.trim().to_owned());
    let photos = update.photos.map(order_photos);
    validate_content(&text, photos.as_deref().unwrap_or(&current.photos))?;

    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE observations SET observation_text = $2 WHERE id = $1")
        .bind(observation_id)
        .bind(&text)
        .execute(tx.as_mut())
        .await?;
    if let Some(photos) = &photos {
        sqlx::query("DELETE FROM observation_photos WHERE observation_id = $1")
            .bind(observation_id)
            .execute(tx.as_mut())
            .await?;
        insert_photos(tx.as_mut(), observation_id, photos).await?;
    }
    tx.commit().await?;

    get_observation(pool, org_id, observation_id).await
}

/// Delete an observation. Only its author or an organization admin may.
///
/// # Errors
///
/// `Forbidden` for anyone else.
pub async fn delete_observation(
    pool: &PgPool,
    org_id: Uuid,
    observation_id: Uuid,
    caller: Uuid,
    caller_role: OrgRole,
) -> Result<(), ObservationError> {
    let row = load_observation(pool, org_id, observation_id).await?;
    if !can_delete(row.observed_by, caller, caller_role) {
        return Err(ObservationError::Forbidden);
    }
    sqlx::query("DELETE FROM observations WHERE id = $1")
        .bind(observation_id)
        .execute(pool)
        .await?;
    info!(%org_id, %observation_id, "observation deleted");
    Ok(())
}

#[cfg(test)]
#[path = "observation_test.rs"]
mod tests;
