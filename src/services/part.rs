//! Part stock with an append-only change history.
//!
//! Quantity changes always go through `adjust_quantity`, which locks the part
//! row, applies the delta, refuses to go below zero, and writes a history row
//! in the same transaction.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::now_ms;

#[derive(Debug, thiserror::Error)]
pub enum PartError {
    #[error("part not found: {0}")]
    NotFound(Uuid),
    #[error("insufficient stock for part {part_id}: have {available}, need {requested}")]
    InsufficientStock { part_id: Uuid, available: f64, requested: f64 },
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Add,
    Remove,
    Adjust,
}

impl ChangeType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Adjust => "adjust",
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PartRow {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub unit: String,
    pub current_quantity: f64,
    pub minimum_quantity: f64,
    pub storage_vicinity: Option<String>,
    pub storage_location: Option<String>,
    pub cost_per_unit: Option<f64>,
    pub created_at: i64,
    pub updated_at: i64,
}

const PART_COLUMNS: &str = "id, organization_id, name, description, category, unit, current_quantity, \
     minimum_quantity, storage_vicinity, storage_location, cost_per_unit, created_at, updated_at";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PartHistoryRow {
    pub id: Uuid,
    pub part_id: Uuid,
    pub change_type: String,
    pub old_quantity: f64,
    pub new_quantity: f64,
    pub reason: Option<String>,
    pub changed_by: Option<Uuid>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewPart {
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub unit: Option<String>,
    #[serde(default)]
    pub current_quantity: f64,
    #[serde(default)]
    pub minimum_quantity: f64,
    pub storage_vicinity: Option<String>,
    pub storage_location: Option<String>,
    pub cost_per_unit: Option<f64>,
}

/// Metadata update. Quantities other than the minimum are not editable here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartUpdate {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "crate::services::double_option")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "crate::services::double_option")]
    pub category: Option<Option<String>>,
    pub unit: Option<String>,
    pub minimum_quantity: Option<f64>,
    #[serde(default, deserialize_with = "crate::services::double_option")]
    pub storage_vicinity: Option<Option<String>>,
    #[serde(default, deserialize_with = "crate::services::double_option")]
    pub storage_location: Option<Option<String>>,
    #[serde(default, deserialize_with = "crate::services::double_option")]
    pub cost_per_unit: Option<Option<f64>>,
}

/// Either a relative `delta` or an absolute `set_to` (a recount).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuantityAdjustment {
    pub delta: Option<f64>,
    pub set_to: Option<f64>,
    pub reason: Option<String>,
}

fn non_negative(value: f64, field: &str) -> Result<f64, PartError> {
    if !value.is_finite() || value < 0.0 {
        return Err(PartError::Validation(format!("{field} must be a non-negative number")));
    }
    Ok(value)
}

fn clean(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_owned()).filter(|v| !v.is_empty())
}

pub(crate) fn validate_new_part(part: NewPart) -> Result<NewPart, PartError> {
    let name = part.name.trim().to_owned();
    if name.is_empty() {
        return Err(PartError::Validation("name is required".into()));
    }
    if let Some(cost) = part.cost_per_unit {
        non_negative(cost, "cost_per_unit")?;
    }
    Ok(NewPart {
        name,
        description: clean(part.description),
        category: clean(part.category),
        unit: Some(clean(part.unit).unwrap_or_else(|| "each".to_owned())),
        current_quantity: non_negative(part.current_quantity, "current_quantity")?,
        minimum_quantity: non_negative(part.minimum_quantity, "minimum_quantity")?,
        storage_vicinity: clean(part.storage_vicinity),
        storage_location: clean(part.storage_location),
        cost_per_unit: part.cost_per_unit,
    })
}

pub(crate) fn apply_part_update(row: &mut PartRow, update: PartUpdate) -> Result<(), PartError> {
    if let Some(name) = update.name {
        let name = name.trim();
        if name.is_empty() {
            return Err(PartError::Validation("name is required".into()));
        }
        name.clone_into(&mut row.name);
    }
    if let Some(unit) = update.unit {
        row.unit = clean(Some(unit)).ok_or_else(|| PartError::Validation("unit cannot be blank".into()))?;
    }
    if let Some(minimum) = update.minimum_quantity {
        row.minimum_quantity = non_negative(minimum, "minimum_quantity")?;
    }
    if let Some(cost) = update.cost_per_unit {
        if let Some(cost) = cost {
            non_negative(cost, "cost_per_unit")?;
        }
        row.cost_per_unit = cost;
    }
    if let Some(description) = update.description {
        row.description = clean(description);
    }
    if let Some(category) = update.category {
        row.category = clean(category);
    }
    if let Some(vicinity) = update.storage_vicinity {
        row.storage_vicinity = clean(vicinity);
    }
    if let Some(location) = update.storage_location {
        row.storage_location = clean(location);
    }
    Ok(())
}

/// Resolve an adjustment against `current`, returning the new quantity and change type.
pub(crate) fn resolve_adjustment(
    part_id: Uuid,
    current: f64,
    adjustment: &QuantityAdjustment,
) -> Result<(f64, ChangeType), PartError> {
    match (adjustment.delta, adjustment.set_to) {
        (Some(delta), None) => {
            if !delta.is_finite() || delta.abs() < f64::EPSILON {
                return Err(PartError::Validation("delta must be a non-zero number".into()));
            }
            let next = current + delta;
            if next < 0.0 {
                return Err(PartError::InsufficientStock { part_id, available: current, requested: -delta });
            }
            let change = if delta > 0.0 { ChangeType::Add } else { ChangeType::Remove };
            Ok((next, change))
        }
        (None, Some(set_to)) => Ok((non_negative(set_to, "set_to")?, ChangeType::Adjust)),
        _ => Err(PartError::Validation("provide exactly one of delta or set_to".into())),
    }
}

/// Whether a part is below its restock threshold.
#[must_use]
pub fn is_low_stock(part: &PartRow) -> bool {
    part.current_quantity < part.minimum_quantity
}

/// Create a part.
///
/// # Errors
///
/// `Validation` for a blank name or negative quantities.
pub async fn create_part(pool: &PgPool, org_id: Uuid, part: NewPart) -> Result<PartRow, PartError> {
    let part = validate_new_part(part)?;
    let now = now_ms();
    let row = sqlx::query_as::<_, PartRow>(&format!(
        "INSERT INTO parts (id, organization_id, name, description, category, unit, current_quantity, \
             minimum_quantity, storage_vicinity, storage_location, cost_per_unit, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12) \
         RETURNING {PART_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(org_id)
    .bind(&part.name)
    .bind(&part.description)
    .bind(&part.category)
    .bind(part.unit.as_deref().unwrap_or("each"))
    .bind(part.current_quantity)
    .bind(part.minimum_quantity)
    .bind(&part.storage_vicinity)
    .bind(&part.storage_location)
    .bind(part.cost_per_unit)
    .bind(now)
    .fetch_one(pool)
    .await?;
    info!(%org_id, part_id = %row.id, name = %row.name, "part created");
    Ok(row)
}

/// List parts by name, optionally only those below their minimum.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn list_parts(pool: &PgPool, org_id: Uuid, low_stock_only: bool) -> Result<Vec<PartRow>, PartError> {
    let rows = sqlx::query_as::<_, PartRow>(&format!(
        "SELECT {PART_COLUMNS} FROM parts \
         WHERE organization_id = $1 AND (NOT $2 OR current_quantity < minimum_quantity) \
         ORDER BY name ASC"
    ))
    .bind(org_id)
    .bind(low_stock_only)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Fetch one part.
///
/// # Errors
///
/// `NotFound` if absent.
pub async fn get_part(pool: &PgPool, org_id: Uuid, part_id: Uuid) -> Result<PartRow, PartError> {
    sqlx::query_as::<_, PartRow>(&format!("SELECT {PART_COLUMNS} FROM parts WHERE id = $1 AND organization_id = $2"))
        .bind(part_id)
        .bind(org_id)
        .fetch_optional(pool)
        .await?
        .ok_or(PartError::NotFound(part_id))
}

/// Update part metadata.
///
/// # Errors
///
/// `NotFound` if absent, `Validation` for bad fields.
pub async fn update_part(pool: &PgPool, org_id: Uuid, part_id: Uuid, update: PartUpdate) -> Result<PartRow, PartError> {
    let mut row = get_part(pool, org_id, part_id).await?;
    apply_part_update(&mut row, update)?;
    row.updated_at = now_ms();
    sqlx::query(
        "UPDATE parts SET name = $3, description = $4, category = $5, unit = $6, minimum_quantity = $7, \
             storage_vicinity = $8, storage_location = $9, cost_per_unit = $10, updated_at = $11 \
         WHERE id = $1 AND organization_id = $2",
    )
    .bind(part_id)
    .bind(org_id)
    .bind(&row.name)
    .bind(&row.description)
    .bind(&row.category)
    .bind(&row.unit)
    .bind(row.minimum_quantity)
    .bind(&row.storage_vicinity)
    .bind(&row.storage_location)
    .bind(row.cost_per_unit)
    .bind(row.updated_at)
    .execute(pool)
    .await?;
    Ok(row)
}

/// Change stock and record the change.
///
/// # Errors
///
/// `InsufficientStock` when a delta would take the quantity below zero.
pub async fn adjust_quantity(
    pool: &PgPool,
    org_id: Uuid,
    part_id: Uuid,
    changed_by: Uuid,
    adjustment: QuantityAdjustment,
) -> Result<PartRow, PartError> {
    let mut tx = pool.begin().await?;
    let current: f64 =
        sqlx::query_scalar("SELECT current_quantity FROM parts WHERE id = $1 AND organization_id = $2 FOR UPDATE")
            .bind(part_id)
            .bind(org_id)
            .fetch_optional(tx.as_mut())
            .await?
            .ok_or(PartError::NotFound(part_id))?;

    let (next, change) = match resolve_adjustment(part_id, current, &adjustment) {
        Ok(result) => result,
        Err(e) => {
            warn!(%part_id, current, error = %e, "stock adjustment rejected");
            return Err(e);
        }
    };
    let now = now_ms();

    let row = sqlx::query_as::<_, PartRow>(&format!(
        "UPDATE parts SET current_quantity = $2, updated_at = $3 WHERE id = $1 RETURNING {PART_COLUMNS}"
    ))
    .bind(part_id)
    .bind(next)
    .bind(now)
    .fetch_one(tx.as_mut())
    .await?;

    sqlx::query(
        "INSERT INTO part_history (id, part_id, change_type, old_quantity, new_quantity, reason, changed_by, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(Uuid::new_v4())
    .bind(part_id)
    .bind(change.as_str())
    .bind(current)
    .bind(next)
    .bind(clean(adjustment.reason))
    .bind(changed_by)
    .bind(now)
    .execute(tx.as_mut())
    .await?;
    tx.commit().await?;

    info!(%org_id, %part_id, old = current, new = next, change = change.as_str(), "part stock adjusted");
    Ok(row)
}

/// Change history for one part, newest first.
///
/// # Errors
///
/// `NotFound` if the part is absent.
pub async fn part_history(pool: &PgPool, org_id: Uuid, part_id: Uuid) -> Result<Vec<PartHistoryRow>, PartError> {
    get_part(pool, org_id, part_id).await?;
    let rows = sqlx::query_as::<_, PartHistoryRow>(
        "SELECT id, part_id, change_type, old_quantity, new_quantity, reason, changed_by, created_at
         FROM part_history WHERE part_id = $1 ORDER BY created_at DESC",
    )
    .bind(part_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
#[path = "part_test.rs"]
mod tests;
