//! Organizations, membership roles, and permission checks.
//!
//! DESIGN
//! ======
//! Every organization-scoped route calls `ensure_permission` first. Roles are
//! a flat ladder (contributor < leadership < admin) and permissions map onto
//! the minimum role that grants them. A caller who is not a member gets
//! `NotFound` rather than `Forbidden` so organization ids cannot be discovered.

use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use tracing::info;
use uuid::Uuid;

use crate::db::now_ms;
use crate::services::is_unique_violation;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OrgError {
    #[error("organization not found: {0}")]
    NotFound(Uuid),
    #[error("member not found: {0}")]
    MemberNotFound(Uuid),
    #[error("forbidden in organization: {0}")]
    Forbidden(Uuid),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrgRole {
    Contributor,
    Leadership,
    Admin,
}

impl OrgRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Contributor => "contributor",
            Self::Leadership => "leadership",
            Self::Admin => "admin",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "contributor" => Some(Self::Contributor),
            "leadership" => Some(Self::Leadership),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    #[must_use]
    pub fn allows(self, permission: OrgPermission) -> bool {
        self >= permission.minimum_role()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrgPermission {
    View,
    Contribute,
    Lead,
    Admin,
}

impl OrgPermission {
    fn minimum_role(self) -> OrgRole {
        match self {
            Self::View | Self::Contribute => OrgRole::Contributor,
            Self::Lead => OrgRole::Leadership,
            Self::Admin => OrgRole::Admin,
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct OrganizationRow {
    pub id: Uuid,
    pub name: String,
    pub subdomain: String,
    pub is_active: bool,
    pub settings: serde_json::Value,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemberRow {
    pub user_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub role: OrgRole,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
pub struct MemberAttribute {
    pub attribute_type: String,
    pub level: i32,
}

#[derive(Debug, Default, Deserialize)]
pub struct OrganizationUpdate {
    pub name: Option<String>,
    pub subdomain: Option<String>,
    pub is_active: Option<bool>,
    pub settings: Option<serde_json::Value>,
}

// =============================================================================
// VALIDATION
// =============================================================================

/// Normalize and validate a subdomain: lowercase ascii letters, digits, and
/// inner hyphens, 3..=63 characters.
///
/// # Errors
///
/// Returns `Validation` when the subdomain does not fit the pattern.
pub fn normalize_subdomain(raw: &str) -> Result<String, OrgError> {
    let subdomain = raw.trim().to_ascii_lowercase();
    let len_ok = (3..=63).contains(&subdomain.len());
    let chars_ok = subdomain
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    let edges_ok = !subdomain.starts_with('-') && !subdomain.ends_with('-');
    if len_ok && chars_ok && edges_ok {
        Ok(subdomain)
    } else {
        Err(OrgError::Validation(format!("invalid subdomain: {raw:?}")))
    }
}

pub(crate) fn require_name(raw: &str, field: &str) -> Result<String, OrgError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(OrgError::Validation(format!("{field} is required")));
    }
    Ok(name.to_owned())
}

// =============================================================================
// PERMISSIONS
// =============================================================================

/// Look up the caller's role in an organization.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn member_role(pool: &PgPool, org_id: Uuid, user_id: Uuid) -> Result<Option<OrgRole>, OrgError> {
    let role: Option<String> =
        sqlx::query_scalar("SELECT role FROM organization_members WHERE organization_id = $1 AND user_id = $2")
            .bind(org_id)
            .bind(user_id)
            .fetch_optional(pool)
            .await?;
    Ok(role.as_deref().and_then(OrgRole::parse))
}

/// Ensure the caller holds `permission` in the organization and return their role.
///
/// # Errors
///
/// `NotFound` for non-members, `Forbidden` for members whose role is too low.
pub async fn ensure_permission(
    pool: &PgPool,
    org_id: Uuid,
    user_id: Uuid,
    permission: OrgPermission,
) -> Result<OrgRole, OrgError> {
    let Some(role) = member_role(pool, org_id, user_id).await? else {
        return Err(OrgError::NotFound(org_id));
    };
    if !role.allows(permission) {
        return Err(OrgError::Forbidden(org_id));
    }
    Ok(role)
}

// =============================================================================
// ORGANIZATIONS
// =============================================================================

/// Create an organization; the creator becomes its first admin.
///
/// # Errors
///
/// `Validation` for a bad name/subdomain, `Conflict` when the subdomain is taken.
pub async fn create_organization(
    pool: &PgPool,
    name: &str,
    subdomain: &str,
    creator_id: Uuid,
) -> Result<OrganizationRow, OrgError> {
    let name = require_name(name, "name")?;
    let subdomain = normalize_subdomain(subdomain)?;
    let id = Uuid::new_v4();
    let now = now_ms();

    let mut tx = pool.begin().await?;
    let row = sqlx::query_as::<_, OrganizationRow>(
        "INSERT INTO organizations (id, name, subdomain, is_active, settings, created_at)
         VALUES ($1, $2, $3, TRUE, '{}'::jsonb, $4)
         RETURNING id, name, subdomain, is_active, settings, created_at",
    )
    .bind(id)
    .bind(&name)
    .bind(&subdomain)
    .bind(now)
    .fetch_one(tx.as_mut())
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            OrgError::Conflict(format!("subdomain already taken: {subdomain}"))
        } else {
            OrgError::Database(e)
        }
    })?;

    sqlx::query(
        "INSERT INTO organization_members (organization_id, user_id, role, created_at) VALUES ($1, $2, 'admin', $3)",
    )
    .bind(id)
    .bind(creator_id)
    .bind(now)
    .execute(tx.as_mut())
    .await?;
    tx.commit().await?;

    info!(org_id = %id, %subdomain, %creator_id, "organization created");
    Ok(row)
}

/// List organizations the user belongs to.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn list_organizations(pool: &PgPool, user_id: Uuid) -> Result<Vec<(OrganizationRow, OrgRole)>, OrgError> {
    let rows = sqlx::query_as::<_, (Uuid, String, String, bool, serde_json::Value, i64, String)>(
        "SELECT o.id, o.name, o.subdomain, o.is_active, o.settings, o.created_at, m.role
         FROM organizations o
         JOIN organization_members m ON m.organization_id = o.id
         WHERE m.user_id = $1
         ORDER BY o.name ASC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .filter_map(|(id, name, subdomain, is_active, settings, created_at, role)| {
            let role = OrgRole::parse(&role)?;
            Some((OrganizationRow { id, name, subdomain, is_active, settings, created_at }, role))
        })
        .collect())
}

/// Fetch one organization.
///
/// # Errors
///
/// `NotFound` if absent.
pub async fn get_organization(pool: &PgPool, org_id: Uuid) -> Result<OrganizationRow, OrgError> {
    sqlx::query_as::<_, OrganizationRow>(
        "SELECT id, name, subdomain, is_active, settings, created_at FROM organizations WHERE id = $1",
    )
    .bind(org_id)
    .fetch_optional(pool)
    .await?
    .ok_or(OrgError::NotFound(org_id))
}

/// Apply a partial update to an organization.
///
/// # Errors
///
/// `Validation` for bad fields, `Conflict` on a taken subdomain, `NotFound` if absent.
pub async fn update_organization(
    pool: &PgPool,
    org_id: Uuid,
    update: OrganizationUpdate,
) -> Result<OrganizationRow, OrgError> {
    let mut current = get_organization(pool, org_id).await?;

    if let Some(name) = update.name.as_deref() {
        current.name = require_name(name, "name")?;
    }
    if let Some(subdomain) = update.subdomain.as_deref() {
        current.subdomain = normalize_subdomain(subdomain)?;
    }
    if let Some(is_active) = update.is_active {
        current.is_active = is_active;
    }
    if let Some(settings) = update.settings {
        if !settings.is_object() {
            return Err(OrgError::Validation("settings must be a JSON object".into()));
        }
        current.settings = settings;
    }

    sqlx::query("UPDATE organizations SET name = $2, subdomain = $3, is_active = $4, settings = $5 WHERE id = $1")
        .bind(org_id)
        .bind(&current.name)
        .bind(&current.subdomain)
        .bind(current.is_active)
        .bind(&current.settings)
        .execute(pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                OrgError::Conflict(format!("subdomain already taken: {}", current.subdomain))
            } else {
                OrgError::Database(e)
            }
        })?;

    Ok(current)
}

// =============================================================================
// MEMBERS
// =============================================================================

/// List members of an organization.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn list_members(pool: &PgPool, org_id: Uuid) -> Result<Vec<MemberRow>, OrgError> {
    let rows = sqlx::query_as::<_, (Uuid, String, Option<String>, String, i64)>(
        "SELECT u.id, u.name, u.email, m.role, m.created_at
         FROM organization_members m
         JOIN users u ON u.id = m.user_id
         WHERE m.organization_id = $1
         ORDER BY u.name ASC",
    )
    .bind(org_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .filter_map(|(user_id, name, email, role, created_at)| {
            Some(MemberRow { user_id, name, email, role: OrgRole::parse(&role)?, created_at })
        })
        .collect())
}

/// Resolve a user id from an email address (case-insensitive).
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn find_user_by_email(pool: &PgPool, email: &str) -> Result<Option<Uuid>, OrgError> {
    let email = email.trim();
    if email.is_empty() {
        return Ok(None);
    }
    let id: Option<Uuid> = sqlx::query_scalar("SELECT id FROM users WHERE LOWER(email) = LOWER($1) LIMIT 1")
        .bind(email)
        .fetch_optional(pool)
        .await?;
    Ok(id)
}

/// Whether moving `user_id` to `next` (`None` for removal) leaves no admin.
pub(crate) fn strips_last_admin(admins: &[Uuid], user_id: Uuid, next: Option<OrgRole>) -> bool {
    next != Some(OrgRole::Admin) && admins.contains(&user_id) && admins.len() <= 1
}

/// Lock the organization row and return its admins. Every membership write
/// takes this lock first, so the last-admin check holds until commit.
async fn lock_admins(conn: &mut PgConnection, org_id: Uuid) -> Result<Vec<Uuid>, OrgError> {
    let found: Option<Uuid> = sqlx::query_scalar("SELECT id FROM organizations WHERE id = $1 FOR UPDATE")
        .bind(org_id)
        .fetch_optional(&mut *conn)
        .await?;
    if found.is_none() {
        return Err(OrgError::NotFound(org_id));
    }
    let admins: Vec<Uuid> =
        sqlx::query_scalar("SELECT user_id FROM organization_members WHERE organization_id = $1 AND role = 'admin'")
            .bind(org_id)
            .fetch_all(conn)
            .await?;
    Ok(admins)
}

/// Add a member or change an existing member's role.
///
/// # Errors
///
/// `MemberNotFound` for an unknown user, `Conflict` when the change would
/// leave the organization without an admin.
pub async fn upsert_member(pool: &PgPool, org_id: Uuid, user_id: Uuid, role: OrgRole) -> Result<(), OrgError> {
    let user_exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
        .bind(user_id)
        .fetch_one(pool)
        .await?;
    if !user_exists {
        return Err(OrgError::MemberNotFound(user_id));
    }

    let mut tx = pool.begin().await?;
    let admins = lock_admins(tx.as_mut(), org_id).await?;
    if strips_last_admin(&admins, user_id, Some(role)) {
        return Err(OrgError::Conflict("cannot demote the last admin".into()));
    }

    sqlx::query(
        "INSERT INTO organization_members (organization_id, user_id, role, created_at)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (organization_id, user_id) DO UPDATE SET role = EXCLUDED.role",
    )
    .bind(org_id)
    .bind(user_id)
    .bind(role.as_str())
    .bind(now_ms())
    .execute(tx.as_mut())
    .await?;
    tx.commit().await?;

    info!(%org_id, %user_id, role = role.as_str(), "organization member upserted");
    Ok(())
}

/// Remove a member.
///
/// # Errors
///
/// `MemberNotFound` if not a member, `Conflict` for the last admin.
pub async fn remove_member(pool: &PgPool, org_id: Uuid, user_id: Uuid) -> Result<(), OrgError> {
    let mut tx = pool.begin().await?;
    let admins = lock_admins(tx.as_mut(), org_id).await?;
    if strips_last_admin(&admins, user_id, None) {
        return Err(OrgError::Conflict("cannot remove the last admin".into()));
    }

    let result = sqlx::query("DELETE FROM organization_members WHERE organization_id = $1 AND user_id = $2")
        .bind(org_id)
        .bind(user_id)
        .execute(tx.as_mut())
        .await?;
    if result.rows_affected() == 0 {
        return Err(OrgError::MemberNotFound(user_id));
    }
    tx.commit().await?;
    info!(%org_id, %user_id, "organization member removed");
    Ok(())
}

// =============================================================================
// MEMBER ATTRIBUTES
// =============================================================================

/// List a member's skill attributes.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn list_member_attributes(
    pool: &PgPool,
    org_id: Uuid,
    user_id: Uuid,
) -> Result<Vec<MemberAttribute>, OrgError> {
    let rows = sqlx::query_as::<_, MemberAttribute>(
        "SELECT attribute_type, level FROM member_attributes
         WHERE organization_id = $1 AND user_id = $2
         ORDER BY attribute_type ASC",
    )
    .bind(org_id)
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Replace a member's skill attributes.
///
/// # Errors
///
/// `MemberNotFound` if not a member, `Validation` for out-of-range levels or
/// blank/duplicate attribute types.
pub async fn set_member_attributes(
    pool: &PgPool,
    org_id: Uuid,
    user_id: Uuid,
    attributes: &[MemberAttribute],
) -> Result<Vec<MemberAttribute>, OrgError> {
    if member_role(pool, org_id, user_id).await?.is_none() {
        return Err(OrgError::MemberNotFound(user_id));
    }
    let attributes = normalize_attributes(attributes)?;

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM member_attributes WHERE organization_id = $1 AND user_id = $2")
        .bind(org_id)
        .bind(user_id)
        .execute(tx.as_mut())
        .await?;
    for attr in &attributes {
        sqlx::query(
            "INSERT INTO member_attributes (organization_id, user_id, attribute_type, level) VALUES ($1, $2, $3, $4)",
        )
        .bind(org_id)
        .bind(user_id)
        .bind(&attr.attribute_type)
        .bind(attr.level)
        .execute(tx.as_mut())
        .await?;
    }
    tx.commit().await?;
    Ok(attributes)
}

pub(crate) fn normalize_attributes(attributes: &[MemberAttribute]) -> Result<Vec<MemberAttribute>, OrgError> {
    let mut out: Vec<MemberAttribute> = Vec::with_capacity(attributes.len());
    for attr in attributes {
        let attribute_type = attr.attribute_type.trim().to_ascii_lowercase();
        if attribute_type.is_empty() {
            return Err(OrgError::Validation("attribute_type is required".into()));
        }
        if !(0..=10).contains(&attr.level) {
            return Err(OrgError::Validation(format!("level out of range for {attribute_type}: {}", attr.level)));
        }
        if out.iter().any(|a| a.attribute_type == attribute_type) {
            return Err(OrgError::Validation(format!("duplicate attribute_type: {attribute_type}")));
        }
        out.push(MemberAttribute { attribute_type, level: attr.level });
    }
    out.sort_by(|a, b| a.attribute_type.cmp(&b.attribute_type));
    Ok(out)
}

#[cfg(test)]
#[path = "organization_test.rs"]
mod tests;
