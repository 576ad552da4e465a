//! Tool issues: reporting and the repair workflow with skill requirements.
//!
//! DESIGN
//! ======
//! An issue moves strictly forward one step at a time:
//! `reported -> diagnosed -> in_progress -> completed`. Reporting may take the
//! tool out of service (`unavailable`); completing the last unresolved issue on
//! such a tool puts it back to `available`.
//!
//! Requirements are (attribute, minimum level) pairs compared against the
//! member attributes kept by the organization service.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::now_ms;
use crate::services::organization::{self, MemberAttribute, OrgError};
use crate::services::tool::ToolStatus;

#[derive(Debug, thiserror::Error)]
pub enum IssueError {
    #[error("issue not found: {0}")]
    NotFound(Uuid),
    #[error("tool not found: {0}")]
    ToolNotFound(Uuid),
    #[error("user {0} is not a member of this organization")]
    NotAMember(Uuid),
    #[error("invalid workflow step from {from} to {to}")]
    InvalidTransition { from: &'static str, to: &'static str },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<OrgError> for IssueError {
    fn from(err: OrgError) -> Self {
        match err {
            OrgError::Database(e) => Self::Database(e),
            OrgError::MemberNotFound(id) => Self::NotAMember(id),
            other => Self::Validation(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    Safety,
    Efficiency,
    Cosmetic,
    Maintenance,
}

impl IssueType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Safety => "safety",
            Self::Efficiency => "efficiency",
            Self::Cosmetic => "cosmetic",
            Self::Maintenance => "maintenance",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "safety" => Some(Self::Safety),
            "efficiency" => Some(Self::Efficiency),
            "cosmetic" => Some(Self::Cosmetic),
            "maintenance" => Some(Self::Maintenance),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Reported,
    Diagnosed,
    InProgress,
    Completed,
}

impl WorkflowStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reported => "reported",
            Self::Diagnosed => "diagnosed",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "reported" => Some(Self::Reported),
            "diagnosed" => Some(Self::Diagnosed),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    /// The single step after this one, if any.
    #[must_use]
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Reported => Some(Self::Diagnosed),
            Self::Diagnosed => Some(Self::InProgress),
            Self::InProgress => Some(Self::Completed),
            Self::Completed => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct IssueRow {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub tool_id: Uuid,
    pub description: String,
    pub issue_type: String,
    pub workflow_status: String,
    pub took_out_of_service: bool,
    pub reported_by: Option<Uuid>,
    pub assigned_to: Option<Uuid>,
    pub root_cause: Option<String>,
    pub resolution_notes: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub resolved_at: Option<i64>,
}

const ISSUE_COLUMNS: &str = "id, organization_id, tool_id, description, issue_type, workflow_status, \
     took_out_of_service, reported_by, assigned_to, root_cause, resolution_notes, created_at, updated_at, resolved_at";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct IssueRequirement {
    pub attribute_type: String,
    pub required_level: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct IssueDetail {
    #[serde(flatten)]
    pub issue: IssueRow,
    pub requirements: Vec<IssueRequirement>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportIssue {
    pub tool_id: Uuid,
    pub description: String,
    pub issue_type: String,
    #[serde(default)]
    pub take_out_of_service: bool,
}

/// Body for advancing one workflow step.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdvanceIssue {
    /// Target status; must be exactly the next step.
    pub workflow_status: String,
    pub root_cause: Option<String>,
    pub resolution_notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IssueFilter {
    pub workflow_status: Option<String>,
    pub tool_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnmetRequirement {
    pub attribute_type: String,
    pub required_level: i32,
    pub actual_level: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualificationReport {
    pub user_id: Uuid,
    pub qualified: bool,
    pub unmet: Vec<UnmetRequirement>,
}

// =============================================================================
// PURE HELPERS
// =============================================================================

/// Check that `target` is exactly one step after `current`.
pub(crate) fn validate_step(current: WorkflowStatus, target: WorkflowStatus) -> Result<(), IssueError> {
    if current.next() == Some(target) {
        Ok(())
    } else {
        Err(IssueError::InvalidTransition { from: current.as_str(), to: target.as_str() })
    }
}

/// Requirements the member's attributes fall short of. Missing attributes
/// count as level 0.
pub(crate) fn unmet_requirements(
    requirements: &[IssueRequirement],
    attributes: &[MemberAttribute],
) -> Vec<UnmetRequirement> {
    requirements
        .iter()
        .filter_map(|req| {
            let actual_level = attributes
                .iter()
                .find(|a| a.attribute_type == req.attribute_type)
                .map_or(0, |a| a.level);
            (actual_level < req.required_level).then(|| UnmetRequirement {
                attribute_type: req.attribute_type.clone(),
                required_level: req.required_level,
                actual_level,
            })
        })
        .collect()
}

pub(crate) fn normalize_requirements(requirements: &[IssueRequirement]) -> Result<Vec<IssueRequirement>, IssueError> {
    let as_attributes: Vec<MemberAttribute> = requirements
        .iter()
        .map(|r| MemberAttribute { attribute_type: r.attribute_type.clone(), level: r.required_level })
        .collect();
    let normalized = organization::normalize_attributes(&as_attributes)?;
    Ok(normalized
        .into_iter()
        .map(|a| IssueRequirement { attribute_type: a.attribute_type, required_level: a.level })
        .collect())
}

fn clean(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_owned()).filter(|v| !v.is_empty())
}

// =============================================================================
// OPERATIONS
// =============================================================================

/// Report an issue against a tool.
///
/// # Errors
///
/// `ToolNotFound` for an unknown tool, `Conflict` when asked to take a
/// checked-out tool out of service.
pub async fn report_issue(
    pool: &PgPool,
    org_id: Uuid,
    reported_by: Uuid,
    report: ReportIssue,
) -> Result<IssueRow, IssueError> {
    let description = report.description.trim();
    if description.is_empty() {
        return Err(IssueError::Validation("description is required".into()));
    }
    let issue_type = IssueType::parse(&report.issue_type)
        .ok_or_else(|| IssueError::Validation(format!("unknown issue_type: {}", report.issue_type)))?;

    let now = now_ms();
    let mut tx = pool.begin().await?;
    let status: String =
        sqlx::query_scalar("SELECT status FROM tools WHERE id = $1 AND organization_id = $2 FOR UPDATE")
            .bind(report.tool_id)
            .bind(org_id)
            .fetch_optional(tx.as_mut())
            .await?
            .ok_or(IssueError::ToolNotFound(report.tool_id))?;

    if report.take_out_of_service {
        if status == ToolStatus::CheckedOut.as_str() {
            return Err(IssueError::Conflict("tool is checked out; check it in before taking it out of service".into()));
        }
        sqlx::query("UPDATE tools SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(report.tool_id)
            .bind(ToolStatus::Unavailable.as_str())
            .bind(now)
            .execute(tx.as_mut())
            .await?;
    }

    let row = sqlx::query_as::<_, IssueRow>(&format!(
        "INSERT INTO tool_issues (id, organization_id, tool_id, description, issue_type, workflow_status, \
             took_out_of_service, reported_by, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, 'reported', $6, $7, $8, $8) \
         RETURNING {ISSUE_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(org_id)
    .bind(report.tool_id)
    .bind(description)
    .bind(issue_type.as_str())
    .bind(report.take_out_of_service)
    .bind(reported_by)
    .bind(now)
    .fetch_one(tx.as_mut())
    .await?;
    tx.commit().await?;

    info!(
        %org_id,
        issue_id = %row.id,
        tool_id = %row.tool_id,
        issue_type = issue_type.as_str(),
        out_of_service = row.took_out_of_service,
        "tool issue reported"
    );
    Ok(row)
}

/// List issues, newest first.
///
/// # Errors
///
/// `Validation` for an unknown workflow status filter.
pub async fn list_issues(pool: &PgPool, org_id: Uuid, filter: &IssueFilter) -> Result<Vec<IssueRow>, IssueError> {
    let status = match filter.workflow_status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            WorkflowStatus::parse(raw)
                .ok_or_else(|| IssueError::Validation(format!("unknown workflow_status: {raw}")))?
                .as_str(),
        ),
        None => None,
    };
    let rows = sqlx::query_as::<_, IssueRow>(&format!(
        "SELECT {ISSUE_COLUMNS} FROM tool_issues \
         WHERE organization_id = $1 \
           AND ($2::TEXT IS NULL OR workflow_status = $2) \
           AND ($3::UUID IS NULL OR tool_id = $3) \
         ORDER BY created_at DESC"
    ))
    .bind(org_id)
    .bind(status)
    .bind(filter.tool_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

async fn load_issue(pool: &PgPool, org_id: Uuid, issue_id: Uuid) -> Result<IssueRow, IssueError> {
    sqlx::query_as::<_, IssueRow>(&format!(
        "SELECT {ISSUE_COLUMNS} FROM tool_issues WHERE id = $1 AND organization_id = $2"
    ))
    .bind(issue_id)
    .bind(org_id)
    .fetch_optional(pool)
    .await?
    .ok_or(IssueError::NotFound(issue_id))
}

async fn load_requirements(pool: &PgPool, issue_id: Uuid) -> Result<Vec<IssueRequirement>, IssueError> {
    let rows = sqlx::query_as::<_, IssueRequirement>(
        "SELECT attribute_type, required_level FROM issue_requirements
         WHERE issue_id = $1 ORDER BY attribute_type ASC",
    )
    .bind(issue_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Fetch an issue with its requirements.
///
/// # Errors
///
/// `NotFound` if absent.
pub async fn get_issue(pool: &PgPool, org_id: Uuid, issue_id: Uuid) -> Result<IssueDetail, IssueError> {
    let issue = load_issue(pool, org_id, issue_id).await?;
    let requirements = load_requirements(pool, issue_id).await?;
    Ok(IssueDetail { issue, requirements })
}

/// Advance an issue exactly one workflow step.
///
/// # Errors
///
/// `InvalidTransition` unless the target is the next step.
pub async fn advance_issue(
    pool: &PgPool,
    org_id: Uuid,
    issue_id: Uuid,
    advance: AdvanceIssue,
) -> Result<IssueRow, IssueError> {
    let target = WorkflowStatus::parse(&advance.workflow_status)
        .ok_or_else(|| IssueError::Validation(format!("unknown workflow_status: {}", advance.workflow_status)))?;

    let mut tx = pool.begin().await?;
    let current: String = sqlx::query_scalar(
        "SELECT workflow_status FROM tool_issues WHERE id = $1 AND organization_id = $2 FOR UPDATE",
    )
    .bind(issue_id)
    .bind(org_id)
    .fetch_optional(tx.as_mut())
    .await?
    .ok_or(IssueError::NotFound(issue_id))?;
    let current = WorkflowStatus::parse(&current)
        .ok_or_else(|| IssueError::Validation(format!("stored workflow_status is unknown: {current}")))?;

    if let Err(e) = validate_step(current, target) {
        warn!(%issue_id, from = current.as_str(), to = target.as_str(), "issue transition rejected");
        return Err(e);
    }

    let now = now_ms();
    let resolved_at = (target == WorkflowStatus::Completed).then_some(now);
    let row = sqlx::query_as::<_, IssueRow>(&format!(
        "UPDATE tool_issues SET workflow_status = $2, root_cause = COALESCE($3, root_cause), \
             resolution_notes = COALESCE($4, resolution_notes), resolved_at = COALESCE($5, resolved_at), \
             updated_at = $6 \
         WHERE id = $1 \
         RETURNING {ISSUE_COLUMNS}"
    ))
    .bind(issue_id)
    .bind(target.as_str())
    .bind(clean(advance.root_cause))
    .bind(clean(advance.resolution_notes))
    .bind(resolved_at)
    .bind(now)
    .fetch_one(tx.as_mut())
    .await?;

    if target == WorkflowStatus::Completed && row.took_out_of_service {
        let others: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM tool_issues WHERE tool_id = $1 AND id <> $2 AND resolved_at IS NULL",
        )
        .bind(row.tool_id)
        .bind(issue_id)
        .fetch_one(tx.as_mut())
        .await?;
        if others == 0 {
            sqlx::query("UPDATE tools SET status = 'available', updated_at = $2 WHERE id = $1 AND status = 'unavailable'")
                .bind(row.tool_id)
                .bind(now)
                .execute(tx.as_mut())
                .await?;
            info!(tool_id = %row.tool_id, "tool returned to service");
        }
    }
    tx.commit().await?;

    info!(%org_id, %issue_id, from = current.as_str(), to = target.as_str(), "issue advanced");
    Ok(row)
}

/// Assign an issue to a member, or clear the assignment.
///
/// # Errors
///
/// `NotAMember` if the assignee is not in the organization.
pub async fn assign_issue(
    pool: &PgPool,
    org_id: Uuid,
    issue_id: Uuid,
    assignee: Option<Uuid>,
) -> Result<IssueRow, IssueError> {
    if let Some(user_id) = assignee {
        if organization::member_role(pool, org_id, user_id).await?.is_none() {
            return Err(IssueError::NotAMember(user_id));
        }
    }
    let row = sqlx::query_as::<_, IssueRow>(&format!(
        "UPDATE tool_issues SET assigned_to = $3, updated_at = $4 \
         WHERE id = $1 AND organization_id = $2 \
         RETURNING {ISSUE_COLUMNS}"
    ))
    .bind(issue_id)
    .bind(org_id)
    .bind(assignee)
    .bind(now_ms())
    .fetch_optional(pool)
    .await?
    .ok_or(IssueError::NotFound(issue_id))?;
    info!(%org_id, %issue_id, assignee = ?assignee, "issue assigned");
    Ok(row)
}

/// Replace the skill requirements of an issue.
///
/// # Errors
///
/// `Validation` for blank/duplicate attributes or levels outside 0..=10.
pub async fn set_requirements(
    pool: &PgPool,
    org_id: Uuid,
    issue_id: Uuid,
    requirements: &[IssueRequirement],
) -> Result<Vec<IssueRequirement>, IssueError> {
    load_issue(pool, org_id, issue_id).await?;
    let requirements = normalize_requirements(requirements)?;

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM issue_requirements WHERE issue_id = $1")
        .bind(issue_id)
        .execute(tx.as_mut())
        .await?;
    for req in &requirements {
        sqlx::query(
            "INSERT INTO issue_requirements (id, issue_id, attribute_type, required_level) VALUES ($1, $2, $3, $4)",
        )
        .bind(Uuid::new_v4())
        .bind(issue_id)
        .bind(&req.attribute_type)
        .bind(req.required_level)
        .execute(tx.as_mut())
        .await?;
    }
    tx.commit().await?;
    Ok(requirements)
}

/// Report which requirements a member does not meet.
///
/// # Errors
///
/// `NotAMember` if the user is not in the organization.
pub async fn check_qualification(
    pool: &PgPool,
    org_id: Uuid,
    issue_id: Uuid,
    user_id: Uuid,
) -> Result<QualificationReport, IssueError> {
    if organization::member_role(pool, org_id, user_id).await?.is_none() {
        return Err(IssueError::NotAMember(user_id));
    }
    load_issue(pool, org_id, issue_id).await?;
    let requirements = load_requirements(pool, issue_id).await?;
    let attributes = organization::list_member_attributes(pool, org_id, user_id).await?;
    let unmet = unmet_requirements(&requirements, &attributes);
    Ok(QualificationReport { user_id, qualified: unmet.is_empty(), unmet })
}

#[cfg(test)]
#[path = "issue_test.rs"]
mod tests;
