//! Aggregate counts for the organization dashboard.

use std::collections::BTreeMap;

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::now_ms;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct AnalyticsSummary {
    pub tools_by_status: BTreeMap<String, i64>,
    pub total_tools: i64,
    pub open_checkouts: i64,
    pub overdue_checkouts: i64,
    pub issues_by_workflow_status: BTreeMap<String, i64>,
    pub unresolved_issues: i64,
    pub missions_by_status: BTreeMap<String, i64>,
    pub low_stock_parts: i64,
}

/// Sum grouped counts into a map, seeding every known key with zero.
pub(crate) fn tally(known: &[&str], rows: Vec<(String, i64)>) -> BTreeMap<String, i64> {
    let mut out: BTreeMap<String, i64> = known.iter().map(|k| ((*k).to_owned(), 0)).collect();
    for (key, count) in rows {
        *out.entry(key).or_insert(0) += count;
    }
    out
}

async fn grouped(pool: &PgPool, sql: &str, org_id: Uuid) -> Result<Vec<(String, i64)>, sqlx::Error> {
    sqlx::query_as(sql).bind(org_id).fetch_all(pool).await
}

/// Build the dashboard summary for one organization.
///
/// # Errors
///
/// Returns a database error if any query fails.
pub async fn summary(pool: &PgPool, org_id: Uuid) -> Result<AnalyticsSummary, sqlx::Error> {
    let tools = grouped(pool, "SELECT status, COUNT(*) FROM tools WHERE organization_id = $1 GROUP BY status", org_id).await?;
    let issues = grouped(
        pool,
        "SELECT workflow_status, COUNT(*) FROM tool_issues WHERE organization_id = $1 GROUP BY workflow_status",
        org_id,
    )
    .await?;
    let missions =
        grouped(pool, "SELECT status, COUNT(*) FROM missions WHERE organization_id = $1 GROUP BY status", org_id)
            .await?;

    let (open_checkouts, overdue_checkouts): (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*),
                COUNT(*) FILTER (WHERE expected_return_at IS NOT NULL AND expected_return_at < $2)
         FROM checkouts WHERE organization_id = $1 AND returned_at IS NULL",
    )
    .bind(org_id)
    .bind(now_ms())
    .fetch_one(pool)
    .await?;

    let low_stock_parts: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM parts WHERE organization_id = $1 AND current_quantity < minimum_quantity",
    )
    .bind(org_id)
    .fetch_one(pool)
    .await?;

    let tools_by_status = tally(&["available", "checked_out", "unavailable", "unable_to_find"], tools);
    let issues_by_workflow_status = tally(&["reported", "diagnosed", "in_progress", "completed"], issues);
    Ok(AnalyticsSummary {
        total_tools: tools_by_status.values().sum(),
        unresolved_issues: issues_by_workflow_status
            .iter()
            .filter(|(status, _)| status.as_str() != "completed")
            .map(|(_, count)| count)
            .sum(),
        tools_by_status,
        open_checkouts,
        overdue_checkouts,
        issues_by_workflow_status,
        missions_by_status: tally(&["planning", "in_progress", "qa_review", "completed", "cancelled"], missions),
        low_stock_parts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_seeds_known_keys() {
        let out = tally(&["available", "checked_out"], vec![("available".into(), 3)]);
        assert_eq!(out.get("available"), Some(&3));
        assert_eq!(out.get("checked_out"), Some(&0));
    }

    #[test]
    fn tally_keeps_unexpected_keys() {
        let out = tally(&["planning"], vec![("archived".into(), 2)]);
        assert_eq!(out.get("archived"), Some(&2));
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn summary_serializes_maps_as_objects() {
        let mut summary = AnalyticsSummary::default();
        summary.tools_by_status.insert("available".into(), 4);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["tools_by_status"]["available"], 4);
        assert_eq!(json["low_stock_parts"], 0);
    }
}
