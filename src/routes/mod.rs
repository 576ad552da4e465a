//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! Every API route lives under `/api`. Organization-scoped resources nest
//! under `/api/orgs/{org_id}` and authorize the caller's membership role
//! inside each handler.

pub mod analytics;
pub mod audits;
pub mod auth;
pub mod checkouts;
pub mod explorations;
pub mod issues;
pub mod missions;
pub mod observations;
pub mod organizations;
pub mod parts;
pub mod tools;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, patch, post, put};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Routes scoped to a single organization, relative to `/api/orgs/{org_id}`.
fn org_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(organizations::get_organization).patch(organizations::update_organization),
        )
        .route(
            "/members",
            get(organizations::list_members).post(organizations::upsert_member),
        )
        .route(
            "/members/{user_id}",
            patch(organizations::update_member).delete(organizations::delete_member),
        )
        .route(
            "/members/{user_id}/attributes",
            get(organizations::list_attributes).put(organizations::set_attributes),
        )
        // Tools
        .route("/tools", get(tools::list_tools).post(tools::create_tool))
        .route("/tools/export.jsonl", get(tools::export_jsonl))
        .route("/tools/import.jsonl", post(tools::import_jsonl))
        .route("/tools/{tool_id}", get(tools::get_tool).patch(tools::update_tool))
        .route("/tools/{tool_id}/checkout", post(checkouts::checkout_tool))
        .route("/tools/{tool_id}/checkin", post(checkouts::checkin_tool))
        .route("/tools/{tool_id}/checkouts", get(checkouts::tool_history))
        .route(
            "/tools/{tool_id}/audits",
            get(audits::list_tool_audits).post(audits::record_tool_audit),
        )
        .route("/checkouts", get(checkouts::list_open_checkouts))
        // Audits
        .route("/audits", post(audits::generate_audit))
        .route("/audits/vicinities", get(audits::list_vicinities))
        .route("/audits/{session_id}", get(audits::get_audit_session))
        .route("/audits/{session_id}/complete", post(audits::complete_session))
        // Missions
        .route("/missions", get(missions::list_missions).post(missions::create_mission))
        .route(
            "/missions/{mission_id}",
            get(missions::get_mission)
                .put(missions::update_mission)
                .patch(missions::patch_mission)
                .delete(missions::delete_mission),
        )
        .route("/missions/{mission_id}/status", post(missions::change_status))
        .route("/missions/{mission_id}/tasks", post(missions::add_task))
        .route("/missions/{mission_id}/tasks/order", put(missions::reorder_tasks))
        .route(
            "/missions/{mission_id}/tasks/{task_id}",
            put(missions::update_task)
                .patch(missions::patch_task)
                .delete(missions::delete_task),
        )
        // Parts
        .route("/parts", get(parts::list_parts).post(parts::create_part))
        .route("/parts/{part_id}", get(parts::get_part).patch(parts::update_part))
        .route("/parts/{part_id}/adjust", post(parts::adjust_quantity))
        .route("/parts/{part_id}/history", get(parts::part_history))
        // Issues
        .route("/issues", get(issues::list_issues).post(issues::report_issue))
        .route("/issues/{issue_id}", get(issues::get_issue))
        .route("/issues/{issue_id}/advance", post(issues::advance_issue))
        .route("/issues/{issue_id}/assignee", put(issues::assign_issue))
        .route("/issues/{issue_id}/requirements", put(issues::set_requirements))
        .route(
            "/issues/{issue_id}/qualification/{user_id}",
            get(issues::check_qualification),
        )
        // Explorations and policies
        .route(
            "/explorations",
            get(explorations::list_explorations).post(explorations::create_exploration),
        )
        .route(
            "/explorations/{exploration_id}",
            get(explorations::get_exploration).patch(explorations::update_exploration),
        )
        .route(
            "/explorations/{exploration_id}/policy",
            post(explorations::create_policy_from_exploration).put(explorations::set_policy_link),
        )
        .route("/policies", get(explorations::list_policies).post(explorations::create_policy))
        .route(
            "/policies/{policy_id}",
            get(explorations::get_policy).patch(explorations::update_policy),
        )
        // Observations
        .route(
            "/observations",
            get(observations::list_observations).post(observations::create_observation),
        )
        .route(
            "/observations/{observation_id}",
            get(observations::get_observation)
                .patch(observations::update_observation)
                .delete(observations::delete_observation),
        )
        .route("/analytics", get(analytics::summary))
}

/// Full application router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/auth/me", get(auth::me))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/dev/session", post(auth::dev_session))
        .route(
            "/api/orgs",
            get(organizations::list_organizations).post(organizations::create_organization),
        )
        .nest("/api/orgs/{org_id}", org_routes())
        .route("/healthz", get(healthz))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
