//! Observation routes. Observations attach to tools or parts through links.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use tracing::error;
use uuid::Uuid;

use crate::routes::auth::AuthUser;
use crate::routes::organizations::authorize;
use crate::services::observation::{
    self, EntityLink, NewObservation, ObservationDetail, ObservationError, ObservationUpdate,
};
use crate::services::organization::OrgPermission;
use crate::state::AppState;

pub(crate) fn observation_error_to_status(err: ObservationError) -> StatusCode {
    match err {
        ObservationError::NotFound(_) | ObservationError::EntityNotFound { .. } => StatusCode::NOT_FOUND,
        ObservationError::Forbidden => StatusCode::FORBIDDEN,
        ObservationError::Validation(_) => StatusCode::BAD_REQUEST,
        ObservationError::Database(e) => {
            error!(error = %e, "observation query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// `GET /api/orgs/{org_id}/observations?entity_type=tool&entity_id=...`
pub async fn list_observations(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(org_id): Path<Uuid>,
    Query(link): Query<EntityLink>,
) -> Result<Json<Vec<ObservationDetail>>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::View).await?;
    let rows = observation::list_for_entity(&state.pool, org_id, link)
        .await
        .map_err(observation_error_to_status)?;
    Ok(Json(rows))
}

/// `POST /api/orgs/{org_id}/observations`
pub async fn create_observation(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(org_id): Path<Uuid>,
    Json(body): Json<NewObservation>,
) -> Result<(StatusCode, Json<ObservationDetail>), StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::Contribute).await?;
    let detail = observation::create_observation(&state.pool, org_id, auth.user.id, body)
        .await
        .map_err(observation_error_to_status)?;
    Ok((StatusCode::CREATED, Json(detail)))
}

/// `GET /api/orgs/{org_id}/observations/{observation_id}`
pub async fn get_observation(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, observation_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ObservationDetail>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::View).await?;
    let detail = observation::get_observation(&state.pool, org_id, observation_id)
        .await
        .map_err(observation_error_to_status)?;
    Ok(Json(detail))
}

/// `PATCH /api/orgs/{org_id}/observations/{observation_id}`
pub async fn update_observation(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, observation_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<ObservationUpdate>,
) -> Result<Json<ObservationDetail>, StatusCode> {
    authorize(&state, org_id, &auth, OrgPermission::Contribute).await?;
    let detail = observation::update_observation(&state.pool, org_id, observation_id, body)
        .await
        .map_err(observation_error_to_status)?;
    Ok(Json(detail))
}

/// `DELETE /api/orgs/{org_id}/observations/{observation_id}`: author or admin.
pub async fn delete_observation(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, observation_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, StatusCode> {
    let role = authorize(&state, org_id, &auth, OrgPermission::Contribute).await?;
    observation::delete_observation(&state.pool, org_id, observation_id, auth.user.id, role)
        .await
        .map_err(observation_error_to_status)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::observation::EntityType;

    #[test]
    fn observation_error_to_status_maps_variants() {
        assert_eq!(observation_error_to_status(ObservationError::NotFound(Uuid::nil())), StatusCode::NOT_FOUND);
        assert_eq!(
            observation_error_to_status(ObservationError::EntityNotFound { entity_type: "part", entity_id: Uuid::nil() }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(observation_error_to_status(ObservationError::Forbidden), StatusCode::FORBIDDEN);
        assert_eq!(observation_error_to_status(ObservationError::Validation("empty".into())), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn entity_link_parses_from_query_string() {
        let id = Uuid::new_v4();
        let uri: axum::http::Uri = format!("/observations?entity_type=part&entity_id={id}").parse().unwrap();
        let Query(link) = Query::<EntityLink>::try_from_uri(&uri).unwrap();
        assert_eq!(link.entity_type, EntityType::Part);
        assert_eq!(link.entity_id, id);
    }
}
