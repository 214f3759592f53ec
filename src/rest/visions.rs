//! Vision controllers, scoped to the `user_id` carried in each request.

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use super::{internal, require_text, search_term, AppState};
use crate::error::{ApiError, MessageResponse};
use crate::models::{optional_datetime, AuthUser, Schedule, Vision};
use crate::scope::ListFilter;
use crate::storage::StoreError;

const NOT_FOUND: &str = "Vision not found or does not belong to user";

#[derive(Deserialize, Serialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateVision {
    pub user_id: u64,
    pub name: String,
    #[serde(default, deserialize_with = "optional_datetime")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "optional_datetime")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished: bool,
}

#[derive(Deserialize, Serialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdateVision {
    pub id: u64,
    pub user_id: u64,
    pub name: String,
    #[serde(default, deserialize_with = "optional_datetime")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "optional_datetime")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished: bool,
}

#[derive(Deserialize, IntoParams)]
#[serde(deny_unknown_fields)]
#[into_params(parameter_in = Query)]
pub struct ShowVisions {
    pub user_id: u64,
    pub finished: Option<bool>,
    /// Case-sensitive substring of the vision name
    pub search: Option<String>,
}

#[derive(Deserialize, IntoParams)]
#[serde(deny_unknown_fields)]
#[into_params(parameter_in = Query)]
pub struct DeleteVision {
    pub id: u64,
    pub user_id: u64,
}

/// Listed vision. `user_id` and `finished` repeat the query's values.
#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct VisionEntry {
    pub id: u64,
    pub user_id: u64,
    pub name: String,
    pub start_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub finished: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VisionEntry {
    fn echo(vision: Vision, user_id: u64, finished: Option<bool>) -> Self {
        Self {
            id: vision.id,
            user_id,
            name: vision.name,
            start_date: vision.start_date,
            due_date: vision.due_date,
            finished,
            created_at: vision.created_at,
            updated_at: vision.updated_at,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct VisionList {
    pub error: bool,
    pub found: bool,
    pub message: String,
    pub visions: Vec<VisionEntry>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct VisionUpdated {
    pub error: bool,
    pub message: String,
    #[serde(rename = "updatedVision")]
    pub updated_vision: Vision,
}

#[utoipa::path(
    post,
    path = "/vision/v1/create",
    tag = "Visions",
    request_body = CreateVision,
    responses(
        (status = 200, description = "Vision created", body = MessageResponse),
        (status = 400, description = "Validation error or name already used", body = MessageResponse),
        (status = 401, description = "Token problem", body = MessageResponse),
        (status = 404, description = "Unknown user", body = MessageResponse),
        (status = 500, description = "Server error", body = MessageResponse)
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_vision(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    payload: Result<Json<CreateVision>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    const OP: &str = "Create Vision";
    let Json(payload) = payload.map_err(|_| ApiError::Validation)?;
    require_text(&payload.name)?;

    let visions = &state.storage.visions;
    if visions
        .exists_by_name(&payload.name, payload.user_id, None)
        .map_err(internal(OP))?
    {
        return Err(ApiError::Conflict("Bad Request: Vision Name Exist"));
    }

    let fields = Schedule {
        name: payload.name,
        start_date: payload.start_date,
        due_date: payload.due_date,
        finished: payload.finished,
    };
    match state.storage.insert_vision(payload.user_id, fields, Utc::now()) {
        Ok(vision) => info!(vision_id = vision.id, requested_by = auth.user_id, "vision created"),
        Err(StoreError::MissingParent) => return Err(ApiError::NotFound("User not found")),
        Err(err) => return Err(ApiError::server(OP, err)),
    }
    Ok(Json(MessageResponse::ok("Create Vision: Succeed")))
}

#[utoipa::path(
    get,
    path = "/vision/v1/show",
    tag = "Visions",
    params(ShowVisions),
    responses(
        (status = 200, description = "Visions of the user, possibly none", body = VisionList),
        (status = 400, description = "Validation error", body = MessageResponse),
        (status = 500, description = "Server error", body = MessageResponse)
    )
)]
pub async fn show_visions(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ShowVisions>, QueryRejection>,
) -> Result<Json<VisionList>, ApiError> {
    let Query(query) = query.map_err(|_| ApiError::Validation)?;
    let filter = ListFilter::new(query.finished, search_term(query.search)?);

    let visions = state
        .storage
        .visions
        .list(query.user_id, &filter)
        .map_err(internal("Show Visions"))?;
    let found = !visions.is_empty();
    Ok(Json(VisionList {
        error: false,
        found,
        message: if found {
            "Visions Data Fetch: Succeed"
        } else {
            "Vision Data Fetch: No Data Found"
        }
        .to_string(),
        visions: visions
            .into_iter()
            .map(|vision| VisionEntry::echo(vision, query.user_id, filter.finished()))
            .collect(),
    }))
}

#[utoipa::path(
    put,
    path = "/vision/v1/update",
    tag = "Visions",
    request_body = UpdateVision,
    responses(
        (status = 200, description = "Vision updated", body = VisionUpdated),
        (status = 400, description = "Validation error or name used by another vision", body = MessageResponse),
        (status = 404, description = "Vision not found for this user", body = MessageResponse),
        (status = 500, description = "Server error", body = MessageResponse)
    )
)]
pub async fn update_vision(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<UpdateVision>, JsonRejection>,
) -> Result<Json<VisionUpdated>, ApiError> {
    const OP: &str = "Update Vision";
    let Json(payload) = payload.map_err(|_| ApiError::Validation)?;
    require_text(&payload.name)?;

    if state
        .storage
        .visions
        .exists_by_name(&payload.name, payload.user_id, Some(payload.id))
        .map_err(internal(OP))?
    {
        return Err(ApiError::Conflict("Bad Request: Vision Name Exists in Other Vision"));
    }

    let fields = Schedule {
        name: payload.name,
        start_date: payload.start_date,
        due_date: payload.due_date,
        finished: payload.finished,
    };
    let updated = state
        .storage
        .update_vision(payload.id, payload.user_id, fields, Utc::now())
        .map_err(internal(OP))?
        .ok_or(ApiError::NotFound(NOT_FOUND))?;

    Ok(Json(VisionUpdated {
        error: false,
        message: "Update Vision: Succeed".to_string(),
        updated_vision: updated,
    }))
}

/// Removes the vision together with its goals and their tasks.
#[utoipa::path(
    delete,
    path = "/vision/v1/delete",
    tag = "Visions",
    params(DeleteVision),
    responses(
        (status = 200, description = "Vision deleted", body = MessageResponse),
        (status = 400, description = "Validation error", body = MessageResponse),
        (status = 404, description = "Vision not found for this user", body = MessageResponse),
        (status = 500, description = "Server error", body = MessageResponse)
    )
)]
pub async fn delete_vision(
    State(state): State<Arc<AppState>>,
    query: Result<Query<DeleteVision>, QueryRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    const OP: &str = "Delete Vision";
    let Query(query) = query.map_err(|_| ApiError::Validation)?;

    if !state
        .storage
        .visions
        .exists_by_id(query.id, query.user_id)
        .map_err(internal(OP))?
    {
        return Err(ApiError::NotFound(NOT_FOUND));
    }
    if !state
        .storage
        .delete_vision(query.id, query.user_id)
        .map_err(internal(OP))?
    {
        return Err(ApiError::NotFound(NOT_FOUND));
    }
    info!(vision_id = query.id, "vision deleted");
    Ok(Json(MessageResponse::ok("Delete Vision: Succeed")))
}
