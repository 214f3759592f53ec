//! Goal controllers, scoped to the `vision_id` carried in each request.

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
use crate::models::{optional_datetime, AuthUser, Goal, Schedule};
use crate::scope::ListFilter;
use crate::storage::StoreError;

const NOT_FOUND: &str = "Goal not found or does not belong to vision";

#[derive(Deserialize, Serialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateGoal {
    pub vision_id: u64,
    pub name: String,
    /// Description the goal was derived from, usually the AI prompt
    pub prompt: String,
    #[serde(default, deserialize_with = "optional_datetime")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "optional_datetime")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished: bool,
}

#[derive(Deserialize, Serialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdateGoal {
    pub id: u64,
    pub vision_id: u64,
    pub name: String,
    /// Kept as stored when omitted
    #[serde(default)]
    pub prompt: Option<String>,
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
pub struct ShowGoals {
    pub vision_id: u64,
    pub finished: Option<bool>,
    pub search: Option<String>,
}

#[derive(Deserialize, IntoParams)]
#[serde(deny_unknown_fields)]
#[into_params(parameter_in = Query)]
pub struct DeleteGoal {
    pub id: u64,
    pub vision_id: u64,
}

#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct GoalEntry {
    pub id: u64,
    pub vision_id: u64,
    pub name: String,
    pub prompt: String,
    pub start_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub finished: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GoalEntry {
    fn echo(goal: Goal, vision_id: u64, finished: Option<bool>) -> Self {
        Self {
            id: goal.id,
            vision_id,
            name: goal.name,
            prompt: goal.prompt,
            start_date: goal.start_date,
            due_date: goal.due_date,
            finished,
            created_at: goal.created_at,
            updated_at: goal.updated_at,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct GoalList {
    pub error: bool,
    pub found: bool,
    pub message: String,
    pub goals: Vec<GoalEntry>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct GoalUpdated {
    pub error: bool,
    pub message: String,
    #[serde(rename = "updatedGoal")]
    pub updated_goal: Goal,
}

#[utoipa::path(
    post,
    path = "/goal/v1/create",
    tag = "Goals",
    request_body = CreateGoal,
    responses(
        (status = 200, description = "Goal created", body = MessageResponse),
        (status = 400, description = "Validation error or name already used in the vision", body = MessageResponse),
        (status = 401, description = "Token problem", body = MessageResponse),
        (status = 404, description = "Unknown vision", body = MessageResponse),
        (status = 500, description = "Server error", body = MessageResponse)
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_goal(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    payload: Result<Json<CreateGoal>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    const OP: &str = "Create Goal";
    let Json(payload) = payload.map_err(|_| ApiError::Validation)?;
    require_text(&payload.name)?;
    require_text(&payload.prompt)?;

    if state
        .storage
        .goals
        .exists_by_name(&payload.name, payload.vision_id, None)
        .map_err(internal(OP))?
    {
        return Err(ApiError::Conflict("Bad Request: Goal Name Exist"));
    }

    let fields = Schedule {
        name: payload.name,
        start_date: payload.start_date,
        due_date: payload.due_date,
        finished: payload.finished,
    };
    match state
        .storage
        .insert_goal(payload.vision_id, payload.prompt, fields, Utc::now())
    {
        Ok(goal) => info!(
            goal_id = goal.id,
            vision_id = goal.vision_id,
            requested_by = auth.user_id,
            "goal created"
        ),
        Err(StoreError::MissingParent) => return Err(ApiError::NotFound("Vision not found")),
        Err(err) => return Err(ApiError::server(OP, err)),
    }
    Ok(Json(MessageResponse::ok("Create Goal: Succeed")))
}

#[utoipa::path(
    get,
    path = "/goal/v1/show",
    tag = "Goals",
    params(ShowGoals),
    responses(
        (status = 200, description = "Goals of the vision, possibly none", body = GoalList),
        (status = 400, description = "Validation error", body = MessageResponse),
        (status = 401, description = "Token problem", body = MessageResponse),
        (status = 500, description = "Server error", body = MessageResponse)
    ),
    security(("bearerAuth" = []))
)]
pub async fn show_goals(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ShowGoals>, QueryRejection>,
) -> Result<Json<GoalList>, ApiError> {
    let Query(query) = query.map_err(|_| ApiError::Validation)?;
    let filter = ListFilter::new(query.finished, search_term(query.search)?);

    let goals = state
        .storage
        .goals
        .list(query.vision_id, &filter)
        .map_err(internal("Show Goals"))?;
    let found = !goals.is_empty();
    Ok(Json(GoalList {
        error: false,
        found,
        message: if found {
            "Goals Data Fetch: Succeed"
        } else {
            "Goal Data Fetch: No Data Found"
        }
        .to_string(),
        goals: goals
            .into_iter()
            .map(|goal| GoalEntry::echo(goal, query.vision_id, filter.finished()))
            .collect(),
    }))
}

#[utoipa::path(
    put,
    path = "/goal/v1/update",
    tag = "Goals",
    request_body = UpdateGoal,
    responses(
        (status = 200, description = "Goal updated", body = GoalUpdated),
        (status = 400, description = "Validation error or name used by another goal", body = MessageResponse),
        (status = 401, description = "Token problem", body = MessageResponse),
        (status = 404, description = "Goal not found in this vision", body = MessageResponse),
        (status = 500, description = "Server error", body = MessageResponse)
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_goal(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<UpdateGoal>, JsonRejection>,
) -> Result<Json<GoalUpdated>, ApiError> {
    const OP: &str = "Update Goal";
    let Json(payload) = payload.map_err(|_| ApiError::Validation)?;
    require_text(&payload.name)?;
    if let Some(prompt) = &payload.prompt {
        require_text(prompt)?;
    }

    if state
        .storage
        .goals
        .exists_by_name(&payload.name, payload.vision_id, Some(payload.id))
        .map_err(internal(OP))?
    {
        return Err(ApiError::Conflict("Bad Request: Goal Name Exists in Other Goal"));
    }

    let fields = Schedule {
        name: payload.name,
        start_date: payload.start_date,
        due_date: payload.due_date,
        finished: payload.finished,
    };
    let updated = state
        .storage
        .update_goal(payload.id, payload.vision_id, fields, payload.prompt, Utc::now())
        .map_err(internal(OP))?
        .ok_or(ApiError::NotFound(NOT_FOUND))?;

    Ok(Json(GoalUpdated {
        error: false,
        message: "Update Goal: Succeed".to_string(),
        updated_goal: updated,
    }))
}

#[utoipa::path(
    delete,
    path = "/goal/v1/delete",
    tag = "Goals",
    params(DeleteGoal),
    responses(
        (status = 200, description = "Goal and its tasks deleted", body = MessageResponse),
        (status = 400, description = "Validation error", body = MessageResponse),
        (status = 401, description = "Token problem", body = MessageResponse),
        (status = 404, description = "Goal not found in this vision", body = MessageResponse),
        (status = 500, description = "Server error", body = MessageResponse)
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_goal(
    State(state): State<Arc<AppState>>,
    query: Result<Query<DeleteGoal>, QueryRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    const OP: &str = "Delete Goal";
    let Query(query) = query.map_err(|_| ApiError::Validation)?;

    let goals = &state.storage.goals;
    if !goals
        .exists_by_id(query.id, query.vision_id)
        .map_err(internal(OP))?
    {
        return Err(ApiError::NotFound(NOT_FOUND));
    }
    if !state
        .storage
        .delete_goal(query.id, query.vision_id)
        .map_err(internal(OP))?
    {
        return Err(ApiError::NotFound(NOT_FOUND));
    }
    info!(goal_id = query.id, vision_id = query.vision_id, "goal deleted");
    Ok(Json(MessageResponse::ok("Delete Goal: Succeed")))
}
