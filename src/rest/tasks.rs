//! Task controllers, scoped to the `goal_id` carried in each request.
//!
//! Creation takes a batch: every task is inserted as its own storage write,
//! all launched at once. A failing insert does not undo the others.

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    Extension, Json,
};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};

use super::{internal, require_text, search_term, AppState};
use crate::error::{ApiError, MessageResponse};
use crate::models::{optional_datetime, AuthUser, Schedule, Task};
use crate::scope::ListFilter;

const NOT_FOUND: &str = "Task not found or does not belong to goal";

#[derive(Deserialize, Serialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct TaskDraft {
    pub name: String,
    #[serde(default, deserialize_with = "optional_datetime")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "optional_datetime")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished: bool,
}

impl From<TaskDraft> for Schedule {
    fn from(draft: TaskDraft) -> Self {
        Schedule {
            name: draft.name,
            start_date: draft.start_date,
            due_date: draft.due_date,
            finished: draft.finished,
        }
    }
}

#[derive(Deserialize, Serialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateTasks {
    pub goal_id: u64,
    pub tasks: Vec<TaskDraft>,
}

#[derive(Deserialize, Serialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdateTask {
    pub id: u64,
    pub goal_id: u64,
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
pub struct ShowTasks {
    pub goal_id: u64,
    pub finished: Option<bool>,
    pub search: Option<String>,
}

#[derive(Deserialize, IntoParams)]
#[serde(deny_unknown_fields)]
#[into_params(parameter_in = Query)]
pub struct DeleteTask {
    pub id: u64,
    pub goal_id: u64,
}

#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct TaskEntry {
    pub id: u64,
    pub goal_id: u64,
    pub name: String,
    pub start_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub finished: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct TaskList {
    pub error: bool,
    pub found: bool,
    pub message: String,
    pub tasks: Vec<TaskEntry>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct TaskUpdated {
    pub error: bool,
    pub message: String,
    #[serde(rename = "updatedTask")]
    pub updated_task: Task,
}

#[utoipa::path(
    post,
    path = "/task/v1/create",
    tag = "Tasks",
    request_body = CreateTasks,
    responses(
        (status = 200, description = "All tasks created", body = MessageResponse),
        (status = 400, description = "Validation error", body = MessageResponse),
        (status = 401, description = "Token problem", body = MessageResponse),
        (status = 404, description = "Unknown goal", body = MessageResponse),
        (status = 500, description = "At least one insert failed; the others are kept", body = MessageResponse)
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_tasks(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    payload: Result<Json<CreateTasks>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    const OP: &str = "Create Task";
    let Json(payload) = payload.map_err(|_| ApiError::Validation)?;
    if payload.tasks.is_empty() {
        return Err(ApiError::Validation);
    }
    for draft in &payload.tasks {
        require_text(&draft.name)?;
    }

    let goal_id = payload.goal_id;
    if state
        .storage
        .goals
        .owner_of(goal_id)
        .map_err(internal(OP))?
        .is_none()
    {
        return Err(ApiError::NotFound("Goal not found"));
    }

    let now = Utc::now();
    let inserts = payload.tasks.into_iter().map(|draft| {
        let storage = state.storage.clone();
        tokio::task::spawn_blocking(move || storage.insert_task(goal_id, draft.into(), now))
    });

    let mut created = 0usize;
    let mut first_failure = None;
    for outcome in join_all(inserts).await {
        match outcome {
            Ok(Ok(_)) => created += 1,
            Ok(Err(err)) => {
                warn!(goal_id, error = %err, "task insert failed");
                first_failure = first_failure.or(Some(err.to_string()));
            }
            Err(join) => {
                warn!(goal_id, error = %join, "task insert panicked");
                first_failure = first_failure.or(Some(join.to_string()));
            }
        }
    }
    if let Some(cause) = first_failure {
        return Err(ApiError::server(OP, format!("{created} inserted before failure: {cause}")));
    }

    info!(goal_id, created, requested_by = auth.user_id, "tasks created");
    Ok(Json(MessageResponse::ok("Create Task: Succeed")))
}

#[utoipa::path(
    get,
    path = "/task/v1/show",
    tag = "Tasks",
    params(ShowTasks),
    responses(
        (status = 200, description = "Tasks of the goal, possibly none", body = TaskList),
        (status = 400, description = "Validation error", body = MessageResponse),
        (status = 401, description = "Token problem", body = MessageResponse),
        (status = 500, description = "Server error", body = MessageResponse)
    ),
    security(("bearerAuth" = []))
)]
pub async fn show_tasks(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ShowTasks>, QueryRejection>,
) -> Result<Json<TaskList>, ApiError> {
    let Query(query) = query.map_err(|_| ApiError::Validation)?;
    let filter = ListFilter::new(query.finished, search_term(query.search)?);
    let echoed = filter.finished();

    let tasks: Vec<TaskEntry> = state
        .storage
        .tasks
        .list(query.goal_id, &filter)
        .map_err(internal("Show Tasks"))?
        .into_iter()
        .map(|task| TaskEntry {
            id: task.id,
            goal_id: query.goal_id,
            name: task.name,
            start_date: task.start_date,
            due_date: task.due_date,
            finished: echoed,
            created_at: task.created_at,
            updated_at: task.updated_at,
        })
        .collect();

    let found = !tasks.is_empty();
    let message = if found {
        "Tasks Data Fetch: Succeed"
    } else {
        "Task Data Fetch: No Data Found"
    };
    Ok(Json(TaskList {
        error: false,
        found,
        message: message.to_string(),
        tasks,
    }))
}

#[utoipa::path(
    put,
    path = "/task/v1/update",
    tag = "Tasks",
    request_body = UpdateTask,
    responses(
        (status = 200, description = "Task updated", body = TaskUpdated),
        (status = 400, description = "Validation error or name used by another task", body = MessageResponse),
        (status = 401, description = "Token problem", body = MessageResponse),
        (status = 404, description = "Task not found in this goal", body = MessageResponse),
        (status = 500, description = "Server error", body = MessageResponse)
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_task(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<UpdateTask>, JsonRejection>,
) -> Result<Json<TaskUpdated>, ApiError> {
    const OP: &str = "Update Task";
    let Json(payload) = payload.map_err(|_| ApiError::Validation)?;
    require_text(&payload.name)?;

    if state
        .storage
        .tasks
        .exists_by_name(&payload.name, payload.goal_id, Some(payload.id))
        .map_err(internal(OP))?
    {
        return Err(ApiError::Conflict("Bad Request: Task Name Exists in Other Task"));
    }

    let fields = Schedule {
        name: payload.name,
        start_date: payload.start_date,
        due_date: payload.due_date,
        finished: payload.finished,
    };
    let updated = state
        .storage
        .update_task(payload.id, payload.goal_id, fields, Utc::now())
        .map_err(internal(OP))?
        .ok_or(ApiError::NotFound(NOT_FOUND))?;

    Ok(Json(TaskUpdated {
        error: false,
        message: "Update Task: Succeed".to_string(),
        updated_task: updated,
    }))
}

#[utoipa::path(
    delete,
    path = "/task/v1/delete",
    tag = "Tasks",
    params(DeleteTask),
    responses(
        (status = 200, description = "Task deleted", body = MessageResponse),
        (status = 400, description = "Validation error", body = MessageResponse),
        (status = 401, description = "Token problem", body = MessageResponse),
        (status = 404, description = "Task not found in this goal", body = MessageResponse),
        (status = 500, description = "Server error", body = MessageResponse)
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    query: Result<Query<DeleteTask>, QueryRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    const OP: &str = "Delete Task";
    let Query(query) = query.map_err(|_| ApiError::Validation)?;

    let storage = &state.storage;
    if !storage
        .tasks
        .exists_by_id(query.id, query.goal_id)
        .map_err(internal(OP))?
        || !storage
            .delete_task(query.id, query.goal_id)
            .map_err(internal(OP))?
    {
        return Err(ApiError::NotFound(NOT_FOUND));
    }
    Ok(Json(MessageResponse::ok("Delete Task: Succeed")))
}
