//! HTTP control surface: health, task listing and task mutations.
use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::due::{self, DateSources};
use crate::model::{Priority, Task};
use crate::snapshot::SnapshotStore;
use crate::taskwarrior::{NewTask, TaskEditor};

/// Layout written back to Taskwarrior for computed dates.
pub const WRITE_LAYOUT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SnapshotStore>,
    pub editor: Arc<dyn TaskEditor>,
    pub sources: DateSources,
    pub auth_token: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/tasks", get(list_tasks))
        .route("/api/create-task", post(create_task))
        .route("/api/acknowledge", post(acknowledge))
        .route("/api/delay", post(delay))
        .route("/api/set-notification-date", post(set_notification_date))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Tracker(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Tracker(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}

async fn require_auth(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(expected) = state.auth_token.as_deref() else {
        return next.run(req).await;
    };
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .unwrap_or("");
    if token.is_empty() || !constant_time_eq(token, expected) {
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }
    next.run(req).await
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: String,
    pub tasks: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        tasks: state.store.len().await,
    })
}

async fn list_tasks(State(state): State<AppState>) -> Json<Vec<Task>> {
    Json(state.store.read().await.to_vec())
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateTaskRequest {
    pub description: String,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub notification_date: Option<String>,
    #[serde(default)]
    pub annotations: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTaskResponse {
    pub uuid: String,
    pub message: String,
}

async fn create_task(
    State(state): State<AppState>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<CreateTaskResponse>), ApiError> {
    let description = req.description.trim();
    if description.is_empty() {
        return Err(ApiError::BadRequest("description required".into()));
    }
    let notification_date = match req.notification_date.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some((
            state.sources.primary().name().to_string(),
            normalize_input_date(raw)?,
        )),
    };
    let task = NewTask {
        description: description.to_string(),
        project: req.project.filter(|p| !p.trim().is_empty()),
        tags: req.tags,
        priority: req.priority.as_deref().and_then(Priority::parse),
        notification_date,
        annotations: req.annotations,
    };

    let uuid = state.editor.add(&task).await.map_err(|err| {
        warn!(%err, "failed to create task");
        ApiError::Tracker("failed to create task".into())
    })?;
    Ok((
        StatusCode::CREATED,
        Json(CreateTaskResponse {
            uuid,
            message: "created".into(),
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct AcknowledgeRequest {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub repeat_delay: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AcknowledgeResponse {
    pub acknowledged: bool,
}

/// `30s`, `15m`, `2h` or `1d`.
pub fn parse_repeat_delay(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let unit = raw.chars().last()?;
    let amount: i64 = raw[..raw.len() - unit.len_utf8()].parse().ok()?;
    if amount <= 0 {
        return None;
    }
    match unit {
        's' => Duration::try_seconds(amount),
        'm' => Duration::try_minutes(amount),
        'h' => Duration::try_hours(amount),
        'd' => Duration::try_days(amount),
        _ => None,
    }
}

async fn acknowledge(
    State(state): State<AppState>,
    Json(req): Json<AcknowledgeRequest>,
) -> Result<Json<AcknowledgeResponse>, ApiError> {
    let uuid = req.uuid.trim();
    if uuid.is_empty() {
        return Err(ApiError::BadRequest("uuid required".into()));
    }
    let field = state.sources.primary().name();
    let value = match req.repeat_delay.as_deref().map(str::trim) {
        None | Some("") => String::new(),
        Some(raw) => {
            let next = parse_repeat_delay(raw)
                .and_then(|delay| Local::now().checked_add_signed(delay))
                .ok_or_else(|| ApiError::BadRequest(format!("invalid repeat_delay {raw:?}")))?;
            next.format(WRITE_LAYOUT).to_string()
        }
    };
    modify_date(&state, uuid, field, &value).await?;
    info!(uuid, next = %value, "task acknowledged");
    Ok(Json(AcknowledgeResponse { acknowledged: true }))
}

#[derive(Debug, Deserialize)]
pub struct DelayRequest {
    #[serde(default)]
    pub uuid: String,
    pub minutes: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DateResponse {
    pub uuid: String,
    pub notification_date: String,
}

async fn delay(
    State(state): State<AppState>,
    Json(req): Json<DelayRequest>,
) -> Result<Json<DateResponse>, ApiError> {
    let uuid = req.uuid.trim();
    if uuid.is_empty() {
        return Err(ApiError::BadRequest("uuid required".into()));
    }
    if req.minutes <= 0 {
        return Err(ApiError::BadRequest("minutes must be positive".into()));
    }
    let task = state
        .store
        .find(uuid)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("task {uuid} not found")))?;
    let field = state.sources.primary();
    let current = field
        .read(&task)
        .and_then(due::parse_notification_date)
        .ok_or_else(|| ApiError::NotFound(format!("task {uuid} has no {}", field.name())))?;

    let next = Duration::try_minutes(req.minutes)
        .and_then(|shift| current.checked_add_signed(shift))
        .ok_or_else(|| ApiError::BadRequest(format!("minutes out of range: {}", req.minutes)))?
        .format(WRITE_LAYOUT)
        .to_string();
    modify_date(&state, uuid, field.name(), &next).await?;
    Ok(Json(DateResponse {
        uuid: uuid.to_string(),
        notification_date: next,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SetDateRequest {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub notification_date: String,
}

async fn set_notification_date(
    State(state): State<AppState>,
    Json(req): Json<SetDateRequest>,
) -> Result<Json<DateResponse>, ApiError> {
    let uuid = req.uuid.trim();
    if uuid.is_empty() {
        return Err(ApiError::BadRequest("uuid required".into()));
    }
    let raw = req.notification_date.trim();
    let value = if raw.is_empty() {
        String::new()
    } else {
        normalize_input_date(raw)?
    };
    modify_date(&state, uuid, state.sources.primary().name(), &value).await?;
    Ok(Json(DateResponse {
        uuid: uuid.to_string(),
        notification_date: value,
    }))
}

/// Accepts the HTML5 `datetime-local` form or any layout the evaluator parses.
pub fn normalize_input_date(raw: &str) -> Result<String, ApiError> {
    if NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M").is_ok() {
        return Ok(format!("{raw}:00"));
    }
    if due::parse_notification_date(raw).is_some() {
        return Ok(raw.to_string());
    }
    Err(ApiError::BadRequest(format!("invalid date {raw:?}")))
}

async fn modify_date(state: &AppState, uuid: &str, field: &str, value: &str) -> Result<(), ApiError> {
    let args = vec![format!("{field}:{value}")];
    state.editor.modify(uuid, &args).await.map_err(|err| {
        warn!(%err, uuid, field, "failed to update task date");
        ApiError::Tracker("failed to update task".into())
    })
}
