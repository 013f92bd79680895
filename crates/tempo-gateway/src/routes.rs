//! API route handlers for the gateway.

use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tempo_core::error::TempoError;
use tempo_scheduler::{
    Actor, AttendeeInput, ConflictCheck, EventFilter, EventPatch, EventSort, EventStatus, EventType,
    ListQuery, NewEvent, Priority, ResponseStatus, ScheduleService, SortDirection, SortField,
    TenantId, WriteOptions, WriteOutcome,
};
use uuid::Uuid;

use super::server::AppState;

// ─── Errors ──────────────────────────────────────────────

/// Error returned by a handler, rendered as `{"ok": false, "error", "kind"}`.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    Engine(TempoError),
    Internal(String),
}

impl From<TempoError> for ApiError {
    fn from(e: TempoError) -> Self {
        Self::Engine(e)
    }
}

/// HTTP status for an engine error kind.
pub fn status_for(error: &TempoError) -> StatusCode {
    match error {
        TempoError::Validation(_) => StatusCode::BAD_REQUEST,
        TempoError::NotFound(_) => StatusCode::NOT_FOUND,
        TempoError::Forbidden(_) => StatusCode::FORBIDDEN,
        TempoError::Conflict(_) => StatusCode::CONFLICT,
        TempoError::Database(_) | TempoError::Config(_) | TempoError::Io(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            Self::Engine(e) => {
                let status = status_for(&e);
                if status.is_server_error() {
                    tracing::error!("Request failed: {e}");
                }
                (status, e.kind(), e.message())
            }
            Self::Internal(msg) => {
                tracing::error!("Request failed: {msg}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg)
            }
        };
        (
            status,
            Json(serde_json::json!({"ok": false, "error": message, "kind": kind})),
        )
            .into_response()
    }
}

// ─── Identity ────────────────────────────────────────────

/// Caller identity from the trusted upstream headers.
pub struct Identity(pub Actor);

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let tenant = header(parts, "x-tenant-id")
            .ok_or_else(|| ApiError::Unauthorized("missing X-Tenant-Id header".into()))?;
        let user = header(parts, "x-user-id")
            .ok_or_else(|| ApiError::Unauthorized("missing X-User-Id header".into()))?;
        let mut actor = Actor::new(TenantId::new(tenant)?, user)?;
        if let Some(name) = header(parts, "x-user-name") {
            actor = actor.with_name(name);
        }
        Ok(Self(actor))
    }
}

/// Run a scheduler call on the blocking pool.
async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&ScheduleService) -> tempo_core::Result<T> + Send + 'static,
{
    let service = state.service.clone();
    tokio::task::spawn_blocking(move || f(service.as_ref()))
        .await
        .map_err(|e| ApiError::Internal(format!("Worker failed: {e}")))?
        .map_err(ApiError::from)
}

fn conflict_response(conflicts: Vec<tempo_scheduler::ScheduleConflict>) -> Response {
    (
        StatusCode::CONFLICT,
        Json(serde_json::json!({
            "ok": false,
            "error": "The requested time conflicts with existing events",
            "kind": "schedule_conflict",
            "conflicts": conflicts,
        })),
    )
        .into_response()
}

// ─── Health ──────────────────────────────────────────────

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "tempo-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

// ─── Events ──────────────────────────────────────────────

/// Flat query string accepted by `GET /api/v1/events`.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub participant: Option<String>,
    pub event_type: Option<EventType>,
    pub status: Option<EventStatus>,
    pub priority: Option<Priority>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub client_id: Option<String>,
    pub lead_id: Option<String>,
    pub parent_event_id: Option<Uuid>,
    pub search: Option<String>,
    pub include_all_private: Option<bool>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub sort: Option<SortField>,
    pub direction: Option<SortDirection>,
}

impl From<ListParams> for ListQuery {
    fn from(p: ListParams) -> Self {
        Self {
            filter: EventFilter {
                participant: p.participant,
                event_type: p.event_type,
                status: p.status,
                priority: p.priority,
                from: p.from,
                to: p.to,
                client_id: p.client_id,
                lead_id: p.lead_id,
                parent_event_id: p.parent_event_id,
                search: p.search,
                include_all_private: p.include_all_private.unwrap_or(false),
            },
            page: p.page,
            per_page: p.per_page,
            sort: EventSort {
                field: p.sort.unwrap_or_default(),
                direction: p.direction.unwrap_or_default(),
            },
        }
    }
}

/// List events visible to the caller.
pub async fn list_events(
    State(state): State<Arc<AppState>>,
    Identity(actor): Identity,
    Query(params): Query<ListParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let query = ListQuery::from(params);
    let page = blocking(&state, move |svc| svc.list_events(&actor, &query)).await?;
    Ok(Json(serde_json::json!({
        "ok": true,
        "events": page.events,
        "pagination": page.pagination,
        "status_summary": page.status_summary,
    })))
}

#[derive(Debug, Deserialize)]
pub struct CreateEventRequest {
    #[serde(flatten)]
    pub event: NewEvent,
    #[serde(default)]
    pub check_conflicts: bool,
    #[serde(default)]
    pub ignore_conflicts: bool,
}

/// Create an event. 201 with the event, or 409 with the conflict list.
pub async fn create_event(
    State(state): State<Arc<AppState>>,
    Identity(actor): Identity,
    Json(body): Json<CreateEventRequest>,
) -> Result<Response, ApiError> {
    let options = WriteOptions {
        check_conflicts: body.check_conflicts,
        ignore_conflicts: body.ignore_conflicts,
    };
    let input = body.event;
    let outcome = blocking(&state, move |svc| svc.create_event(&actor, &input, options)).await?;
    Ok(match outcome {
        WriteOutcome::Done(created) => (
            StatusCode::CREATED,
            Json(serde_json::json!({"ok": true, "event": created})),
        )
            .into_response(),
        WriteOutcome::Conflicts(conflicts) => conflict_response(conflicts),
    })
}

pub async fn get_event(
    State(state): State<Arc<AppState>>,
    Identity(actor): Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let event = blocking(&state, move |svc| svc.get_event(&actor, id)).await?;
    Ok(Json(serde_json::json!({"ok": true, "event": event})))
}

#[derive(Debug, Deserialize)]
pub struct UpdateEventRequest {
    #[serde(flatten)]
    pub patch: EventPatch,
    #[serde(default)]
    pub check_conflicts: bool,
    #[serde(default)]
    pub ignore_conflicts: bool,
}

/// Update an event. 200 with the event, or 409 with the conflict list.
pub async fn update_event(
    State(state): State<Arc<AppState>>,
    Identity(actor): Identity,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateEventRequest>,
) -> Result<Response, ApiError> {
    let options = WriteOptions {
        check_conflicts: body.check_conflicts,
        ignore_conflicts: body.ignore_conflicts,
    };
    let patch = body.patch;
    let outcome = blocking(&state, move |svc| svc.update_event(&actor, id, &patch, options)).await?;
    Ok(match outcome {
        WriteOutcome::Done(event) => Json(serde_json::json!({"ok": true, "event": event})).into_response(),
        WriteOutcome::Conflicts(conflicts) => conflict_response(conflicts),
    })
}

pub async fn delete_event(
    State(state): State<Arc<AppState>>,
    Identity(actor): Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let deleted = blocking(&state, move |svc| svc.delete_event(&actor, id)).await?;
    Ok(Json(serde_json::json!({"ok": true, "deleted": deleted})))
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: EventStatus,
    #[serde(default)]
    pub notes: Option<String>,
}

pub async fn update_status(
    State(state): State<Arc<AppState>>,
    Identity(actor): Identity,
    Path(id): Path<Uuid>,
    Json(body): Json<StatusRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let event = blocking(&state, move |svc| {
        svc.update_status(&actor, id, body.status, body.notes.as_deref())
    })
    .await?;
    Ok(Json(serde_json::json!({"ok": true, "event": event})))
}

/// Dry-run conflict check.
pub async fn check_conflicts(
    State(state): State<Arc<AppState>>,
    Identity(actor): Identity,
    Json(body): Json<ConflictCheck>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let conflicts = blocking(&state, move |svc| svc.check_conflicts(&actor, &body)).await?;
    Ok(Json(serde_json::json!({
        "ok": true,
        "has_conflicts": !conflicts.is_empty(),
        "conflicts": conflicts,
    })))
}

// ─── Calendar ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CalendarParams {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

pub async fn calendar_view(
    State(state): State<Arc<AppState>>,
    Identity(actor): Identity,
    Query(params): Query<CalendarParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (Some(start), Some(end)) = (params.start, params.end) else {
        return Err(TempoError::validation("start and end are required").into());
    };
    let view = blocking(&state, move |svc| svc.calendar_view(&actor, start, end)).await?;
    Ok(Json(serde_json::json!({"ok": true, "calendar": view})))
}

// ─── Attendees ───────────────────────────────────────────

pub async fn list_attendees(
    State(state): State<Arc<AppState>>,
    Identity(actor): Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let attendees = blocking(&state, move |svc| svc.list_attendees(&actor, id)).await?;
    Ok(Json(serde_json::json!({"ok": true, "attendees": attendees})))
}

pub async fn add_attendee(
    State(state): State<Arc<AppState>>,
    Identity(actor): Identity,
    Path(id): Path<Uuid>,
    Json(body): Json<AttendeeInput>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let attendee = blocking(&state, move |svc| svc.add_attendee(&actor, id, &body)).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({"ok": true, "attendee": attendee})),
    ))
}

#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    pub response: ResponseStatus,
}

pub async fn update_attendee(
    State(state): State<Arc<AppState>>,
    Identity(actor): Identity,
    Path((id, attendee_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<RespondRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let attendee = blocking(&state, move |svc| {
        svc.respond(&actor, id, attendee_id, body.response)
    })
    .await?;
    Ok(Json(serde_json::json!({"ok": true, "attendee": attendee})))
}

pub async fn remove_attendee(
    State(state): State<Arc<AppState>>,
    Identity(actor): Identity,
    Path((id, attendee_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    blocking(&state, move |svc| svc.remove_attendee(&actor, id, attendee_id)).await?;
    Ok(Json(serde_json::json!({"ok": true})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::build_router;
    use axum::body::Body;
    use axum::http::Request;
    use tempo_core::TempoConfig;
    use tempo_scheduler::{EventStore, MemoryLedger, TracingAuditLog};
    use tower::ServiceExt;

    fn test_app() -> axum::Router {
        let service = ScheduleService::new(
            EventStore::open_in_memory().unwrap(),
            TempoConfig::default(),
            Arc::new(MemoryLedger::new()),
            Arc::new(TracingAuditLog),
        );
        build_router(AppState::new(Arc::new(service)))
    }

    async fn call(
        app: &axum::Router,
        method: &str,
        uri: &str,
        user: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            req = req
                .header("X-Tenant-Id", "acme")
                .header("X-User-Id", user)
                .header("X-User-Name", format!("User {user}"));
        }
        let req = match body {
            Some(json) => req
                .header("Content-Type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    fn meeting(start: &str, end: &str) -> serde_json::Value {
        serde_json::json!({
            "title": "Planning",
            "start_at": start,
            "end_at": end,
            "event_type": "meeting",
        })
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = test_app();
        let (status, json) = call(&app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_missing_identity_is_unauthorized() {
        let app = test_app();
        let (status, json) = call(&app, "GET", "/api/v1/events", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["ok"], false);
    }

    #[tokio::test]
    async fn test_create_get_and_list() {
        let app = test_app();
        let (status, json) = call(
            &app,
            "POST",
            "/api/v1/events",
            Some("u1"),
            Some(meeting("2026-03-02T10:00:00Z", "2026-03-02T11:00:00Z")),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = json["event"]["id"].as_str().unwrap().to_string();
        assert_eq!(json["event"]["status"], "scheduled");
        assert_eq!(json["event"]["created_by_name"], "User u1");

        let (status, json) = call(&app, "GET", &format!("/api/v1/events/{id}"), Some("u1"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["event"]["title"], "Planning");

        let (status, json) = call(
            &app,
            "GET",
            "/api/v1/events?event_type=meeting&per_page=5&sort=start_at&direction=desc",
            Some("u1"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["pagination"]["total"], 1);
        assert_eq!(json["status_summary"]["by_type"]["meeting"], 1);
    }

    #[tokio::test]
    async fn test_validation_maps_to_400() {
        let app = test_app();
        let (status, json) = call(
            &app,
            "POST",
            "/api/v1/events",
            Some("u1"),
            Some(meeting("2026-03-02T14:00:00Z", "2026-03-02T13:00:00Z")),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["kind"], "validation_error");
    }

    #[tokio::test]
    async fn test_conflict_returns_409_with_list() {
        let app = test_app();
        call(&app, "POST", "/api/v1/events", Some("u1"), Some(meeting("2026-03-02T10:00:00Z", "2026-03-02T11:00:00Z"))).await;

        let mut body = meeting("2026-03-02T10:30:00Z", "2026-03-02T11:30:00Z");
        body["check_conflicts"] = serde_json::json!(true);
        let (status, json) = call(&app, "POST", "/api/v1/events", Some("u1"), Some(body.clone())).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["conflicts"].as_array().unwrap().len(), 1);
        assert_eq!(json["conflicts"][0]["involved_participants"][0], "u1");

        body["ignore_conflicts"] = serde_json::json!(true);
        let (status, _) = call(&app, "POST", "/api/v1/events", Some("u1"), Some(body)).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, json) = call(
            &app,
            "POST",
            "/api/v1/events/conflicts",
            Some("u1"),
            Some(serde_json::json!({"start_at": "2026-03-02T11:00:00Z", "end_at": "2026-03-02T12:00:00Z"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["has_conflicts"], true);
    }

    #[tokio::test]
    async fn test_owner_only_mutations_and_status() {
        let app = test_app();
        let (_, json) = call(&app, "POST", "/api/v1/events", Some("u1"), Some(meeting("2026-03-02T10:00:00Z", "2026-03-02T11:00:00Z"))).await;
        let id = json["event"]["id"].as_str().unwrap().to_string();

        let (status, json) = call(
            &app,
            "PUT",
            &format!("/api/v1/events/{id}"),
            Some("u2"),
            Some(serde_json::json!({"title": "Hijacked"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["kind"], "forbidden");

        let (status, json) = call(
            &app,
            "PUT",
            &format!("/api/v1/events/{id}"),
            Some("u1"),
            Some(serde_json::json!({"title": "Renamed", "location": null})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["event"]["title"], "Renamed");

        let (status, json) = call(
            &app,
            "PATCH",
            &format!("/api/v1/events/{id}/status"),
            Some("u1"),
            Some(serde_json::json!({"status": "completed", "notes": "done"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["event"]["status"], "completed");
        assert!(json["event"]["completed_at"].is_string());

        let (status, json) = call(&app, "DELETE", &format!("/api/v1/events/{id}"), Some("u1"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["deleted"], true);
        let (status, _) = call(&app, "GET", &format!("/api/v1/events/{id}"), Some("u1"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_attendee_routes() {
        let app = test_app();
        let (_, json) = call(&app, "POST", "/api/v1/events", Some("u1"), Some(meeting("2026-03-02T10:00:00Z", "2026-03-02T11:00:00Z"))).await;
        let id = json["event"]["id"].as_str().unwrap().to_string();
        let uri = format!("/api/v1/events/{id}/attendees");

        let (status, json) = call(&app, "POST", &uri, Some("u1"), Some(serde_json::json!({"user_id": "u2"}))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["attendee"]["response"], "invited");
        let aid = json["attendee"]["id"].as_str().unwrap().to_string();

        let (status, json) = call(&app, "POST", &uri, Some("u1"), Some(serde_json::json!({"user_id": "u2"}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["kind"], "conflict");

        let (status, json) = call(
            &app,
            "PUT",
            &format!("{uri}/{aid}"),
            Some("u2"),
            Some(serde_json::json!({"response": "accepted"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["attendee"]["response"], "accepted");

        let (status, _) = call(&app, "DELETE", &format!("{uri}/{aid}"), Some("u1"), None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, json) = call(&app, "GET", &uri, Some("u1"), None).await;
        assert_eq!(json["attendees"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_calendar_view() {
        let app = test_app();
        call(&app, "POST", "/api/v1/events", Some("u1"), Some(meeting("2026-03-02T10:00:00Z", "2026-03-02T11:00:00Z"))).await;

        let (status, json) = call(
            &app,
            "GET",
            "/api/v1/calendar?start=2026-03-01T00:00:00Z&end=2026-03-08T00:00:00Z",
            Some("u1"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["calendar"]["stats"]["total"], 1);
        assert_eq!(json["calendar"]["by_week"]["2026-03-01"].as_array().unwrap().len(), 1);
        assert_eq!(json["calendar"]["events"][0]["is_participant"], true);

        let (status, _) = call(&app, "GET", "/api/v1/calendar", Some("u1"), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&TempoError::validation("x")), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&TempoError::not_found("x")), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&TempoError::forbidden("x")), StatusCode::FORBIDDEN);
        assert_eq!(status_for(&TempoError::conflict("x")), StatusCode::CONFLICT);
        assert_eq!(status_for(&TempoError::Database("x".into())), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
