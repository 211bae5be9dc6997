//! Giapha HTTP REST API
//!
//! Axum-based HTTP server exposing the graph store next to the Unix socket
//! IPC server, on port 8780 by default.
//!
//! Each endpoint has a thin axum handler delegating to an inner function that
//! builds a `GiaphaRequest` and runs it through the shared router, so HTTP and
//! IPC answer identically.
//!
//! Endpoints:
//! - GET    /health                 store and database status
//! - GET    /version                server version info
//! - GET    /branches               branch metadata and statuses
//! - POST   /branches/current       select the current branch
//! - GET    /people                 records of the current branch
//! - GET    /people/merged          deduplicated union of all branches
//! - GET    /people/:id             one record
//! - GET    /people/:id/relations   record with resolved relatives
//! - GET    /search?q=&limit=       substring search over the merged view
//! - PUT    /people/:id             merge-save a record
//! - POST   /people                 add a standalone record
//! - POST   /people/:id/children    add a child atomically
//! - POST   /people/:id/check-ins   append a check-in
//! - POST   /people/:id/clear       remove optional fields
//! - DELETE /people/:id             delete and unlink a record
//! - POST   /maintenance/cleanup    wrong-branch or by-name cleanup
//! - GET    /events                 server-sent merged change stream

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use giapha_core::ipc::{GiaphaRequest, GiaphaResponse};
use giapha_core::{GiaphaConfig, GraphStore, Person, PersonField};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub store: GraphStore,
    pub pool: Option<PgPool>,
    pub socket_path: String,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/branches", get(branches_handler))
        .route("/branches/current", post(select_branch_handler))
        .route("/people", get(people_handler).post(add_person_handler))
        .route("/people/merged", get(merged_people_handler))
        .route(
            "/people/:id",
            get(person_handler)
                .put(save_person_handler)
                .delete(delete_person_handler),
        )
        .route("/people/:id/relations", get(relations_handler))
        .route("/people/:id/children", post(add_child_handler))
        .route("/people/:id/check-ins", post(check_in_handler))
        .route("/people/:id/clear", post(clear_fields_handler))
        .route("/search", get(search_handler))
        .route("/maintenance/cleanup", post(cleanup_handler))
        .route("/events", get(events_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    store: GraphStore,
    pool: Option<PgPool>,
    config: GiaphaConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", config.http.host, config.http.port);
    let state = Arc::new(HttpState {
        store,
        pool,
        socket_path: config.service.socket_path.clone(),
    });

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Giapha HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SelectBranchRequest {
    pub branch: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct SearchParams {
    pub q: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct AddChildRequest {
    #[serde(default)]
    pub name: String,
    pub position: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CheckInRequest {
    pub image: String,
    pub date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClearFieldsRequest {
    pub fields: Vec<PersonField>,
}

#[derive(Debug, Deserialize, Default)]
pub struct CleanupRequest {
    pub name: Option<String>,
}

/// Standard HTTP error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            status: "error".to_string(),
            code: None,
        }
    }

    fn into_value(self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({"status": "error"}))
    }
}

fn bad_request(msg: &str) -> (StatusCode, serde_json::Value) {
    (StatusCode::BAD_REQUEST, ErrorResponse::new(msg).into_value())
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner health check. A failing database answers 503; a degraded store
/// still answers 200 with `status: degraded`.
pub async fn health_inner(state: &HttpState) -> (StatusCode, serde_json::Value) {
    let response = crate::router::handle_request_with_pool(
        GiaphaRequest::Health,
        &state.store,
        state.pool.as_ref(),
    )
    .await;

    match response_to_http(response) {
        Ok(mut data) => {
            if let Some(obj) = data.as_object_mut() {
                obj.insert("version".to_string(), serde_json::json!(env!("CARGO_PKG_VERSION")));
                obj.insert("socket".to_string(), serde_json::json!(state.socket_path));
            }
            (StatusCode::OK, data)
        }
        Err((_, body)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "error": body["error"],
            }),
        ),
    }
}

/// Inner version, pure.
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "giapha/1",
    })
}

pub async fn branches_inner(store: &GraphStore) -> (StatusCode, serde_json::Value) {
    dispatch(store, GiaphaRequest::Branches).await
}

pub async fn select_branch_inner(
    store: &GraphStore,
    req: SelectBranchRequest,
) -> (StatusCode, serde_json::Value) {
    let branch = match req.branch {
        Some(b) if !b.trim().is_empty() => b.trim().to_string(),
        _ => return bad_request("branch field is required"),
    };
    dispatch(store, GiaphaRequest::SelectBranch { branch }).await
}

pub async fn people_inner(store: &GraphStore, merged: bool) -> (StatusCode, serde_json::Value) {
    dispatch(store, GiaphaRequest::People { merged }).await
}

pub async fn person_inner(store: &GraphStore, id: String) -> (StatusCode, serde_json::Value) {
    dispatch(store, GiaphaRequest::Get { id }).await
}

pub async fn relations_inner(store: &GraphStore, id: String) -> (StatusCode, serde_json::Value) {
    dispatch(store, GiaphaRequest::Relations { id }).await
}

/// Inner search. A missing `q` is rejected; an empty one yields no results.
pub async fn search_inner(
    store: &GraphStore,
    params: SearchParams,
) -> (StatusCode, serde_json::Value) {
    let Some(query) = params.q else {
        return bad_request("q parameter is required");
    };

    let start = Instant::now();
    let (status, mut body) = dispatch(
        store,
        GiaphaRequest::Search {
            query,
            limit: params.limit,
        },
    )
    .await;
    if status == StatusCode::OK {
        if let Some(obj) = body.as_object_mut() {
            obj.insert(
                "took_ms".to_string(),
                serde_json::json!(start.elapsed().as_millis() as u64),
            );
        }
    }
    (status, body)
}

/// Inner save. The path id wins over a blank body id; a conflicting one is
/// rejected.
pub async fn save_person_inner(
    store: &GraphStore,
    id: String,
    mut person: Person,
) -> (StatusCode, serde_json::Value) {
    if person.id.trim().is_empty() {
        person.id = id;
    } else if person.id != id {
        return bad_request("body id does not match path");
    }
    dispatch(store, GiaphaRequest::Save { person }).await
}

/// Inner add. The body may omit `id`; one is generated from the name.
pub async fn add_person_inner(
    store: &GraphStore,
    mut payload: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    if let Some(obj) = payload.as_object_mut() {
        obj.entry("id").or_insert_with(|| serde_json::json!(""));
    }
    let person: Person = match serde_json::from_value(payload) {
        Ok(p) => p,
        Err(e) => return bad_request(&format!("invalid person record: {}", e)),
    };
    let (status, body) = dispatch(store, GiaphaRequest::AddPerson { person }).await;
    if status == StatusCode::OK {
        return (StatusCode::CREATED, body);
    }
    (status, body)
}

pub async fn add_child_inner(
    store: &GraphStore,
    parent_id: String,
    req: AddChildRequest,
) -> (StatusCode, serde_json::Value) {
    let request = GiaphaRequest::AddChild {
        parent_id,
        name: req.name,
        position: req.position,
    };
    let (status, body) = dispatch(store, request).await;
    if status == StatusCode::OK {
        return (StatusCode::CREATED, body);
    }
    (status, body)
}

pub async fn check_in_inner(
    store: &GraphStore,
    id: String,
    req: CheckInRequest,
) -> (StatusCode, serde_json::Value) {
    if req.image.trim().is_empty() {
        return bad_request("image field is required");
    }
    let request = GiaphaRequest::CheckIn {
        id,
        image: req.image,
        date: req.date,
    };
    dispatch(store, request).await
}

pub async fn clear_fields_inner(
    store: &GraphStore,
    id: String,
    req: ClearFieldsRequest,
) -> (StatusCode, serde_json::Value) {
    dispatch(
        store,
        GiaphaRequest::ClearFields {
            id,
            fields: req.fields,
        },
    )
    .await
}

/// Inner delete. Deleting an unknown id is a 404.
pub async fn delete_person_inner(store: &GraphStore, id: String) -> (StatusCode, serde_json::Value) {
    let (status, body) = dispatch(store, GiaphaRequest::Delete { id: id.clone() }).await;
    if status == StatusCode::OK && body["deleted"] == false {
        return (
            StatusCode::NOT_FOUND,
            ErrorResponse {
                code: Some("not_found".to_string()),
                ..ErrorResponse::new(format!("Person not found: {}", id))
            }
            .into_value(),
        );
    }
    (status, body)
}

pub async fn cleanup_inner(
    store: &GraphStore,
    req: CleanupRequest,
) -> (StatusCode, serde_json::Value) {
    let name = req.name.filter(|n| !n.trim().is_empty());
    dispatch(store, GiaphaRequest::Cleanup { name }).await
}

/// Merged view as a stream of SSE events, starting with the current value.
pub fn merged_events(store: &GraphStore) -> impl Stream<Item = Result<Event, Infallible>> {
    let rx = store.watch_merged();
    futures::stream::unfold((rx, true), |(mut rx, first)| async move {
        if !first && rx.changed().await.is_err() {
            return None;
        }
        let people = rx.borrow_and_update().clone();
        let payload = serde_json::json!({
            "count": people.len(),
            "people": people.people(),
        });
        let event = Event::default().event("merged").data(payload.to_string());
        Some((Ok(event), (rx, false)))
    })
}

// ============================================================================
// Axum handler wrappers (thin, delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn branches_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = branches_inner(&state.store).await;
    (status, Json(body))
}

pub async fn select_branch_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<SelectBranchRequest>,
) -> impl IntoResponse {
    let (status, body) = select_branch_inner(&state.store, req).await;
    (status, Json(body))
}

pub async fn people_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = people_inner(&state.store, false).await;
    (status, Json(body))
}

pub async fn merged_people_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = people_inner(&state.store, true).await;
    (status, Json(body))
}

pub async fn person_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = person_inner(&state.store, id).await;
    (status, Json(body))
}

pub async fn relations_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = relations_inner(&state.store, id).await;
    (status, Json(body))
}

pub async fn search_handler(
    State(state): State<Arc<HttpState>>,
    Query(params): Query<SearchParams>,
) -> impl IntoResponse {
    let (status, body) = search_inner(&state.store, params).await;
    (status, Json(body))
}

pub async fn save_person_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
    Json(person): Json<Person>,
) -> impl IntoResponse {
    let (status, body) = save_person_inner(&state.store, id, person).await;
    (status, Json(body))
}

pub async fn add_person_handler(
    State(state): State<Arc<HttpState>>,
    Json(payload): Json<serde_json::Value>,
) -> impl IntoResponse {
    let (status, body) = add_person_inner(&state.store, payload).await;
    (status, Json(body))
}

pub async fn add_child_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
    Json(req): Json<AddChildRequest>,
) -> impl IntoResponse {
    let (status, body) = add_child_inner(&state.store, id, req).await;
    (status, Json(body))
}

pub async fn check_in_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
    Json(req): Json<CheckInRequest>,
) -> impl IntoResponse {
    let (status, body) = check_in_inner(&state.store, id, req).await;
    (status, Json(body))
}

pub async fn clear_fields_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
    Json(req): Json<ClearFieldsRequest>,
) -> impl IntoResponse {
    let (status, body) = clear_fields_inner(&state.store, id, req).await;
    (status, Json(body))
}

pub async fn delete_person_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = delete_person_inner(&state.store, id).await;
    (status, Json(body))
}

pub async fn cleanup_handler(
    State(state): State<Arc<HttpState>>,
    body: Option<Json<CleanupRequest>>,
) -> impl IntoResponse {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let (status, body) = cleanup_inner(&state.store, req).await;
    (status, Json(body))
}

pub async fn events_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    Sse::new(merged_events(&state.store)).keep_alive(KeepAlive::default())
}

// ============================================================================
// Helpers
// ============================================================================

async fn dispatch(store: &GraphStore, request: GiaphaRequest) -> (StatusCode, serde_json::Value) {
    let response = crate::router::handle_request(request, store).await;
    match response_to_http(response) {
        Ok(data) => (StatusCode::OK, data),
        Err(err) => err,
    }
}

/// HTTP status for a store error code.
pub fn status_for_code(code: Option<&str>) -> StatusCode {
    match code {
        Some("not_found") => StatusCode::NOT_FOUND,
        Some("unknown_branch") | Some("blank_name") => StatusCode::BAD_REQUEST,
        Some("cross_branch") => StatusCode::CONFLICT,
        Some("transport") | Some("transaction") => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Convert an IPC `GiaphaResponse` into an HTTP body value, or a status and
/// error body.
pub fn response_to_http(
    response: GiaphaResponse,
) -> std::result::Result<serde_json::Value, (StatusCode, serde_json::Value)> {
    if response.is_ok() {
        return Ok(response.data.unwrap_or(serde_json::json!({})));
    }
    let status = status_for_code(response.code.as_deref());
    let body = ErrorResponse {
        error: response.error.unwrap_or_else(|| "unknown error".to_string()),
        status: "error".to_string(),
        code: response.code,
    };
    Err((status, body.into_value()))
}

// ============================================================================
// Unit Tests: call inner functions directly
// ============================================================================
