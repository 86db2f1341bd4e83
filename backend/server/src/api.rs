//! Axum REST API: routes, request/response shapes, and handlers.
//!
//! Handlers are thin: they decode the request, call the matching
//! [`ApprovalService`] operation, and encode the result. Authorization
//! decisions all happen in the core; program-scoped reads first load the
//! program as the caller so visibility rules apply.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use program_approval::{
    Actor, ApprovalError, ApprovalRequest, ApprovalService, Budget, DocumentHistoryRecord,
    DocumentSlot, FileUpload, NewProgram, Program, ProgramChanges, Query, Remark, Role,
    SlotUpload, StatusChange, StoredFile, TransitionKind, TransitionPayload,
};
use serde::{Deserialize, Deserializer, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{BearerToken, CurrentActor};
use crate::errors::{ApiError, ApiResult};

pub struct ApiState {
    pub service: ApprovalService,
    pub session_ttl: Duration,
    /// Request body cap; base64 uploads are about 4/3 of the file size
    pub max_body_bytes: usize,
}

pub fn router(state: Arc<ApiState>) -> Router {
    let body_limit = DefaultBodyLimit::max(state.max_body_bytes);
    Router::new()
        .route("/health", get(health))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/users", post(register_user))
        .route("/programs", get(list_programs).post(create_program))
        .route(
            "/programs/:id",
            get(get_program).patch(edit_program).delete(delete_program),
        )
        .route("/programs/:id/transitions/:name", post(transition))
        .route("/programs/:id/timeline", get(timeline))
        .route("/programs/:id/approval-requests", get(approval_requests))
        .route("/programs/:id/documents/:slot", get(get_document))
        .route("/programs/:id/documents/:slot/history", get(document_history))
        .route("/history/:id", get(history_file))
        .route(
            "/programs/:id/signed-documents",
            get(get_signed_set).post(upload_signed_documents),
        )
        .route("/programs/:id/signed-documents/:slot", get(get_signed_document))
        .route(
            "/programs/:id/signed-documents/:slot/history",
            get(signed_document_history),
        )
        .route("/programs/:id/queries", get(list_queries).post(add_query))
        .route("/queries/:id/answer", post(answer_query))
        .route("/queries/:id/resolve", post(resolve_query))
        .route("/programs/:id/remarks", get(list_remarks).post(add_remark))
        .route("/programs/:id/payment", get(get_payment))
        .layer(body_limit)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Request shapes
// ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RegisterUserRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
}

/// A file in a JSON body; `content` is standard base64.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileBody {
    pub file_name: String,
    pub content: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProgramRequest {
    pub name: String,
    pub recipient_name: String,
    pub budget: Budget,
    #[serde(default)]
    pub exco_reference: Option<String>,
    #[serde(default)]
    pub documents: HashMap<DocumentSlot, FileBody>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditProgramRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub recipient_name: Option<String>,
    #[serde(default)]
    pub budget: Option<Budget>,
    /// Absent leaves the reference alone; `null` clears it.
    #[serde(default, deserialize_with = "present")]
    pub exco_reference: Option<Option<String>>,
    #[serde(default)]
    pub expected_version: Option<i64>,
    #[serde(default)]
    pub documents: HashMap<DocumentSlot, FileBody>,
}

#[derive(Deserialize)]
pub struct SignedUploadRequest {
    pub documents: HashMap<DocumentSlot, FileBody>,
}

#[derive(Deserialize)]
pub struct TextRequest {
    #[serde(default)]
    pub text: String,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn decode_files(documents: HashMap<DocumentSlot, FileBody>) -> ApiResult<Vec<SlotUpload>> {
    documents
        .into_iter()
        .map(|(slot, body)| {
            let content = STANDARD
                .decode(body.content.as_bytes())
                .map_err(|e| ApiError::BadRequest(format!("{slot}: invalid base64 content: {e}")))?;
            Ok(SlotUpload {
                slot,
                file: FileUpload::new(body.file_name, content),
            })
        })
        .collect()
}

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ListResponse<T> {
    pub count: usize,
    pub items: Vec<T>,
}

impl<T> From<Vec<T>> for ListResponse<T> {
    fn from(items: Vec<T>) -> Self {
        Self {
            count: items.len(),
            items,
        }
    }
}

fn file_response(file: StoredFile) -> Response {
    let disposition = format!(
        "attachment; filename=\"{}\"",
        file.file_name.replace(['"', '\\'], "_")
    );
    (
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
            (header::ETAG, format!("\"{}\"", file.content_hash)),
        ],
        file.content,
    )
        .into_response()
}

// ─────────────────────────────────────────────────────────
// Handlers: accounts
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `POST /auth/login`
pub async fn login(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let ttl = i64::try_from(state.session_ttl.as_millis()).unwrap_or(i64::MAX);
    match state.service.login(&body.email, &body.password, ttl).await {
        Ok(session) => Ok(Json(session)),
        Err(ApprovalError::PermissionDenied(msg)) => Err(ApiError::Unauthorized(msg)),
        Err(e) => Err(e.into()),
    }
}

/// `POST /auth/logout`
pub async fn logout(
    State(state): State<Arc<ApiState>>,
    BearerToken(token): BearerToken,
) -> ApiResult<StatusCode> {
    state.service.logout(&token).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /users`
pub async fn register_user(
    State(state): State<Arc<ApiState>>,
    CurrentActor(admin): CurrentActor,
    Json(body): Json<RegisterUserRequest>,
) -> ApiResult<(StatusCode, Json<Actor>)> {
    let user = state
        .service
        .register_user(&admin, &body.name, &body.email, &body.password, body.role)
        .await?;
    Ok((StatusCode::CREATED, Json(user)))
}

// ─────────────────────────────────────────────────────────
// Handlers: programs
// ─────────────────────────────────────────────────────────

/// `GET /programs`
pub async fn list_programs(
    State(state): State<Arc<ApiState>>,
    CurrentActor(actor): CurrentActor,
) -> ApiResult<Json<ListResponse<Program>>> {
    Ok(Json(state.service.list_programs(&actor).await?.into()))
}

/// `POST /programs`
pub async fn create_program(
    State(state): State<Arc<ApiState>>,
    CurrentActor(actor): CurrentActor,
    Json(body): Json<CreateProgramRequest>,
) -> ApiResult<(StatusCode, Json<Program>)> {
    let files = decode_files(body.documents)?;
    let fields = NewProgram {
        name: body.name,
        recipient_name: body.recipient_name,
        budget: body.budget,
        exco_reference: body.exco_reference,
    };
    let program = state.service.create_program(&actor, fields, files).await?;
    Ok((StatusCode::CREATED, Json(program)))
}

/// `GET /programs/:id`
pub async fn get_program(
    State(state): State<Arc<ApiState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<i64>,
) -> ApiResult<Json<Program>> {
    Ok(Json(state.service.get_program(&actor, id).await?))
}

/// `PATCH /programs/:id`
pub async fn edit_program(
    State(state): State<Arc<ApiState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<i64>,
    Json(body): Json<EditProgramRequest>,
) -> ApiResult<Json<Program>> {
    let files = decode_files(body.documents)?;
    let changes = ProgramChanges {
        name: body.name,
        recipient_name: body.recipient_name,
        budget: body.budget,
        exco_reference: body.exco_reference,
        expected_version: body.expected_version,
    };
    Ok(Json(state.service.edit_program(&actor, id, changes, files).await?))
}

/// `DELETE /programs/:id`
pub async fn delete_program(
    State(state): State<Arc<ApiState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.service.delete_program(&actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /programs/:id/transitions/:name`
///
/// The body is an optional [`TransitionPayload`]; an empty body means no
/// inputs.
pub async fn transition(
    State(state): State<Arc<ApiState>>,
    CurrentActor(actor): CurrentActor,
    Path((id, name)): Path<(i64, String)>,
    body: Bytes,
) -> ApiResult<Json<Program>> {
    let kind: TransitionKind = name.parse()?;
    let payload = if body.iter().all(u8::is_ascii_whitespace) {
        TransitionPayload::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid transition body: {e}")))?
    };
    Ok(Json(state.service.transition(&actor, id, kind, payload).await?))
}

/// `GET /programs/:id/timeline`
pub async fn timeline(
    State(state): State<Arc<ApiState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<i64>,
) -> ApiResult<Json<ListResponse<StatusChange>>> {
    Ok(Json(state.service.program_timeline(&actor, id).await?.into()))
}

/// `GET /programs/:id/approval-requests`
pub async fn approval_requests(
    State(state): State<Arc<ApiState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<i64>,
) -> ApiResult<Json<ListResponse<ApprovalRequest>>> {
    Ok(Json(state.service.list_approval_requests(&actor, id).await?.into()))
}

// ─────────────────────────────────────────────────────────
// Handlers: documents
// ─────────────────────────────────────────────────────────

/// `GET /programs/:id/documents/:slot`
pub async fn get_document(
    State(state): State<Arc<ApiState>>,
    CurrentActor(actor): CurrentActor,
    Path((id, slot)): Path<(i64, String)>,
) -> ApiResult<Response> {
    let slot: DocumentSlot = slot.parse()?;
    state.service.get_program(&actor, id).await?;
    Ok(file_response(state.service.get_document(id, slot).await?))
}

/// `GET /programs/:id/documents/:slot/history`
pub async fn document_history(
    State(state): State<Arc<ApiState>>,
    CurrentActor(actor): CurrentActor,
    Path((id, slot)): Path<(i64, String)>,
) -> ApiResult<Json<ListResponse<DocumentHistoryRecord>>> {
    let slot: DocumentSlot = slot.parse()?;
    state.service.get_program(&actor, id).await?;
    Ok(Json(state.service.get_document_history(id, slot).await?.into()))
}

/// `GET /history/:id`
pub async fn history_file(
    State(state): State<Arc<ApiState>>,
    CurrentActor(actor): CurrentActor,
    Path(history_id): Path<i64>,
) -> ApiResult<Response> {
    let program_id = state.service.history_program(history_id).await?;
    state.service.get_program(&actor, program_id).await?;
    Ok(file_response(state.service.get_history_file(history_id).await?))
}

/// `POST /programs/:id/signed-documents`
pub async fn upload_signed_documents(
    State(state): State<Arc<ApiState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<i64>,
    Json(body): Json<SignedUploadRequest>,
) -> ApiResult<impl IntoResponse> {
    let files = decode_files(body.documents)?;
    let set = state.service.upload_signed_documents(&actor, id, files).await?;
    Ok((StatusCode::CREATED, Json(set)))
}

/// `GET /programs/:id/signed-documents`
pub async fn get_signed_set(
    State(state): State<Arc<ApiState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    state.service.get_program(&actor, id).await?;
    Ok(Json(state.service.get_signed_document_set(id).await?))
}

/// `GET /programs/:id/signed-documents/:slot`
pub async fn get_signed_document(
    State(state): State<Arc<ApiState>>,
    CurrentActor(actor): CurrentActor,
    Path((id, slot)): Path<(i64, String)>,
) -> ApiResult<Response> {
    let slot: DocumentSlot = slot.parse()?;
    state.service.get_program(&actor, id).await?;
    Ok(file_response(state.service.get_signed_document(id, slot).await?))
}

/// `GET /programs/:id/signed-documents/:slot/history`
pub async fn signed_document_history(
    State(state): State<Arc<ApiState>>,
    CurrentActor(actor): CurrentActor,
    Path((id, slot)): Path<(i64, String)>,
) -> ApiResult<Json<ListResponse<DocumentHistoryRecord>>> {
    let slot: DocumentSlot = slot.parse()?;
    state.service.get_program(&actor, id).await?;
    Ok(Json(state.service.get_signed_document_history(id, slot).await?.into()))
}

// ─────────────────────────────────────────────────────────
// Handlers: queries, remarks, payment
// ─────────────────────────────────────────────────────────

/// `GET /programs/:id/queries`
pub async fn list_queries(
    State(state): State<Arc<ApiState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<i64>,
) -> ApiResult<Json<ListResponse<Query>>> {
    state.service.get_program(&actor, id).await?;
    Ok(Json(state.service.list_queries(id).await?.into()))
}

/// `POST /programs/:id/queries`
pub async fn add_query(
    State(state): State<Arc<ApiState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<i64>,
    Json(body): Json<TextRequest>,
) -> ApiResult<(StatusCode, Json<Query>)> {
    let query = state.service.add_query(&actor, id, &body.text).await?;
    Ok((StatusCode::CREATED, Json(query)))
}

/// `POST /queries/:id/answer`
pub async fn answer_query(
    State(state): State<Arc<ApiState>>,
    CurrentActor(actor): CurrentActor,
    Path(query_id): Path<i64>,
    Json(body): Json<TextRequest>,
) -> ApiResult<Json<Query>> {
    Ok(Json(state.service.answer_query(&actor, query_id, &body.text).await?))
}

/// `POST /queries/:id/resolve`
pub async fn resolve_query(
    State(state): State<Arc<ApiState>>,
    CurrentActor(actor): CurrentActor,
    Path(query_id): Path<i64>,
) -> ApiResult<Json<Query>> {
    Ok(Json(state.service.resolve_query(&actor, query_id).await?))
}

/// `GET /programs/:id/remarks`
pub async fn list_remarks(
    State(state): State<Arc<ApiState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<i64>,
) -> ApiResult<Json<ListResponse<Remark>>> {
    state.service.get_program(&actor, id).await?;
    Ok(Json(state.service.list_remarks(id).await?.into()))
}

/// `POST /programs/:id/remarks`
pub async fn add_remark(
    State(state): State<Arc<ApiState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<i64>,
    Json(body): Json<TextRequest>,
) -> ApiResult<(StatusCode, Json<Remark>)> {
    let remark = state.service.add_remark(&actor, id, &body.text).await?;
    Ok((StatusCode::CREATED, Json(remark)))
}

/// `GET /programs/:id/payment`
pub async fn get_payment(
    State(state): State<Arc<ApiState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    state.service.get_program(&actor, id).await?;
    Ok(Json(state.service.get_payment(id).await?))
}
