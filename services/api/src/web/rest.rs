//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification. Each handler maps one route onto
//! one `SessionEngine` operation; all state-machine rules live in the engine.

use crate::error::ApiError;
use crate::web::protocol::{
    AnswerRequest, AnswerResponse, ErrorBody, HealthResponse, IngestResponse, OptionView,
    QuestionView, QuizResponse, ReportResponse, ReportView, SessionListResponse, SessionView,
    SpeechRequest, StartQuizQuery, SummaryResponse,
};
use crate::web::state::AppState;
use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::OpenApi;
use uuid::Uuid;

const SERVICE_NAME: &str = "Voice Learning Assistant";

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        create_session_handler,
        upload_document_handler,
        get_session_handler,
        summarize_handler,
        start_quiz_handler,
        submit_answer_handler,
        report_handler,
        restart_quiz_handler,
        reset_session_handler,
        speech_handler,
        health_handler,
        list_sessions_handler,
    ),
    components(
        schemas(
            AnswerRequest, AnswerResponse, ErrorBody, HealthResponse, IngestResponse,
            OptionView, QuestionView, QuizResponse, ReportResponse, ReportView,
            SessionListResponse, SessionView, SpeechRequest, SummaryResponse
        )
    ),
    tags(
        (name = "Learning Assistant API", description = "Document summaries and spoken quizzes.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Router
//=========================================================================================

/// Builds the API routes. Transport layers (CORS, body limits) are added by the caller.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/sessions", post(create_session_handler))
        .route("/sessions/{id}", get(get_session_handler))
        .route("/sessions/{id}/document", post(upload_document_handler))
        .route("/sessions/{id}/summary", post(summarize_handler))
        .route("/sessions/{id}/quiz", post(start_quiz_handler))
        .route("/sessions/{id}/quiz/restart", post(restart_quiz_handler))
        .route("/sessions/{id}/answers", post(submit_answer_handler))
        .route("/sessions/{id}/report", get(report_handler))
        .route("/sessions/{id}/reset", post(reset_session_handler))
        .route("/speech", post(speech_handler))
        .route("/health", get(health_handler))
        .route("/debug/sessions", get(list_sessions_handler))
        .with_state(state)
}

//=========================================================================================
// Session Handlers
//=========================================================================================

/// Create a new session by uploading a document.
///
/// Accepts a multipart/form-data request. The file is taken from the
/// `document` part, or from the first part that carries a file name. A
/// session is only created when the document is accepted.
#[utoipa::path(
    post,
    path = "/sessions",
    request_body(content_type = "multipart/form-data", description = "The document to upload."),
    responses(
        (status = 201, description = "Session created and document ingested", body = IngestResponse),
        (status = 400, description = "Missing file", body = ErrorBody),
        (status = 422, description = "No readable text in the document", body = ErrorBody)
    )
)]
pub async fn create_session_handler(
    State(app_state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let document = read_document(multipart).await?;
    info!(bytes = document.len(), "Processing uploaded document");

    let outcome = app_state.engine.open_with_document(&document).await?;
    Ok((StatusCode::CREATED, Json(IngestResponse::from(outcome))))
}

/// Load a document into an existing session that is awaiting one.
///
/// Used after `/sessions/{id}/reset` to study a new document in the same session.
#[utoipa::path(
    post,
    path = "/sessions/{id}/document",
    params(("id" = Uuid, Path, description = "The session id.")),
    request_body(content_type = "multipart/form-data", description = "The document to upload."),
    responses(
        (status = 200, description = "Document ingested", body = IngestResponse),
        (status = 400, description = "Missing file", body = ErrorBody),
        (status = 404, description = "Unknown session", body = ErrorBody),
        (status = 409, description = "A document is already loaded", body = ErrorBody),
        (status = 422, description = "No readable text in the document", body = ErrorBody)
    )
)]
pub async fn upload_document_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> Result<Json<IngestResponse>, ApiError> {
    let document = read_document(multipart).await?;
    info!(session_id = %id, bytes = document.len(), "Processing uploaded document");

    let outcome = app_state.engine.ingest(id, &document).await?;
    Ok(Json(outcome.into()))
}

/// Fetch the current state of a session.
#[utoipa::path(
    get,
    path = "/sessions/{id}",
    params(("id" = Uuid, Path, description = "The session id.")),
    responses(
        (status = 200, description = "Session snapshot", body = SessionView),
        (status = 404, description = "Unknown session", body = ErrorBody)
    )
)]
pub async fn get_session_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, ApiError> {
    let snapshot = app_state.engine.snapshot(id).await?;
    Ok(Json(snapshot.into()))
}

/// Generate or regenerate the session's summary.
#[utoipa::path(
    post,
    path = "/sessions/{id}/summary",
    params(("id" = Uuid, Path, description = "The session id.")),
    responses(
        (status = 200, description = "Summary generated", body = SummaryResponse),
        (status = 409, description = "No document loaded", body = ErrorBody)
    )
)]
pub async fn summarize_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SummaryResponse>, ApiError> {
    let outcome = app_state.engine.summarize(id).await?;
    Ok(Json(outcome.into()))
}

/// Generate a fresh question set and start the quiz.
#[utoipa::path(
    post,
    path = "/sessions/{id}/quiz",
    params(("id" = Uuid, Path, description = "The session id."), StartQuizQuery),
    responses(
        (status = 200, description = "Quiz started", body = QuizResponse),
        (status = 409, description = "No summary yet", body = ErrorBody)
    )
)]
pub async fn start_quiz_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<StartQuizQuery>,
) -> Result<Json<QuizResponse>, ApiError> {
    let started = app_state.engine.start_quiz(id, query.count).await?;
    if started.source.is_fallback() {
        warn!(session_id = %id, "Serving fallback quiz");
    }
    Ok(Json(started.into()))
}

/// Answer the current question.
#[utoipa::path(
    post,
    path = "/sessions/{id}/answers",
    params(("id" = Uuid, Path, description = "The session id.")),
    request_body = AnswerRequest,
    responses(
        (status = 200, description = "Answer scored", body = AnswerResponse),
        (status = 409, description = "Quiz not active", body = ErrorBody)
    )
)]
pub async fn submit_answer_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<AnswerRequest>,
) -> Result<Json<AnswerResponse>, ApiError> {
    let outcome = app_state.engine.submit_answer(id, &req.answer).await?;
    Ok(Json(outcome.into()))
}

/// Final performance report for a completed quiz.
#[utoipa::path(
    get,
    path = "/sessions/{id}/report",
    params(("id" = Uuid, Path, description = "The session id.")),
    responses(
        (status = 200, description = "Quiz report", body = ReportResponse),
        (status = 409, description = "Quiz not complete", body = ErrorBody)
    )
)]
pub async fn report_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReportResponse>, ApiError> {
    let outcome = app_state.engine.report(id).await?;
    Ok(Json(outcome.into()))
}

/// Retake a completed quiz with the same questions.
#[utoipa::path(
    post,
    path = "/sessions/{id}/quiz/restart",
    params(("id" = Uuid, Path, description = "The session id.")),
    responses(
        (status = 200, description = "Quiz restarted", body = QuizResponse),
        (status = 409, description = "Quiz not complete", body = ErrorBody)
    )
)]
pub async fn restart_quiz_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<QuizResponse>, ApiError> {
    let prompt = app_state.engine.restart_quiz(id).await?;
    Ok(Json(prompt.into()))
}

/// Discard the session's document so a new one can be ingested.
#[utoipa::path(
    post,
    path = "/sessions/{id}/reset",
    params(("id" = Uuid, Path, description = "The session id.")),
    responses(
        (status = 200, description = "Session reset", body = SessionView),
        (status = 404, description = "Unknown session", body = ErrorBody)
    )
)]
pub async fn reset_session_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, ApiError> {
    let snapshot = app_state.engine.new_document(id).await?;
    Ok(Json(snapshot.into()))
}

//=========================================================================================
// Utility Handlers
//=========================================================================================

/// Read text aloud.
#[utoipa::path(
    post,
    path = "/speech",
    request_body = SpeechRequest,
    responses(
        (status = 200, description = "MP3 audio", content_type = "audio/mpeg"),
        (status = 400, description = "No text provided", body = ErrorBody),
        (status = 502, description = "Speech service failed", body = ErrorBody)
    )
)]
pub async fn speech_handler(
    State(app_state): State<Arc<AppState>>,
    Json(req): Json<SpeechRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.text.trim().is_empty() {
        return Err(ApiError::BadRequest("No text provided".to_string()));
    }
    let audio = app_state.engine.narrate(&req.text).await?;
    Ok(([(header::CONTENT_TYPE, "audio/mpeg")], Bytes::from(audio)))
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health_handler(State(app_state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: SERVICE_NAME.to_string(),
        active_sessions: app_state.engine.store().len(),
        max_upload_bytes: app_state.config.max_upload_bytes,
        session_idle_ttl_secs: app_state.config.session_idle_ttl.map(|ttl| ttl.as_secs()),
        timestamp: Utc::now(),
    })
}

/// Snapshot of every live session, for debugging.
#[utoipa::path(
    get,
    path = "/debug/sessions",
    responses((status = 200, description = "All sessions", body = SessionListResponse))
)]
pub async fn list_sessions_handler(
    State(app_state): State<Arc<AppState>>,
) -> Json<SessionListResponse> {
    let sessions: Vec<SessionView> = app_state
        .engine
        .list_sessions()
        .await
        .into_iter()
        .map(SessionView::from)
        .collect();
    Json(SessionListResponse {
        total_sessions: sessions.len(),
        sessions,
    })
}

//=========================================================================================
// Helpers
//=========================================================================================

/// Pulls the uploaded file out of a multipart form.
async fn read_document(mut multipart: Multipart) -> Result<Bytes, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to read multipart data: {}", e)))?
    {
        if field.name() == Some("document") || field.file_name().is_some() {
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(format!("Failed to read file bytes: {}", e)))?;
            if !data.is_empty() {
                return Ok(data);
            }
        }
    }
    Err(ApiError::BadRequest(
        "Multipart form must include a file".to_string(),
    ))
}
