//! Axum route handlers for the session flow.

use std::convert::Infallible;

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;
use uuid::Uuid;

use crate::analysis::pipeline::{relay, DisplayUpdate};
use crate::analysis::session::{Session, SessionStage};
use crate::errors::AppError;
use crate::models::document::{DocumentError, ResumeDocument};
use crate::state::AppState;

/// Pending display updates per analysis before the relay waits on the client.
const UPDATE_BUFFER: usize = 16;

#[derive(Debug, Serialize)]
pub struct SessionStageResponse {
    pub session_id: Uuid,
    pub stage: SessionStage,
}

impl From<Session> for SessionStageResponse {
    fn from(session: Session) -> Self {
        Self {
            session_id: session.session_id,
            stage: session.stage,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct JobDescriptionRequest {
    pub job_description: String,
}

/// POST /api/v1/sessions
pub async fn handle_create_session(
    State(state): State<AppState>,
) -> (StatusCode, Json<SessionStageResponse>) {
    let session = state.sessions.create();
    (StatusCode::CREATED, Json(session.into()))
}

/// GET /api/v1/sessions/:id
pub async fn handle_get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Session>, AppError> {
    Ok(Json(state.sessions.get(id)?))
}

/// POST /api/v1/sessions/:id/job-description
///
/// Locks in the job description. An empty description is accepted as-is.
pub async fn handle_submit_job_description(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<JobDescriptionRequest>,
) -> Result<Json<SessionStageResponse>, AppError> {
    let session = state
        .sessions
        .submit_description(id, request.job_description)?;
    info!(session_id = %id, "Job description submitted");
    Ok(Json(session.into()))
}

/// POST /api/v1/sessions/:id/resume
///
/// Multipart upload (`file` field). Upload, extraction and the completion request
/// all run before the response starts; their failures come back as JSON errors.
/// Once the model starts answering, the analysis streams as SSE.
pub async fn handle_upload_resume(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    // Session must exist before we bother reading the body.
    state.sessions.get(id)?;

    let (filename, bytes) = read_file_field(multipart).await?;
    let document = ResumeDocument::from_upload(&filename, bytes).map_err(|e| match e {
        DocumentError::Empty => AppError::Validation(e.to_string()),
        _ => AppError::UnsupportedFileType(e.to_string()),
    })?;

    // Dropping `guard` on any early return (including the client going away
    // mid-request) puts the session back to `awaiting_upload`.
    let (job_description, guard) = state.sessions.begin_analysis(id)?;
    info!(session_id = %id, filename = %document.filename, "Starting analysis");

    let today = chrono::Local::now().date_naive();
    let fragments = state
        .analyzer
        .start(&job_description, &document, today)
        .await?;
    // The raw upload is not needed past this point.
    drop(document);

    let (tx, rx) = mpsc::channel(UPDATE_BUFFER);
    tokio::spawn(async move {
        // Hold a sender until the stage is updated so the client never sees the
        // stream end while the session still reads `analyzing`.
        let outcome = relay(fragments, tx.clone()).await;
        guard.finish(outcome.is_completed());
        info!(
            session_id = %id,
            completed = outcome.is_completed(),
            chars = outcome.text().len(),
            error = outcome.error().map(|e| e.kind()),
            "Analysis finished"
        );
        drop(tx);
    });

    let events = ReceiverStream::new(rx).map(|update| Ok::<_, Infallible>(to_event(&update)));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn read_file_field(mut multipart: Multipart) -> Result<(String, Bytes), AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Invalid multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| AppError::Validation("file field has no filename".to_string()))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(format!("Failed to read upload: {e}")))?;
        return Ok((filename, bytes));
    }
    Err(AppError::Validation("multipart field 'file' is required".to_string()))
}

fn to_event(update: &DisplayUpdate) -> Event {
    let name = match update {
        DisplayUpdate::Fragment { .. } => "fragment",
        DisplayUpdate::Done { .. } => "done",
        DisplayUpdate::Failed { .. } => "error",
    };
    let data = serde_json::to_string(update).unwrap_or_default();
    Event::default().event(name).data(data)
}
