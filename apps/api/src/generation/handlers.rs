//! Axum route handlers for the Profile API.

use std::convert::Infallible;

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures_util::StreamExt;
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info};

use crate::consultation::models::ConsultationRequest;
use crate::errors::AppError;
use crate::generation::pipeline::{JobEvent, JobStatus};
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Request types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateProfileRequest {
    pub request: ConsultationRequest,
    #[serde(default)]
    pub stream: bool,
    /// Only read when `stream` is false: hold the response until the job ends.
    #[serde(default)]
    pub wait: bool,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/profiles
///
/// `stream: false` answers 202 with the record id once the placeholder exists
/// and leaves the job running. With `wait: true` it instead returns the outcome:
/// 200 for complete or degraded, 502 when nothing could be stored.
/// `stream: true` answers with server-sent events as soon as the placeholder exists.
pub async fn handle_create_profile(
    State(state): State<AppState>,
    Json(body): Json<CreateProfileRequest>,
) -> Result<Response, AppError> {
    body.request.check_required().map_err(AppError::Validation)?;

    if !body.stream && body.wait {
        let outcome = state.pipeline.run_to_completion(body.request, false).await;
        let status = match outcome.status {
            JobStatus::Failed => StatusCode::BAD_GATEWAY,
            JobStatus::Complete | JobStatus::Degraded => StatusCode::OK,
        };
        return Ok((status, Json(outcome)).into_response());
    }

    let submission = state.pipeline.submit(body.request, body.stream).await?;
    let record_id = submission.record_id;
    info!("Job accepted for record {record_id}");

    tokio::spawn(async move {
        match submission.outcome.await {
            Ok(outcome) => info!("Job for record {record_id} ended as {:?}", outcome.status),
            Err(e) => error!("Job task for record {record_id} aborted: {e}"),
        }
    });

    if !body.stream {
        let accepted = JobEvent::Accepted { record_id };
        return Ok((StatusCode::ACCEPTED, Json(accepted)).into_response());
    }

    let events =
        ReceiverStream::new(submission.events).map(|event| Ok::<_, Infallible>(to_sse(&event)));
    Ok(Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response())
}

fn to_sse(event: &JobEvent) -> Event {
    let name = match event {
        JobEvent::Accepted { .. } => "accepted",
        JobEvent::Progress { .. } => "progress",
        JobEvent::Complete { .. } => "complete",
        JobEvent::Error { .. } => "error",
    };
    // JobEvent serialization cannot fail: plain fields, string keys
    let data = serde_json::to_string(event).unwrap_or_default();
    Event::default().event(name).data(data)
}
