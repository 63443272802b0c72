/// HTTP job service.
///
/// `POST /jobs` runs a query synchronously, deferred (poll by id) or
/// streaming (chunked progress envelopes; client disconnect cancels the
/// job). `GET /jobs/{id}` polls, `DELETE /jobs/{id}` cancels. All bodies use
/// the mixed `application/x-jsonnpy` codec.

pub mod jobs;

pub use jobs::{JobRegistry, JobStatus};

use crate::execution::{run_sql, PlanRunner, ProgressCB, SharedValues};
use crate::network::jsonnpy;
use crate::safeevent::SafeEvent;
use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

pub const CONTENT_TYPE: &str = "application/x-jsonnpy";

pub struct AppState {
    pub runner: Arc<dyn PlanRunner>,
    pub jobs: JobRegistry,
}

#[derive(Debug, Deserialize)]
pub struct JobRequest {
    pub sql: String,
    #[serde(default)]
    pub shared: SharedValues,
    #[serde(default)]
    pub deferred: bool,
    #[serde(default)]
    pub streaming: bool,
}

#[derive(Debug, Serialize)]
struct DeferredResponse {
    job_id: String,
}

#[derive(Debug, Serialize)]
struct EmptyResponse {}

/// Streaming envelopes: progress frames, then exactly one terminal frame.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEnvelope {
    Progress { progress: crate::execution::Progress },
    End,
    Error { reason: String },
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/jobs", post(create_job))
        .route("/jobs/{id}", get(show_job).delete(stop_job))
        .with_state(state)
}

fn jsonnpy_response<T: Serialize>(value: &T) -> Response {
    match jsonnpy::dumps(value) {
        Ok(bytes) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, CONTENT_TYPE)
            .body(Body::from(bytes))
            .expect("static response"),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

fn has_jsonnpy_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or("").trim() == CONTENT_TYPE)
        .unwrap_or(false)
}

async fn create_job(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !has_jsonnpy_content_type(&headers) {
        return StatusCode::BAD_REQUEST.into_response();
    }
    let request: JobRequest = match jsonnpy::loads(&body) {
        Ok(r) => r,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };
    if request.streaming {
        return streaming_response(state, request);
    }
    let job = state
        .jobs
        .spawn(state.runner.clone(), request.sql, request.shared);
    if request.deferred {
        return jsonnpy_response(&DeferredResponse {
            job_id: job.id.clone(),
        });
    }
    job.wait().await;
    match state.jobs.status_and_reap(&job.id) {
        Some(status) => jsonnpy_response(&status),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Chunked stream of envelopes. Dropping the response body (client gone)
/// sets the interrupt, which cancels the running job.
fn streaming_response(state: Arc<AppState>, request: JobRequest) -> Response {
    let interrupt = SafeEvent::new();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<StreamEnvelope>();

    let runner = state.runner.clone();
    let job_interrupt = interrupt.clone();
    tokio::spawn(async move {
        let progress_tx = tx.clone();
        let progress: ProgressCB = Arc::new(move |p| {
            let _ = progress_tx.send(StreamEnvelope::Progress { progress: p });
        });
        let outcome = run_sql(
            &request.sql,
            runner.as_ref(),
            &request.shared,
            Some(progress),
            &job_interrupt,
            true,
        )
        .await;
        let _ = match outcome {
            Ok(_) => tx.send(StreamEnvelope::End),
            Err(e) => tx.send(StreamEnvelope::Error {
                reason: jobs::error_reason(&e),
            }),
        };
    });

    let guard = interrupt.set_on_drop();
    let stream = async_stream::stream! {
        let _guard = guard;
        while let Some(envelope) = rx.recv().await {
            let terminal = !matches!(envelope, StreamEnvelope::Progress { .. });
            match jsonnpy::dumps(&envelope) {
                Ok(bytes) => yield Ok::<_, std::convert::Infallible>(Bytes::from(bytes)),
                Err(_) => break,
            }
            if terminal {
                break;
            }
        }
    };
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, CONTENT_TYPE)
        .body(Body::from_stream(stream))
        .expect("static response")
}

async fn show_job(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.jobs.status_and_reap(&id) {
        Some(status) => jsonnpy_response(&status),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn stop_job(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.jobs.get(&id) {
        Some(job) => {
            info!(job_id = %id, "cancellation requested");
            job.interrupt.set();
            jsonnpy_response(&EmptyResponse {})
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
