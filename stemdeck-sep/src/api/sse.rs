//! Server-Sent Events (SSE) for job progress streaming

use crate::AppState;
use axum::{
    extract::{Path, State},
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;

/// GET /sse/:job_id - SSE event stream for one job
///
/// Clients may connect before the job is submitted; events published before
/// the first subscriber attaches are held and replayed to it.
///
/// Streams events:
/// - download
/// - module_processing
/// - model_downloading
/// - module_completed
/// - id_changed (terminal: re-subscribe under `new_id`)
/// - error (terminal)
/// - done (terminal)
pub async fn job_event_stream(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.bus.subscribe(&job_id);
    stemdeck_common::sse::job_event_stream(subscription)
}
