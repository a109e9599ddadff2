//! Server-Sent Events (SSE) utilities
//!
//! Turns a job subscription into an axum SSE response.

use crate::events::{JobEvent, JobSubscription};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Heartbeat interval for idle SSE connections
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Convert a job event into an SSE frame
///
/// The frame's event name is `event.event_type()`, its data the JSON payload.
/// Returns `None` if the event cannot be serialized.
pub fn to_sse_event(event: &JobEvent) -> Option<Event> {
    let event_type = event.event_type();
    match serde_json::to_string(event) {
        Ok(json) => Some(Event::default().event(event_type).data(json)),
        Err(e) => {
            warn!("SSE: Failed to serialize event {}: {}", event_type, e);
            None
        }
    }
}

/// Stream a job's events to one SSE client
///
/// The stream ends after the job's terminal event (`done`, `error`,
/// `id_changed`) or when the channel is released. Idle connections receive a
/// heartbeat comment every 15 seconds.
pub fn job_event_stream(
    mut subscription: JobSubscription,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let job_id = subscription.job_id().to_string();
    info!(job_id = %job_id, "New SSE client connected to job events");

    let stream = async_stream::stream! {
        while let Some(event) = subscription.next().await {
            debug!(job_id = %job_id, "SSE: Sending {}", event.event_type());
            if let Some(frame) = to_sse_event(&event) {
                yield Ok(frame);
            }
        }
        info!(job_id = %job_id, "SSE: Job event stream ended");
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(HEARTBEAT_INTERVAL)
            .text("heartbeat"),
    )
}
