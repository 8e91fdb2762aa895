//! Server-Sent Events stream for live repair sessions.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Json, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task;
use tracing::{debug, warn};

use mender::core::types::RepairIteration;
use mender::looping::{abandoned_session, run_repair};
use mender::submission::{Submission, SubmittedProgram};

use crate::routes::ApiError;
use crate::state::AppState;

const ITERATION_BUFFER: usize = 16;

/// POST /repair/stream - one `iteration` event per recorded iteration, then a
/// final `session` event carrying the terminal session.
pub async fn repair_stream(
    State(state): State<AppState>,
    Json(submission): Json<Submission>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let program = SubmittedProgram::from_submission(&submission, &state.config.limits)?;
    let (tx, mut rx) = mpsc::channel::<RepairIteration>(ITERATION_BUFFER);

    let worker_program = program.clone();
    let worker = task::spawn_blocking(move || {
        run_repair(
            &worker_program,
            &state.config.policy,
            &*state.executor,
            &*state.patcher,
            |iteration| {
                // The receiver is gone only if the client disconnected.
                if tx.blocking_send(iteration.clone()).is_err() {
                    debug!(index = iteration.index, "stream client gone");
                }
            },
        )
    });

    let stream = async_stream::stream! {
        while let Some(iteration) = rx.recv().await {
            if let Some(event) = json_event("iteration", &iteration) {
                yield Ok(event);
            }
        }
        let session = worker.await.unwrap_or_else(|err| {
            warn!(error = %err, "repair worker failed");
            abandoned_session(&program, format!("repair worker failed: {err}"))
        });
        if let Some(event) = json_event("session", &session) {
            yield Ok(event);
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    ))
}

fn json_event<T: Serialize>(name: &str, payload: &T) -> Option<Event> {
    match Event::default().event(name).json_data(payload) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(event = name, error = %err, "failed to encode SSE payload");
            None
        }
    }
}
