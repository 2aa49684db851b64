//! Server-Sent Events stream of control-loop events.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use tokio::sync::broadcast;
use tracing::warn;

use fixer::events::RunEvent;

use crate::state::AppState;

/// Serialize one run event for the wire; `None` only if serialization
/// fails, in which case the event is skipped.
fn event_json(event: &RunEvent) -> Option<String> {
    serde_json::to_string(event).ok()
}

/// SSE endpoint handler.
///
/// Streams every control-loop event from every run; clients filter by the
/// `run_id` field in the payload.
pub async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.event_tx.subscribe();

    let stream = async_stream::stream! {
        // Send initial connected event
        yield Ok(Event::default().event("connected").data("{}"));

        loop {
            match rx.recv().await {
                Ok(run_event) => {
                    if let Some(json) = event_json(&run_event) {
                        yield Ok(Event::default().event("run").data(json));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "SSE client lagged, some events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixer::core::types::RunOutcome;

    #[test]
    fn event_json_carries_type_and_run_id() {
        let event = RunEvent::RunCompleted {
            run_id: "issue-3".to_string(),
            outcome: RunOutcome::error("stopped", Vec::new()),
        };

        let json = event_json(&event).expect("serialize");
        let value: serde_json::Value = serde_json::from_str(&json).expect("parse");
        assert_eq!(value["type"], "run_completed");
        assert_eq!(value["run_id"], "issue-3");
        assert_eq!(value["outcome"]["status"], "error");
    }

    #[tokio::test]
    async fn broadcast_delivers_events_to_subscribers() {
        let state = AppState::new(
            std::env::temp_dir(),
            fixer::io::config::FixerConfig::default(),
            "token".to_string(),
        );
        let mut rx = state.event_tx.subscribe();

        state
            .event_tx
            .send(RunEvent::RunStarted {
                run_id: "run-1".to_string(),
                goal: "fix".to_string(),
            })
            .expect("send");

        let event = rx.recv().await.expect("receive");
        assert!(matches!(event, RunEvent::RunStarted { .. }));
    }
}
