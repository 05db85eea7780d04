use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::Router;
use futures::stream::Stream;
use std::convert::Infallible;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;

use crate::realtime::{ForumEvent, Notifier};
use crate::state::AppState;

/// Logs when the client's stream is dropped, i.e. it went away
struct ConnectionGuard {
    notifier: Notifier,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        // Our own receiver is still counted at this point
        tracing::info!(
            "Event stream client disconnected ({} remaining)",
            self.notifier.connected_clients().saturating_sub(1)
        );
    }
}

fn to_sse(event: &ForumEvent) -> Option<Event> {
    match event.payload() {
        Ok(data) => Some(Event::default().event(event.name()).data(data)),
        Err(e) => {
            tracing::error!("Failed to encode {} event: {}", event.name(), e);
            None
        }
    }
}

/// SSE stream of forum mutations
async fn events(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.notifier.subscribe();
    tracing::info!(
        "Event stream client connected ({} total)",
        state.notifier.connected_clients()
    );
    let guard = ConnectionGuard {
        notifier: state.notifier.clone(),
    };

    let stream = BroadcastStream::new(receiver).filter_map(move |item| {
        let _guard = &guard;
        match item {
            Ok(event) => to_sse(&event).map(Ok),
            Err(BroadcastStreamRecvError::Lagged(missed)) => {
                tracing::warn!("Event stream client lagged, {} event(s) dropped", missed);
                None
            }
        }
    });

    // End the stream on shutdown so graceful shutdown is not held open
    let stream = futures::StreamExt::take_until(stream, state.notifier.closed());

    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub fn router() -> Router<AppState> {
    Router::new().route("/events", get(events))
}
