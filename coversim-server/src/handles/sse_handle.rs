use std::convert::Infallible;

use axum::extract::State;
use axum::response::Sse;
use axum::response::sse::{Event, KeepAlive};
use tokio::sync::broadcast::Sender;
use tokio_stream::StreamExt;
use tokio_stream::{Stream, wrappers};

use crate::services::CoveringEvent;

#[derive(Clone)]
pub struct SSEState {
    pub sender: Sender<CoveringEvent>,
}

pub async fn sse_handler(
    State(state): State<SSEState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.sender.subscribe();

    let stream = wrappers::BroadcastStream::new(receiver).filter_map(|result| match result {
        Ok(event) => serde_json::to_string(&event)
            .ok()
            .map(|data| Ok(Event::default().event(event.characteristic).data(data))),
        // lagged subscribers skip what they missed
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
