//! SSE subscription endpoint (§4.9/§6). Wire format is real
//! `text/event-stream`, not a raw WebSocket string broadcast: named
//! `event:`/`data:` frames, `: heartbeat\n\n` comment lines at ≤15s
//! intervals, and a leading 2KB space-padded comment to defeat proxy
//! response buffering.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use futures_util::stream::{self, Stream, StreamExt};

use weave_broadcast::Emission;
use weave_core::ids::ConversationId;

use crate::app::AppState;

const PADDING_BYTES: usize = 2048;

pub async fn stream_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let conversation_id = ConversationId::from(id);
    let padding = stream::once(async move {
        Ok(Event::default().comment(" ".repeat(PADDING_BYTES)))
    });

    let emissions = state.broadcaster.subscribe_stream(&conversation_id).map(|emission| {
        let event = match emission {
            Emission::Heartbeat => Event::default().comment("heartbeat"),
            Emission::Event(event) => Event::default().event(event.event_name()).json_data(event.to_json()).unwrap_or_else(|_| Event::default().comment("serialization error")),
        };
        Ok(event)
    });

    Sse::new(padding.chain(emissions))
}
