//! SSE Event Broadcaster (§4.9): one channel per conversation, decoupled
//! from the turn engine via `publish`. A subscriber that falls behind the
//! channel's backlog is disconnected rather than blocking the producer.

use std::time::Duration;

use dashmap::DashMap;
use futures_util::stream::{self, Stream};
use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{BroadcastStream, IntervalStream};
use tracing::warn;

use weave_core::ids::ConversationId;
use weave_core::model::ToolCall;

const CHANNEL_CAPACITY: usize = 256;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BroadcastEvent {
    TextChunk { content_kind: TextChunkKind, text: String },
    ToolExecuting { tool_call: ToolCall },
    ToolCompleted { id: String, name: String, success: bool, output: String },
    ToolRequest { tool_call: ToolCall },
    Completed,
    Failed { error: String },
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TextChunkKind {
    Content,
    Thinking,
}

impl BroadcastEvent {
    /// The SSE `event:` name (§4.9 wire grammar).
    pub fn event_name(&self) -> &'static str {
        match self {
            BroadcastEvent::TextChunk { .. } => "text_chunk",
            BroadcastEvent::ToolExecuting { .. } => "tool_executing",
            BroadcastEvent::ToolCompleted { .. } => "tool_completed",
            BroadcastEvent::ToolRequest { .. } => "tool_request",
            BroadcastEvent::Completed => "completed",
            BroadcastEvent::Failed { .. } => "failed",
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// What a subscriber's stream yields: either a real event or a heartbeat
/// comment to keep the connection alive while idle.
#[derive(Debug, Clone)]
pub enum Emission {
    Event(BroadcastEvent),
    Heartbeat,
}

pub struct ConversationBroadcaster {
    channels: DashMap<ConversationId, broadcast::Sender<BroadcastEvent>>,
}

impl ConversationBroadcaster {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    fn sender(&self, conversation_id: &ConversationId) -> broadcast::Sender<BroadcastEvent> {
        self.channels
            .entry(conversation_id.clone())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Publishes an event. Silently dropped if nobody is subscribed —
    /// broadcasting is decoupled from the turn engine (§4.9).
    pub fn publish(&self, conversation_id: &ConversationId, event: BroadcastEvent) {
        let tx = self.sender(conversation_id);
        let _ = tx.send(event);
    }

    /// Subscribes to raw events only, without heartbeats. Most callers want
    /// `subscribe_stream` instead.
    pub fn subscribe(&self, conversation_id: &ConversationId) -> broadcast::Receiver<BroadcastEvent> {
        self.sender(conversation_id).subscribe()
    }

    /// Subscribes to a merged stream of events and `≤15s` heartbeats. Ends
    /// (disconnects) the moment the receiver lags behind the channel's
    /// backlog rather than silently skipping missed events (§4.9).
    pub fn subscribe_stream(&self, conversation_id: &ConversationId) -> impl Stream<Item = Emission> + Send + 'static {
        let rx = self.subscribe(conversation_id);
        let events = BroadcastStream::new(rx)
            .take_while(|r| {
                let lagged = r.is_err();
                if lagged {
                    warn!("subscriber fell behind backlog, disconnecting");
                }
                futures_util::future::ready(!lagged)
            })
            .filter_map(|r| futures_util::future::ready(r.ok()))
            .map(Emission::Event);

        let heartbeat = IntervalStream::new(tokio::time::interval(HEARTBEAT_INTERVAL)).map(|_| Emission::Heartbeat);

        stream::select(events, heartbeat)
    }

    /// Drops the channel for a conversation once its turn ends and no more
    /// events will be published (reconnection rejoins "now", no replay).
    pub fn disconnect(&self, conversation_id: &ConversationId) {
        self.channels.remove(conversation_id);
    }
}

impl Default for ConversationBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_before_subscribe_is_dropped_not_buffered() {
        let broadcaster = ConversationBroadcaster::new();
        let id = ConversationId::from("c1");
        broadcaster.publish(&id, BroadcastEvent::Completed);
        let mut rx = broadcaster.subscribe(&id);
        broadcaster.publish(&id, BroadcastEvent::Completed);
        assert!(rx.recv().await.is_ok());
    }

    #[tokio::test]
    async fn disconnect_removes_channel() {
        let broadcaster = ConversationBroadcaster::new();
        let id = ConversationId::from("c1");
        let _rx = broadcaster.subscribe(&id);
        broadcaster.disconnect(&id);
        assert!(broadcaster.channels.is_empty());
    }

    #[test]
    fn event_names_match_wire_grammar() {
        assert_eq!(BroadcastEvent::Completed.event_name(), "completed");
        assert_eq!(
            BroadcastEvent::Failed { error: "x".into() }.event_name(),
            "failed"
        );
    }
}
