//! Events handed to the transport and the sink seam they flow through.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::memory_db::StoredMessage;
use crate::turn::reply::Recommendation;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeliveryEvent {
    /// The inbound user message is durable.
    MessageSaved {
        message_id: i64,
        timestamp: DateTime<Utc>,
    },
    Chat {
        content: String,
        /// None when the reply could not be persisted or was never meant to be.
        message_id: Option<i64>,
        timestamp: DateTime<Utc>,
    },
    Chunk {
        group_id: String,
        chunk_index: u32,
        total_chunks: u32,
        content: String,
        message_id: Option<i64>,
    },
    Recommendation {
        #[serde(flatten)]
        recommendation: Recommendation,
    },
    Error {
        message: String,
    },
    ChatHistory {
        messages: Vec<StoredMessage>,
        has_summary: bool,
        summarized_count: usize,
    },
}

impl DeliveryEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DeliveryEvent::MessageSaved { .. } => "message_saved",
            DeliveryEvent::Chat { .. } => "chat",
            DeliveryEvent::Chunk { .. } => "chunk",
            DeliveryEvent::Recommendation { .. } => "recommendation",
            DeliveryEvent::Error { .. } => "error",
            DeliveryEvent::ChatHistory { .. } => "chat_history",
        }
    }
}

/// Receives turn output. Request/response and push transports both implement this.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(&self, event: DeliveryEvent);

    /// Whether events reach the client one at a time, so chunk pacing is visible.
    fn paces(&self) -> bool;
}

/// Buffers every event, for request/response delivery and tests.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<DeliveryEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DeliveryEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn into_events(self) -> Vec<DeliveryEvent> {
        self.events.into_inner().unwrap_or_default()
    }
}

#[async_trait]
impl DeliverySink for CollectingSink {
    async fn deliver(&self, event: DeliveryEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    fn paces(&self) -> bool {
        false
    }
}

/// Forwards events to a channel; a closed receiver means the client went away.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<DeliveryEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<DeliveryEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl DeliverySink for ChannelSink {
    async fn deliver(&self, event: DeliveryEvent) {
        let name = event.name();
        if self.tx.send(event).is_err() {
            debug!(event = name, "Delivery receiver dropped");
        }
    }

    fn paces(&self) -> bool {
        true
    }
}
