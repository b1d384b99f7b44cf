//! Per-turn control flow: persist, build context, generate, interpret, deliver.

use chrono::{Local, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::context_engine::{context_cadence, filter, SummarizationEngine, SummarizationMode, SummaryOutcome};
use crate::error::{TurnError, ValidationError};
use crate::memory::ChatMessage;
use crate::memory_db::{Attachment, ChunkLink, Conversation, HistoryStore, NewMessage, StoredMessage};
use crate::turn::chunker::ResponseChunker;
use crate::turn::delivery::{DeliveryEvent, DeliverySink};
use crate::turn::generator::{GenerationRequest, ResponseGenerator};
use crate::turn::reply::{GeneratorReply, Recommendation};

pub const DEFAULT_FALLBACK_MESSAGE: &str =
    "Sorry, something went wrong on my side. Please try again, I'm here to help!";

#[derive(Debug, Clone)]
pub struct TurnConfig {
    pub max_message_chars: usize,
    pub max_attachments: usize,
    /// Pause between the chat part and the recommendation of a hybrid reply.
    pub hybrid_delay: Duration,
    pub generate_timeout: Duration,
    pub fallback_message: String,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            max_message_chars: 5000,
            max_attachments: 2,
            hybrid_delay: Duration::from_secs(5),
            generate_timeout: Duration::from_secs(120),
            fallback_message: DEFAULT_FALLBACK_MESSAGE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UserProfile {
    pub id: i64,
    pub display_name: Option<String>,
    pub chat_style: Option<String>,
}

impl UserProfile {
    pub fn new(id: i64) -> Self {
        Self { id, ..Self::default() }
    }
}

#[derive(Debug, Clone)]
pub struct InboundTurn {
    pub user: UserProfile,
    pub text: String,
    pub attachments: Vec<Attachment>,
    /// Client asked for progressive delivery of long replies.
    pub stream: bool,
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub conversation_id: i64,
    pub user_message_id: i64,
    /// chat, recommendation, hybrid or fallback
    pub reply_kind: &'static str,
    pub persisted_reply_ids: Vec<i64>,
    /// Set only when summarization ran inline on this turn.
    pub summary: Option<SummaryOutcome>,
}

#[derive(Debug, Clone)]
pub struct ConversationHistory {
    pub conversation_id: Option<i64>,
    pub messages: Vec<StoredMessage>,
    pub has_summary: bool,
    pub summarized_count: usize,
}

impl ConversationHistory {
    pub fn into_event(self) -> DeliveryEvent {
        DeliveryEvent::ChatHistory {
            messages: self.messages,
            has_summary: self.has_summary,
            summarized_count: self.summarized_count,
        }
    }
}

pub struct TurnOrchestrator {
    store: Arc<dyn HistoryStore>,
    engine: Arc<SummarizationEngine>,
    generator: Arc<dyn ResponseGenerator>,
    chunker: ResponseChunker,
    config: TurnConfig,
}

impl TurnOrchestrator {
    pub fn new(
        store: Arc<dyn HistoryStore>,
        engine: Arc<SummarizationEngine>,
        generator: Arc<dyn ResponseGenerator>,
        chunker: ResponseChunker,
        config: TurnConfig,
    ) -> Self {
        Self { store, engine, generator, chunker, config }
    }

    pub fn config(&self) -> &TurnConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<SummarizationEngine> {
        &self.engine
    }

    pub fn validate(&self, text: &str, attachment_count: usize) -> Result<(), ValidationError> {
        if text.trim().is_empty() {
            return Err(ValidationError::EmptyMessage);
        }
        let len = text.chars().count();
        if len > self.config.max_message_chars {
            return Err(ValidationError::MessageTooLong { len, max: self.config.max_message_chars });
        }
        if attachment_count > self.config.max_attachments {
            return Err(ValidationError::TooManyAttachments {
                count: attachment_count,
                max: self.config.max_attachments,
            });
        }
        Ok(())
    }

    pub async fn handle_turn(&self, turn: InboundTurn, sink: &dyn DeliverySink) -> Result<TurnOutcome, TurnError> {
        self.validate(&turn.text, turn.attachments.len())?;

        let conversation = self
            .store
            .get_or_create_latest_conversation(turn.user.id)
            .map_err(TurnError::persistence)?;
        let user_message = self
            .store
            .append_message(NewMessage::user(conversation.id, turn.text.clone(), turn.attachments.clone()))
            .map_err(TurnError::persistence)?;
        sink.deliver(DeliveryEvent::MessageSaved {
            message_id: user_message.id,
            timestamp: user_message.created_at,
        })
        .await;

        let history = self.store.list_messages(conversation.id).map_err(TurnError::persistence)?;
        let prior: Vec<StoredMessage> = history.iter().filter(|m| m.id != user_message.id).cloned().collect();

        let (conversation, summary) = self.inline_summarization(conversation, &prior, &turn.text).await;

        let rendered: Vec<ChatMessage> = prior.iter().map(StoredMessage::to_chat_message).collect();
        let context = filter(
            &rendered,
            conversation.memory_summary.as_deref(),
            self.engine.config().recent_count,
        );
        let cadence = context_cadence(&history, Local::now());

        let request = GenerationRequest {
            user_input: user_message.to_chat_message().content,
            history: context,
            user_name: if cadence.send_name { turn.user.display_name.clone() } else { None },
            time_of_day: cadence.send_time.then_some(cadence.time_of_day),
            style: turn.user.chat_style.clone(),
            images: turn.attachments.iter().filter(|a| a.is_image()).cloned().collect(),
        };
        debug!(
            conversation_id = conversation.id,
            context_len = request.history.len(),
            send_name = cadence.send_name,
            send_time = cadence.send_time,
            "Context built"
        );

        let reply = match tokio::time::timeout(self.config.generate_timeout, self.generator.generate(request)).await {
            Ok(Ok(reply)) => Some(reply),
            Ok(Err(e)) => {
                warn!(conversation_id = conversation.id, error = %e, "Response generation failed");
                None
            }
            Err(_) => {
                warn!(
                    conversation_id = conversation.id,
                    timeout_secs = self.config.generate_timeout.as_secs(),
                    "Response generation timed out"
                );
                None
            }
        };

        let Some(reply) = reply else {
            // Fallback text is delivered but kept out of history.
            sink.deliver(DeliveryEvent::Chat {
                content: self.config.fallback_message.clone(),
                message_id: None,
                timestamp: Utc::now(),
            })
            .await;
            crate::metrics::inc_turn("fallback");
            return Ok(TurnOutcome {
                conversation_id: conversation.id,
                user_message_id: user_message.id,
                reply_kind: "fallback",
                persisted_reply_ids: Vec::new(),
                summary,
            });
        };

        let reply_kind = reply.kind();
        let persisted_reply_ids = match reply {
            GeneratorReply::Chat { content } => self.deliver_chat(conversation.id, &content, turn.stream, sink).await,
            GeneratorReply::Recommendation(recommendation) => {
                deliver_recommendation(recommendation, sink).await;
                Vec::new()
            }
            GeneratorReply::Hybrid { chat, recommendation } => {
                let ids = self.deliver_chat(conversation.id, &chat, turn.stream, sink).await;
                if !self.config.hybrid_delay.is_zero() {
                    tokio::time::sleep(self.config.hybrid_delay).await;
                }
                deliver_recommendation(recommendation, sink).await;
                ids
            }
        };

        info!(
            conversation_id = conversation.id,
            user_id = turn.user.id,
            reply_kind,
            persisted = persisted_reply_ids.len(),
            "Turn completed"
        );
        crate::metrics::inc_turn(reply_kind);

        Ok(TurnOutcome {
            conversation_id: conversation.id,
            user_message_id: user_message.id,
            reply_kind,
            persisted_reply_ids,
            summary,
        })
    }

    /// Persists an accepted recommendation as a bot message in the latest conversation.
    pub fn accept_recommendation(&self, user_id: i64, title: &str, content: &str) -> Result<StoredMessage, TurnError> {
        if title.trim().is_empty() || content.trim().is_empty() {
            return Err(ValidationError::EmptyMessage.into());
        }
        let conversation = self
            .store
            .latest_conversation(user_id)
            .map_err(TurnError::persistence)?
            .ok_or(TurnError::NoConversation(user_id))?;
        let stored = self
            .store
            .append_message(NewMessage::bot(conversation.id, format!("{}: {}", title.trim(), content.trim())))
            .map_err(TurnError::persistence)?;
        info!(conversation_id = conversation.id, message_id = stored.id, "Recommendation accepted");
        Ok(stored)
    }

    pub fn history(&self, user_id: i64) -> Result<ConversationHistory, TurnError> {
        let Some(conversation) = self.store.latest_conversation(user_id).map_err(TurnError::persistence)? else {
            return Ok(ConversationHistory {
                conversation_id: None,
                messages: Vec::new(),
                has_summary: false,
                summarized_count: 0,
            });
        };
        let messages = self.store.list_messages(conversation.id).map_err(TurnError::persistence)?;
        Ok(ConversationHistory {
            conversation_id: Some(conversation.id),
            messages,
            has_summary: conversation.memory_summary.is_some(),
            summarized_count: conversation.pruned_count,
        })
    }

    async fn inline_summarization(
        &self,
        conversation: Conversation,
        prior: &[StoredMessage],
        incoming: &str,
    ) -> (Conversation, Option<SummaryOutcome>) {
        if self.engine.config().mode != SummarizationMode::Inline {
            return (conversation, None);
        }
        match self.engine.summarize_if_due(&conversation, prior, Some(incoming)).await {
            Ok(outcome) if outcome.is_summarized() || outcome == SummaryOutcome::Superseded => {
                let refreshed = match self.store.get_conversation(conversation.id) {
                    Ok(Some(fresh)) => fresh,
                    Ok(None) => conversation,
                    Err(e) => {
                        warn!(conversation_id = conversation.id, error = %e, "Failed to reload conversation");
                        conversation
                    }
                };
                (refreshed, Some(outcome))
            }
            Ok(outcome) => (conversation, Some(outcome)),
            Err(e) => {
                warn!(conversation_id = conversation.id, error = %e, "Inline summarization failed");
                (conversation, None)
            }
        }
    }

    /// Persists and delivers a chat reply, chunked when long and streamed.
    /// Returns the ids that made it to the store.
    async fn deliver_chat(&self, conversation_id: i64, content: &str, stream: bool, sink: &dyn DeliverySink) -> Vec<i64> {
        if !self.chunker.should_chunk(content, stream) {
            let message_id = self.persist_reply(NewMessage::bot(conversation_id, content));
            sink.deliver(DeliveryEvent::Chat {
                content: content.to_string(),
                message_id,
                timestamp: Utc::now(),
            })
            .await;
            return message_id.into_iter().collect();
        }

        let chunks = self.chunker.chunk(content);
        let group_id = Uuid::new_v4().to_string();
        let total_chunks = chunks.len() as u32;
        let mut ids = Vec::with_capacity(chunks.len());

        for (index, chunk) in chunks.into_iter().enumerate() {
            if index > 0 && sink.paces() {
                let delay = self.chunker.delivery_delay(&chunk);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            let link = ChunkLink {
                group_id: group_id.clone(),
                chunk_index: index as u32,
                total_chunks,
            };
            let message_id = self.persist_reply(NewMessage::bot(conversation_id, chunk.clone()).with_chunk(link));
            ids.extend(message_id);
            sink.deliver(DeliveryEvent::Chunk {
                group_id: group_id.clone(),
                chunk_index: index as u32,
                total_chunks,
                content: chunk,
                message_id,
            })
            .await;
        }
        crate::metrics::inc_chunks(total_chunks as usize);
        debug!(conversation_id, group_id = %group_id, total_chunks, "Chunked reply delivered");
        ids
    }

    fn persist_reply(&self, message: NewMessage) -> Option<i64> {
        let conversation_id = message.conversation_id;
        match self.store.append_message(message) {
            Ok(stored) => Some(stored.id),
            Err(e) => {
                error!(conversation_id, error = %e, "Failed to persist bot reply, delivering anyway");
                None
            }
        }
    }
}

async fn deliver_recommendation(recommendation: Recommendation, sink: &dyn DeliverySink) {
    sink.deliver(DeliveryEvent::Recommendation { recommendation }).await;
}
