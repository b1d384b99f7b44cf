//! Contract of the response generator collaborator.

use async_trait::async_trait;

use crate::context_engine::TimeOfDay;
use crate::error::GenerationError;
use crate::memory::ChatMessage;
use crate::memory_db::Attachment;
use crate::turn::reply::GeneratorReply;

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub user_input: String,
    /// Bounded context; the current user message is not part of it.
    pub history: Vec<ChatMessage>,
    pub user_name: Option<String>,
    pub time_of_day: Option<TimeOfDay>,
    pub style: Option<String>,
    /// Image attachments of the current turn, forwarded as multimodal parts.
    pub images: Vec<Attachment>,
}

impl GenerationRequest {
    pub fn new(user_input: impl Into<String>, history: Vec<ChatMessage>) -> Self {
        Self {
            user_input: user_input.into(),
            history,
            user_name: None,
            time_of_day: None,
            style: None,
            images: Vec::new(),
        }
    }
}

#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<GeneratorReply, GenerationError>;
}
