//! Turn handling: orchestration, generator replies, chunking and delivery

pub mod chunker;
pub mod delivery;
pub mod generator;
pub mod orchestrator;
pub mod reply;

pub use chunker::{chunk_text, ChunkerConfig, ResponseChunker};
pub use delivery::{ChannelSink, CollectingSink, DeliveryEvent, DeliverySink};
pub use generator::{GenerationRequest, ResponseGenerator};
pub use orchestrator::{
    ConversationHistory, InboundTurn, TurnConfig, TurnOrchestrator, TurnOutcome, UserProfile, DEFAULT_FALLBACK_MESSAGE,
};
pub use reply::{GeneratorReply, HealthNote, Recommendation};
