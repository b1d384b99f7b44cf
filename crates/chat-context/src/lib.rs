pub mod config;
pub mod context_engine;
pub mod error;
pub mod memory;
pub mod memory_db;
pub mod metrics;
pub mod telemetry;
pub mod shared_state;
pub mod turn;
pub mod worker_threads;

#[cfg(feature = "cli")]
pub mod api;
#[cfg(feature = "cli")]
pub mod thread_server;

// Public API exports
pub use config::Config;
pub use context_engine::{SummarizationEngine, SummarizationMode, SummaryOutcome, TokenEstimator};
pub use error::{GenerationError, SummarizationError, TurnError, ValidationError};
pub use memory::{ChatMessage, ChatRole};
pub use memory_db::{HistoryStore, InMemoryHistoryStore, MemoryDatabase};
pub use turn::{DeliveryEvent, DeliverySink, GeneratorReply, InboundTurn, TurnOrchestrator, TurnOutcome};
pub use worker_threads::{Scheduler, SummaryWorker};

#[cfg(feature = "cli")]
pub use thread_server::run_thread_server;
