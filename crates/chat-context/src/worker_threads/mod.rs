pub mod clearing_worker;
pub mod llm_worker;
pub mod response_generator;
pub mod scheduler;
pub mod summary_worker;

pub use clearing_worker::{ChatClearingWorker, ClearingStats};
pub use llm_worker::{LlmClient, TextCompletion, WireMessage};
pub use response_generator::{LlmResponseGenerator, DEFAULT_SYSTEM_PROMPT};
pub use scheduler::{JobSchedule, ScheduledJob, Scheduler, SchedulerHandle};
pub use summary_worker::{SummaryWorker, SweepStats};
