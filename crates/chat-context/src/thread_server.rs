//! Server startup: storage, LLM collaborators, background jobs and the router.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::{
    config::Config,
    context_engine::{LlmSummarizer, SummarizationEngine, SummarizationMode},
    memory_db::{HistoryStore, MemoryDatabase},
    shared_state::UnifiedAppState,
    turn::{ResponseChunker, TurnOrchestrator},
    worker_threads::{
        ChatClearingWorker, JobSchedule, LlmClient, LlmResponseGenerator, ScheduledJob, Scheduler, SummaryWorker,
        TextCompletion,
    },
};

/// Components shared by the server and the one-shot CLI commands.
pub struct Services {
    pub store: Arc<dyn HistoryStore>,
    pub engine: Arc<SummarizationEngine>,
    pub orchestrator: Arc<TurnOrchestrator>,
}

pub fn build_services(cfg: &Config) -> anyhow::Result<Services> {
    let store: Arc<dyn HistoryStore> = match MemoryDatabase::new(&cfg.database_path) {
        Ok(db) => {
            info!("Chat database initialized at: {}", cfg.database_path.display());
            Arc::new(db)
        }
        Err(e) => {
            warn!("Failed to initialize chat database: {}. Falling back to in-memory.", e);
            Arc::new(MemoryDatabase::new_in_memory()?)
        }
    };

    let client = Arc::new(LlmClient::new(
        cfg.llm_base_url.clone(),
        cfg.llm_api_key.clone(),
        Duration::from_secs(cfg.generate_timeout_seconds),
    ));

    let profile = cfg.summary_profile();
    let summarizer = Arc::new(LlmSummarizer::new(
        Arc::new(TextCompletion::for_summaries(client.clone(), cfg.summary_model.clone())),
        profile.clone(),
    ));
    let engine = Arc::new(SummarizationEngine::new(
        store.clone(),
        summarizer,
        profile,
        cfg.summarization_config(),
    ));

    let mut generator = LlmResponseGenerator::new(client, cfg.chat_model.clone());
    if let Some(path) = &cfg.system_prompt_path {
        generator = generator.with_system_prompt_file(path)?;
        info!("Loaded system prompt from {}", path.display());
    }

    let orchestrator = Arc::new(TurnOrchestrator::new(
        store.clone(),
        engine.clone(),
        Arc::new(generator),
        ResponseChunker::new(cfg.chunker_config()),
        cfg.turn_config(),
    ));

    Ok(Services { store, engine, orchestrator })
}

/// Background jobs for the configured summary mode. Clearing runs in both modes.
pub fn build_scheduler(cfg: &Config, services: &Services) -> anyhow::Result<Scheduler> {
    let mut scheduler = Scheduler::new();

    if cfg.summary_mode == SummarizationMode::Deferred {
        let worker = Arc::new(SummaryWorker::new(services.store.clone(), services.engine.clone()));
        let sweep = move || {
            let worker = worker.clone();
            async move { worker.run_sweep().await.map(|_| ()) }
        };
        scheduler.add_job(ScheduledJob::new(
            "summary_worker",
            JobSchedule::Interval(Duration::from_secs(cfg.summary_interval_minutes * 60)),
            sweep.clone(),
        ));
        scheduler.add_job(ScheduledJob::new(
            "summary_worker_startup",
            JobSchedule::Once(Duration::from_secs(cfg.summary_startup_delay_seconds)),
            sweep,
        ));
    }

    let clearing = Arc::new(ChatClearingWorker::new(
        services.store.clone(),
        chrono::Duration::minutes(cfg.chat_clear_idle_minutes),
    ));
    scheduler.add_job(ScheduledJob::new(
        "daily_chat_clearing",
        JobSchedule::cron(&cfg.chat_clear_cron)?,
        move || {
            let clearing = clearing.clone();
            async move { clearing.run_once().map(|_| ()) }
        },
    ));

    Ok(scheduler)
}

pub async fn run_thread_server(cfg: Config) -> anyhow::Result<()> {
    crate::metrics::init_metrics();
    cfg.print_config();

    let services = build_services(&cfg)?;
    let scheduler = build_scheduler(&cfg, &services)?;
    info!(jobs = ?scheduler.job_ids(), "Starting background jobs");
    let jobs = scheduler.start();

    let addr = cfg.api_addr()?;
    let state = UnifiedAppState::new(services.orchestrator.clone(), cfg);

    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let app = build_router(state);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await;

    jobs.shutdown();
    served?;
    info!("Server stopped");
    Ok(())
}

pub fn build_router(state: UnifiedAppState) -> axum::Router {
    use axum::{
        routing::{get, post},
        Router,
    };
    use tower_http::{
        cors::{Any, CorsLayer},
        timeout::TimeoutLayer,
        trace::TraceLayer,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers(Any);

    // Generation timeout plus hybrid pacing and chunk delays
    let request_timeout = Duration::from_secs(state.config.generate_timeout_seconds + 60);

    Router::new()
        .route("/chat", post(crate::api::chat_api::post_chat))
        .route("/chat/stream", post(crate::api::chat_api::post_chat_stream))
        .route("/chat/recommendations/accept", post(crate::api::chat_api::accept_recommendation))
        .route("/chat/history", get(crate::api::history_api::get_history))
        .route("/healthz", get(crate::api::history_api::healthz))
        .route("/metrics", get(crate::metrics::get_metrics))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &tempfile::TempDir, vars: &[(&str, &str)]) -> Config {
        let db = dir.path().join("chat.db").to_string_lossy().to_string();
        let mut vars: Vec<(String, String)> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        vars.push(("DATABASE_PATH".to_string(), db));
        Config::from_lookup(|key| vars.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())).unwrap()
    }

    #[test]
    fn test_services_open_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir, &[]);
        let services = build_services(&cfg).unwrap();
        let conv = services.store.get_or_create_latest_conversation(1).unwrap();
        assert_eq!(services.store.latest_conversation(1).unwrap().unwrap().id, conv.id);
        assert!(cfg.database_path.exists());
    }

    #[test]
    fn test_missing_system_prompt_file_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("prompt.txt").to_string_lossy().to_string();
        let cfg = config(&dir, &[("SYSTEM_PROMPT_PATH", missing.as_str())]);
        assert!(build_services(&cfg).is_err());
    }

    #[test]
    fn test_deferred_mode_registers_summary_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir, &[]);
        let services = build_services(&cfg).unwrap();
        let scheduler = build_scheduler(&cfg, &services).unwrap();
        assert_eq!(
            scheduler.job_ids(),
            vec!["summary_worker", "summary_worker_startup", "daily_chat_clearing"]
        );
    }

    #[test]
    fn test_inline_mode_only_clears() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir, &[("SUMMARY_MODE", "inline")]);
        let services = build_services(&cfg).unwrap();
        let scheduler = build_scheduler(&cfg, &services).unwrap();
        assert_eq!(scheduler.job_ids(), vec!["daily_chat_clearing"]);
    }

    #[test]
    fn test_bad_cron_is_a_startup_error() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir, &[("CHAT_CLEAR_CRON", "whenever")]);
        let services = build_services(&cfg).unwrap();
        assert!(build_scheduler(&cfg, &services).is_err());
    }
}
