//! State shared by every API handler.
//!
//! Everything durable lives in the history store; handlers only reach it
//! through the orchestrator.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::Config;
use crate::turn::TurnOrchestrator;

/// Process-lifetime request counters, reported by the health endpoint.
#[derive(Debug, Default)]
pub struct AtomicCounters {
    pub total_requests: AtomicUsize,
    pub turns_completed: AtomicUsize,
    pub turns_rejected: AtomicUsize,
}

impl AtomicCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_total_requests(&self) -> usize {
        self.total_requests.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn inc_turns_completed(&self) -> usize {
        self.turns_completed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn inc_turns_rejected(&self) -> usize {
        self.turns_rejected.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> (usize, usize, usize) {
        (
            self.total_requests.load(Ordering::Relaxed),
            self.turns_completed.load(Ordering::Relaxed),
            self.turns_rejected.load(Ordering::Relaxed),
        )
    }
}

#[derive(Clone)]
pub struct UnifiedAppState {
    pub orchestrator: Arc<TurnOrchestrator>,
    pub config: Arc<Config>,
    pub counters: Arc<AtomicCounters>,
}

impl UnifiedAppState {
    pub fn new(orchestrator: Arc<TurnOrchestrator>, config: Config) -> Self {
        Self {
            orchestrator,
            config: Arc::new(config),
            counters: Arc::new(AtomicCounters::new()),
        }
    }
}
