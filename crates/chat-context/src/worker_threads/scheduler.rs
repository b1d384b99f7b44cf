//! Explicit job scheduler: interval, cron and one-shot jobs on tokio tasks.

use anyhow::Context;
use chrono::Local;
use cron::Schedule;
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

pub type JobFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Debug, Clone)]
pub enum JobSchedule {
    /// Every `d`, first run one period after start.
    Interval(Duration),
    /// Cron expression with seconds, evaluated in local time.
    Cron(Box<Schedule>),
    /// Single run after a delay.
    Once(Duration),
}

impl JobSchedule {
    pub fn cron(expr: &str) -> anyhow::Result<Self> {
        let schedule = Schedule::from_str(expr).with_context(|| format!("Invalid cron expression: {}", expr))?;
        Ok(Self::Cron(Box::new(schedule)))
    }

    fn describe(&self) -> String {
        match self {
            JobSchedule::Interval(d) => format!("every {}s", d.as_secs()),
            JobSchedule::Cron(s) => format!("cron {}", s),
            JobSchedule::Once(d) => format!("once after {}s", d.as_secs()),
        }
    }
}

pub struct ScheduledJob {
    pub id: String,
    pub schedule: JobSchedule,
    job: JobFn,
}

impl ScheduledJob {
    pub fn new<F, Fut>(id: impl Into<String>, schedule: JobSchedule, job: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let job: JobFn = Arc::new(move || job().boxed());
        Self { id: id.into(), schedule, job }
    }
}

#[derive(Default)]
pub struct Scheduler {
    jobs: Vec<ScheduledJob>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// A job with an existing id replaces the old one.
    pub fn add_job(&mut self, job: ScheduledJob) {
        if let Some(existing) = self.jobs.iter_mut().find(|j| j.id == job.id) {
            debug!(job_id = %job.id, "Replacing scheduled job");
            *existing = job;
        } else {
            self.jobs.push(job);
        }
    }

    pub fn job_ids(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.id.as_str()).collect()
    }

    pub fn start(self) -> SchedulerHandle {
        let tasks = self
            .jobs
            .into_iter()
            .map(|job| {
                info!(job_id = %job.id, schedule = %job.schedule.describe(), "Scheduling job");
                let id = job.id.clone();
                (id, tokio::spawn(drive(job)))
            })
            .collect();
        SchedulerHandle { tasks }
    }
}

pub struct SchedulerHandle {
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl SchedulerHandle {
    pub fn job_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn shutdown(self) {
        for (id, task) in self.tasks {
            task.abort();
            debug!(job_id = %id, "Scheduled job stopped");
        }
        info!("Scheduler shut down");
    }
}

async fn drive(job: ScheduledJob) {
    match &job.schedule {
        JobSchedule::Interval(period) => {
            let mut ticker = interval_at(Instant::now() + *period, *period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                run(&job).await;
            }
        }
        JobSchedule::Cron(schedule) => loop {
            let Some(next) = schedule.upcoming(Local).next() else {
                info!(job_id = %job.id, "Cron schedule exhausted");
                return;
            };
            let wait = (next - Local::now()).to_std().unwrap_or(Duration::ZERO);
            debug!(job_id = %job.id, next = %next, "Waiting for next cron run");
            tokio::time::sleep(wait).await;
            run(&job).await;
        },
        JobSchedule::Once(delay) => {
            tokio::time::sleep(*delay).await;
            run(&job).await;
        }
    }
}

async fn run(job: &ScheduledJob) {
    let started = Instant::now();
    match (job.job)().await {
        Ok(()) => debug!(job_id = %job.id, elapsed_ms = started.elapsed().as_millis() as u64, "Job finished"),
        Err(e) => error!(job_id = %job.id, error = %e, "Job failed"),
    }
}
