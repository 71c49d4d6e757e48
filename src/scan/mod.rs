// src/scan/mod.rs
//! History backfill ("scan"): replays a channel's past messages through the
//! live pipeline, rate limited and cooperatively cancellable.
//!
//! Per guild: `Idle → Scheduled → Running → Finished | Canceled`.
//! - at most one job per guild and `max_jobs` jobs overall,
//! - batches of `batch_size`, spaced by `interval` minus processing time,
//! - a fetch error/timeout, an empty page, a short page or an exhausted
//!   budget ends the job as `Finished`,
//! - `cancel` is honoured before the next batch is fetched.

mod job;

pub use job::progress_bar;

use crate::analyze::{ContextResolver, MessageAnalyzer};
use crate::config::ScanConfig;
use crate::gateway::ChatGateway;
use crate::model::{ChannelId, GuildId};
use crate::scheduler::TaskScheduler;
use crate::service::ReputationService;
use crate::settings::SettingsStore;
use job::ScanJob;
use metrics::gauge;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    Scheduled,
    Running,
    Finished,
    Canceled,
}

impl ScanState {
    pub fn is_done(self) -> bool {
        matches!(self, ScanState::Finished | ScanState::Canceled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanProgress {
    pub guild: GuildId,
    pub channel: ChannelId,
    pub state: ScanState,
    /// Upper bound of messages to fetch.
    pub budget: usize,
    /// Messages fetched so far (bots included).
    pub fetched: usize,
    /// Messages replayed through the pipeline.
    pub scanned: usize,
    /// Credits recorded.
    pub hits: u64,
    pub batches: usize,
    pub last_batch_ms: u64,
    pub elapsed: Duration,
}

impl ScanProgress {
    fn new(guild: GuildId, channel: ChannelId, budget: usize) -> Self {
        Self {
            guild,
            channel,
            state: ScanState::Scheduled,
            budget,
            fetched: 0,
            scanned: 0,
            hits: 0,
            batches: 0,
            last_batch_ms: 0,
            elapsed: Duration::ZERO,
        }
    }

    /// Share of the budget consumed, in [0, 1].
    pub fn fraction(&self) -> f64 {
        if self.budget == 0 {
            return 1.0;
        }
        (self.fetched as f64 / self.budget as f64).min(1.0)
    }
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("a scan is already running in guild {0}")]
    AlreadyRunning(GuildId),
    #[error("scan queue full ({active}/{limit} jobs running)")]
    QueueFull { active: usize, limit: usize },
    #[error("no settings available for guild {0}")]
    NoSettings(GuildId),
}

struct JobSlot {
    cancel: Arc<AtomicBool>,
    progress: watch::Receiver<ScanProgress>,
}

pub struct ScanEngine {
    gateway: Arc<dyn ChatGateway>,
    analyzer: Arc<MessageAnalyzer>,
    context: Arc<ContextResolver>,
    service: Arc<ReputationService>,
    settings: Arc<dyn SettingsStore>,
    scheduler: Arc<TaskScheduler>,
    cfg: ScanConfig,
    jobs: Mutex<HashMap<GuildId, JobSlot>>,
}

impl ScanEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: Arc<dyn ChatGateway>,
        analyzer: Arc<MessageAnalyzer>,
        context: Arc<ContextResolver>,
        service: Arc<ReputationService>,
        settings: Arc<dyn SettingsStore>,
        scheduler: Arc<TaskScheduler>,
        cfg: ScanConfig,
    ) -> Self {
        Self {
            gateway,
            analyzer,
            context,
            service,
            settings,
            scheduler,
            cfg,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Schedule a scan of `channel`. `budget = None` uses the configured
    /// default; any budget is capped at `max_budget`. Progress is reported to
    /// `report` when given and is always observable via the returned receiver.
    pub async fn start(
        self: &Arc<Self>,
        guild: GuildId,
        channel: ChannelId,
        budget: Option<usize>,
        report: Option<ChannelId>,
    ) -> Result<watch::Receiver<ScanProgress>, ScanError> {
        let settings = self.settings.get(guild).await.map_err(|e| {
            tracing::warn!(target: "scan", guild = %guild, error = %e, "settings unavailable");
            ScanError::NoSettings(guild)
        })?;
        let budget = self.cfg.budget(budget);
        let cancel = Arc::new(AtomicBool::new(false));
        let (tx, rx) = watch::channel(ScanProgress::new(guild, channel, budget));

        let active = {
            let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
            if jobs.contains_key(&guild) {
                return Err(ScanError::AlreadyRunning(guild));
            }
            if jobs.len() >= self.cfg.max_jobs {
                return Err(ScanError::QueueFull {
                    active: jobs.len(),
                    limit: self.cfg.max_jobs,
                });
            }
            jobs.insert(
                guild,
                JobSlot {
                    cancel: cancel.clone(),
                    progress: rx.clone(),
                },
            );
            jobs.len()
        };
        gauge!("scan_jobs_active").set(active as f64);
        tracing::info!(target: "scan", guild = %guild, channel = %channel, budget, "scan scheduled");

        let job = ScanJob {
            gateway: self.gateway.clone(),
            analyzer: self.analyzer.clone(),
            context: self.context.clone(),
            service: self.service.clone(),
            settings,
            cfg: self.cfg.clone(),
            channel,
            report,
            cancel,
            progress: tx,
        };
        let this = Arc::clone(self);
        self.scheduler.spawn("scan", async move {
            job.run().await;
            this.release(guild);
        });
        Ok(rx)
    }

    /// Request cancellation; `false` when no scan runs in `guild`.
    pub fn cancel(&self, guild: GuildId) -> bool {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        match jobs.get(&guild) {
            Some(slot) => {
                slot.cancel.store(true, Ordering::SeqCst);
                tracing::info!(target: "scan", guild = %guild, "scan cancel requested");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, guild: GuildId) -> bool {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.contains_key(&guild)
    }

    /// Latest progress of the running scan in `guild`.
    pub fn progress(&self, guild: GuildId) -> Option<ScanProgress> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.get(&guild).map(|slot| slot.progress.borrow().clone())
    }

    pub fn active_jobs(&self) -> usize {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn release(&self, guild: GuildId) {
        let active = {
            let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
            jobs.remove(&guild);
            jobs.len()
        };
        gauge!("scan_jobs_active").set(active as f64);
    }
}
