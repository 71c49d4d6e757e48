// src/app.rs
//! Engine assembly: builds every component from the four collaborators and
//! registers the event handlers.

use crate::analyze::{ContextResolver, MessageAnalyzer};
use crate::cache::SeenMembers;
use crate::config::EngineConfig;
use crate::gateway::ChatGateway;
use crate::handler::{
    DeleteHandler, Dispatcher, EventKind, GatewayEvent, MessageHandler, ReactionHandler, VoiceHandler,
};
use crate::ledger::{ReputationLedger, ReputationStore};
use crate::model::{GuildId, Member};
use crate::roles::{RefreshSummary, RoleAssignError, RoleAssigner, RoleDirectory};
use crate::scan::ScanEngine;
use crate::scheduler::TaskScheduler;
use crate::service::ReputationService;
use crate::settings::SettingsStore;
use crate::telemetry::ensure_metrics_described;
use crate::voice::VoiceActivity;
use crate::vote::VoteResolver;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Closed voice presences are kept this long for context lookups.
const VOICE_RETENTION_HOURS: i64 = 24;

pub struct Engine {
    config: EngineConfig,
    settings: Arc<dyn SettingsStore>,
    ledger: ReputationLedger,
    roles: Arc<RoleAssigner>,
    service: Arc<ReputationService>,
    voice: Arc<VoiceActivity>,
    seen: Arc<SeenMembers>,
    scheduler: Arc<TaskScheduler>,
    vote: Arc<VoteResolver>,
    scan: Arc<ScanEngine>,
    dispatcher: Arc<Dispatcher>,
}

impl Engine {
    /// Wire the engine and start the upkeep timers. Must be called from
    /// within a Tokio runtime.
    pub fn new(
        config: EngineConfig,
        gateway: Arc<dyn ChatGateway>,
        settings: Arc<dyn SettingsStore>,
        store: Arc<dyn ReputationStore>,
        directory: Arc<dyn RoleDirectory>,
    ) -> Self {
        ensure_metrics_described();

        let scheduler = Arc::new(TaskScheduler::new());
        let voice = Arc::new(VoiceActivity::new());
        let seen = Arc::new(SeenMembers::new(Duration::minutes(config.cache.seen_ttl_minutes)));
        let ledger = ReputationLedger::new(store);
        let context = Arc::new(ContextResolver::new(
            gateway.clone(),
            voice.clone(),
            config.context.history_limit,
        ));
        let analyzer = Arc::new(MessageAnalyzer::new(gateway.clone(), context.clone()));
        let roles = Arc::new(RoleAssigner::new(directory, ledger.clone()));
        let service = Arc::new(ReputationService::new(
            gateway.clone(),
            context.clone(),
            ledger.clone(),
            roles.clone(),
        ));
        let vote = Arc::new(VoteResolver::new(
            gateway.clone(),
            context.clone(),
            service.clone(),
            settings.clone(),
            scheduler.clone(),
            config.vote.clone(),
        ));
        let scan = Arc::new(ScanEngine::new(
            gateway.clone(),
            analyzer.clone(),
            context.clone(),
            service.clone(),
            settings.clone(),
            scheduler.clone(),
            config.scan.clone(),
        ));

        let mut dispatcher = Dispatcher::new(config.workers);
        dispatcher.register(
            EventKind::MessageCreate,
            Arc::new(MessageHandler {
                gateway: gateway.clone(),
                settings: settings.clone(),
                analyzer,
                context,
                service: service.clone(),
                vote: vote.clone(),
                seen: seen.clone(),
            }),
        );
        dispatcher.register(
            EventKind::ReactionAdd,
            Arc::new(ReactionHandler {
                gateway,
                settings: settings.clone(),
                service: service.clone(),
                vote: vote.clone(),
            }),
        );
        dispatcher.register(EventKind::MessageDelete, Arc::new(DeleteHandler { ledger: ledger.clone() }));
        dispatcher.register(EventKind::Voice, Arc::new(VoiceHandler { voice: voice.clone() }));

        let engine = Self {
            config,
            settings,
            ledger,
            roles,
            service,
            voice,
            seen,
            scheduler,
            vote,
            scan,
            dispatcher: Arc::new(dispatcher),
        };
        engine.start_upkeep();
        tracing::info!(target: "dispatch", workers = engine.config.workers, "engine ready");
        engine
    }

    fn start_upkeep(&self) {
        let seen = self.seen.clone();
        let voice = self.voice.clone();
        let every = std::time::Duration::from_secs(self.config.cache.eviction_interval_secs);
        self.scheduler.spawn_periodic("upkeep", every, move || {
            let seen = seen.clone();
            let voice = voice.clone();
            async move {
                let now = Utc::now();
                let evicted = seen.evict_stale(now);
                voice.prune(now - Duration::hours(VOICE_RETENTION_HOURS));
                if evicted > 0 {
                    tracing::debug!(target: "dispatch", evicted, "seen members evicted");
                }
            }
        });
    }

    /// Feed events through a bounded channel onto the worker pool.
    pub fn spawn_event_loop(&self, buffer: usize) -> mpsc::Sender<GatewayEvent> {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let dispatcher = self.dispatcher.clone();
        self.scheduler.spawn("events", dispatcher.run(rx));
        tx
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn ledger(&self) -> &ReputationLedger {
        &self.ledger
    }

    pub fn service(&self) -> &Arc<ReputationService> {
        &self.service
    }

    pub fn scan(&self) -> &Arc<ScanEngine> {
        &self.scan
    }

    pub fn vote(&self) -> &Arc<VoteResolver> {
        &self.vote
    }

    pub fn voice(&self) -> &Arc<VoiceActivity> {
        &self.voice
    }

    pub fn seen(&self) -> &Arc<SeenMembers> {
        &self.seen
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Member cache policy: keep while recently seen or while a scan runs in
    /// the member's guild.
    pub fn should_cache(&self, member: &Member) -> bool {
        self.seen
            .should_cache(member, self.scan.is_running(member.guild_id), Utc::now())
    }

    /// Re-evaluate tier roles of every member of `guild`.
    pub async fn refresh_roles(&self, guild: GuildId) -> Result<RefreshSummary, RoleAssignError> {
        let settings = self.settings.get(guild).await?;
        self.roles.refresh_all(&settings, Utc::now()).await
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}
