// src/lib.rs
// Public library surface for the replay binary and integration tests.

pub mod model;
pub mod settings;
pub mod config;
pub mod telemetry;

// Platform collaborators and their in-memory stand-ins
pub mod gateway;
pub mod memory;

// Classification, policy, persistence
pub mod analyze;
pub mod guard;
pub mod ledger;
pub mod roles;
pub mod service;

// Background work and event plumbing
pub mod cache;
pub mod scheduler;
pub mod voice;
pub mod vote;
pub mod scan;
pub mod handler;
pub mod app;

// ---- Re-exports for stable public API ----
pub use crate::analyze::{AnalyzerResult, MessageAnalyzer};
pub use crate::app::Engine;
pub use crate::config::EngineConfig;
pub use crate::guard::{AbuseGuard, Rejection};
pub use crate::handler::{Dispatcher, EventKind, GatewayEvent};
pub use crate::ledger::{ReputationLedger, ReputationLogEntry, ReputationRank};
pub use crate::model::{ChannelId, Emoji, GuildId, Member, Message, MessageId, RoleId, ThankType, UserId};
pub use crate::scan::{ScanEngine, ScanError, ScanProgress, ScanState};
pub use crate::service::{Credit, ReputationService, SubmitOutcome, Trigger};
pub use crate::settings::{GuildSettings, SettingsStore};
