// src/telemetry.rs
//! Logging and metrics plumbing shared by every subsystem.
//!
//! - `init_tracing`: env-filtered `fmt` subscriber, JSON when
//!   `REPUTATION_LOG_FORMAT=json`. Safe to call more than once.
//! - `ensure_metrics_described`: one-time metric descriptions. No exporter is
//!   installed here; the embedding process picks one.
//! - `anon_hash`: short content fingerprint so raw message text never hits logs.

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const ENV_LOG: &str = "REPUTATION_LOG";
pub const ENV_LOG_FORMAT: &str = "REPUTATION_LOG_FORMAT";
const DEFAULT_FILTER: &str = "reputation_engine=info,warn";

/// Filter directive: `RUST_LOG`, then `REPUTATION_LOG`, then the default.
pub fn filter_directive() -> String {
    std::env::var("RUST_LOG")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .or_else(|| std::env::var(ENV_LOG).ok().filter(|v| !v.trim().is_empty()))
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

pub fn json_requested() -> bool {
    std::env::var(ENV_LOG_FORMAT)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

pub fn init_tracing() {
    let filter = EnvFilter::try_new(filter_directive()).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let registry = tracing_subscriber::registry().with(filter);
    // try_init: a second call (tests, embedding hosts) keeps the first subscriber
    let _ = if json_requested() {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
}

/// One-time metrics registration (so series carry help text once exported).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "reputation_messages_analyzed_total",
            "Messages run through the analyzer."
        );
        describe_counter!(
            "reputation_matches_total",
            "Analyzer results with a thank word, by match kind."
        );
        describe_counter!(
            "reputation_rejections_total",
            "Candidate credits rejected by abuse protection, by reason."
        );
        describe_counter!("reputation_recorded_total", "Ledger entries written, by cause.");
        describe_counter!(
            "reputation_duplicates_total",
            "Ledger inserts ignored because the key already existed."
        );
        describe_counter!(
            "reputation_role_errors_total",
            "Tier role updates refused for missing role access."
        );
        describe_gauge!("scan_jobs_active", "History scans currently running.");
        describe_counter!("scan_messages_total", "Messages replayed by history scans.");
        describe_histogram!("scan_batch_ms", "Processing time per scan batch in milliseconds.");
        describe_gauge!("vote_sessions_open", "Open receiver votes.");
    });
}

/// First 6 bytes of SHA-256, hex.
pub fn anon_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
