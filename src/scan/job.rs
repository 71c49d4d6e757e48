// src/scan/job.rs
//! One history scan: fetch a batch, replay it, report, wait out the rest of
//! the interval, repeat. Cancellation is checked before every fetch.

use super::{ScanProgress, ScanState};
use crate::analyze::{ContextResolver, MessageAnalyzer};
use crate::config::ScanConfig;
use crate::gateway::ChatGateway;
use crate::model::{ChannelId, Message, MessageId, MessageKind};
use crate::service::{Credit, ReputationService, Trigger};
use crate::settings::GuildSettings;
use metrics::{counter, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

const BAR_WIDTH: usize = 40;

pub(super) struct ScanJob {
    pub gateway: Arc<dyn ChatGateway>,
    pub analyzer: Arc<MessageAnalyzer>,
    pub context: Arc<ContextResolver>,
    pub service: Arc<ReputationService>,
    pub settings: Arc<GuildSettings>,
    pub cfg: ScanConfig,
    pub channel: ChannelId,
    pub report: Option<ChannelId>,
    pub cancel: Arc<AtomicBool>,
    pub progress: watch::Sender<ScanProgress>,
}

impl ScanJob {
    pub async fn run(self) -> ScanProgress {
        let started = Instant::now();
        let mut p = self.progress.borrow().clone();
        p.state = ScanState::Running;
        self.publish(&p);

        let report_id = match self.report {
            Some(ch) => match self.gateway.send_message(ch, &render_progress(&p)).await {
                Ok(id) => Some((ch, id)),
                Err(e) => {
                    tracing::warn!(target: "scan", channel = %ch, error = %e, "progress message failed");
                    None
                }
            },
            None => None,
        };

        let mut cursor: Option<MessageId> = None;
        loop {
            if self.cancel.load(Ordering::SeqCst) {
                p.state = ScanState::Canceled;
                break;
            }
            let want = self.cfg.batch_size.max(1).min(p.budget - p.fetched);
            let batch_start = Instant::now();
            let fetched = tokio::time::timeout(
                self.cfg.fetch_timeout(),
                self.gateway.history(self.channel, cursor, want),
            )
            .await;
            let batch = match fetched {
                Ok(Ok(batch)) => batch,
                Ok(Err(e)) => {
                    tracing::warn!(target: "scan", channel = %self.channel, error = %e, "history fetch failed, ending scan");
                    p.state = ScanState::Finished;
                    break;
                }
                Err(_) => {
                    tracing::warn!(target: "scan", channel = %self.channel, "history fetch timed out, ending scan");
                    p.state = ScanState::Finished;
                    break;
                }
            };
            if batch.is_empty() {
                p.state = ScanState::Finished;
                break;
            }
            cursor = batch.last().map(|m| m.id);

            for message in &batch {
                if !replayable(message) {
                    continue;
                }
                p.scanned += 1;
                p.hits += self.replay(message).await;
            }
            counter!("scan_messages_total").increment(batch.len() as u64);

            p.fetched += batch.len();
            p.batches += 1;
            let spent = batch_start.elapsed();
            p.last_batch_ms = spent.as_millis() as u64;
            p.elapsed = started.elapsed();
            histogram!("scan_batch_ms").record(spent.as_secs_f64() * 1000.0);
            self.publish(&p);
            if let Some((ch, id)) = report_id {
                if let Err(e) = self.gateway.edit_message(ch, id, &render_progress(&p)).await {
                    tracing::debug!(target: "scan", error = %e, "progress edit failed");
                }
            }
            tracing::debug!(
                target: "scan",
                guild = %p.guild,
                batch = p.batches,
                size = batch.len(),
                hits = p.hits,
                ms = p.last_batch_ms,
                "batch done"
            );

            // a short page means the history is exhausted
            if batch.len() < want || p.fetched >= p.budget {
                p.state = ScanState::Finished;
                break;
            }
            let interval = self.cfg.interval();
            tokio::time::sleep(interval.saturating_sub(spent)).await;
        }

        p.elapsed = started.elapsed();
        self.publish(&p);
        if let Some(ch) = self.report {
            if let Err(e) = self.gateway.send_message(ch, &render_summary(&p)).await {
                tracing::debug!(target: "scan", error = %e, "summary message failed");
            }
        }
        tracing::info!(
            target: "scan",
            guild = %p.guild,
            channel = %p.channel,
            state = ?p.state,
            scanned = p.scanned,
            hits = p.hits,
            batches = p.batches,
            "scan ended"
        );
        p
    }

    /// Run one historical message through the live pipeline, as of its own
    /// creation time. Returns the number of recorded credits.
    async fn replay(&self, message: &Message) -> u64 {
        let settings = self.settings.as_ref();
        let donor = match self.gateway.member(message.guild_id, message.author_id).await {
            Ok(Some(m)) => m,
            _ => return 0,
        };
        let result = self
            .analyzer
            .analyze(
                settings.thank_pattern(),
                message,
                settings,
                false,
                settings.abuse.max_message_reputation,
            )
            .await;
        if !result.is_match() {
            return 0;
        }

        let context = match self.context.combined_context(message, settings).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(target: "scan", message = %message.id, error = %e, "context unavailable");
                return 0;
            }
        };
        let mut hits = 0;
        for candidate in &result.candidates {
            let credit = Credit {
                kind: result.kind,
                donor: &donor,
                receiver: &candidate.member,
                message,
                reference: result.reference.as_ref(),
                now: message.created_at,
                trigger: Trigger::Replay,
            };
            match self.service.submit_with_context(settings, credit, &context).await {
                Ok(outcome) if outcome.is_recorded() => hits += 1,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(target: "scan", message = %message.id, error = %e, "replayed credit failed");
                }
            }
        }
        hits
    }

    fn publish(&self, p: &ScanProgress) {
        let _ = self.progress.send(p.clone());
    }
}

fn replayable(message: &Message) -> bool {
    !message.author_is_bot && !message.webhook && message.kind != MessageKind::System
}

pub fn progress_bar(fraction: f64) -> String {
    let filled = ((fraction.clamp(0.0, 1.0)) * BAR_WIDTH as f64).round() as usize;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(BAR_WIDTH - filled))
}

fn render_progress(p: &ScanProgress) -> String {
    format!(
        "Scanning <#{}> {} {:.0}% ({} scanned, {} found, {})",
        p.channel,
        progress_bar(p.fraction()),
        p.fraction() * 100.0,
        p.scanned,
        p.hits,
        format_elapsed(p.elapsed)
    )
}

fn render_summary(p: &ScanProgress) -> String {
    let verb = match p.state {
        ScanState::Canceled => "canceled",
        _ => "finished",
    };
    format!(
        "Scan of <#{}> {verb}: {} messages scanned, {} reputations found in {}.",
        p.channel,
        p.scanned,
        p.hits,
        format_elapsed(p.elapsed)
    )
}

fn format_elapsed(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}m {:02}s", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bar_is_fixed_width() {
        assert_eq!(progress_bar(0.0).len(), BAR_WIDTH + 2);
        assert_eq!(progress_bar(1.5), format!("[{}]", "#".repeat(BAR_WIDTH)));
        assert_eq!(progress_bar(0.5).matches('#').count(), 20);
    }

    #[test]
    fn elapsed_format() {
        assert_eq!(format_elapsed(Duration::from_secs(125)), "2m 05s");
    }
}
