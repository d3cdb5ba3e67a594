use crate::config::SweepConfig;
use crate::services::message_store::MessageStore;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::Instrument;

/// Reconciles the two message backends. The two-phase write can leave a
/// payload without its delivery row (second phase lost) and external
/// deletion can leave a delivery without its payload; each pass remediates
/// both, touching only rows older than the grace window so in-flight
/// writes are never mistaken for failures.
#[derive(Debug)]
pub struct PayloadSweepWorker {
    messages: MessageStore,
    config: SweepConfig,
}

impl PayloadSweepWorker {
    #[must_use]
    pub const fn new(messages: MessageStore, config: SweepConfig) -> Self {
        Self { messages, config }
    }

    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.interval_secs));

        while !*shutdown.borrow() {
            tokio::select! {
                _ = interval.tick() => {
                    self.perform_sweep()
                        .instrument(tracing::info_span!("payload_sweep_iteration"))
                        .await;
                }
                _ = shutdown.changed() => {}
            }
        }
        tracing::info!("Payload sweep loop shutting down...");
    }

    /// One reconciliation pass. The two halves are independent; a failure
    /// in one never blocks the other.
    #[tracing::instrument(
        skip(self),
        fields(orphans_deleted = tracing::field::Empty, dangling_flagged = tracing::field::Empty)
    )]
    pub async fn perform_sweep(&self) {
        tracing::debug!("Running payload reconciliation sweep...");
        let grace = i64::try_from(self.config.grace_secs).unwrap_or(i64::MAX);
        let cutoff = OffsetDateTime::now_utc() - time::Duration::seconds(grace);

        match self.messages.sweep_orphan_payloads(cutoff, self.config.batch_limit).await {
            Ok(count) => {
                if count > 0 {
                    tracing::info!(count = %count, "Deleted orphaned payloads");
                    tracing::Span::current().record("orphans_deleted", count);
                }
            }
            Err(e) => tracing::error!(error = ?e, "Sweep error (orphan payloads)"),
        }

        match self.messages.sweep_dangling_deliveries(cutoff, self.config.batch_limit).await {
            Ok(count) => {
                if count > 0 {
                    tracing::info!(count = %count, "Flagged dangling deliveries");
                    tracing::Span::current().record("dangling_flagged", count);
                }
            }
            Err(e) => tracing::error!(error = ?e, "Sweep error (dangling deliveries)"),
        }
    }
}
