//! Self-destruct reaper
//!
//! Hard-deletes messages whose `delete_at` has passed. Deadlines are only set
//! when a participant reads an encrypted conversation, so an unread message is
//! never touched here. Listing already hides expired rows, which keeps the
//! sweep interval invisible to clients.

use crate::error::AppResult;
use crate::metrics;
use crate::repository::MessagingStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// One sweep. Returns the number of messages removed.
pub async fn purge_expired_once(store: &dyn MessagingStore, now: DateTime<Utc>) -> AppResult<u64> {
    let mut tx = store.begin().await?;
    let purged = tx.purge_expired(now).await?;
    tx.commit().await?;
    Ok(purged)
}

/// Run until `shutdown` flips to `true`.
pub async fn start_self_destruct_reaper(
    store: Arc<dyn MessagingStore>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(
        interval_secs = interval.as_secs(),
        "Starting self-destruct reaper"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!("self-destruct reaper stopped");
                    return;
                }
                continue;
            }
        }

        let cycle_start = Instant::now();
        match purge_expired_once(store.as_ref(), Utc::now()).await {
            Ok(purged) => {
                metrics::REAPER_RUNS_TOTAL.with_label_values(&["success"]).inc();
                metrics::SELF_DESTRUCT_PURGED_TOTAL.inc_by(purged);
                if purged > 0 {
                    tracing::info!(
                        purged,
                        duration_ms = cycle_start.elapsed().as_millis() as u64,
                        "self-destruct sweep removed expired messages"
                    );
                }
            }
            Err(e) => {
                metrics::REAPER_RUNS_TOTAL.with_label_values(&["error"]).inc();
                tracing::error!(
                    error = %e,
                    duration_ms = cycle_start.elapsed().as_millis() as u64,
                    "self-destruct sweep failed"
                );
            }
        }
    }
}
