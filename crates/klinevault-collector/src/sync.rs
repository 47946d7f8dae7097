use std::time::Duration;

use klinevault_domain::repositories::kline_source::KlineSource;
use klinevault_domain::repositories::kline_store::KlineStore;
use klinevault_domain::sync::{ReconcileOutcome, SyncError, SyncPhase, SyncPolicy};
use klinevault_domain::value_objects::kline::{align_down, intervals_between, Kline};

/// Per-symbol reconciliation: gap fill from the stored tail toward "now",
/// then re-check the newest window for records that appeared late.
pub struct SymbolSyncEngine<'a, S, C> {
    store: &'a S,
    source: &'a C,
    policy: SyncPolicy,
}

impl<'a, S: KlineStore, C: KlineSource> SymbolSyncEngine<'a, S, C> {
    pub fn new(store: &'a S, source: &'a C, policy: SyncPolicy) -> Self {
        Self {
            store,
            source,
            policy,
        }
    }

    pub fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    /// One reconciliation pass. Errors from either phase stop here; the
    /// caller moves on to the next symbol.
    pub async fn reconcile(&self, symbol: &str, now_ms: i64) -> ReconcileOutcome {
        let backfilled = match self.fill_gaps(symbol, now_ms).await {
            Ok(count) => count,
            Err(error) => {
                return ReconcileOutcome::Failed {
                    phase: SyncPhase::GapFill,
                    error,
                }
            }
        };
        let tail_added = match self.reconcile_tail(symbol).await {
            Ok(count) => count,
            Err(error) => {
                return ReconcileOutcome::Failed {
                    phase: SyncPhase::TailReconcile,
                    error,
                }
            }
        };
        ReconcileOutcome::Completed {
            backfilled,
            tail_added,
        }
    }

    /// Walks a cursor from the stored tail (or the historical floor for an
    /// empty table) toward `now_ms` in bounded batches. Progress is measured
    /// by the last record's key, never by batch size.
    async fn fill_gaps(&self, symbol: &str, now_ms: i64) -> Result<u64, SyncError> {
        let interval = self.policy.interval_ms;
        let mut cursor = match self.store.tail(symbol).await? {
            Some(tail) => tail + interval,
            None => align_down(self.policy.historical_floor_ms, interval),
        };

        let mut inserted = 0u64;
        while cursor < now_ms {
            let limit = intervals_between(cursor, now_ms, interval).min(self.policy.max_batch);
            let batch = self.source.fetch(symbol, Some(cursor), limit).await?;
            let Some(last) = batch.last() else {
                // Nothing at/after the cursor: caught up, or the source's
                // history starts later than our floor.
                break;
            };
            let last_key = last.open_time;

            for kline in &batch {
                if self.store.insert_if_absent(symbol, kline).await? {
                    inserted += 1;
                    tracing::debug!(symbol, open_time = kline.open_time, ts = %format_ts(kline), "stored kline");
                }
            }

            // The final single-interval request may legitimately echo the
            // cursor back (the still-open candle at the live edge); any other
            // batch that fails to move past the cursor is a stale response.
            let advanced = last_key > cursor || (last_key == cursor && limit == 1);
            if !advanced {
                return Err(SyncError::NoProgress { cursor, last_key });
            }
            cursor = last_key + interval;

            if cursor < now_ms && self.policy.batch_pause_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.policy.batch_pause_ms)).await;
            }
        }
        Ok(inserted)
    }

    /// Fetches the newest window and merges anything not yet stored.
    /// Strictly additive: an existing key is never overwritten.
    async fn reconcile_tail(&self, symbol: &str) -> Result<u64, SyncError> {
        let window = self.policy.tail_window;
        let batch = self.source.fetch(symbol, None, window).await?;
        if batch.is_empty() {
            return Ok(0);
        }
        let known = self.store.recent_keys(symbol, window).await?;

        let mut inserted = 0u64;
        for kline in &batch {
            if known.contains(&kline.open_time) {
                continue;
            }
            if self.store.insert_if_absent(symbol, kline).await? {
                inserted += 1;
                tracing::debug!(symbol, open_time = kline.open_time, ts = %format_ts(kline), "stored late kline");
            }
        }
        Ok(inserted)
    }
}

fn format_ts(kline: &Kline) -> String {
    kline
        .open_time_utc()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "out-of-range".to_string())
}
