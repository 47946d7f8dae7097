use std::time::Duration;

use klinevault_domain::repositories::kline_source::KlineSource;
use klinevault_domain::repositories::kline_store::KlineStore;
use klinevault_domain::sync::{Clock, ReconcileOutcome};

use crate::sync::SymbolSyncEngine;

/// Floor on inter-tick sleep so scheduling drift never degenerates into a
/// tight loop.
pub const DEFAULT_MIN_SLEEP_MS: i64 = 2_000;

/// Drives one reconciliation pass per configured symbol on every tick,
/// sequentially, with per-symbol failure isolation.
pub struct Scheduler<'a, S, C> {
    engine: SymbolSyncEngine<'a, S, C>,
    symbols: Vec<String>,
    min_sleep_ms: i64,
}

impl<'a, S: KlineStore, C: KlineSource> Scheduler<'a, S, C> {
    pub fn new(engine: SymbolSyncEngine<'a, S, C>, symbols: Vec<String>) -> Self {
        Self {
            engine,
            symbols,
            min_sleep_ms: DEFAULT_MIN_SLEEP_MS,
        }
    }

    /// One full sweep over the configured symbols. A symbol's failure is
    /// logged and reported but never blocks or skips its siblings.
    pub async fn sweep(&self, now_ms: i64) -> Vec<(String, ReconcileOutcome)> {
        let mut results = Vec::with_capacity(self.symbols.len());
        for symbol in &self.symbols {
            let outcome = self.engine.reconcile(symbol, now_ms).await;
            match &outcome {
                ReconcileOutcome::Completed {
                    backfilled,
                    tail_added,
                } => {
                    if backfilled + tail_added > 0 {
                        tracing::info!(symbol, backfilled, tail_added, "new klines stored");
                    } else {
                        tracing::debug!(symbol, "up to date");
                    }
                }
                ReconcileOutcome::Failed { phase, error } => {
                    tracing::error!(symbol, phase = %phase, error = %error, "reconciliation failed");
                }
            }
            results.push((symbol.clone(), outcome));
        }
        results
    }

    /// Runs forever: sweep, then sleep until the next interval boundary.
    pub async fn run(&self, clock: &impl Clock) {
        let interval = self.engine.policy().interval_ms;
        loop {
            self.sweep(clock.now_ms()).await;
            let sleep_ms = self.sleep_until_next_tick(clock.now_ms(), interval);
            tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
        }
    }

    fn sleep_until_next_tick(&self, now_ms: i64, interval_ms: i64) -> u64 {
        let until_boundary = interval_ms - now_ms.rem_euclid(interval_ms);
        until_boundary.max(self.min_sleep_ms) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::{Scheduler, DEFAULT_MIN_SLEEP_MS};
    use crate::sync::SymbolSyncEngine;
    use klinevault_domain::repositories::kline_source::KlineSource;
    use klinevault_domain::repositories::kline_store::{KlineStore, RangeQuery};
    use klinevault_domain::sync::{SourceUnavailable, StorageUnavailable, SyncPolicy};
    use klinevault_domain::value_objects::kline::Kline;
    use std::collections::HashSet;

    struct NullStore;

    impl KlineStore for NullStore {
        async fn tail(&self, _symbol: &str) -> Result<Option<i64>, StorageUnavailable> {
            Ok(None)
        }
        async fn recent_keys(
            &self,
            _symbol: &str,
            _limit: i64,
        ) -> Result<HashSet<i64>, StorageUnavailable> {
            Ok(HashSet::new())
        }
        async fn insert_if_absent(
            &self,
            _symbol: &str,
            _kline: &Kline,
        ) -> Result<bool, StorageUnavailable> {
            Ok(false)
        }
        async fn range(&self, _query: &RangeQuery) -> Result<Vec<Kline>, StorageUnavailable> {
            Ok(Vec::new())
        }
    }

    struct NullSource;

    impl KlineSource for NullSource {
        async fn fetch(
            &self,
            _symbol: &str,
            _start_ms: Option<i64>,
            _limit: i64,
        ) -> Result<Vec<Kline>, SourceUnavailable> {
            Ok(Vec::new())
        }
    }

    fn scheduler<'a>(
        store: &'a NullStore,
        source: &'a NullSource,
    ) -> Scheduler<'a, NullStore, NullSource> {
        let engine = SymbolSyncEngine::new(store, source, SyncPolicy::default());
        Scheduler::new(engine, vec!["BTCUSDT".to_string()])
    }

    #[test]
    fn sleeps_to_the_next_boundary_mid_interval() {
        let store = NullStore;
        let source = NullSource;
        let scheduler = scheduler(&store, &source);
        assert_eq!(scheduler.sleep_until_next_tick(30_000, 60_000), 30_000);
        assert_eq!(scheduler.sleep_until_next_tick(119_000, 60_000), 2_000);
    }

    #[test]
    fn sleep_floor_applies_at_the_boundary() {
        let store = NullStore;
        let source = NullSource;
        let scheduler = scheduler(&store, &source);
        // Exactly on the boundary the full interval remains, so the floor
        // only kicks in just before it.
        assert_eq!(scheduler.sleep_until_next_tick(60_000, 60_000), 60_000);
        assert_eq!(
            scheduler.sleep_until_next_tick(59_999, 60_000),
            DEFAULT_MIN_SLEEP_MS as u64
        );
    }
}
