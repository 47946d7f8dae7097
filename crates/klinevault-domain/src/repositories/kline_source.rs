use crate::sync::SourceUnavailable;
use crate::value_objects::kline::Kline;

/// Remote market data source serving ordered batches of klines.
#[allow(async_fn_in_trait)]
pub trait KlineSource {
    /// Klines at/after `start_ms` (the newest window when `None`), ascending
    /// by `open_time`, at most `limit` records. An empty batch means the
    /// source has nothing at/after `start_ms`: caught up, not an error.
    async fn fetch(
        &self,
        symbol: &str,
        start_ms: Option<i64>,
        limit: i64,
    ) -> Result<Vec<Kline>, SourceUnavailable>;
}
