use std::collections::HashSet;

use crate::sync::StorageUnavailable;
use crate::value_objects::kline::Kline;

#[derive(Debug, Clone)]
pub struct RangeQuery {
    pub symbol: String,
    pub start_ms: Option<i64>,
    pub end_ms: Option<i64>,
    pub limit: i64,
}

/// Durable per-symbol kline table keyed by `open_time`.
#[allow(async_fn_in_trait)]
pub trait KlineStore {
    /// Maximum key present, or `None` for an empty table.
    async fn tail(&self, symbol: &str) -> Result<Option<i64>, StorageUnavailable>;

    /// The `limit` most recent keys, for membership tests near the live edge.
    async fn recent_keys(
        &self,
        symbol: &str,
        limit: i64,
    ) -> Result<HashSet<i64>, StorageUnavailable>;

    /// Inserts iff no row with that key exists. Returns whether a new row
    /// was written; calling twice with the same record is safe.
    async fn insert_if_absent(
        &self,
        symbol: &str,
        kline: &Kline,
    ) -> Result<bool, StorageUnavailable>;

    /// Read path for external consumers, ascending by `open_time`.
    async fn range(&self, query: &RangeQuery) -> Result<Vec<Kline>, StorageUnavailable>;
}
