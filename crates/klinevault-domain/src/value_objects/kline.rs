use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// One interval of market data, exactly as served by the source. `open_time`
/// is the unique key within a symbol; every other field is an opaque
/// pass-through value the engine copies but never interprets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: i64,
    pub quote_volume: f64,
    pub trade_count: i64,
    pub taker_buy_base_volume: f64,
    pub taker_buy_quote_volume: f64,
    pub reserved: f64,
}

impl Kline {
    pub fn open_time_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.open_time).single()
    }
}

/// Align a millisecond timestamp down to the interval grid.
pub fn align_down(ts_ms: i64, interval_ms: i64) -> i64 {
    ts_ms.saturating_sub(ts_ms.rem_euclid(interval_ms))
}

pub fn is_aligned(ts_ms: i64, interval_ms: i64) -> bool {
    interval_ms > 0 && ts_ms.rem_euclid(interval_ms) == 0
}

/// Whole intervals needed to cover `[from_ms, to_ms)`, rounded up.
pub fn intervals_between(from_ms: i64, to_ms: i64, interval_ms: i64) -> i64 {
    if to_ms <= from_ms {
        return 0;
    }
    (to_ms - from_ms + interval_ms - 1) / interval_ms
}

#[cfg(test)]
mod tests {
    use super::{align_down, intervals_between, is_aligned};

    const INTERVAL: i64 = 60_000;

    #[test]
    fn align_down_snaps_to_grid() {
        assert_eq!(align_down(0, INTERVAL), 0);
        assert_eq!(align_down(59_999, INTERVAL), 0);
        assert_eq!(align_down(60_000, INTERVAL), 60_000);
        assert_eq!(align_down(1_700_000_012_345, INTERVAL), 1_699_999_980_000);
    }

    #[test]
    fn is_aligned_checks_exact_multiples() {
        assert!(is_aligned(0, INTERVAL));
        assert!(is_aligned(120_000, INTERVAL));
        assert!(!is_aligned(120_001, INTERVAL));
        assert!(!is_aligned(1, 0));
    }

    #[test]
    fn intervals_between_rounds_up_partial_intervals() {
        assert_eq!(intervals_between(0, 0, INTERVAL), 0);
        assert_eq!(intervals_between(60_000, 0, INTERVAL), 0);
        assert_eq!(intervals_between(0, 1, INTERVAL), 1);
        assert_eq!(intervals_between(0, 60_000, INTERVAL), 1);
        assert_eq!(intervals_between(0, 60_001, INTERVAL), 2);
        assert_eq!(intervals_between(0, 600_000, INTERVAL), 10);
    }
}
