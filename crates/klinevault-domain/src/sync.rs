use chrono::Utc;
use std::fmt;
use thiserror::Error;

/// Transport, auth, or rate-limit failure at the source. Retryable on the
/// next scheduled attempt, never fatal to the process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("source unavailable: {0}")]
pub struct SourceUnavailable(pub String);

/// Storage failure. Fatal to the current pass only; the process keeps
/// running and retries next tick.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("storage unavailable: {0}")]
pub struct StorageUnavailable(pub String);

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    #[error(transparent)]
    Source(#[from] SourceUnavailable),
    #[error(transparent)]
    Storage(#[from] StorageUnavailable),
    #[error("no progress: batch ending at {last_key} did not advance cursor {cursor}")]
    NoProgress { cursor: i64, last_key: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncErrorKind {
    SourceUnavailable,
    StorageUnavailable,
    NoProgress,
}

impl SyncError {
    pub fn kind(&self) -> SyncErrorKind {
        match self {
            SyncError::Source(_) => SyncErrorKind::SourceUnavailable,
            SyncError::Storage(_) => SyncErrorKind::StorageUnavailable,
            SyncError::NoProgress { .. } => SyncErrorKind::NoProgress,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    GapFill,
    TailReconcile,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncPhase::GapFill => write!(f, "gap_fill"),
            SyncPhase::TailReconcile => write!(f, "tail_reconcile"),
        }
    }
}

/// Result of one reconciliation pass for one symbol. Errors stop at this
/// boundary so a failing symbol never blocks its siblings.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Completed { backfilled: u64, tail_added: u64 },
    Failed { phase: SyncPhase, error: SyncError },
}

impl ReconcileOutcome {
    pub fn inserted(&self) -> u64 {
        match self {
            ReconcileOutcome::Completed {
                backfilled,
                tail_added,
            } => backfilled + tail_added,
            ReconcileOutcome::Failed { .. } => 0,
        }
    }
}

/// Policy knobs for one sync engine instance. The tail window and the
/// historical floor are deployment policy, not constants.
#[derive(Debug, Clone)]
pub struct SyncPolicy {
    pub interval_ms: i64,
    pub max_batch: i64,
    pub tail_window: i64,
    pub historical_floor_ms: i64,
    pub batch_pause_ms: u64,
}

impl SyncPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if self.interval_ms <= 0 {
            return Err("interval_ms must be > 0".to_string());
        }
        if self.max_batch <= 0 {
            return Err("max_batch must be > 0".to_string());
        }
        if self.tail_window <= 0 {
            return Err("tail_window must be > 0".to_string());
        }
        if self.historical_floor_ms < 0 {
            return Err("historical_floor must not be before the epoch".to_string());
        }
        Ok(())
    }
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            interval_ms: 60_000,
            max_batch: 1_000,
            tail_window: 1_000,
            // Binance spot history starts 2017-08-17.
            historical_floor_ms: 1_502_928_000_000,
            batch_pause_ms: 350,
        }
    }
}

pub trait Clock {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}
