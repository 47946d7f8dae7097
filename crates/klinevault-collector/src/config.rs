use chrono::{DateTime, TimeZone, Utc};
use klinevault_domain::sync::SyncPolicy;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub run: RunConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Deserialize)]
pub struct RunConfig {
    pub symbols: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.binance.com".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub interval_ms: i64,
    pub max_batch: i64,
    pub tail_window: i64,
    /// Epoch seconds, epoch millis, or RFC3339.
    pub historical_floor: String,
    pub batch_pause_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let defaults = SyncPolicy::default();
        Self {
            interval_ms: defaults.interval_ms,
            max_batch: defaults.max_batch,
            tail_window: defaults.tail_window,
            historical_floor: "2017-08-17T00:00:00Z".to_string(),
            batch_pause_ms: defaults.batch_pause_ms,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        if self.run.symbols.is_empty() {
            return Err("run.symbols must not be empty".to_string());
        }
        if self.run.symbols.iter().any(|s| s.trim().is_empty()) {
            return Err("run.symbols must not contain blank entries".to_string());
        }
        Ok(())
    }
}

impl SyncConfig {
    pub fn to_policy(&self) -> Result<SyncPolicy, String> {
        let floor = parse_time_input(&self.historical_floor)?;
        let policy = SyncPolicy {
            interval_ms: self.interval_ms,
            max_batch: self.max_batch,
            tail_window: self.tail_window,
            historical_floor_ms: floor.timestamp_millis(),
            batch_pause_ms: self.batch_pause_ms,
        };
        policy.validate()?;
        Ok(policy)
    }
}

pub fn load_config(path: &Path) -> Result<Config, String> {
    let contents = fs::read_to_string(path)
        .map_err(|err| format!("failed to read config {}: {}", path.display(), err))?;
    toml::from_str(&contents)
        .map_err(|err| format!("failed to parse TOML {}: {}", path.display(), err))
}

pub fn parse_time_input(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = value.parse::<i64>() {
        let ms = if ts > 1_000_000_000_000 { ts } else { ts * 1000 };
        return Utc
            .timestamp_millis_opt(ms)
            .single()
            .ok_or_else(|| format!("invalid epoch: {value}"));
    }

    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| format!("unsupported timestamp format: {value}"))
}

#[cfg(test)]
mod tests {
    use super::{load_config, parse_time_input, Config};
    use std::path::Path;

    fn parse_config(toml_str: &str) -> Config {
        toml::from_str(toml_str).expect("config should parse")
    }

    #[test]
    fn parse_minimal_config_applies_defaults() {
        let config = parse_config(
            r#"
[run]
symbols = ["BTCUSDT", "ETHUSDT"]
"#,
        );
        config.validate().expect("minimal config is valid");
        assert_eq!(config.run.symbols.len(), 2);
        assert_eq!(config.source.base_url, "https://api.binance.com");
        assert_eq!(config.sync.max_batch, 1000);
        assert_eq!(config.sync.tail_window, 1000);

        let policy = config.sync.to_policy().expect("default policy");
        assert_eq!(policy.interval_ms, 60_000);
        // 2017-08-17T00:00:00Z
        assert_eq!(policy.historical_floor_ms, 1_502_928_000_000);
    }

    #[test]
    fn parse_full_config_overrides_defaults() {
        let config = parse_config(
            r#"
[run]
symbols = ["SOLUSDT"]

[source]
base_url = "http://127.0.0.1:9000"
timeout_secs = 3

[sync]
interval_ms = 60000
max_batch = 500
tail_window = 200
historical_floor = "1600000000"
batch_pause_ms = 100
"#,
        );
        assert_eq!(config.source.timeout_secs, 3);
        let policy = config.sync.to_policy().expect("policy");
        assert_eq!(policy.max_batch, 500);
        assert_eq!(policy.tail_window, 200);
        assert_eq!(policy.historical_floor_ms, 1_600_000_000_000);
    }

    #[test]
    fn validate_rejects_empty_symbol_list() {
        let config = parse_config(
            r#"
[run]
symbols = []
"#,
        );
        let err = config.validate().expect_err("empty symbols");
        assert!(err.contains("symbols"));
    }

    #[test]
    fn parse_time_accepts_seconds_millis_and_rfc3339() {
        assert_eq!(
            parse_time_input("1700000000").expect("seconds").timestamp(),
            1_700_000_000
        );
        assert_eq!(
            parse_time_input("1700000000000").expect("millis").timestamp(),
            1_700_000_000
        );
        assert_eq!(
            parse_time_input("2026-01-01T00:00:00Z").expect("rfc3339").timestamp(),
            1_767_225_600
        );
        assert!(parse_time_input("yesterday").is_err());
    }

    #[test]
    fn load_config_missing_file_returns_error() {
        let path = Path::new("/tmp/klinevault-missing-config.toml");
        let err = load_config(path).expect_err("expected load to fail");
        assert!(err.contains("failed to read config"));
    }
}
