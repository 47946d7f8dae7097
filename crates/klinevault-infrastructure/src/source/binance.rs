use std::time::Duration;

use klinevault_domain::repositories::kline_source::KlineSource;
use klinevault_domain::sync::SourceUnavailable;
use klinevault_domain::value_objects::kline::{is_aligned, Kline};
use reqwest::Client;
use serde_json::Value;

const MAX_RATE_LIMIT_ATTEMPTS: u32 = 5;

/// REST client for the Binance spot kline endpoint.
pub struct BinanceKlineClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    interval_ms: i64,
    interval_label: String,
}

impl BinanceKlineClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        interval_ms: i64,
        timeout: Duration,
    ) -> Result<Self, String> {
        let interval_label = interval_label(interval_ms)?.to_string();
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| format!("failed to build http client: {err}"))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            interval_ms,
            interval_label,
        })
    }
}

impl KlineSource for BinanceKlineClient {
    async fn fetch(
        &self,
        symbol: &str,
        start_ms: Option<i64>,
        limit: i64,
    ) -> Result<Vec<Kline>, SourceUnavailable> {
        let url = format!("{}/api/v3/klines", self.base_url);
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let mut request = self
                .http
                .get(&url)
                .query(&[
                    ("symbol", symbol),
                    ("interval", self.interval_label.as_str()),
                ])
                .query(&[("limit", limit)]);
            if let Some(start) = start_ms {
                request = request.query(&[("startTime", start)]);
            }
            if let Some(key) = self.api_key.as_deref() {
                request = request.header("X-MBX-APIKEY", key);
            }

            let response = request.send().await.map_err(|err| {
                metrics::counter!("klinevault.infra.binance.errors_total", "stage" => "send")
                    .increment(1);
                SourceUnavailable(format!("kline request failed: {err}"))
            })?;

            if response.status().as_u16() == 429 && attempts <= MAX_RATE_LIMIT_ATTEMPTS {
                let backoff = 500u64 * attempts as u64;
                metrics::counter!("klinevault.infra.binance.rate_limited_total").increment(1);
                tracing::warn!(symbol, attempts, backoff_ms = backoff, "rate limited, backing off");
                tokio::time::sleep(Duration::from_millis(backoff)).await;
                continue;
            }

            if !response.status().is_success() {
                metrics::counter!("klinevault.infra.binance.errors_total", "stage" => "status")
                    .increment(1);
                return Err(SourceUnavailable(format!(
                    "kline request failed with status {}",
                    response.status()
                )));
            }

            let rows: Vec<Vec<Value>> = response.json().await.map_err(|err| {
                metrics::counter!("klinevault.infra.binance.errors_total", "stage" => "parse")
                    .increment(1);
                SourceUnavailable(format!("kline response parse failed: {err}"))
            })?;
            metrics::counter!("klinevault.infra.binance.rows_fetched_total")
                .increment(rows.len() as u64);
            return parse_kline_rows(&rows, self.interval_ms).map_err(SourceUnavailable);
        }
    }
}

/// The endpoint serves each kline as a 12-element array mixing integers and
/// decimal strings; everything is copied through untouched.
fn parse_kline_rows(rows: &[Vec<Value>], interval_ms: i64) -> Result<Vec<Kline>, String> {
    let mut klines = Vec::with_capacity(rows.len());
    for row in rows {
        if row.len() < 12 {
            return Err("unexpected kline row length".to_string());
        }

        let open_time = json_i64(&row[0], "open_time")?;
        if !is_aligned(open_time, interval_ms) {
            return Err(format!(
                "open_time {open_time} is not aligned to the {interval_ms}ms grid"
            ));
        }

        klines.push(Kline {
            open_time,
            open: json_f64(&row[1], "open")?,
            high: json_f64(&row[2], "high")?,
            low: json_f64(&row[3], "low")?,
            close: json_f64(&row[4], "close")?,
            volume: json_f64(&row[5], "volume")?,
            close_time: json_i64(&row[6], "close_time")?,
            quote_volume: json_f64(&row[7], "quote_volume")?,
            trade_count: json_i64(&row[8], "trade_count")?,
            taker_buy_base_volume: json_f64(&row[9], "taker_buy_base_volume")?,
            taker_buy_quote_volume: json_f64(&row[10], "taker_buy_quote_volume")?,
            reserved: json_f64(&row[11], "reserved")?,
        });
    }

    klines.sort_by_key(|k| k.open_time);
    Ok(klines)
}

fn json_f64(value: &Value, field: &str) -> Result<f64, String> {
    match value {
        Value::String(s) => s.parse::<f64>().map_err(|_| format!("invalid {field}: {s}")),
        Value::Number(n) => n.as_f64().ok_or_else(|| format!("invalid {field}: {n}")),
        other => Err(format!("invalid {field}: {other}")),
    }
}

fn json_i64(value: &Value, field: &str) -> Result<i64, String> {
    match value {
        Value::Number(n) => n.as_i64().ok_or_else(|| format!("invalid {field}: {n}")),
        Value::String(s) => s.parse::<i64>().map_err(|_| format!("invalid {field}: {s}")),
        other => Err(format!("invalid {field}: {other}")),
    }
}

fn interval_label(interval_ms: i64) -> Result<&'static str, String> {
    let label = match interval_ms {
        60_000 => "1m",
        180_000 => "3m",
        300_000 => "5m",
        900_000 => "15m",
        1_800_000 => "30m",
        3_600_000 => "1h",
        14_400_000 => "4h",
        86_400_000 => "1d",
        _ => return Err(format!("unsupported interval: {interval_ms}ms")),
    };
    Ok(label)
}

#[cfg(test)]
mod tests {
    use super::{interval_label, parse_kline_rows};
    use serde_json::{json, Value};

    fn row(open_time: i64) -> Vec<Value> {
        vec![
            json!(open_time),
            json!("42000.10"),
            json!("42100.00"),
            json!("41900.50"),
            json!("42050.00"),
            json!("12.345"),
            json!(open_time + 59_999),
            json!("519028.7"),
            json!(1234),
            json!("6.1"),
            json!("256400.2"),
            json!("0"),
        ]
    }

    #[test]
    fn parse_kline_rows_maps_mixed_types() {
        let rows = vec![row(120_000), row(60_000)];
        let klines = parse_kline_rows(&rows, 60_000).expect("rows should parse");
        assert_eq!(klines.len(), 2);
        // Sorted ascending regardless of response order.
        assert_eq!(klines[0].open_time, 60_000);
        assert_eq!(klines[1].open_time, 120_000);
        assert!((klines[0].open - 42_000.10).abs() < 1e-9);
        assert_eq!(klines[0].trade_count, 1234);
        assert_eq!(klines[0].close_time, 119_999);
    }

    #[test]
    fn parse_kline_rows_rejects_short_rows() {
        let mut short = row(60_000);
        short.truncate(11);
        let err = parse_kline_rows(&[short], 60_000).expect_err("short row");
        assert!(err.contains("row length"));
    }

    #[test]
    fn parse_kline_rows_rejects_unaligned_keys() {
        let err = parse_kline_rows(&[row(60_001)], 60_000).expect_err("unaligned key");
        assert!(err.contains("not aligned"));
    }

    #[test]
    fn parse_kline_rows_names_the_bad_field() {
        let mut bad = row(60_000);
        bad[4] = json!("not-a-price");
        let err = parse_kline_rows(&[bad], 60_000).expect_err("bad close");
        assert!(err.contains("invalid close"));
    }

    #[test]
    fn interval_label_maps_supported_intervals() {
        assert_eq!(interval_label(60_000).expect("1m"), "1m");
        assert_eq!(interval_label(3_600_000).expect("1h"), "1h");
        assert!(interval_label(61_000).is_err());
    }
}
