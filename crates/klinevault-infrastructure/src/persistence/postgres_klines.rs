use std::collections::HashSet;
use std::time::Instant;

use klinevault_domain::repositories::kline_store::{KlineStore, RangeQuery};
use klinevault_domain::sync::StorageUnavailable;
use klinevault_domain::value_objects::kline::Kline;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls, Row};

const KLINE_COLUMNS: &str = "open_time, open, high, low, close, volume, close_time, \
     quote_volume, trade_count, taker_buy_base_volume, taker_buy_quote_volume, reserved";

/// One Postgres table per symbol (`kline_<symbol>`), `open_time` primary key.
pub struct PostgresKlineStore {
    client: Client,
}

impl PostgresKlineStore {
    /// Connects and spawns the connection driver task.
    pub async fn connect(db_url: &str) -> Result<Self, String> {
        let (client, connection) = tokio_postgres::connect(db_url, NoTls)
            .await
            .map_err(|err| format!("failed to connect to postgres: {err}"))?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::error!(error = %err, "postgres connection error");
            }
        });
        Ok(Self { client })
    }

    /// Creates the symbol's table if missing. The table set is config-driven,
    /// so the DDL lives here instead of a static migrations file.
    pub async fn ensure_table(&self, symbol: &str) -> Result<(), String> {
        let table = table_for(symbol)?;
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                open_time BIGINT PRIMARY KEY,
                open DOUBLE PRECISION NOT NULL,
                high DOUBLE PRECISION NOT NULL,
                low DOUBLE PRECISION NOT NULL,
                close DOUBLE PRECISION NOT NULL,
                volume DOUBLE PRECISION NOT NULL,
                close_time BIGINT NOT NULL,
                quote_volume DOUBLE PRECISION NOT NULL,
                trade_count BIGINT NOT NULL,
                taker_buy_base_volume DOUBLE PRECISION NOT NULL,
                taker_buy_quote_volume DOUBLE PRECISION NOT NULL,
                reserved DOUBLE PRECISION NOT NULL
            )"
        );
        self.client
            .batch_execute(&ddl)
            .await
            .map_err(|err| format!("failed to create table {table}: {err}"))?;
        tracing::info!(table = %table, "kline table ready");
        Ok(())
    }
}

impl KlineStore for PostgresKlineStore {
    async fn tail(&self, symbol: &str) -> Result<Option<i64>, StorageUnavailable> {
        let table = table_for(symbol).map_err(StorageUnavailable)?;
        let sql = format!("SELECT MAX(open_time) FROM {table}");
        let row = self.client.query_one(&sql, &[]).await.map_err(|err| {
            metrics::counter!("klinevault.infra.postgres.errors_total", "op" => "tail")
                .increment(1);
            StorageUnavailable(format!("failed to read tail of {table}: {err}"))
        })?;
        Ok(row.get::<_, Option<i64>>(0))
    }

    async fn recent_keys(
        &self,
        symbol: &str,
        limit: i64,
    ) -> Result<HashSet<i64>, StorageUnavailable> {
        let table = table_for(symbol).map_err(StorageUnavailable)?;
        let sql = format!("SELECT open_time FROM {table} ORDER BY open_time DESC LIMIT $1");
        let rows = self.client.query(&sql, &[&limit]).await.map_err(|err| {
            metrics::counter!("klinevault.infra.postgres.errors_total", "op" => "recent_keys")
                .increment(1);
            StorageUnavailable(format!("failed to read recent keys of {table}: {err}"))
        })?;
        Ok(rows.iter().map(|row| row.get::<_, i64>(0)).collect())
    }

    async fn insert_if_absent(
        &self,
        symbol: &str,
        kline: &Kline,
    ) -> Result<bool, StorageUnavailable> {
        let table = table_for(symbol).map_err(StorageUnavailable)?;
        let sql = format!(
            "INSERT INTO {table} ({KLINE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (open_time) DO NOTHING"
        );
        let start = Instant::now();
        let written = self
            .client
            .execute(
                &sql,
                &[
                    &kline.open_time,
                    &kline.open,
                    &kline.high,
                    &kline.low,
                    &kline.close,
                    &kline.volume,
                    &kline.close_time,
                    &kline.quote_volume,
                    &kline.trade_count,
                    &kline.taker_buy_base_volume,
                    &kline.taker_buy_quote_volume,
                    &kline.reserved,
                ],
            )
            .await
            .map_err(|err| {
                metrics::counter!("klinevault.infra.postgres.errors_total", "op" => "insert")
                    .increment(1);
                StorageUnavailable(format!("insert into {table} failed: {err}"))
            })?;
        metrics::histogram!("klinevault.infra.postgres.insert_ms")
            .record(start.elapsed().as_secs_f64() * 1000.0);
        metrics::counter!("klinevault.infra.postgres.rows_written_total").increment(written);
        Ok(written > 0)
    }

    async fn range(&self, query: &RangeQuery) -> Result<Vec<Kline>, StorageUnavailable> {
        let table = table_for(&query.symbol).map_err(StorageUnavailable)?;
        let mut sql = format!("SELECT {KLINE_COLUMNS} FROM {table}");
        let mut conditions: Vec<String> = Vec::new();
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();

        if let Some(start) = query.start_ms.as_ref() {
            conditions.push(format!("open_time >= ${}", params.len() + 1));
            params.push(start);
        }
        if let Some(end) = query.end_ms.as_ref() {
            conditions.push(format!("open_time <= ${}", params.len() + 1));
            params.push(end);
        }
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(&format!(" ORDER BY open_time ASC LIMIT ${}", params.len() + 1));
        params.push(&query.limit);

        let rows = self.client.query(&sql, &params).await.map_err(|err| {
            metrics::counter!("klinevault.infra.postgres.errors_total", "op" => "range")
                .increment(1);
            StorageUnavailable(format!("range query on {table} failed: {err}"))
        })?;
        Ok(rows.iter().map(kline_from_row).collect())
    }
}

fn kline_from_row(row: &Row) -> Kline {
    Kline {
        open_time: row.get(0),
        open: row.get(1),
        high: row.get(2),
        low: row.get(3),
        close: row.get(4),
        volume: row.get(5),
        close_time: row.get(6),
        quote_volume: row.get(7),
        trade_count: row.get(8),
        taker_buy_base_volume: row.get(9),
        taker_buy_quote_volume: row.get(10),
        reserved: row.get(11),
    }
}

/// Derives the table name for a symbol. Symbols are interpolated into SQL,
/// so anything beyond plain ASCII alphanumerics is rejected.
fn table_for(symbol: &str) -> Result<String, String> {
    if symbol.is_empty() {
        return Err("symbol is empty".to_string());
    }
    if !symbol.chars().all(|ch| ch.is_ascii_alphanumeric()) {
        return Err(format!("invalid symbol: {symbol}"));
    }
    Ok(format!("kline_{}", symbol.to_ascii_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::table_for;

    #[test]
    fn table_for_lowercases_valid_symbols() {
        assert_eq!(table_for("BTCUSDT").expect("valid symbol"), "kline_btcusdt");
        assert_eq!(
            table_for("1INCHUSDT").expect("leading digit is fine after the prefix"),
            "kline_1inchusdt"
        );
    }

    #[test]
    fn table_for_rejects_injection_attempts() {
        assert!(table_for("").is_err());
        assert!(table_for("btc;drop").is_err());
        assert!(table_for("btc usdt").is_err());
        assert!(table_for("btc_usdt").is_err());
    }
}
