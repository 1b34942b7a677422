// In crates/ledger/src/sqlite.rs

use crate::{Ledger, Result};
use app_config::types::LedgerSettings;
use async_trait::async_trait;
use core_types::{Symbol, TradeRecord};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

/// A wrapper around the `sqlx` SQLite connection pool.
///
/// Each record is stored whole as JSON, next to a few indexed columns for
/// lookups. Update and delete are blocked by triggers in the schema.
#[derive(Debug, Clone)]
pub struct SqliteLedger(SqlitePool);

impl SqliteLedger {
    /// Opens (creating if needed) the database at `settings.url` and runs migrations.
    pub async fn connect(settings: &LedgerSettings) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&settings.url)?.create_if_missing(true);

        let in_memory = settings.url.contains(":memory:");
        if !in_memory {
            if let Some(parent) = options.get_filename().parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        // An in-memory database exists per connection, so the pool must hold exactly one.
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .connect_with(options)
            .await?;

        // Run database migrations. This ensures the schema is up-to-date.
        sqlx::migrate!("../../migrations").run(&pool).await?;

        tracing::info!(url = %settings.url, "Ledger ready.");
        Ok(Self(pool))
    }

    fn decode(rows: Vec<sqlx::sqlite::SqliteRow>) -> Result<Vec<TradeRecord>> {
        rows.into_iter()
            .map(|row| -> Result<TradeRecord> {
                let payload: String = row.try_get("payload")?;
                Ok(serde_json::from_str(&payload)?)
            })
            .collect()
    }
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn append(&self, record: &TradeRecord) -> Result<()> {
        let payload = serde_json::to_string(record)?;
        sqlx::query(
            r#"
            INSERT INTO trade_records
                (instrument, kind, status, position_id, client_token, simulated, recorded_at, payload)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.instrument.as_str())
        .bind(record.kind.to_string())
        .bind(record.position.status.to_string())
        .bind(record.position.id as i64)
        .bind(record.client_token.as_ref().map(|t| t.as_str().to_string()))
        .bind(record.simulated)
        .bind(record.timestamp)
        .bind(payload)
        .execute(&self.0)
        .await?;
        Ok(())
    }

    async fn read_last_state(&self, instrument: &Symbol) -> Result<Option<TradeRecord>> {
        let rows = sqlx::query("SELECT payload FROM trade_records WHERE instrument = ? ORDER BY seq DESC LIMIT 1")
            .bind(instrument.as_str())
            .fetch_all(&self.0)
            .await?;
        Ok(Self::decode(rows)?.pop())
    }

    async fn records(&self, instrument: &Symbol, limit: Option<usize>) -> Result<Vec<TradeRecord>> {
        // SQLite treats a negative LIMIT as no limit.
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let rows = sqlx::query(
            r#"
            SELECT payload FROM (
                SELECT seq, payload FROM trade_records
                WHERE instrument = ?
                ORDER BY seq DESC
                LIMIT ?
            ) ORDER BY seq ASC
            "#,
        )
        .bind(instrument.as_str())
        .bind(limit)
        .fetch_all(&self.0)
        .await?;
        Self::decode(rows)
    }
}
