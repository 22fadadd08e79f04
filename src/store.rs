//! ==============================================================================
//! store.rs - append-only readings history (sqlite)
//! ==============================================================================
//!
//! one table, one commit per reading, no updates or deletes. rows are read
//! back newest first. timestamps are naive local civil time (see domain.rs).
//!
//! ==============================================================================

use crate::domain::{now_ist, NewReading, Reading, Source};
use crate::error::StoreError;

use chrono::NaiveDateTime;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::str::FromStr;

pub const DEFAULT_LIMIT: i64 = 100;

#[derive(Clone)]
pub struct ReadingsStore {
    pool: SqlitePool,
}

#[derive(FromRow)]
struct ReadingRow {
    id: i64,
    timestamp: NaiveDateTime,
    temperature: Option<f64>,
    humidity: Option<f64>,
    soil: Option<i64>,
    pump: bool,
    fan: bool,
    source: String,
}

impl From<ReadingRow> for Reading {
    fn from(row: ReadingRow) -> Self {
        Reading {
            id: row.id,
            timestamp: row.timestamp,
            temperature: row.temperature,
            humidity: row.humidity,
            soil: row.soil,
            pump: row.pump,
            fan: row.fan,
            source: Source::from_tag(&row.source),
        }
    }
}

impl ReadingsStore {
    /// connect (creating the database file if needed) and make sure the table exists
    pub async fn open(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.create_schema().await?;
        Ok(store)
    }

    /// private in-memory database, one connection that is never recycled
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.create_schema().await?;
        Ok(store)
    }

    async fn create_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS readings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                temperature REAL,
                humidity REAL,
                soil INTEGER,
                pump BOOLEAN NOT NULL DEFAULT 0,
                fan BOOLEAN NOT NULL DEFAULT 0,
                source TEXT NOT NULL DEFAULT 'unknown'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS ix_readings_timestamp ON readings (timestamp DESC)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// stamp with the current local time and commit; returns the new row id
    pub async fn append(&self, reading: &NewReading) -> Result<i64, StoreError> {
        self.append_at(reading, now_ist()).await
    }

    async fn append_at(&self, reading: &NewReading, timestamp: NaiveDateTime) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO readings (timestamp, temperature, humidity, soil, pump, fan, source) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(timestamp)
        .bind(reading.temperature)
        .bind(reading.humidity)
        .bind(reading.soil)
        .bind(reading.pump)
        .bind(reading.fan)
        .bind(reading.source.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// newest first; equal timestamps fall back to insertion order
    pub async fn list_recent(&self, limit: i64) -> Result<Vec<Reading>, StoreError> {
        let rows: Vec<ReadingRow> = sqlx::query_as(
            "SELECT id, timestamp, temperature, humidity, soil, pump, fan, source \
             FROM readings ORDER BY timestamp DESC, id DESC LIMIT ?",
        )
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Reading::from).collect())
    }
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn reading(temperature: f64, source: Source) -> NewReading {
        NewReading { temperature: Some(temperature), humidity: None, soil: Some(42), pump: true, fan: false, source }
    }

    #[tokio::test]
    async fn test_list_recent_newest_first() {
        let store = ReadingsStore::in_memory().await.unwrap();
        for t in [1.0, 2.0, 3.0] {
            store.append(&reading(t, Source::Blynk)).await.unwrap();
        }

        let recent = store.list_recent(2).await.unwrap();
        let temps: Vec<_> = recent.iter().map(|r| r.temperature).collect();
        assert_eq!(temps, vec![Some(3.0), Some(2.0)]);
    }

    #[tokio::test]
    async fn test_orders_by_timestamp_not_id() {
        let store = ReadingsStore::in_memory().await.unwrap();
        let day = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        store.append_at(&reading(1.0, Source::Esp32), day.and_hms_opt(12, 0, 0).unwrap()).await.unwrap();
        store.append_at(&reading(2.0, Source::Esp32), day.and_hms_opt(9, 0, 0).unwrap()).await.unwrap();

        let recent = store.list_recent(DEFAULT_LIMIT).await.unwrap();
        assert_eq!(recent[0].temperature, Some(1.0));
        assert_eq!(recent[0].timestamp, day.and_hms_opt(12, 0, 0).unwrap());
        assert_eq!(recent[1].temperature, Some(2.0));
    }

    #[tokio::test]
    async fn test_round_trips_fields_and_ids() {
        let store = ReadingsStore::in_memory().await.unwrap();
        let first = store.append(&reading(20.5, Source::Esp32)).await.unwrap();
        let second = store.append(&reading(21.5, Source::Blynk)).await.unwrap();
        assert!(second > first);

        let recent = store.list_recent(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        let esp = recent.iter().find(|r| r.id == first).unwrap();
        assert_eq!(esp.source, Source::Esp32);
        assert_eq!(esp.humidity, None);
        assert_eq!(esp.soil, Some(42));
        assert!(esp.pump);
        assert!(!esp.fan);
    }

    #[tokio::test]
    async fn test_zero_and_negative_limits_are_empty() {
        let store = ReadingsStore::in_memory().await.unwrap();
        store.append(&reading(1.0, Source::Unknown)).await.unwrap();
        assert!(store.list_recent(0).await.unwrap().is_empty());
        assert!(store.list_recent(-1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_source_tag_reads_back_as_unknown() {
        let store = ReadingsStore::in_memory().await.unwrap();
        sqlx::query("INSERT INTO readings (timestamp, pump, fan, source) VALUES ('2025-01-01 00:00:00', 0, 0, 'lora')")
            .execute(&store.pool)
            .await
            .unwrap();

        let recent = store.list_recent(1).await.unwrap();
        assert_eq!(recent[0].source, Source::Unknown);
        assert_eq!(recent[0].temperature, None);
    }
}
