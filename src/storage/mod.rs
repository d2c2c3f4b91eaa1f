//! Persistence layer.
//!
//! SQLite via `sqlx`. The schema lives in `migrations/` and is applied on
//! connect. This module owns the `draws` table; the analytics engines own
//! `stats` and `markov` and only read draws through `DrawStore`.
//!
//! Writes are one statement per record with no batch transaction, so a
//! failure halfway through leaves earlier records committed.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info, warn};

use crate::types::{DrawRecord, DrawTime, EngineError};

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Handle to the engine's SQLite database.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database at `url` and apply migrations.
    /// Failure here is the one error that aborts a run.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid database URL: {url}"))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database: {url}"))?;

        Self::migrate(pool).await
    }

    /// Private in-memory database (single connection so every query sees
    /// the same data). Used by tests.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await
            .context("Failed to open in-memory database")?;

        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to apply database migrations")?;
        debug!("Database migrations applied");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// ---------------------------------------------------------------------------
// Draw store
// ---------------------------------------------------------------------------

#[derive(Debug, sqlx::FromRow)]
struct DrawRow {
    draw_date: NaiveDate,
    draw_time: String,
    lottery_type: String,
    main_number: i64,
    companion_number: i64,
    animal_name: Option<String>,
}

impl TryFrom<DrawRow> for DrawRecord {
    type Error = EngineError;

    fn try_from(row: DrawRow) -> Result<Self, Self::Error> {
        let draw_time: DrawTime = row.draw_time.parse()?;
        let main = u8::try_from(row.main_number)
            .map_err(|_| EngineError::Parse(format!("stored main number {}", row.main_number)))?;
        let companion = u8::try_from(row.companion_number)
            .map_err(|_| EngineError::Parse(format!("stored companion {}", row.companion_number)))?;
        let record = DrawRecord::new(row.draw_date, draw_time, main, companion)
            .with_lottery_type(&row.lottery_type)
            .with_animal(row.animal_name);
        record.validate()?;
        Ok(record)
    }
}

/// Outcome of a batch upsert.
#[derive(Debug, Clone, Default)]
pub struct UpsertReport {
    /// Rows inserted or updated.
    pub affected: u64,
    /// Records rejected by validation or by the database.
    pub skipped: usize,
    /// Records that made it into the table, in input order.
    pub persisted: Vec<DrawRecord>,
}

const SELECT_DRAWS: &str = "SELECT draw_date, draw_time, lottery_type, main_number, \
                            companion_number, animal_name FROM draws";

/// Idempotent persistence of draw results for one lottery type.
#[derive(Clone)]
pub struct DrawStore {
    pool: SqlitePool,
    lottery_type: String,
}

impl DrawStore {
    pub fn new(db: &Database, lottery_type: &str) -> Self {
        Self {
            pool: db.pool().clone(),
            lottery_type: lottery_type.to_string(),
        }
    }

    pub fn lottery_type(&self) -> &str {
        &self.lottery_type
    }

    /// Insert-or-update every record keyed on (date, slot, lottery type).
    /// Numbers are overwritten; a stored animal name survives an incoming
    /// record that has none. Bad records are logged and skipped.
    pub async fn upsert(&self, records: &[DrawRecord]) -> UpsertReport {
        let mut report = UpsertReport::default();

        for record in records {
            if let Err(e) = record.validate() {
                warn!(record = %record, error = %e, "Rejected invalid draw");
                report.skipped += 1;
                continue;
            }
            match self.upsert_one(record).await {
                Ok(affected) => {
                    report.affected += affected;
                    report.persisted.push(record.clone());
                }
                Err(e) => {
                    warn!(record = %record, error = %format!("{e:#}"), "Draw upsert failed, skipping");
                    report.skipped += 1;
                }
            }
        }

        info!(
            received = records.len(),
            affected = report.affected,
            skipped = report.skipped,
            "Draws persisted"
        );
        report
    }

    async fn upsert_one(&self, record: &DrawRecord) -> Result<u64> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r"
            INSERT INTO draws (draw_date, draw_time, lottery_type, main_number,
                               companion_number, animal_name, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            ON CONFLICT(draw_date, draw_time, lottery_type) DO UPDATE SET
                main_number = excluded.main_number,
                companion_number = excluded.companion_number,
                animal_name = COALESCE(excluded.animal_name, draws.animal_name),
                updated_at = excluded.updated_at
            ",
        )
        .bind(record.draw_date)
        .bind(record.draw_time.as_str())
        .bind(&record.lottery_type)
        .bind(i64::from(record.main_number))
        .bind(i64::from(record.companion_number))
        .bind(record.animal_name.as_deref())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::Persistence(e.to_string()))?;

        Ok(result.rows_affected())
    }

    /// Number of stored draws for this lottery type.
    pub async fn count(&self) -> Result<i64> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM draws WHERE lottery_type = ?1")
            .bind(&self.lottery_type)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count draws")?;
        Ok(n)
    }

    /// Most recent draws, newest first.
    pub async fn recent(&self, limit: u32) -> Result<Vec<DrawRecord>> {
        // Slot labels "11am" < "3pm" < "9pm" sort chronologically as text.
        let rows: Vec<DrawRow> = sqlx::query_as(&format!(
            "{SELECT_DRAWS} WHERE lottery_type = ?1 ORDER BY draw_date DESC, draw_time DESC LIMIT ?2"
        ))
        .bind(&self.lottery_type)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .context("Failed to load recent draws")?;
        Ok(Self::into_records(rows))
    }

    /// Draws on or after `since`, in chronological (date, slot) order.
    pub async fn draws_since(&self, since: NaiveDate) -> Result<Vec<DrawRecord>> {
        let rows: Vec<DrawRow> =
            sqlx::query_as(&format!("{SELECT_DRAWS} WHERE lottery_type = ?1 AND draw_date >= ?2"))
                .bind(&self.lottery_type)
                .bind(since)
                .fetch_all(&self.pool)
                .await
                .context("Failed to load draws")?;
        Ok(Self::into_chronological(rows))
    }

    /// Full history in chronological (date, slot) order.
    pub async fn all_draws(&self) -> Result<Vec<DrawRecord>> {
        let rows: Vec<DrawRow> = sqlx::query_as(&format!("{SELECT_DRAWS} WHERE lottery_type = ?1"))
            .bind(&self.lottery_type)
            .fetch_all(&self.pool)
            .await
            .context("Failed to load draws")?;
        Ok(Self::into_chronological(rows))
    }

    fn into_records(rows: Vec<DrawRow>) -> Vec<DrawRecord> {
        rows.into_iter()
            .filter_map(|row| match DrawRecord::try_from(row) {
                Ok(r) => Some(r),
                Err(e) => {
                    warn!(error = %e, "Ignoring unreadable stored draw");
                    None
                }
            })
            .collect()
    }

    fn into_chronological(rows: Vec<DrawRow>) -> Vec<DrawRecord> {
        let mut draws = Self::into_records(rows);
        draws.sort_by_key(|d| (d.draw_date, d.draw_time));
        draws
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
