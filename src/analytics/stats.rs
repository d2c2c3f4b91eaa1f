//! Hot/cold number statistics.
//!
//! For every lookback period and every scope (each draw slot, plus all
//! slots combined) the engine counts how often each number came up, when it
//! was last seen and how long ago that was, then classifies it:
//!
//! - hot:  frequency >= max(mean + population stddev, 5) over the scope's numbers,
//!         or >= 5 when the stddev is undefined (fewer than two numbers)
//! - cold: gap_days >= period_days / 3
//!
//! Only numbers that appeared inside the window get a row. The `stats`
//! table is a materialized view: cleared and rebuilt on every run.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, Utc};
use sqlx::sqlite::SqlitePool;
use tracing::{debug, info};

use crate::storage::{Database, DrawStore};
use crate::types::{scope_label, DrawRecord, DrawTime, StatRecord};

/// Lowest hot threshold, and the fallback when it cannot be computed.
pub const HOT_FLOOR: f64 = 5.0;

// ---------------------------------------------------------------------------
// Pure computation
// ---------------------------------------------------------------------------

/// Mean + population standard deviation, if at least two values exist.
/// The population form keeps `frequency - threshold` non-decreasing in
/// `frequency` for any number of values.
fn mean_plus_stddev(values: &[u32]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().map(|v| f64::from(*v)).sum::<f64>() / n;
    let var = values
        .iter()
        .map(|v| (f64::from(*v) - mean).powi(2))
        .sum::<f64>()
        / n;
    Some(mean + var.sqrt())
}

/// Frequency at or above which a number counts as hot.
pub fn hot_threshold(frequencies: &[u32]) -> f64 {
    mean_plus_stddev(frequencies)
        .map(|t| t.max(HOT_FLOOR))
        .unwrap_or(HOT_FLOOR)
}

/// Gap (in days) at or above which a number counts as cold.
pub fn cold_threshold(period_days: u32) -> i64 {
    i64::from(period_days / 3)
}

/// Statistics for one (period, scope) pair. `draws` may contain any dates
/// and slots; the window and scope filters are applied here.
pub fn compute_scope(
    draws: &[DrawRecord],
    period_days: u32,
    scope: Option<DrawTime>,
    today: NaiveDate,
) -> Vec<StatRecord> {
    let start = today - Duration::days(i64::from(period_days));

    let mut seen: BTreeMap<u8, (u32, NaiveDate)> = BTreeMap::new();
    for draw in draws
        .iter()
        .filter(|d| d.draw_date >= start && d.draw_date <= today)
        .filter(|d| scope.map_or(true, |t| d.draw_time == t))
    {
        let entry = seen.entry(draw.main_number).or_insert((0, draw.draw_date));
        entry.0 += 1;
        entry.1 = entry.1.max(draw.draw_date);
    }

    let frequencies: Vec<u32> = seen.values().map(|(f, _)| *f).collect();
    let hot_at = hot_threshold(&frequencies);
    let cold_at = cold_threshold(period_days);

    seen.into_iter()
        .map(|(number, (frequency, last_appearance))| {
            let gap_days = (today - last_appearance).num_days();
            StatRecord {
                number,
                draw_time: scope,
                period_days,
                frequency,
                last_appearance,
                gap_days,
                is_hot: f64::from(frequency) >= hot_at,
                is_cold: gap_days >= cold_at,
            }
        })
        .collect()
}

/// Every (period, scope) combination: |periods| x (|slots| + 1) groups.
pub fn compute_all(draws: &[DrawRecord], periods: &[u32], today: NaiveDate) -> Vec<StatRecord> {
    let scopes: Vec<Option<DrawTime>> = DrawTime::ALL.iter().copied().map(Some).chain([None]).collect();

    let mut out = Vec::new();
    for &period in periods {
        for &scope in &scopes {
            let rows = compute_scope(draws, period, scope, today);
            debug!(
                period,
                scope = scope_label(scope),
                numbers = rows.len(),
                hot = rows.iter().filter(|r| r.is_hot).count(),
                cold = rows.iter().filter(|r| r.is_cold).count(),
                "Scope computed"
            );
            out.extend(rows);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, sqlx::FromRow)]
struct StatRow {
    number: i64,
    draw_time: Option<String>,
    period_days: i64,
    frequency: i64,
    last_appearance: NaiveDate,
    gap_days: i64,
    is_hot: bool,
    is_cold: bool,
}

impl StatRow {
    fn into_record(self) -> Option<StatRecord> {
        let draw_time = match self.draw_time {
            Some(t) => Some(t.parse().ok()?),
            None => None,
        };
        Some(StatRecord {
            number: u8::try_from(self.number).ok()?,
            draw_time,
            period_days: u32::try_from(self.period_days).ok()?,
            frequency: u32::try_from(self.frequency).ok()?,
            last_appearance: self.last_appearance,
            gap_days: self.gap_days,
            is_hot: self.is_hot,
            is_cold: self.is_cold,
        })
    }
}

/// Owns the `stats` table.
pub struct StatsEngine {
    pool: SqlitePool,
    store: DrawStore,
}

impl StatsEngine {
    pub fn new(db: &Database, store: DrawStore) -> Self {
        Self {
            pool: db.pool().clone(),
            store,
        }
    }

    /// Rebuild the whole `stats` table for `periods`, relative to `today`.
    /// Clear and repopulate run in one transaction. Returns rows written.
    pub async fn recompute(&self, periods: &[u32], today: NaiveDate) -> Result<usize> {
        let longest = periods.iter().copied().max().unwrap_or(0);
        let draws = self
            .store
            .draws_since(today - Duration::days(i64::from(longest)))
            .await?;
        let rows = compute_all(&draws, periods, today);

        let computed_at = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await.context("Failed to begin stats transaction")?;

        sqlx::query("DELETE FROM stats")
            .execute(&mut *tx)
            .await
            .context("Failed to clear stats")?;

        for row in &rows {
            sqlx::query(
                r"
                INSERT INTO stats (number, draw_time, period_days, frequency, last_appearance,
                                   gap_days, is_hot, is_cold, computed_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ",
            )
            .bind(i64::from(row.number))
            .bind(row.draw_time.map(|t| t.as_str()))
            .bind(i64::from(row.period_days))
            .bind(i64::from(row.frequency))
            .bind(row.last_appearance)
            .bind(row.gap_days)
            .bind(row.is_hot)
            .bind(row.is_cold)
            .bind(&computed_at)
            .execute(&mut *tx)
            .await
            .context("Failed to insert stat row")?;
        }

        tx.commit().await.context("Failed to commit stats")?;

        info!(
            periods = ?periods,
            draws = draws.len(),
            rows = rows.len(),
            hot = rows.iter().filter(|r| r.is_hot).count(),
            cold = rows.iter().filter(|r| r.is_cold).count(),
            "Statistics recomputed"
        );
        Ok(rows.len())
    }

    /// Stored rows for one scope, most frequent first.
    pub async fn hot_cold(&self, period_days: u32, scope: Option<DrawTime>) -> Result<Vec<StatRecord>> {
        let rows: Vec<StatRow> = sqlx::query_as(
            r"
            SELECT number, draw_time, period_days, frequency, last_appearance,
                   gap_days, is_hot, is_cold
            FROM stats
            WHERE period_days = ?1 AND draw_time IS ?2
            ORDER BY frequency DESC, number ASC
            ",
        )
        .bind(i64::from(period_days))
        .bind(scope.map(|t| t.as_str()))
        .fetch_all(&self.pool)
        .await
        .context("Failed to load stats")?;

        Ok(rows.into_iter().filter_map(StatRow::into_record).collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn today() -> NaiveDate {
        date(2025, 6, 30)
    }

    /// `count` draws of `number` in the evening slot, spread over recent days.
    fn repeat(number: u8, count: u32, offset: i64) -> Vec<DrawRecord> {
        (0..count)
            .map(|i| {
                DrawRecord::new(
                    today() - Duration::days(offset + i64::from(i)),
                    DrawTime::Evening,
                    number,
                    0,
                )
            })
            .collect()
    }

    #[test]
    fn test_hot_threshold_fallback_and_floor() {
        assert_eq!(hot_threshold(&[]), HOT_FLOOR);
        assert_eq!(hot_threshold(&[12]), HOT_FLOOR);
        // mean 1, stddev 0 -> floored
        assert_eq!(hot_threshold(&[1, 1, 1]), HOT_FLOOR);
        // mean 10, population stddev 2
        let t = hot_threshold(&[8, 12]);
        assert!((t - 12.0).abs() < 1e-9);
        // mean 10, population stddev 3
        let t = hot_threshold(&[7, 7, 13, 13]);
        assert!((t - 13.0).abs() < 1e-9);
    }

    #[test]
    fn test_cold_threshold_floors() {
        assert_eq!(cold_threshold(30), 10);
        assert_eq!(cold_threshold(31), 10);
        assert_eq!(cold_threshold(2), 0);
    }

    #[test]
    fn test_frequent_number_is_hot() {
        // Number 7 nine times, twenty others at 2/3/4 times (mean ~3).
        let mut draws = repeat(7, 9, 0);
        for n in 10..30u8 {
            let freq = 2 + u32::from(n % 3);
            draws.extend(repeat(n, freq, 1));
        }

        let rows = compute_scope(&draws, 30, None, today());
        let seven = rows.iter().find(|r| r.number == 7).unwrap();
        assert_eq!(seven.frequency, 9);
        assert!(seven.is_hot);
        assert!(rows.iter().filter(|r| r.number != 7).all(|r| !r.is_hot));
    }

    #[test]
    fn test_long_absent_number_is_cold() {
        let mut draws = vec![DrawRecord::new(today() - Duration::days(25), DrawTime::Morning, 50, 0)];
        draws.extend(repeat(1, 3, 0));

        let rows = compute_scope(&draws, 30, None, today());
        let fifty = rows.iter().find(|r| r.number == 50).unwrap();
        assert_eq!(fifty.gap_days, 25);
        assert!(fifty.is_cold);

        let one = rows.iter().find(|r| r.number == 1).unwrap();
        assert_eq!(one.gap_days, 0);
        assert!(!one.is_cold);
    }

    #[test]
    fn test_window_and_scope_filters() {
        let draws = vec![
            DrawRecord::new(today() - Duration::days(40), DrawTime::Morning, 1, 0),
            DrawRecord::new(today() - Duration::days(5), DrawTime::Morning, 2, 0),
            DrawRecord::new(today() - Duration::days(5), DrawTime::Evening, 3, 0),
            DrawRecord::new(today() + Duration::days(2), DrawTime::Evening, 4, 0),
        ];

        let morning = compute_scope(&draws, 30, Some(DrawTime::Morning), today());
        assert_eq!(morning.iter().map(|r| r.number).collect::<Vec<_>>(), vec![2]);
        assert!(morning.iter().all(|r| r.draw_time == Some(DrawTime::Morning)));

        let combined = compute_scope(&draws, 60, None, today());
        assert_eq!(combined.iter().map(|r| r.number).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_last_appearance_is_most_recent() {
        let draws = vec![
            DrawRecord::new(today() - Duration::days(3), DrawTime::Morning, 9, 0),
            DrawRecord::new(today() - Duration::days(12), DrawTime::Evening, 9, 0),
        ];
        let rows = compute_scope(&draws, 30, None, today());
        assert_eq!(rows[0].last_appearance, today() - Duration::days(3));
        assert_eq!(rows[0].frequency, 2);
    }

    #[test]
    fn test_hot_is_monotonic_in_frequency() {
        let base: Vec<(u8, u32)> = (0..15u8).map(|n| (n, 1 + u32::from(n % 5))).collect();
        let build = |target_freq: u32| {
            let mut draws = Vec::new();
            for (n, f) in &base {
                let f = if *n == 0 { target_freq } else { *f };
                draws.extend(repeat(*n, f, 0));
            }
            draws
        };

        let mut was_hot = true;
        for freq in (1..=12u32).rev() {
            let rows = compute_scope(&build(freq), 30, None, today());
            let hot = rows.iter().find(|r| r.number == 0).map(|r| r.is_hot).unwrap_or(false);
            // Once cold on the way down, never hot again.
            assert!(was_hot || !hot, "freq {freq} flipped back to hot");
            was_hot = hot;
        }
    }

    #[test]
    fn test_hot_is_monotonic_with_two_numbers() {
        let hot_at = |freq: u32, other: u32| {
            let mut draws = repeat(7, freq, 0);
            draws.extend(repeat(8, other, 0).into_iter().map(|mut d| {
                d.draw_time = DrawTime::Morning;
                d
            }));
            compute_scope(&draws, 30, None, today())
                .iter()
                .find(|r| r.number == 7)
                .map(|r| r.is_hot)
                .unwrap_or(false)
        };

        assert!(hot_at(7, 6));
        assert!(hot_at(6, 6));
        for other in 1..=12u32 {
            for freq in 2..=12u32 {
                assert!(
                    hot_at(freq, other) || !hot_at(freq - 1, other),
                    "freq {freq} -> {} turned hot (other at {other})",
                    freq - 1
                );
            }
        }
    }

    #[test]
    fn test_compute_all_covers_every_scope() {
        let draws = repeat(5, 2, 0);
        let rows = compute_all(&draws, &[30, 60], today());
        // number 5 appears only in the evening slot: evening + combined, per period
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().any(|r| r.draw_time.is_none() && r.period_days == 60));
    }

    #[tokio::test]
    async fn test_recompute_replaces_table() {
        let db = Database::in_memory().await.unwrap();
        let store = DrawStore::new(&db, "diaria");
        let engine = StatsEngine::new(&db, store.clone());

        store.upsert(&repeat(7, 3, 0)).await;
        let written = engine.recompute(&[30], today()).await.unwrap();
        assert_eq!(written, 2); // evening + combined

        // A later run with a shorter history must not leave stale rows.
        store.upsert(&repeat(8, 1, 5)).await;
        engine.recompute(&[30, 60], today()).await.unwrap();

        let combined = engine.hot_cold(30, None).await.unwrap();
        assert_eq!(combined.len(), 2);
        assert_eq!(combined[0].number, 7);
        assert_eq!(combined[0].frequency, 3);

        let evening = engine.hot_cold(60, Some(DrawTime::Evening)).await.unwrap();
        assert_eq!(evening.len(), 2);
        assert!(engine.hot_cold(30, Some(DrawTime::Morning)).await.unwrap().is_empty());
    }
}
