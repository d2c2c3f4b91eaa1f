//! First-order transition matrix between consecutive draws.
//!
//! Two scopes, computed and stored independently:
//! 1. per slot: each slot's draws in date order, paired with the previous
//!    draw of the same slot
//! 2. combined: every draw in (date, slot) order, paired with the
//!    immediately preceding draw regardless of slot
//!
//! Probabilities are `transitions / outgoing(from)` at 4 decimals. The
//! rounding uses largest-remainder apportionment, so each `from_number`'s
//! row sums to exactly 1.0000.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::sqlite::SqlitePool;
use sqlx::{Sqlite, Transaction};
use tracing::{debug, info};

use crate::storage::{Database, DrawStore};
use crate::types::{DrawRecord, DrawTime, MarkovEdge};

/// Probability resolution: 4 decimal places.
const SCALE: u32 = 4;
const UNITS: u64 = 10_u64.pow(SCALE);

// ---------------------------------------------------------------------------
// Pure computation
// ---------------------------------------------------------------------------

/// Count adjacent (from, to) pairs in a sequence.
pub fn transition_counts(sequence: &[u8]) -> BTreeMap<(u8, u8), u32> {
    let mut counts = BTreeMap::new();
    for pair in sequence.windows(2) {
        *counts.entry((pair[0], pair[1])).or_insert(0) += 1;
    }
    counts
}

/// Split `UNITS` across `counts` proportionally, rounding each share down
/// and handing the leftover units to the largest remainders.
fn apportion(counts: &[u32]) -> Vec<Decimal> {
    let total: u64 = counts.iter().map(|c| u64::from(*c)).sum();
    if total == 0 {
        return vec![Decimal::ZERO; counts.len()];
    }

    let mut units: Vec<u64> = Vec::with_capacity(counts.len());
    let mut remainders: Vec<(u64, usize)> = Vec::with_capacity(counts.len());
    for (i, c) in counts.iter().enumerate() {
        let scaled = u64::from(*c) * UNITS;
        units.push(scaled / total);
        remainders.push((scaled % total, i));
    }

    let leftover = UNITS - units.iter().sum::<u64>();
    // Largest remainder first; ties go to the earlier entry.
    remainders.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    for (_, i) in remainders.into_iter().take(leftover as usize) {
        units[i] += 1;
    }

    units
        .into_iter()
        .map(|u| Decimal::new(u as i64, SCALE))
        .collect()
}

/// Turn a chronological number sequence into normalized edges.
pub fn edges_from_sequence(sequence: &[u8], scope: Option<DrawTime>) -> Vec<MarkovEdge> {
    let counts = transition_counts(sequence);

    // Group by from_number; BTreeMap iteration keeps to_number ascending.
    let mut by_from: BTreeMap<u8, Vec<(u8, u32)>> = BTreeMap::new();
    for ((from, to), n) in counts {
        by_from.entry(from).or_default().push((to, n));
    }

    let mut edges = Vec::new();
    for (from, row) in by_from {
        let shares = apportion(&row.iter().map(|(_, n)| *n).collect::<Vec<_>>());
        for ((to, n), p) in row.into_iter().zip(shares) {
            edges.push(MarkovEdge {
                from_number: from,
                to_number: to,
                draw_time: scope,
                transitions: n,
                probability: p.to_f64().unwrap_or(0.0),
            });
        }
    }
    edges
}

/// Per-slot pass. `draws` must already be in chronological order.
pub fn slot_edges(draws: &[DrawRecord]) -> Vec<MarkovEdge> {
    DrawTime::ALL
        .iter()
        .flat_map(|&slot| {
            let sequence: Vec<u8> = draws
                .iter()
                .filter(|d| d.draw_time == slot)
                .map(|d| d.main_number)
                .collect();
            edges_from_sequence(&sequence, Some(slot))
        })
        .collect()
}

/// Combined pass over every slot. `draws` must be in (date, slot) order.
pub fn combined_edges(draws: &[DrawRecord]) -> Vec<MarkovEdge> {
    let sequence: Vec<u8> = draws.iter().map(|d| d.main_number).collect();
    edges_from_sequence(&sequence, None)
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarkovReport {
    pub slot_edges: usize,
    pub combined_edges: usize,
}

#[derive(Debug, sqlx::FromRow)]
struct EdgeRow {
    from_number: i64,
    to_number: i64,
    draw_time: Option<String>,
    transitions: i64,
    probability: f64,
}

/// Owns the `markov` table.
pub struct MarkovEngine {
    pool: SqlitePool,
    store: DrawStore,
}

impl MarkovEngine {
    pub fn new(db: &Database, store: DrawStore) -> Self {
        Self {
            pool: db.pool().clone(),
            store,
        }
    }

    /// Rebuild both scopes from the full draw history.
    pub async fn recompute(&self) -> Result<MarkovReport> {
        let draws = self.store.all_draws().await?;

        let per_slot = slot_edges(&draws);
        self.replace_scope("draw_time IS NOT NULL", &per_slot).await?;

        let combined = combined_edges(&draws);
        self.replace_scope("draw_time IS NULL", &combined).await?;

        let report = MarkovReport {
            slot_edges: per_slot.len(),
            combined_edges: combined.len(),
        };
        info!(
            draws = draws.len(),
            slot_edges = report.slot_edges,
            combined_edges = report.combined_edges,
            "Markov matrix recomputed"
        );
        Ok(report)
    }

    /// Clear the rows matching `scope_filter` and insert `edges`, in one
    /// transaction.
    async fn replace_scope(&self, scope_filter: &str, edges: &[MarkovEdge]) -> Result<()> {
        let computed_at = Utc::now().to_rfc3339();
        let mut tx: Transaction<'_, Sqlite> =
            self.pool.begin().await.context("Failed to begin markov transaction")?;

        sqlx::query(&format!("DELETE FROM markov WHERE {scope_filter}"))
            .execute(&mut *tx)
            .await
            .context("Failed to clear markov scope")?;

        for edge in edges {
            sqlx::query(
                r"
                INSERT INTO markov (from_number, to_number, draw_time, transitions, probability, computed_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ",
            )
            .bind(i64::from(edge.from_number))
            .bind(i64::from(edge.to_number))
            .bind(edge.draw_time.map(|t| t.as_str()))
            .bind(i64::from(edge.transitions))
            .bind(edge.probability)
            .bind(&computed_at)
            .execute(&mut *tx)
            .await
            .context("Failed to insert markov edge")?;
        }

        tx.commit().await.context("Failed to commit markov scope")?;
        debug!(scope = scope_filter, edges = edges.len(), "Markov scope replaced");
        Ok(())
    }

    /// Most likely successors of `from`, highest probability first.
    pub async fn top_transitions(&self, from: u8, scope: Option<DrawTime>, limit: u32) -> Result<Vec<MarkovEdge>> {
        let rows: Vec<EdgeRow> = sqlx::query_as(
            r"
            SELECT from_number, to_number, draw_time, transitions, probability
            FROM markov
            WHERE from_number = ?1 AND draw_time IS ?2
            ORDER BY probability DESC, to_number ASC
            LIMIT ?3
            ",
        )
        .bind(i64::from(from))
        .bind(scope.map(|t| t.as_str()))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .context("Failed to load markov edges")?;

        Ok(rows
            .into_iter()
            .filter_map(|r| {
                Some(MarkovEdge {
                    from_number: u8::try_from(r.from_number).ok()?,
                    to_number: u8::try_from(r.to_number).ok()?,
                    draw_time: match r.draw_time {
                        Some(t) => Some(t.parse().ok()?),
                        None => None,
                    },
                    transitions: u32::try_from(r.transitions).ok()?,
                    probability: r.probability,
                })
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
