//! Batch orchestration: scrape → persist → notify → statistics → Markov.
//!
//! One invocation is one finite run. Per-source, per-record and
//! per-notification failures are logged and skipped; only database errors
//! during recomputation surface to the caller.

use std::collections::{BTreeMap, HashSet};

use anyhow::Result;
use chrono::NaiveDate;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use super::notifier::{Notifier, NotifyOutcome};
use crate::analytics::markov::{MarkovEngine, MarkovReport};
use crate::analytics::stats::StatsEngine;
use crate::config::AppConfig;
use crate::sources::api::ApiScraper;
use crate::sources::fetcher::Fetcher;
use crate::sources::html::HtmlScraper;
use crate::sources::DrawSource;
use crate::storage::{Database, DrawStore};
use crate::types::{DrawRecord, DrawTime};

// ---------------------------------------------------------------------------
// Run context
// ---------------------------------------------------------------------------

/// Per-run mutable state, threaded through the pipeline by `&mut`.
#[derive(Debug)]
pub struct RunContext {
    pub run_id: Uuid,
    notified: HashSet<(NaiveDate, DrawTime)>,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            notified: HashSet::new(),
        }
    }

    /// Record an announcement. Returns `false` if it was already recorded.
    pub fn mark_notified(&mut self, draw_date: NaiveDate, draw_time: DrawTime) -> bool {
        self.notified.insert((draw_date, draw_time))
    }

    pub fn notified_count(&self) -> usize {
        self.notified.len()
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary of one `scrape` run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub fetched: usize,
    pub failed_sources: Vec<&'static str>,
    pub persisted: usize,
    pub rejected: usize,
    pub notified: usize,
    pub stat_rows: usize,
    pub markov: MarkovReport,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Pipeline {
    /// Consulted in order; later sources overwrite earlier ones on conflict.
    sources: Vec<Box<dyn DrawSource>>,
    store: DrawStore,
    notifier: Notifier,
    stats: StatsEngine,
    markov: MarkovEngine,
    periods: Vec<u32>,
}

impl Pipeline {
    pub fn new(
        sources: Vec<Box<dyn DrawSource>>,
        db: &Database,
        lottery_type: &str,
        notifier: Notifier,
        periods: Vec<u32>,
    ) -> Self {
        let store = DrawStore::new(db, lottery_type);
        Self {
            sources,
            stats: StatsEngine::new(db, store.clone()),
            markov: MarkovEngine::new(db, store.clone()),
            store,
            notifier,
            periods,
        }
    }

    /// Wire up the configured sources and notifier.
    pub fn from_config(config: &AppConfig, db: &Database) -> Result<Self> {
        let lottery_type = config.engine.lottery_type.as_str();
        let fetcher = Fetcher::new(&config.fetch)?;

        // HTML first so the API's animal names win on conflict.
        let mut sources: Vec<Box<dyn DrawSource>> = Vec::new();
        if config.html.enabled {
            sources.push(Box::new(HtmlScraper::new(fetcher.clone(), &config.html, lottery_type)?));
        }
        if config.api.enabled {
            sources.push(Box::new(ApiScraper::new(fetcher, &config.api, lottery_type)));
        }
        if sources.is_empty() {
            warn!("No sources enabled, scrape runs will only recompute analytics");
        }

        let notifier = Notifier::new(&config.notifier, config.notifier_secret())?;

        Ok(Self::new(
            sources,
            db,
            lottery_type,
            notifier,
            config.stats.periods.clone(),
        ))
    }

    pub fn store(&self) -> &DrawStore {
        &self.store
    }

    pub fn stats(&self) -> &StatsEngine {
        &self.stats
    }

    pub fn markov(&self) -> &MarkovEngine {
        &self.markov
    }

    /// Full run: every source, upsert, announce today's draws, recompute.
    pub async fn run_scrape(&self, ctx: &mut RunContext, today: NaiveDate) -> Result<RunReport> {
        let span = info_span!("scrape", run_id = %ctx.run_id, %today);
        let mut report = RunReport::default();

        let records = self.collect(today, &mut report).instrument(span.clone()).await;
        report.fetched = records.len();

        let upsert = self.store.upsert(&records).instrument(span.clone()).await;
        report.persisted = upsert.persisted.len();
        report.rejected = upsert.skipped;

        report.notified = self
            .announce(ctx, &upsert.persisted, today)
            .instrument(span.clone())
            .await;

        let (stat_rows, markov) = self.run_analytics(today).instrument(span.clone()).await?;
        report.stat_rows = stat_rows;
        report.markov = markov;

        let _guard = span.enter();
        info!(
            fetched = report.fetched,
            persisted = report.persisted,
            rejected = report.rejected,
            notified = report.notified,
            failed_sources = ?report.failed_sources,
            "Scrape run complete"
        );
        Ok(report)
    }

    /// Recompute statistics and the Markov matrix from stored draws.
    pub async fn run_analytics(&self, today: NaiveDate) -> Result<(usize, MarkovReport)> {
        let stat_rows = self.stats.recompute(&self.periods, today).await?;
        let markov = self.markov.recompute().await?;
        Ok((stat_rows, markov))
    }

    async fn collect(&self, today: NaiveDate, report: &mut RunReport) -> Vec<DrawRecord> {
        let mut all = Vec::new();
        for source in &self.sources {
            match source.fetch_draws(today).await {
                Ok(mut draws) => {
                    info!(source = source.name(), count = draws.len(), "Source fetched");
                    all.append(&mut draws);
                }
                Err(e) => {
                    warn!(source = source.name(), error = %e, "Source failed, continuing");
                    report.failed_sources.push(source.name());
                }
            }
        }
        all
    }

    /// Announce draws dated `today`, in slot order. Returns how many were sent.
    async fn announce(&self, ctx: &mut RunContext, persisted: &[DrawRecord], today: NaiveDate) -> usize {
        // Later sources overwrote earlier ones in the store; announce what was stored.
        let todays: BTreeMap<DrawTime, &DrawRecord> = persisted
            .iter()
            .filter(|d| d.draw_date == today)
            .map(|d| (d.draw_time, d))
            .collect();

        let mut sent = 0;
        for draw in todays.into_values() {
            let outcome = self
                .notifier
                .notify(ctx, draw.draw_date, draw.draw_time, draw.main_number)
                .await;
            if outcome == NotifyOutcome::Sent {
                sent += 1;
            }
        }
        sent
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
