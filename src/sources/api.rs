//! Per-slot JSON game API.
//!
//! Each draw slot is published as its own "site game". A game document
//! carries a `score_layout` (option definitions: opaque id + label such as
//! `"34 Música"`) and a list of `sessions`, one per calendar date, whose
//! `score[0]` row holds three option ids: main number, unused, companion.
//!
//! Endpoint: `{base_url}/site-games/{site_game_id}`
//! Response: `{ "game": { "score_layout": [...], "sessions": [...] } }`
//! (the `game` wrapper is optional).

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use futures::future::join_all;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::fetcher::Fetcher;
use super::{split_leading_number, DrawSource};
use crate::config::{ApiSourceConfig, SiteGameConfig};
use crate::types::{DrawRecord, DrawTime, ParseOutcome, MAX_COMPANION_NUMBER, MAX_MAIN_NUMBER};

const SOURCE_NAME: &str = "api";

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GameDocument {
    #[serde(default)]
    score_layout: Vec<LayoutRow>,
    #[serde(default)]
    sessions: Vec<ApiSession>,
}

/// Layout rows show up either as bare option arrays or wrapped in an
/// object with an `options` field; single options are tolerated too.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LayoutRow {
    Options(Vec<LayoutOption>),
    Group { options: Vec<LayoutOption> },
    Single(LayoutOption),
}

impl LayoutRow {
    fn options(&self) -> &[LayoutOption] {
        match self {
            LayoutRow::Options(opts) | LayoutRow::Group { options: opts } => opts,
            LayoutRow::Single(opt) => std::slice::from_ref(opt),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LayoutOption {
    id: Value,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ApiSession {
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    score: Option<Vec<Vec<Value>>>,
}

/// Option ids arrive as strings or numbers; compare them as strings.
fn option_key(id: &Value) -> Option<String> {
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_session_date(raw: &str) -> Option<NaiveDate> {
    let day = raw.trim().get(..10)?;
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

fn parse_session(
    session: &ApiSession,
    labels: &HashMap<String, String>,
    slot: DrawTime,
    lottery_type: &str,
) -> ParseOutcome<DrawRecord> {
    let Some(raw_date) = session.date.as_deref() else {
        return ParseOutcome::skipped("session without date");
    };
    let Some(date) = parse_session_date(raw_date) else {
        return ParseOutcome::skipped(format!("unparseable session date {raw_date:?}"));
    };
    let Some(row) = session.score.as_ref().and_then(|rows| rows.first()) else {
        return ParseOutcome::skipped(format!("{date}: session without score"));
    };

    let label_of = |idx: usize| row.get(idx).and_then(option_key).and_then(|k| labels.get(&k));

    let Some(main_label) = label_of(0) else {
        return ParseOutcome::skipped(format!("{date}: main option id not in layout"));
    };
    let (main, animal) = match split_leading_number(main_label) {
        Some((n, animal)) if n <= u32::from(MAX_MAIN_NUMBER) => (n as u8, animal),
        _ => return ParseOutcome::skipped(format!("{date}: invalid main label {main_label:?}")),
    };

    let companion = label_of(2)
        .and_then(|label| split_leading_number(label))
        .map(|(n, _)| n)
        .filter(|n| *n <= u32::from(MAX_COMPANION_NUMBER))
        .map(|n| n as u8)
        .unwrap_or(0);

    ParseOutcome::Parsed(
        DrawRecord::new(date, slot, main, companion)
            .with_animal(animal)
            .with_lottery_type(lottery_type),
    )
}

/// Parse one slot's game document. Fails only when the document shape is
/// unusable; individual sessions are skipped with a reason.
pub fn parse_game_document(
    value: &Value,
    slot: DrawTime,
    lottery_type: &str,
) -> Result<Vec<ParseOutcome<DrawRecord>>> {
    let game = value.get("game").filter(|g| g.is_object()).unwrap_or(value);
    let doc = GameDocument::deserialize(game).context("Unexpected game document shape")?;

    let labels: HashMap<String, String> = doc
        .score_layout
        .iter()
        .flat_map(LayoutRow::options)
        .filter_map(|opt| option_key(&opt.id).map(|k| (k, opt.text.clone())))
        .collect();
    debug!(slot = %slot, options = labels.len(), sessions = doc.sessions.len(), "Game document loaded");

    Ok(doc
        .sessions
        .iter()
        .map(|s| parse_session(s, &labels, slot, lottery_type))
        .collect())
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

pub struct ApiScraper {
    fetcher: Fetcher,
    base_url: String,
    slots: Vec<SiteGameConfig>,
    concurrent: bool,
    lottery_type: String,
}

impl ApiScraper {
    pub fn new(fetcher: Fetcher, cfg: &ApiSourceConfig, lottery_type: &str) -> Self {
        Self {
            fetcher,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            slots: cfg.slots.clone(),
            concurrent: cfg.concurrent,
            lottery_type: lottery_type.to_string(),
        }
    }

    fn game_url(&self, site_game_id: &str) -> String {
        format!("{}/site-games/{}", self.base_url, urlencoding::encode(site_game_id))
    }

    async fn fetch_slot(&self, slot: &SiteGameConfig) -> Result<Vec<DrawRecord>> {
        let url = self.game_url(&slot.site_game_id);
        let body = self.fetcher.get_text(&url).await?;
        let value: Value = serde_json::from_str(&body)
            .with_context(|| format!("Invalid JSON from {url}"))?;

        let mut records = Vec::new();
        for outcome in parse_game_document(&value, slot.draw_time, &self.lottery_type)? {
            match outcome {
                ParseOutcome::Parsed(record) => records.push(record),
                ParseOutcome::Skipped(reason) => {
                    warn!(source = SOURCE_NAME, slot = %slot.draw_time, %reason, "Skipped API session");
                }
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl DrawSource for ApiScraper {
    async fn fetch_draws(&self, _today: NaiveDate) -> Result<Vec<DrawRecord>> {
        let results: Vec<Result<Vec<DrawRecord>>> = if self.concurrent {
            join_all(self.slots.iter().map(|slot| self.fetch_slot(slot))).await
        } else {
            let mut out = Vec::with_capacity(self.slots.len());
            for slot in &self.slots {
                out.push(self.fetch_slot(slot).await);
            }
            out
        };

        let mut records = Vec::new();
        let mut failed_slots = 0usize;
        for (slot, result) in self.slots.iter().zip(results) {
            match result {
                Ok(slot_records) => {
                    debug!(slot = %slot.draw_time, count = slot_records.len(), "Slot fetched");
                    records.extend(slot_records);
                }
                Err(e) => {
                    failed_slots += 1;
                    warn!(
                        source = SOURCE_NAME,
                        slot = %slot.draw_time,
                        site_game_id = %slot.site_game_id,
                        error = %format!("{e:#}"),
                        "Slot fetch failed, continuing with remaining slots"
                    );
                }
            }
        }

        info!(source = SOURCE_NAME, records = records.len(), failed_slots, "API scraped");
        Ok(records)
    }

    fn name(&self) -> &'static str {
        SOURCE_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
