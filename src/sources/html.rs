//! Results-page scraper.
//!
//! The page lists one section per calendar date: a date header followed by
//! the main-number and companion-number tokens of that day's draws. The
//! document is flattened into a token stream (in document order) and a
//! small state machine groups the tokens into date sections, each of which
//! is validated on its own. A broken section never aborts the scrape.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Datelike, Duration, NaiveDate};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};

use super::fetcher::Fetcher;
use super::{split_leading_number, DrawSource};
use crate::config::HtmlSourceConfig;
use crate::types::{
    DrawRecord, DrawTime, EngineError, ParseOutcome, MAX_COMPANION_NUMBER, MAX_MAIN_NUMBER,
};

const SOURCE_NAME: &str = "html";

/// Slot for the n-th number of a section. The page is read earliest slot
/// first, whatever order it displays them in.
const SLOT_BY_POSITION: [DrawTime; 3] = [DrawTime::Morning, DrawTime::Afternoon, DrawTime::Evening];

/// Dates further than this into the future are assumed to be year typos.
const FUTURE_TOLERANCE_DAYS: i64 = 7;

const MONTHS: &[(&str, u32)] = &[
    ("enero", 1), ("ene", 1),
    ("febrero", 2), ("feb", 2),
    ("marzo", 3), ("mar", 3),
    ("abril", 4), ("abr", 4),
    ("mayo", 5), ("may", 5),
    ("junio", 6), ("jun", 6),
    ("julio", 7), ("jul", 7),
    ("agosto", 8), ("ago", 8),
    ("septiembre", 9), ("setiembre", 9), ("sep", 9), ("set", 9),
    ("octubre", 10), ("oct", 10),
    ("noviembre", 11), ("nov", 11),
    ("diciembre", 12), ("dic", 12),
];

// ---------------------------------------------------------------------------
// Markers and tokens
// ---------------------------------------------------------------------------

/// Compiled CSS selectors identifying the three token kinds on the page.
pub struct SectionMarkers {
    date: Selector,
    main: Selector,
    companion: Selector,
}

impl SectionMarkers {
    pub fn new(date: &str, main: &str, companion: &str) -> Result<Self, EngineError> {
        let parse = |kind: &str, css: &str| {
            Selector::parse(css)
                .map_err(|e| EngineError::Config(format!("invalid {kind} selector {css:?}: {e}")))
        };
        Ok(Self {
            date: parse("date", date)?,
            main: parse("main number", main)?,
            companion: parse("companion number", companion)?,
        })
    }

    pub fn from_config(cfg: &HtmlSourceConfig) -> Result<Self, EngineError> {
        Self::new(&cfg.date_selector, &cfg.main_selector, &cfg.companion_selector)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    DateHeader(String),
    Main(String),
    Companion(String),
}

fn element_text(el: &ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Flatten the document into marker tokens, in document order.
fn tokenize(doc: &Html, markers: &SectionMarkers) -> Vec<Token> {
    doc.root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter_map(|el| {
            if markers.date.matches(&el) {
                Some(Token::DateHeader(element_text(&el)))
            } else if markers.main.matches(&el) {
                Some(Token::Main(element_text(&el)))
            } else if markers.companion.matches(&el) {
                Some(Token::Companion(element_text(&el)))
            } else {
                None
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Section grammar
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Section {
    header: String,
    mains: Vec<String>,
    companions: Vec<String>,
}

/// Group tokens into sections. Number tokens seen before the first date
/// header belong to no section and are dropped.
fn group_sections(tokens: Vec<Token>) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut current: Option<Section> = None;
    let mut orphans = 0usize;

    for token in tokens {
        match token {
            Token::DateHeader(header) => {
                if let Some(done) = current.take() {
                    sections.push(done);
                }
                current = Some(Section {
                    header,
                    ..Section::default()
                });
            }
            Token::Main(text) => match current.as_mut() {
                Some(section) => section.mains.push(text),
                None => orphans += 1,
            },
            Token::Companion(text) => match current.as_mut() {
                Some(section) => section.companions.push(text),
                None => orphans += 1,
            },
        }
    }
    if let Some(done) = current {
        sections.push(done);
    }
    if orphans > 0 {
        debug!(orphans, "Number tokens before first date header ignored");
    }
    sections
}

fn month_number(word: &str) -> Option<u32> {
    MONTHS.iter().find(|(name, _)| *name == word).map(|(_, m)| *m)
}

/// Extract (day, month, year) from a header such as "Lunes, 5 Enero 2025"
/// or "5 de enero de 2025".
pub(crate) fn parse_header_date(text: &str) -> Option<(u32, u32, i32)> {
    let lower = text.to_lowercase();
    let mut day = None;
    let mut month = None;
    let mut year = None;

    for word in lower.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
        if word.chars().all(|c| c.is_ascii_digit()) {
            let Ok(n) = word.parse::<u32>() else { continue };
            if word.len() == 4 {
                year.get_or_insert(n as i32);
            } else if day.is_none() && (1..=31).contains(&n) {
                day = Some(n);
            }
        } else if month.is_none() {
            month = month_number(word);
        }
    }

    Some((day?, month?, year?))
}

/// Build the calendar date, correcting implausible years.
///
/// If the date lands more than a week after `today`, the year is assumed to
/// be misrendered: the current year is used, minus one when the month has
/// not come around yet. This is a heuristic and can pick the wrong year for
/// sections straddling a year boundary.
pub(crate) fn resolve_date(day: u32, month: u32, year: i32, today: NaiveDate) -> Option<NaiveDate> {
    let parsed = NaiveDate::from_ymd_opt(year, month, day)?;
    if parsed <= today + Duration::days(FUTURE_TOLERANCE_DAYS) {
        return Some(parsed);
    }

    let mut corrected_year = today.year();
    if month > today.month() {
        corrected_year -= 1;
    }
    let corrected = NaiveDate::from_ymd_opt(corrected_year, month, day)?;
    warn!(%parsed, %corrected, "Future-dated section, year corrected");
    Some(corrected)
}

fn parse_main(text: &str) -> Result<(u8, Option<String>), String> {
    match split_leading_number(text) {
        Some((n, animal)) if n <= u32::from(MAX_MAIN_NUMBER) => Ok((n as u8, animal)),
        Some((n, _)) => Err(format!("main number {n} out of range")),
        None => Err(format!("main token {text:?} is not a number")),
    }
}

fn parse_companion(text: Option<&String>) -> Result<u8, String> {
    let Some(text) = text else { return Ok(0) };
    match split_leading_number(text) {
        Some((n, _)) if n <= u32::from(MAX_COMPANION_NUMBER) => Ok(n as u8),
        Some((n, _)) => Err(format!("companion number {n} out of range")),
        None => Err(format!("companion token {text:?} is not a number")),
    }
}

fn parse_section(section: &Section, today: NaiveDate, lottery_type: &str) -> Vec<ParseOutcome<DrawRecord>> {
    let Some((day, month, year)) = parse_header_date(&section.header) else {
        return vec![ParseOutcome::skipped(format!("unparseable date header {:?}", section.header))];
    };
    let Some(date) = resolve_date(day, month, year, today) else {
        return vec![ParseOutcome::skipped(format!("invalid calendar date {:?}", section.header))];
    };

    section
        .mains
        .iter()
        .zip(SLOT_BY_POSITION)
        .enumerate()
        .map(|(pos, (main_text, slot))| {
            let (main, animal) = match parse_main(main_text) {
                Ok(v) => v,
                Err(reason) => return ParseOutcome::Skipped(format!("{date} {slot}: {reason}")),
            };
            let companion = match parse_companion(section.companions.get(pos)) {
                Ok(v) => v,
                Err(reason) => return ParseOutcome::Skipped(format!("{date} {slot}: {reason}")),
            };
            ParseOutcome::Parsed(
                DrawRecord::new(date, slot, main, companion)
                    .with_animal(animal)
                    .with_lottery_type(lottery_type),
            )
        })
        .collect()
}

/// Parse a whole results page. Each entry is either a record or the reason
/// a section/slot was skipped.
pub fn parse_document(
    html: &str,
    markers: &SectionMarkers,
    today: NaiveDate,
    lottery_type: &str,
) -> Vec<ParseOutcome<DrawRecord>> {
    let doc = Html::parse_document(html);
    let sections = group_sections(tokenize(&doc, markers));
    debug!(sections = sections.len(), "Results page split into date sections");

    sections
        .iter()
        .flat_map(|s| parse_section(s, today, lottery_type))
        .collect()
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

pub struct HtmlScraper {
    fetcher: Fetcher,
    url: String,
    markers: SectionMarkers,
    lottery_type: String,
}

impl HtmlScraper {
    pub fn new(fetcher: Fetcher, cfg: &HtmlSourceConfig, lottery_type: &str) -> Result<Self> {
        let markers = SectionMarkers::from_config(cfg).context("Failed to compile HTML markers")?;
        Ok(Self {
            fetcher,
            url: cfg.url.clone(),
            markers,
            lottery_type: lottery_type.to_string(),
        })
    }
}

#[async_trait]
impl DrawSource for HtmlScraper {
    async fn fetch_draws(&self, today: NaiveDate) -> Result<Vec<DrawRecord>> {
        let body = self
            .fetcher
            .get_text(&self.url)
            .await
            .with_context(|| format!("Failed to fetch results page {}", self.url))?;

        let mut records = Vec::new();
        let mut skipped = 0usize;
        for outcome in parse_document(&body, &self.markers, today, &self.lottery_type) {
            match outcome {
                ParseOutcome::Parsed(record) => records.push(record),
                ParseOutcome::Skipped(reason) => {
                    skipped += 1;
                    warn!(source = SOURCE_NAME, %reason, "Skipped results-page entry");
                }
            }
        }

        info!(source = SOURCE_NAME, records = records.len(), skipped, "Results page scraped");
        Ok(records)
    }

    fn name(&self) -> &'static str {
        SOURCE_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
