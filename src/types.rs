//! Shared types for the DIARIA engine.
//!
//! These types form the data model used across all modules: raw draw
//! results coming out of the scrapers, and the derived statistics and
//! transition rows produced by the analytics engines.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Highest valid main number.
pub const MAX_MAIN_NUMBER: u8 = 99;

/// Highest valid companion digit.
pub const MAX_COMPANION_NUMBER: u8 = 9;

/// The only lottery type this engine operates.
pub const DEFAULT_LOTTERY_TYPE: &str = "diaria";

// ---------------------------------------------------------------------------
// Draw time slots
// ---------------------------------------------------------------------------

/// Time-of-day slot at which a draw takes place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DrawTime {
    #[serde(rename = "11am")]
    Morning,
    #[serde(rename = "3pm")]
    Afternoon,
    #[serde(rename = "9pm")]
    Evening,
}

impl DrawTime {
    /// All slots in chronological order within a day.
    pub const ALL: [DrawTime; 3] = [DrawTime::Morning, DrawTime::Afternoon, DrawTime::Evening];

    /// Canonical storage label.
    pub fn as_str(&self) -> &'static str {
        match self {
            DrawTime::Morning => "11am",
            DrawTime::Afternoon => "3pm",
            DrawTime::Evening => "9pm",
        }
    }
}

impl fmt::Display for DrawTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Lenient parse: accepts "11am", "11:00 AM", "3 pm", "15:00", "9PM", "21:00".
impl std::str::FromStr for DrawTime {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '.')
            .collect::<String>()
            .to_lowercase();
        match compact.as_str() {
            "11am" | "11:00am" | "11:00" => Ok(DrawTime::Morning),
            "3pm" | "03pm" | "3:00pm" | "03:00pm" | "15:00" => Ok(DrawTime::Afternoon),
            "9pm" | "09pm" | "9:00pm" | "09:00pm" | "21:00" => Ok(DrawTime::Evening),
            _ => Err(EngineError::Parse(format!("unknown draw time: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Draw records
// ---------------------------------------------------------------------------

/// One lottery draw result, as produced by a scraper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawRecord {
    pub draw_date: NaiveDate,
    pub draw_time: DrawTime,
    pub lottery_type: String,
    /// 0–99 inclusive.
    pub main_number: u8,
    /// 0–9 inclusive; 0 when the source does not publish one.
    pub companion_number: u8,
    /// Optional label attached to the number (e.g. "Música").
    pub animal_name: Option<String>,
}

impl DrawRecord {
    pub fn new(draw_date: NaiveDate, draw_time: DrawTime, main_number: u8, companion_number: u8) -> Self {
        Self {
            draw_date,
            draw_time,
            lottery_type: DEFAULT_LOTTERY_TYPE.to_string(),
            main_number,
            companion_number,
            animal_name: None,
        }
    }

    pub fn with_animal(mut self, animal_name: Option<String>) -> Self {
        self.animal_name = animal_name.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn with_lottery_type(mut self, lottery_type: &str) -> Self {
        self.lottery_type = lottery_type.to_string();
        self
    }

    /// Range checks applied before a record is persisted.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.main_number > MAX_MAIN_NUMBER {
            return Err(EngineError::Parse(format!(
                "main number {} out of range 0-{MAX_MAIN_NUMBER}",
                self.main_number
            )));
        }
        if self.companion_number > MAX_COMPANION_NUMBER {
            return Err(EngineError::Parse(format!(
                "companion number {} out of range 0-{MAX_COMPANION_NUMBER}",
                self.companion_number
            )));
        }
        if self.lottery_type.trim().is_empty() {
            return Err(EngineError::Parse("empty lottery type".to_string()));
        }
        Ok(())
    }
}

impl fmt::Display for DrawRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:>4} [{}] {:02}-{}",
            self.draw_date, self.draw_time, self.lottery_type, self.main_number, self.companion_number
        )?;
        if let Some(animal) = &self.animal_name {
            write!(f, " {animal}")?;
        }
        Ok(())
    }
}

/// Result of parsing one unit of upstream input (a page section, an API
/// session, a number token). Skips carry the reason for the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome<T> {
    Parsed(T),
    Skipped(String),
}

impl<T> ParseOutcome<T> {
    pub fn skipped(reason: impl Into<String>) -> Self {
        ParseOutcome::Skipped(reason.into())
    }

    pub fn parsed(self) -> Option<T> {
        match self {
            ParseOutcome::Parsed(v) => Some(v),
            ParseOutcome::Skipped(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Derived rows
// ---------------------------------------------------------------------------

/// Frequency / recency classification of one number within a scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatRecord {
    pub number: u8,
    /// `None` = all slots combined.
    pub draw_time: Option<DrawTime>,
    pub period_days: u32,
    pub frequency: u32,
    pub last_appearance: NaiveDate,
    pub gap_days: i64,
    pub is_hot: bool,
    pub is_cold: bool,
}

/// One cell of the first-order transition matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkovEdge {
    pub from_number: u8,
    pub to_number: u8,
    /// `None` = all slots combined.
    pub draw_time: Option<DrawTime>,
    pub transitions: u32,
    /// Rounded to 4 decimals.
    pub probability: f64,
}

/// Human-readable label for a scope's slot component.
pub fn scope_label(draw_time: Option<DrawTime>) -> &'static str {
    draw_time.map(|t| t.as_str()).unwrap_or("all")
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for DIARIA.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Network error ({url}): {message}")]
    Network { url: String, message: String },

    #[error("Timed out fetching {url}")]
    Timeout { url: String },

    #[error("Too many redirects fetching {url} (budget {max})")]
    TooManyRedirects { url: String, max: u8 },

    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Transient network failures the caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Network { .. } | EngineError::Timeout { .. })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
