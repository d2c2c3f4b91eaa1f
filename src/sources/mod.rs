//! Upstream result sources.
//!
//! Defines the `DrawSource` trait and provides the two implementations:
//! - `html` — the human-oriented results page
//! - `api` — the per-slot JSON game API
//!
//! Both sit on top of the shared `fetcher`.

pub mod api;
pub mod fetcher;
pub mod html;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::types::DrawRecord;

/// Abstraction over upstream draw-result sources.
///
/// Implementors are best-effort: malformed sections or slots are logged and
/// skipped, and an `Err` is only returned when nothing could be retrieved at
/// all (e.g. the page fetch itself failed).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DrawSource: Send + Sync {
    /// Retrieve and parse every draw the source currently publishes.
    /// `today` anchors date-sanity checks.
    async fn fetch_draws(&self, today: NaiveDate) -> Result<Vec<DrawRecord>>;

    /// Source name for logging and identification.
    fn name(&self) -> &'static str;
}

/// Split a label such as `"34 Música"` into its leading integer and the
/// remaining text. Returns `None` when the label does not start with digits.
pub(crate) fn split_leading_number(label: &str) -> Option<(u32, Option<String>)> {
    let trimmed = label.trim();
    let digits_end = trimmed
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(trimmed.len());
    if digits_end == 0 {
        return None;
    }
    let number = trimmed[..digits_end].parse::<u32>().ok()?;
    let rest = trimmed[digits_end..]
        .trim_start_matches(|c: char| c.is_whitespace() || c == '-' || c == '.' || c == ':')
        .trim();
    let rest = (!rest.is_empty()).then(|| rest.to_string());
    Some((number, rest))
}
