//! Synthetic draw history for local testing. Not part of the production path.

use anyhow::Result;
use chrono::{Duration, NaiveDate};
use rand::Rng;
use tracing::info;

use super::pipeline::Pipeline;
use crate::types::{DrawRecord, DrawTime, MAX_COMPANION_NUMBER, MAX_MAIN_NUMBER};

/// One random draw per slot for each of the `days` days ending at `today`.
pub fn generate<R: Rng + ?Sized>(rng: &mut R, days: u32, today: NaiveDate, lottery_type: &str) -> Vec<DrawRecord> {
    let mut draws = Vec::with_capacity(days as usize * DrawTime::ALL.len());
    for offset in (0..i64::from(days)).rev() {
        let date = today - Duration::days(offset);
        for slot in DrawTime::ALL {
            draws.push(
                DrawRecord::new(
                    date,
                    slot,
                    rng.gen_range(0..=MAX_MAIN_NUMBER),
                    rng.gen_range(0..=MAX_COMPANION_NUMBER),
                )
                .with_lottery_type(lottery_type),
            );
        }
    }
    draws
}

/// Seed the store with synthetic draws and recompute analytics.
/// Returns the number of draws written.
pub async fn seed(pipeline: &Pipeline, days: u32, today: NaiveDate) -> Result<usize> {
    let draws = generate(&mut rand::thread_rng(), days, today, pipeline.store().lottery_type());
    let report = pipeline.store().upsert(&draws).await;
    let (stat_rows, markov) = pipeline.run_analytics(today).await?;
    info!(
        days,
        draws = report.persisted.len(),
        stat_rows,
        markov_edges = markov.slot_edges + markov.combined_edges,
        "Synthetic history generated"
    );
    Ok(report.persisted.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotifierConfig;
    use crate::engine::notifier::Notifier;
    use crate::storage::Database;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_generate_covers_every_slot_in_range() {
        let today = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let draws = generate(&mut rng, 4, today, "diaria");
        assert_eq!(draws.len(), 12);
        assert_eq!(draws.first().unwrap().draw_date, NaiveDate::from_ymd_opt(2025, 3, 7).unwrap());
        assert_eq!(draws.last().unwrap().draw_date, today);
        assert!(draws.iter().all(|d| d.validate().is_ok() && d.animal_name.is_none()));
    }

    #[test]
    fn test_generate_zero_days() {
        let today = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        assert!(generate(&mut StdRng::seed_from_u64(1), 0, today, "diaria").is_empty());
    }

    #[tokio::test]
    async fn test_seed_populates_store_and_analytics() {
        let db = Database::in_memory().await.unwrap();
        let notifier = Notifier::new(&NotifierConfig::default(), None).unwrap();
        let pipeline = Pipeline::new(vec![], &db, "diaria", notifier, vec![30]);
        let today = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();

        let written = seed(&pipeline, 10, today).await.unwrap();
        assert_eq!(written, 30);
        assert_eq!(pipeline.store().count().await.unwrap(), 30);

        // Reseeding the same window overwrites rather than duplicates.
        seed(&pipeline, 10, today).await.unwrap();
        assert_eq!(pipeline.store().count().await.unwrap(), 30);
        assert!(!pipeline.stats().hot_cold(30, None).await.unwrap().is_empty());
    }
}
