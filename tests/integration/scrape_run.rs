use chrono::NaiveDate;

use diaria::engine::pipeline::{Pipeline, RunContext};
use diaria::engine::sample;
use diaria::storage::Database;
use diaria::types::DrawTime;

use crate::upstream::{game, Upstream, NOTIFY_KEY, NOTIFY_KEY_ENV, RESULTS_PAGE};

fn jan(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, day).unwrap()
}

#[tokio::test]
async fn test_full_scrape_run() {
    let upstream = Upstream::start().await;
    upstream.mount_results_page(RESULTS_PAGE).await;
    upstream.mount_game("diaria-11am", game("2025-01-05", "12 Gato", "3 Sol")).await;
    upstream.mount_broken_game("diaria-3pm").await;
    upstream.mount_game("diaria-9pm", game("2025-01-04", "7 Perico", "9 Luna")).await;
    // Today's 11am and 3pm, announced once each despite two runs.
    upstream.mount_notifier(2).await;

    std::env::set_var(NOTIFY_KEY_ENV, NOTIFY_KEY);
    let cfg = upstream.config();
    let db = Database::in_memory().await.unwrap();
    let pipeline = Pipeline::from_config(&cfg, &db).unwrap();

    let mut ctx = RunContext::new();
    let report = pipeline.run_scrape(&mut ctx, jan(5)).await.unwrap();

    assert!(report.failed_sources.is_empty());
    assert_eq!(report.fetched, 7);
    assert_eq!(report.persisted, 7);
    assert_eq!(report.rejected, 0);
    assert_eq!(report.notified, 2);

    let store = pipeline.store();
    assert_eq!(store.count().await.unwrap(), 5);

    let history = store.all_draws().await.unwrap();
    let numbers: Vec<(NaiveDate, DrawTime, u8)> = history
        .iter()
        .map(|d| (d.draw_date, d.draw_time, d.main_number))
        .collect();
    assert_eq!(
        numbers,
        vec![
            (jan(4), DrawTime::Morning, 30),
            (jan(4), DrawTime::Afternoon, 12),
            (jan(4), DrawTime::Evening, 7),
            (jan(5), DrawTime::Morning, 12),
            (jan(5), DrawTime::Afternoon, 45),
        ]
    );
    assert_eq!(history[2].animal_name.as_deref(), Some("Perico"));
    assert_eq!(history[3].animal_name.as_deref(), Some("Gato"));
    assert_eq!(history[3].companion_number, 3);
    assert_eq!(history[4].animal_name, None);

    // Combined 30-day scope: 12 drawn twice, last seen today.
    let stats = pipeline.stats().hot_cold(30, None).await.unwrap();
    let twelve = stats.iter().find(|s| s.number == 12).unwrap();
    assert_eq!(twelve.frequency, 2);
    assert_eq!(twelve.last_appearance, jan(5));
    assert_eq!(twelve.gap_days, 0);
    assert!(!twelve.is_cold);
    assert_eq!(stats[0].number, 12);

    // Combined sequence 30 12 7 12 45: 12 is followed by 7 and 45 equally.
    let after_twelve = pipeline.markov().top_transitions(12, None, 5).await.unwrap();
    let targets: Vec<(u8, f64)> = after_twelve.iter().map(|e| (e.to_number, e.probability)).collect();
    assert_eq!(targets, vec![(7, 0.5), (45, 0.5)]);

    let morning = pipeline
        .markov()
        .top_transitions(30, Some(DrawTime::Morning), 5)
        .await
        .unwrap();
    assert_eq!(morning.len(), 1);
    assert_eq!((morning[0].to_number, morning[0].probability), (12, 1.0));

    // Re-running in the same context is idempotent and silent.
    let again = pipeline.run_scrape(&mut ctx, jan(5)).await.unwrap();
    assert_eq!(again.notified, 0);
    assert_eq!(store.count().await.unwrap(), 5);
}

#[tokio::test]
async fn test_redirect_loop_only_loses_html_source() {
    let upstream = Upstream::start().await;
    upstream.mount_redirect_loop("/diaria").await;
    upstream.mount_game("diaria-9pm", game("2025-01-05", "88 Ratón", "4 Río")).await;

    let mut cfg = upstream.config();
    cfg.notifier.enabled = false;
    let db = Database::in_memory().await.unwrap();
    let pipeline = Pipeline::from_config(&cfg, &db).unwrap();

    let mut ctx = RunContext::new();
    let report = pipeline.run_scrape(&mut ctx, jan(5)).await.unwrap();

    assert_eq!(report.failed_sources, vec!["html"]);
    assert_eq!(report.persisted, 1);
    assert_eq!(report.notified, 0);

    let recent = pipeline.store().recent(1).await.unwrap();
    assert_eq!(recent[0].main_number, 88);
    assert_eq!(recent[0].animal_name.as_deref(), Some("Ratón"));
}

#[tokio::test]
async fn test_sample_then_stats_keeps_rows_normalized() {
    let upstream = Upstream::start().await;
    let mut cfg = upstream.config();
    cfg.notifier.enabled = false;
    let db = Database::in_memory().await.unwrap();
    let pipeline = Pipeline::from_config(&cfg, &db).unwrap();

    let written = sample::seed(&pipeline, 45, jan(5)).await.unwrap();
    assert_eq!(written, 135);

    let (stat_rows, markov) = pipeline.run_analytics(jan(5)).await.unwrap();
    assert!(stat_rows > 0);
    assert!(markov.combined_edges > 0);

    for from in 0..=99u8 {
        let row = pipeline.markov().top_transitions(from, None, 200).await.unwrap();
        if row.is_empty() {
            continue;
        }
        let sum: f64 = row.iter().map(|e| e.probability).sum();
        assert!((sum - 1.0).abs() <= 0.0001, "row {from} sums to {sum}");
    }
}
