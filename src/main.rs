//! DIARIA — daily lottery results ingestion and analytics.
//!
//! Entry point. Parses the subcommand, loads configuration, initialises
//! structured logging, connects to the database and runs one batch.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use diaria::config::AppConfig;
use diaria::engine::pipeline::{Pipeline, RunContext, RunReport};
use diaria::engine::sample;
use diaria::storage::Database;
use diaria::types::{DrawTime, StatRecord};

const BANNER: &str = r#"
 ____  ___    _    ____  ___    _
|  _ \|_ _|  / \  |  _ \|_ _|  / \
| | | || |  / _ \ | |_) || |  / _ \
| |_| || | / ___ \|  _ < | | / ___ \
|____/|___/_/   \_\_| \_\___/_/   \_\

  Daily draw ingestion & analytics
  v0.1.0
"#;

#[derive(Parser)]
#[command(name = "diaria")]
#[command(about = "Scrape, store and analyse daily lottery draws", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline: scrape, persist, notify, recompute analytics
    Scrape,
    /// Recompute statistics and the Markov matrix only
    Stats,
    /// Print stored row count, recent draws and current hot/cold numbers
    Status {
        /// Number of recent draws to show
        #[arg(short, long, default_value_t = 10)]
        limit: u32,
    },
    /// Generate synthetic draws for the trailing N days (testing only)
    Sample {
        /// Days of history to generate
        days: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Unknown subcommands print usage and take no action.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return Ok(());
        }
    };

    init_logging();

    let cfg = AppConfig::load_or_default(&cli.config)?;

    println!("{BANNER}");
    let today = cfg.today();
    info!(
        lottery = %cfg.engine.lottery_type,
        database = %cfg.database.url,
        %today,
        "DIARIA starting up"
    );

    // The only fatal runtime failure: no database.
    let db = Database::connect(&cfg.database.url)
        .await
        .with_context(|| format!("Failed to open database: {}", cfg.database.url))?;
    let pipeline = Pipeline::from_config(&cfg, &db)?;

    match cli.command {
        Commands::Scrape => {
            let mut ctx = RunContext::new();
            let report = pipeline.run_scrape(&mut ctx, today).await?;
            print_run_report(&report);
        }
        Commands::Stats => {
            let (stat_rows, markov) = pipeline.run_analytics(today).await?;
            println!(
                "stats rows: {stat_rows}  markov edges: {} per-slot, {} combined",
                markov.slot_edges, markov.combined_edges
            );
        }
        Commands::Status { limit } => {
            print_status(&pipeline, &cfg, limit).await?;
        }
        Commands::Sample { days } => {
            let written = sample::seed(&pipeline, days, today).await?;
            println!("generated {written} synthetic draws over {days} days");
        }
    }

    info!("DIARIA finished.");
    Ok(())
}

fn print_run_report(report: &RunReport) {
    println!(
        "fetched {}  persisted {}  rejected {}  notified {}",
        report.fetched, report.persisted, report.rejected, report.notified
    );
    if !report.failed_sources.is_empty() {
        println!("failed sources: {}", report.failed_sources.join(", "));
    }
    println!(
        "stats rows {}  markov edges {} per-slot, {} combined",
        report.stat_rows, report.markov.slot_edges, report.markov.combined_edges
    );
}

async fn print_status(pipeline: &Pipeline, cfg: &AppConfig, limit: u32) -> Result<()> {
    let store = pipeline.store();
    println!("draws stored: {}", store.count().await?);

    let recent = store.recent(limit).await?;
    if recent.is_empty() {
        println!("no draws yet");
    } else {
        println!("\nmost recent:");
        for draw in &recent {
            println!("  {draw}");
        }
    }

    let Some(period) = cfg.stats.periods.iter().copied().min() else {
        return Ok(());
    };
    let rows = pipeline.stats().hot_cold(period, None).await?;
    println!("\nlast {period} days (all slots):");
    println!("  hot:  {}", join_numbers(rows.iter().filter(|r| r.is_hot)));
    println!("  cold: {}", join_numbers(rows.iter().filter(|r| r.is_cold)));

    // Most likely follow-up to the latest evening result.
    if let Some(last) = recent.iter().find(|d| d.draw_time == DrawTime::Evening) {
        let next = pipeline.markov().top_transitions(last.main_number, None, 3).await?;
        if !next.is_empty() {
            let list: Vec<String> = next
                .iter()
                .map(|e| format!("{:02} ({:.1}%)", e.to_number, e.probability * 100.0))
                .collect();
            println!("  after {:02}: {}", last.main_number, list.join(", "));
        }
    }
    Ok(())
}

fn join_numbers<'a>(rows: impl Iterator<Item = &'a StatRecord>) -> String {
    let numbers: Vec<String> = rows.map(|r| format!("{:02}", r.number)).collect();
    if numbers.is_empty() {
        "-".to_string()
    } else {
        numbers.join(" ")
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("diaria=info"));

    let json_logging = std::env::var("DIARIA_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
