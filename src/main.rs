mod aggregate;
mod db;
mod extract;
mod fetch;
mod normalize;
mod paginate;
mod pipeline;
mod record;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use clap::{Parser, Subcommand};

use extract::TemplateId;
use fetch::HttpFetcher;
use pipeline::RunConfig;

#[derive(Parser)]
#[command(name = "award_harvest", about = "Grant and award listings harvester")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest one source into the local database
    Run {
        /// Page template the source uses
        #[arg(short, long, value_enum)]
        template: TemplateId,
        /// Listing base URL
        #[arg(short, long)]
        base_url: String,
        #[arg(long, default_value = "data/awards.sqlite")]
        db: PathBuf,
        /// Max listing pages to fetch (default: until exhausted)
        #[arg(short = 'n', long)]
        pages: Option<usize>,
        /// Items requested per listing page
        #[arg(long, default_value = "50")]
        page_size: u32,
        /// Concurrent item extractions
        #[arg(short, long, default_value = "8")]
        concurrency: usize,
        /// Abort once this fraction of fetched units has failed
        #[arg(long, default_value = "0.25")]
        tolerance: f64,
        /// Keep only records whose title or recipient contains this text
        #[arg(short, long)]
        query: Option<String>,
        /// Keep only records announced in or after this year
        #[arg(long)]
        from_year: Option<i32>,
        /// Keep only records announced in or before this year
        #[arg(long)]
        to_year: Option<i32>,
        /// HTTP timeout in seconds
        #[arg(long, default_value = "30")]
        timeout: u64,
    },
    /// Show database statistics
    Stats {
        #[arg(long, default_value = "data/awards.sqlite")]
        db: PathBuf,
    },
    /// Awards overview table
    Show {
        #[arg(long, default_value = "data/awards.sqlite")]
        db: PathBuf,
        /// Filter by source (data_list, grants_table, card_grid)
        #[arg(short, long)]
        source: Option<String>,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            template,
            base_url,
            db,
            pages,
            page_size,
            concurrency,
            tolerance,
            query,
            from_year,
            to_year,
            timeout,
        } => {
            let conn = db::connect(&db)?;
            db::init_schema(&conn)?;

            let mut config = RunConfig::new(template, base_url);
            config.page_limit = pages;
            config.page_size = page_size;
            config.item_concurrency = concurrency;
            config.failure_tolerance = tolerance;
            config.query = query;
            config.from_year = from_year;
            config.to_year = to_year;

            // Ctrl-C finishes in-flight items, then the run stops between
            // units and saves what it has.
            let stop = Arc::new(AtomicBool::new(false));
            {
                let stop = Arc::clone(&stop);
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        stop.store(true, Ordering::Relaxed);
                    }
                });
            }

            let fetcher = Arc::new(HttpFetcher::new(Duration::from_secs(timeout))?);
            let started_at = Utc::now().to_rfc3339();
            println!(
                "Harvesting {} from {} ...",
                config.template.as_str(),
                config.base_url
            );
            let (table, summary) = pipeline::run(fetcher, &config, stop).await;

            let saved = db::save_awards(&conn, &table)?;
            db::save_run(&conn, &config, &summary, &started_at)?;
            summary.print();
            println!("Saved {} awards.", saved);
            Ok(())
        }
        Commands::Stats { db } => {
            let conn = db::connect(&db)?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Awards:        {}", s.awards);
            println!("Sources:       {}", s.sources);
            println!("With warnings: {}", s.with_warnings);
            println!("Runs:          {}", s.runs);
            if let Some(last) = s.last_run {
                println!("Last run:      {}", last);
            }
            Ok(())
        }
        Commands::Show { db, source, limit } => {
            let conn = db::connect(&db)?;
            db::init_schema(&conn)?;
            let rows = db::fetch_awards(&conn, source.as_deref(), limit)?;
            if rows.is_empty() {
                println!("No awards found. Run 'run' first.");
                return Ok(());
            }

            println!(
                "{:>3} | {:<14} | {:<32} | {:<26} | {:>12} | {:<10} | {:<12}",
                "#", "Award", "Title", "Recipient", "Amount", "Date", "Source"
            );
            println!("{}", "-".repeat(126));

            for (i, r) in rows.iter().enumerate() {
                let title = truncate(r.title.as_deref().unwrap_or("-"), 32);
                let recipient = truncate(r.recipient.as_deref().unwrap_or("-"), 26);
                let amount = r
                    .amount
                    .map(|a| format!("{:.2}", a))
                    .unwrap_or_else(|| "-".into());
                let date = r.date_announced.as_deref().unwrap_or("-");

                println!(
                    "{:>3} | {:<14} | {:<32} | {:<26} | {:>12} | {:<10} | {:<12}",
                    i + 1,
                    truncate(&r.award_id, 14),
                    title,
                    recipient,
                    amount,
                    date,
                    r.source
                );
            }

            println!("\n{} awards", rows.len());
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
