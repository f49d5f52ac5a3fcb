mod crawler;
mod db;
mod extract;
mod hook;
mod input;
mod limiter;
mod record;

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser)]
#[command(name = "yp_scraper", about = "Yellow Pages business-directory scraper")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve the run input and enqueue seed requests
    Seed {
        /// Path to the run input JSON
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Seed, then crawl until the frontier is empty or maxItems is reached
    Run {
        /// Path to the run input JSON
        #[arg(short, long)]
        input: PathBuf,
        /// Max pages to crawl this invocation (default: all)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Show queue and dataset counters
    Stats,
    /// Export the dataset as a JSON array
    Export {
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
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
        Commands::Seed { input } => {
            let run_input = input::load(&input)?;
            let seeds = input::resolve(&run_input).await?;
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let inserted = db::enqueue_seeds(&conn, &seeds)?;
            println!("Enqueued {} new seed URLs ({} resolved)", inserted, seeds.len());
            Ok(())
        }
        Commands::Run { input, limit } => {
            let run_input = input::load(&input)?;
            let seeds = input::resolve(&run_input).await?;
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let inserted = db::enqueue_seeds(&conn, &seeds)?;
            info!("Enqueued {} new seed URLs ({} resolved)", inserted, seeds.len());

            let crawler = crawler::Crawler::from_input(&run_input);
            let stats = crawler.run(&conn, limit).await?;
            println!(
                "Done: {} pages crawled, {} records stored, {} page errors{}",
                stats.pages,
                stats.records,
                stats.errors,
                if stats.capped { " (maxItems reached)" } else { "" }
            );
            Ok(())
        }
        Commands::Stats => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Pages:     {}", s.total);
            println!("Visited:   {}", s.visited);
            println!("Unvisited: {}", s.unvisited);
            println!("Errors:    {}", s.errors);
            println!("Records:   {}", s.records);
            Ok(())
        }
        Commands::Export { output } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let records = db::fetch_all_records(&conn)?;
            let json = serde_json::to_string_pretty(&records)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)?;
                    println!("Wrote {} records to {}", records.len(), path.display());
                }
                None => println!("{json}"),
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
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
