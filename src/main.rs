mod config;
mod db;
mod enrich;
mod font;
mod parser;
mod queue;
mod scraper;
mod worker;

use clap::{Parser, Subcommand};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "che_scraper", about = "che168 used-car listing scraper")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enqueue a contiguous range of list-page tasks
    Produce {
        /// How many list pages to enqueue
        #[arg(short, long, default_value = "5")]
        pages: u32,
        /// First page number
        #[arg(short, long, default_value = "1")]
        start: u32,
    },
    /// Run the crawl worker (detail + list lanes) until interrupted
    Worker,
    /// Run the enrichment loop against the store
    Enrich,
    /// Show store statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::Config::from_env();

    match cli.command {
        Commands::Produce { pages, start } => {
            let mut queue = queue::TaskQueue::connect(&cfg.redis_url).await?;
            let end = start + pages;
            info!("enqueueing list pages {start}..{end}");
            for page in start..end {
                queue.enqueue_list(page).await?;
            }
            println!("Enqueued {pages} list pages starting at {start}");
            Ok(())
        }
        Commands::Worker => {
            let result = worker::run(&cfg).await;
            if let Err(ref e) = result {
                error!("worker crashed: {e:#}");
            }
            result
        }
        Commands::Enrich => enrich::run(&cfg).await,
        Commands::Stats => {
            let conn = db::connect(&cfg.database_path)?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Total:    {}", s.total);
            println!("Pending:  {}", s.pending);
            println!("Enriched: {}", s.done);
            println!("Failed:   {}", s.failed);
            Ok(())
        }
    }
}
