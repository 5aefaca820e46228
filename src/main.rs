use std::sync::Arc;

use tokio::sync::watch;

mod config;
mod db;
mod dedup;
mod error;
mod extract;
mod ingest;
mod lock;
mod models;

use config::Config;
use db::{Ledger, Repository};
use error::{AppError, Result};
use extract::HttpExtractionAgent;
use ingest::{Orchestrator, Scheduler};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    // Fatal here, never mid-cycle: a bad threshold should stop the daemon
    // before it ever schedules a run.
    let config = Config::load()?;

    let repo = Arc::new(Repository::new(&config.db_path).await?);
    let ledger = Arc::new(Ledger::new(&config.db_path).await?);

    // Import configured sources; removed entries stay in the table,
    // soft-deactivated by their status.
    repo.sync_sources(config.sources.clone()).await?;

    if args.len() >= 2 && args[1] == "--history" {
        let limit = args
            .get(2)
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(20);
        print_history(&ledger, limit).await?;
        return Ok(());
    }

    let agent = Arc::new(HttpExtractionAgent::new(config.extraction_agent_url.clone()));
    let orchestrator = Orchestrator::new(repo.clone(), ledger.clone(), agent, config.clone());
    let scheduler = Scheduler::new(
        orchestrator,
        repo,
        ledger,
        &config.lock_path,
        config.interval_hours,
    );

    if args.len() >= 2 && args[1] == "--run-now" {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        match scheduler.run_cycle_now(shutdown_rx).await {
            Ok((status, summary)) => println!(
                "{}: {} created, {} updated, {} skipped ({} sources, {} failed)",
                status.as_str(),
                summary.articles_created,
                summary.articles_updated,
                summary.articles_skipped,
                summary.sources_processed,
                summary.sources_failed,
            ),
            // Contention is a normal skip, not a failure exit.
            Err(AppError::LockBusy) => println!("another cycle is running, nothing to do"),
            Err(e) => return Err(e),
        }
        return Ok(());
    }

    scheduler.run().await
}

async fn print_history(ledger: &Ledger, limit: i64) -> Result<()> {
    let runs = ledger.recent_runs(limit).await?;
    if runs.is_empty() {
        println!("No runs recorded yet");
        return Ok(());
    }
    for run in runs {
        println!(
            "{}  {}  {:9}  {:>4} created  {:>4} updated  {:>4} skipped  {:>2} sources ({} failed)  {}s{}",
            &run.run_id[..run.run_id.len().min(8)],
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            run.status.as_str(),
            run.articles_created,
            run.articles_updated,
            run.articles_skipped,
            run.sources_processed,
            run.sources_failed,
            run.duration_seconds,
            run.error_message
                .map(|e| format!("  [{e}]"))
                .unwrap_or_default(),
        );
    }
    Ok(())
}
