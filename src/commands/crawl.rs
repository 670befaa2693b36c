//! `crawl` subcommands: start, pause, resume, cancel, status

use std::path::Path;
use std::time::Duration;

use jangma::config::CrawlConfig;
use jangma::executor::{CrawlExecutor, CrawlStatus};
use jangma::metrics::prom;
use jangma::models::CrawlId;
use jangma::planner::{Planner, SeedListPlanner};
use jangma::state::CrawlState;

use super::{build_executor, parse_crawl_id};

pub async fn start(data_dir: &Path, config_path: &Path) -> jangma::Result<()> {
    let mut config = CrawlConfig::from_file(config_path)?;
    config.apply_env_overrides();

    // The CLI plans from a fixed seed list; other planners slot in here
    let planner = SeedListPlanner::new(config)?;
    let config = planner.plan("").await?;

    let executor = build_executor(data_dir)?;
    let crawl_id = executor.start(config).await?;
    println!("Crawl started: {crawl_id}");

    run_until_done(&executor, crawl_id).await
}

pub async fn pause(data_dir: &Path, crawl_id: &str) -> jangma::Result<()> {
    let crawl_id = parse_crawl_id(crawl_id)?;
    let executor = build_executor(data_dir)?;
    executor.pause(crawl_id).await?;
    println!("Pause requested for {crawl_id}");
    Ok(())
}

pub async fn resume(data_dir: &Path, crawl_id: &str) -> jangma::Result<()> {
    let crawl_id = parse_crawl_id(crawl_id)?;
    let executor = build_executor(data_dir)?;
    executor.resume(crawl_id).await?;
    println!("Resumed crawl {crawl_id}");

    run_until_done(&executor, crawl_id).await
}

pub async fn cancel(data_dir: &Path, crawl_id: &str) -> jangma::Result<()> {
    let crawl_id = parse_crawl_id(crawl_id)?;
    let executor = build_executor(data_dir)?;
    executor.cancel(crawl_id).await?;

    let status = executor.status(crawl_id).await?;
    println!("Crawl {crawl_id}: {}", status.state);
    Ok(())
}

pub async fn status(data_dir: &Path, crawl_id: &str, with_metrics: bool) -> jangma::Result<()> {
    let crawl_id = parse_crawl_id(crawl_id)?;
    let executor = build_executor(data_dir)?;
    let status = executor.status(crawl_id).await?;

    print_status(&status);

    if with_metrics {
        if let Err(e) = prom::init_metrics() {
            tracing::warn!(error = %e, "Metrics initialization failed");
        }
        prom::update_from_snapshot(&executor.runtime().metrics.snapshot());
        match prom::encode_metrics() {
            Ok(text) => {
                println!("\nMetrics");
                println!("-------");
                print!("{text}");
            }
            Err(e) => tracing::warn!(error = %e, "Metrics encoding failed"),
        }
    }
    Ok(())
}

/// Drive a started/resumed crawl to completion
///
/// The first Ctrl-C pauses cooperatively (a pause checkpoint is written);
/// a second Ctrl-C while the pause is still draining cancels the crawl.
async fn run_until_done(executor: &CrawlExecutor, crawl_id: CrawlId) -> jangma::Result<()> {
    tokio::select! {
        status = executor.wait(crawl_id) => {
            let status = status?;
            print_status(&status);
            Ok(())
        }
        _ = tokio::signal::ctrl_c() => {
            println!("\nInterrupted; pausing crawl (Ctrl-C again to cancel)...");
            executor.pause(crawl_id).await?;

            // Wait for the pause checkpoint to land, aborting on a second
            // signal
            let deadline = tokio::time::Instant::now() + Duration::from_secs(60);
            loop {
                let status = executor.status(crawl_id).await?;
                if status.state == CrawlState::Paused || status.state.is_terminal() {
                    print_status(&status);
                    if status.state == CrawlState::Paused {
                        println!("Resume later with: jangma crawl resume {crawl_id}");
                    }
                    return Ok(());
                }
                if tokio::time::Instant::now() >= deadline {
                    println!("Pause did not complete in time; state persists via checkpoints");
                    return Ok(());
                }
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(200)) => {}
                    _ = tokio::signal::ctrl_c() => {
                        println!("\nSecond interrupt; cancelling crawl...");
                        executor.cancel(crawl_id).await?;
                        let status = executor.status(crawl_id).await?;
                        print_status(&status);
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn print_status(status: &CrawlStatus) {
    println!("\nCrawl Status");
    println!("============");
    println!("Crawl:      {}", status.crawl_id);
    match status.substate {
        Some(substate) => println!("State:      {} ({substate})", status.state),
        None => println!("State:      {}", status.state),
    }
    println!("Iteration:  {}", status.iteration_number);
    println!("Crawled:    {}", status.progress.urls_crawled);
    println!("Unchanged:  {}", status.progress.urls_skipped_unchanged);
    println!("Failed:     {}", status.progress.urls_failed);
    println!("Documents:  {}", status.progress.documents_found);
    println!("Bytes:      {}", status.progress.bytes_downloaded);
    println!(
        "Success:    {:.1}%",
        status.progress.success_rate() * 100.0
    );
    if let Some(error) = &status.last_error {
        println!("Last error: {error}");
    }
}
