//! `iter` subcommands: next, list, compare

use std::path::Path;

use jangma::error::{ConfigError, Error};
use jangma::iteration::IterationMode;

use super::{build_executor, parse_crawl_id};

pub async fn next(data_dir: &Path, crawl_id: &str, mode: &str) -> jangma::Result<()> {
    let crawl_id = parse_crawl_id(crawl_id)?;
    let mode = IterationMode::parse(mode).ok_or_else(|| {
        Error::Config(ConfigError::new(format!(
            "invalid mode: {mode} (expected baseline, incremental, or full)"
        )))
    })?;

    let executor = build_executor(data_dir)?;
    let iteration = executor.next_iteration(crawl_id, mode).await?;
    println!(
        "Iteration {} started ({}, {})",
        iteration.iteration_number, iteration.mode, iteration.iteration_id
    );

    let status = executor.wait(crawl_id).await?;
    println!("Finished in state: {}", status.state);
    Ok(())
}

pub async fn list(data_dir: &Path, crawl_id: &str) -> jangma::Result<()> {
    let crawl_id = parse_crawl_id(crawl_id)?;
    let executor = build_executor(data_dir)?;
    let iterations = executor.iterations().iterations_for(crawl_id);

    if iterations.is_empty() {
        println!("No iterations for crawl {crawl_id}");
        return Ok(());
    }

    println!("Iterations for {crawl_id}");
    println!("{:<4} {:<12} {:<11} {:<8} {:<10} {}", "#", "mode", "status", "fetched", "unchanged", "iteration_id");
    for iteration in iterations {
        let status = if iteration.is_completed() {
            "completed"
        } else {
            "open"
        };
        println!(
            "{:<4} {:<12} {:<11} {:<8} {:<10} {}",
            iteration.iteration_number,
            iteration.mode.as_str(),
            status,
            iteration.stats.urls_fetched,
            iteration.stats.urls_unchanged,
            iteration.iteration_id
        );
    }
    Ok(())
}

pub async fn compare(data_dir: &Path, crawl_id: &str, a: u32, b: u32) -> jangma::Result<()> {
    let crawl_id = parse_crawl_id(crawl_id)?;
    let executor = build_executor(data_dir)?;
    let iterations = executor.iterations().iterations_for(crawl_id);

    let find = |number: u32| {
        iterations
            .iter()
            .find(|i| i.iteration_number == number)
            .map(|i| i.iteration_id)
            .ok_or_else(|| {
                Error::Config(ConfigError::new(format!(
                    "crawl {crawl_id} has no iteration {number}"
                )))
            })
    };
    let id_a = find(a)?;
    let id_b = find(b)?;

    let diff = executor
        .iterations()
        .compare(id_a, id_b)
        .map_err(Error::Iteration)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&diff).map_err(Error::storage)?
    );
    Ok(())
}
