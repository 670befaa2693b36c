//! `checkpoint` subcommands: list, create, restore

use std::path::Path;

use jangma::error::{ConfigError, Error};

use super::{build_executor, parse_crawl_id};

pub async fn list(data_dir: &Path, crawl_id: &str) -> jangma::Result<()> {
    let crawl_id = parse_crawl_id(crawl_id)?;
    let executor = build_executor(data_dir)?;
    let metas = executor
        .checkpoints()
        .list(crawl_id)
        .map_err(Error::Checkpoint)?;

    if metas.is_empty() {
        println!("No checkpoints for crawl {crawl_id}");
        return Ok(());
    }

    println!("Checkpoints for {crawl_id}");
    println!(
        "{:<6} {:<8} {:<11} {:<26} {}",
        "seq", "kind", "state", "created_at", "checkpoint_id"
    );
    for meta in metas {
        println!(
            "{:<6} {:<8} {:<11} {:<26} {}",
            meta.sequence_number,
            meta.kind.as_str(),
            meta.state.as_str(),
            meta.created_at.to_rfc3339(),
            meta.checkpoint_id
        );
    }
    Ok(())
}

pub async fn create(data_dir: &Path, crawl_id: &str) -> jangma::Result<()> {
    let crawl_id = parse_crawl_id(crawl_id)?;
    let executor = build_executor(data_dir)?;
    let checkpoint = executor.manual_checkpoint(crawl_id).await?;
    println!(
        "Checkpoint {} written (sequence {})",
        checkpoint.checkpoint_id, checkpoint.sequence_number
    );
    Ok(())
}

pub async fn restore(
    data_dir: &Path,
    crawl_id: &str,
    checkpoint_id: Option<&str>,
) -> jangma::Result<()> {
    let crawl_id = parse_crawl_id(crawl_id)?;
    let executor = build_executor(data_dir)?;

    match checkpoint_id {
        Some(raw) => {
            let checkpoint_id = uuid::Uuid::parse_str(raw).map_err(|_| {
                Error::Config(ConfigError::new(format!("invalid checkpoint id: {raw}")))
            })?;
            executor.resume_from(crawl_id, checkpoint_id).await?;
        }
        None => {
            executor.resume(crawl_id).await?;
        }
    }
    println!("Restored crawl {crawl_id}; running to completion");

    let status = executor.wait(crawl_id).await?;
    println!("Finished in state: {}", status.state);
    Ok(())
}
