use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(
    name = "jangma",
    version,
    about = "Resumable multi-pass web crawler with change detection and durable checkpoints",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true, default_value = "text")]
    log_format: String,

    /// Data directory for crawls, iterations, and checkpoints
    #[arg(short, long, global = true, default_value = "./data")]
    data_dir: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl lifecycle operations
    Crawl {
        #[command(subcommand)]
        command: CrawlCommands,
    },

    /// Iteration chain operations
    Iter {
        #[command(subcommand)]
        command: IterCommands,
    },

    /// Checkpoint operations
    Checkpoint {
        #[command(subcommand)]
        command: CheckpointCommands,
    },
}

#[derive(Subcommand)]
enum CrawlCommands {
    /// Start a crawl from a config file and run it to completion
    Start {
        /// TOML config file with seeds and options
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Pause a running crawl (cooperative; fetches drain first)
    Pause {
        /// Crawl id
        crawl_id: String,
    },

    /// Resume a paused crawl from its latest checkpoint
    Resume {
        /// Crawl id
        crawl_id: String,
    },

    /// Cancel a crawl and write a final checkpoint
    Cancel {
        /// Crawl id
        crawl_id: String,
    },

    /// Show crawl status
    Status {
        /// Crawl id
        crawl_id: String,

        /// Also dump metrics in Prometheus text format
        #[arg(long)]
        metrics: bool,
    },
}

#[derive(Subcommand)]
enum IterCommands {
    /// Create and run the next iteration
    Next {
        /// Crawl id
        crawl_id: String,

        /// Iteration mode
        #[arg(short, long, default_value = "incremental")]
        mode: String,
    },

    /// List iterations of a crawl
    List {
        /// Crawl id
        crawl_id: String,
    },

    /// Compare two iterations by number; prints deterministic JSON
    Compare {
        /// Crawl id
        crawl_id: String,

        /// Earlier iteration number
        a: u32,

        /// Later iteration number
        b: u32,
    },
}

#[derive(Subcommand)]
enum CheckpointCommands {
    /// List checkpoints of a crawl
    List {
        /// Crawl id
        crawl_id: String,
    },

    /// Write a manual checkpoint from the latest durable state
    Create {
        /// Crawl id
        crawl_id: String,
    },

    /// Resume execution from a checkpoint
    Restore {
        /// Crawl id
        crawl_id: String,

        /// Specific checkpoint id; latest resumable when omitted
        #[arg(long)]
        checkpoint_id: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_format, cli.verbose) {
        eprintln!("failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let result = dispatch(cli).await;
    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
}

async fn dispatch(cli: Cli) -> jangma::Result<()> {
    let data_dir = cli.data_dir;

    match cli.command {
        Commands::Crawl { command } => match command {
            CrawlCommands::Start { config } => {
                tracing::info!(config = %config.display(), "Starting crawl command");
                commands::crawl::start(&data_dir, &config).await
            }
            CrawlCommands::Pause { crawl_id } => {
                commands::crawl::pause(&data_dir, &crawl_id).await
            }
            CrawlCommands::Resume { crawl_id } => {
                tracing::info!(crawl_id = %crawl_id, "Starting resume command");
                commands::crawl::resume(&data_dir, &crawl_id).await
            }
            CrawlCommands::Cancel { crawl_id } => {
                commands::crawl::cancel(&data_dir, &crawl_id).await
            }
            CrawlCommands::Status { crawl_id, metrics } => {
                commands::crawl::status(&data_dir, &crawl_id, metrics).await
            }
        },

        Commands::Iter { command } => match command {
            IterCommands::Next { crawl_id, mode } => {
                tracing::info!(crawl_id = %crawl_id, mode = %mode, "Starting next iteration");
                commands::iter::next(&data_dir, &crawl_id, &mode).await
            }
            IterCommands::List { crawl_id } => commands::iter::list(&data_dir, &crawl_id).await,
            IterCommands::Compare { crawl_id, a, b } => {
                commands::iter::compare(&data_dir, &crawl_id, a, b).await
            }
        },

        Commands::Checkpoint { command } => match command {
            CheckpointCommands::List { crawl_id } => {
                commands::checkpoint::list(&data_dir, &crawl_id).await
            }
            CheckpointCommands::Create { crawl_id } => {
                commands::checkpoint::create(&data_dir, &crawl_id).await
            }
            CheckpointCommands::Restore {
                crawl_id,
                checkpoint_id,
            } => {
                commands::checkpoint::restore(&data_dir, &crawl_id, checkpoint_id.as_deref()).await
            }
        },
    }
}

fn setup_tracing(format: &str, verbose: bool) -> anyhow::Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("jangma=debug,info")
    } else {
        tracing_subscriber::EnvFilter::new("jangma=info,warn")
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
