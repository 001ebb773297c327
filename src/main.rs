use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use floodgate::cache::{Cache, MemoryCache, RedisCache};
use floodgate::config::{FloodgateConfig, StoreConfig};
use floodgate::throttle::{Throttle, ThrottleStatus, DEFAULT_PENALTY_SECONDS};

/// Drive a fixed-window throttle against the configured counter store.
#[derive(Debug, Parser)]
#[command(name = "floodgate", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "FLOODGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Attempt the resource: check, record a hit, report the decision
    Attempt {
        key: String,
        /// Number of attempts to make in a row
        #[arg(long, default_value_t = 1)]
        times: u32,
        /// Check and record in one atomic store call
        #[arg(long)]
        atomic: bool,
    },
    /// Report whether the next attempt would be allowed, without recording it
    Check { key: String },
    /// Record a hit without checking the limit
    Hit { key: String },
    /// Report the current quota
    Status { key: String },
    /// Extend the current window
    Penalize {
        key: String,
        #[arg(long, default_value_t = DEFAULT_PENALTY_SECONDS)]
        seconds: u64,
    },
}

impl Command {
    fn key(&self) -> &str {
        match self {
            Command::Attempt { key, .. }
            | Command::Check { key }
            | Command::Hit { key }
            | Command::Status { key }
            | Command::Penalize { key, .. } => key,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays machine readable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    debug!(version = env!("CARGO_PKG_VERSION"), "Starting Floodgate");

    let config = match &cli.config {
        Some(path) => FloodgateConfig::from_file(path)?,
        None => FloodgateConfig::default(),
    };

    let store = open_store(&config.store).await?;
    let resource = config.limits.resolve(cli.command.key())?;
    info!(
        key = %resource.key,
        max_attempts = resource.max_attempts,
        decay_seconds = resource.decay_seconds,
        "Throttle configured"
    );
    let throttle = Throttle::with_config(store, resource)?;

    match &cli.command {
        Command::Attempt { times, atomic, .. } => {
            for _ in 0..*times {
                let allowed = if *atomic {
                    throttle.check_and_hit().await?
                } else {
                    throttle.attempt().await?
                };
                print_decision(cli.format, allowed);
            }
        }
        Command::Check { .. } => {
            print_decision(cli.format, throttle.check().await?);
        }
        Command::Hit { .. } => {
            throttle.hit().await?;
        }
        Command::Penalize { seconds, .. } => {
            throttle.increment_expiration(*seconds).await?;
        }
        Command::Status { .. } => {}
    }

    print_status(cli.format, &throttle.status().await?)?;
    Ok(())
}

/// Build the counter store named by the configuration.
async fn open_store(config: &StoreConfig) -> floodgate::Result<Arc<dyn Cache>> {
    let store: Arc<dyn Cache> = match config {
        StoreConfig::Memory => {
            info!("Using in-memory counter store");
            Arc::new(MemoryCache::new())
        }
        StoreConfig::Redis(redis) => Arc::new(RedisCache::connect(redis).await?),
    };
    Ok(store)
}

fn print_decision(format: OutputFormat, allowed: bool) {
    match format {
        OutputFormat::Text => println!("{}", if allowed { "allowed" } else { "denied" }),
        OutputFormat::Json => println!("{}", serde_json::json!({ "allowed": allowed })),
    }
}

fn print_status(format: OutputFormat, status: &ThrottleStatus) -> anyhow::Result<()> {
    match format {
        OutputFormat::Text => {
            println!("key:         {}", status.key);
            println!("limit:       {}", status.limit);
            println!("count:       {}", status.count);
            println!("remaining:   {}", status.remaining_clamped());
            println!("retry-after: {}s", status.retry_after_seconds);
            if let Some(resets_at) = status.resets_at {
                println!("resets-at:   {}", resets_at.to_rfc3339());
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string(status)?),
    }
    Ok(())
}
