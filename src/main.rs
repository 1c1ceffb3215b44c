use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufRead, BufReader};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fieldlimit::config::{FieldLimitConfig, LoggingConfig};
use fieldlimit::ratelimit::FieldRateLimiter;
use fieldlimit::replay;

#[derive(Debug, Parser)]
#[command(name = "fieldlimit", version, about = "Field-scoped rate limiter")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, global = true, default_value = "fieldlimit.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the configuration and print the compiled rules
    Check,
    /// Evaluate JSON-lines field accesses and print one decision per line
    Replay {
        /// Read accesses from this file instead of stdin
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = FieldLimitConfig::from_file(&cli.config)?;
    init_tracing(&config.logging);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(config = %cli.config.display(), "Configuration loaded");

    let limiter = Arc::new(FieldRateLimiter::new(&config.rate_limit)?);

    match cli.command {
        Command::Check => {
            for rule in limiter.rules() {
                let r = rule.rule();
                println!(
                    "#{} {}.{} identifier={} max={} ttl={}ms",
                    rule.index(),
                    r.type_pattern,
                    r.field_pattern,
                    r.identifier,
                    r.max,
                    r.ttl
                );
            }
            println!("{} rule(s) OK", limiter.rule_count());
        }
        Command::Replay { input } => {
            let reader: Box<dyn AsyncBufRead + Unpin + Send> = match input {
                Some(path) => Box::new(BufReader::new(tokio::fs::File::open(path).await?)),
                None => Box::new(BufReader::new(tokio::io::stdin())),
            };

            replay::run(limiter, reader, tokio::io::stdout(), shutdown_signal()).await?;
        }
    }

    info!("fieldlimit stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    // stdout carries replay output, logs go to stderr
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, tearing down");
        }
        _ = terminate => {
            info!("Received SIGTERM, tearing down");
        }
    }
}
