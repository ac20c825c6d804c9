//! Herald: campaign broadcast daemon
//!
//! Main binary with subcommands:
//! - `daemon`: Arm active campaigns and deliver them until Ctrl-C
//! - `plan`: Print the job table the daemon would build, without sending

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod daemon;
mod db;
mod telegram;

/// Parse boolean from environment variable, accepting common truthy values.
/// Accepts "1", "true", "yes", "on" (case-insensitive) as true.
/// Accepts "0", "false", "no", "off", "" (case-insensitive) as false.
fn parse_bool_env(s: &str) -> Result<bool, String> {
    match s.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(format!(
            "invalid boolean value '{}', expected 1/true/yes/on or 0/false/no/off",
            s
        )),
    }
}

#[derive(Parser)]
#[command(name = "herald")]
#[command(about = "Campaign broadcast daemon for Telegram audiences", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon (reconcile campaigns, fire jobs, deliver messages)
    Daemon {
        /// SQLite database path
        #[arg(long, env = "HERALD_DATABASE", default_value = "herald.db")]
        database: PathBuf,

        /// Telegram bot token
        #[arg(long, env = "HERALD_BOT_TOKEN", hide_env_values = true)]
        bot_token: Option<String>,

        /// Telegram Bot API base URL
        #[arg(long, env = "HERALD_TELEGRAM_API_URL", default_value = telegram::DEFAULT_API_URL)]
        telegram_api_url: String,

        /// Base URL for relative campaign photo paths
        #[arg(long, env = "HERALD_MEDIA_BASE_URL")]
        media_base_url: Option<String>,

        /// Reconcile interval in seconds
        #[arg(long, env = "HERALD_RECONCILE_INTERVAL", default_value = "60")]
        reconcile_interval: u64,

        /// Maximum concurrent sends per campaign firing
        #[arg(long, env = "HERALD_DELIVERY_CONCURRENCY", default_value = "25")]
        delivery_concurrency: usize,

        /// Log messages instead of sending them.
        /// Accepts "1", "true", "yes", or "on".
        #[arg(long, env = "HERALD_DRY_RUN", value_parser = parse_bool_env, default_value = "false")]
        dry_run: bool,
    },

    /// Reconcile once and print the resulting job table
    Plan {
        /// SQLite database path
        #[arg(long, env = "HERALD_DATABASE", default_value = "herald.db")]
        database: PathBuf,

        /// Reconcile interval in seconds
        #[arg(long, env = "HERALD_RECONCILE_INTERVAL", default_value = "60")]
        reconcile_interval: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| {
                "herald=info,herald_scheduler=info,herald_campaign=info".to_string()
            }),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon {
            database,
            bot_token,
            telegram_api_url,
            media_base_url,
            reconcile_interval,
            delivery_concurrency,
            dry_run,
        } => {
            daemon::run_with_config(daemon::DaemonConfig {
                database_path: database,
                bot_token,
                telegram_api_url,
                media_base_url,
                reconcile_interval,
                delivery_concurrency,
                dry_run,
            })
            .await
        }

        Commands::Plan {
            database,
            reconcile_interval,
        } => daemon::plan(database, reconcile_interval).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool_env() {
        for truthy in ["1", "true", "YES", "On"] {
            assert_eq!(parse_bool_env(truthy), Ok(true));
        }
        for falsy in ["0", "false", "no", "OFF", ""] {
            assert_eq!(parse_bool_env(falsy), Ok(false));
        }
        assert!(parse_bool_env("maybe").is_err());
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["herald", "daemon", "--dry-run", "true"]).unwrap();
        match cli.command {
            Commands::Daemon {
                reconcile_interval,
                delivery_concurrency,
                dry_run,
                telegram_api_url,
                ..
            } => {
                assert_eq!(reconcile_interval, 60);
                assert_eq!(delivery_concurrency, 25);
                assert!(dry_run);
                assert_eq!(telegram_api_url, telegram::DEFAULT_API_URL);
            }
            Commands::Plan { .. } => panic!("expected daemon command"),
        }
    }
}
