//! Daemon and plan commands.
//!
//! The daemon wires the SQLite store, the Telegram sender and the campaign
//! scheduler together, arms every active campaign right away and then drives
//! the job table until Ctrl-C.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use miette::Result;
use tokio::sync::watch;
use tracing::info;

use herald_campaign::{
    DeliveryError, Message, MessageSender, RecipientId, RunContext, SystemClock, TriggerCatalog,
};
use herald_scheduler::{CampaignScheduler, JobSnapshot};

use crate::db::SqliteStore;
use crate::telegram::TelegramSender;

/// Configuration for the daemon.
pub struct DaemonConfig {
    /// SQLite database holding campaigns and audience data.
    pub database_path: PathBuf,
    /// Bot token; required unless `dry_run` is set.
    pub bot_token: Option<String>,
    pub telegram_api_url: String,
    /// Base URL prepended to relative photo references.
    pub media_base_url: Option<String>,
    /// Seconds between reconciles with the store.
    pub reconcile_interval: u64,
    /// Maximum concurrent sends per firing.
    pub delivery_concurrency: usize,
    /// Log messages instead of sending them.
    pub dry_run: bool,
}

/// Sender that only logs what would have been delivered.
pub struct LoggingSender;

#[async_trait]
impl MessageSender for LoggingSender {
    async fn send(&self, recipient: &RecipientId, message: &Message) -> Result<(), DeliveryError> {
        info!(
            recipient = %recipient,
            photo = message.photo.as_deref().unwrap_or("-"),
            button = message.button.is_some(),
            text = %message.text,
            "dry run: message not sent"
        );
        Ok(())
    }
}

fn open_store(path: &Path) -> Result<Arc<SqliteStore>> {
    let store = SqliteStore::open(path)
        .map_err(|e| miette::miette!("failed to open database {}: {}", path.display(), e))?;
    Ok(Arc::new(store))
}

fn build_scheduler(
    store: Arc<SqliteStore>,
    sender: Arc<dyn MessageSender>,
    reconcile_interval: u64,
    delivery_concurrency: usize,
) -> Result<CampaignScheduler> {
    let context = RunContext::new(store.clone(), sender, store, Arc::new(SystemClock))
        .with_max_parallel_sends(delivery_concurrency);

    CampaignScheduler::new(
        TriggerCatalog::standard(),
        context,
        Duration::from_secs(reconcile_interval),
    )
    .map_err(|e| miette::miette!("{}", e))
}

/// Run the daemon until Ctrl-C.
pub async fn run_with_config(config: DaemonConfig) -> Result<()> {
    info!(
        database = %config.database_path.display(),
        dry_run = config.dry_run,
        "starting herald daemon"
    );

    let store = open_store(&config.database_path)?;

    let sender: Arc<dyn MessageSender> = if config.dry_run {
        info!("dry run enabled, messages will only be logged");
        Arc::new(LoggingSender)
    } else {
        let token = config.bot_token.ok_or_else(|| {
            miette::miette!("a bot token is required unless --dry-run is set (HERALD_BOT_TOKEN)")
        })?;
        let telegram = TelegramSender::new(config.telegram_api_url, token, config.media_base_url)
            .map_err(|e| miette::miette!("failed to build HTTP client: {}", e))?;
        Arc::new(telegram)
    };

    let mut scheduler = build_scheduler(
        store,
        sender,
        config.reconcile_interval,
        config.delivery_concurrency,
    )?;

    // Arm active campaigns now instead of waiting a full interval.
    scheduler.reconcile().await;

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Handle shutdown signals
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    scheduler.run(shutdown_rx).await;

    info!("herald daemon stopped");
    Ok(())
}

/// Reconcile once and print the job table without firing anything.
pub async fn plan(database_path: PathBuf, reconcile_interval: u64) -> Result<()> {
    let store = open_store(&database_path)?;
    let mut scheduler = build_scheduler(store, Arc::new(LoggingSender), reconcile_interval, 1)?;

    let summary = scheduler.reconcile().await;
    if let Some(e) = summary.fetch_error {
        return Err(miette::miette!("failed to load campaigns: {}", e));
    }

    println!("{}", render_plan(&scheduler.jobs()));

    if !summary.rejected.is_empty() {
        println!("\nRejected campaigns:");
        for (id, reason) in &summary.rejected {
            println!("  {}: {}", id, reason);
        }
    }
    Ok(())
}

fn render_plan(jobs: &[JobSnapshot]) -> String {
    let mut out = format!("{:<16} {:<32} {}", "JOB", "TRIGGER", "NEXT FIRE (UTC)");
    for job in jobs {
        let next = job
            .next_fire
            .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "\n{:<16} {:<32} {}",
            job.id.to_string(),
            job.trigger.to_string(),
            next
        ));
    }
    out
}
