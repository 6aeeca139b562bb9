use anyhow::{bail, Context};
use clap::{Args, Subcommand};

use crate::cli::utils::output_success;
use crate::cli::OutputFormat;
use crate::config::{self, StoreBackend};
use crate::database::{StoreManager, TaskRepository};
use crate::services::{BackfillJob, BackfillSummary};

#[derive(Subcommand)]
pub enum BackfillCommands {
    #[command(about = "Set status (default NEW) on records that have none")]
    Status(BackfillArgs),

    #[command(about = "Set the owner (default 0) on records created before ownership")]
    Owner(BackfillArgs),
}

#[derive(Args, Debug)]
pub struct BackfillArgs {
    #[arg(long, help = "Value to write instead of the field's default")]
    pub value: Option<String>,

    #[arg(long, help = "Report what would change without writing")]
    pub dry_run: bool,

    #[arg(long, default_value_t = 8, help = "Concurrent record updates")]
    pub concurrency: usize,
}

pub async fn handle(cmd: BackfillCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    let (job, args) = match cmd {
        BackfillCommands::Status(args) => (BackfillJob::status(), args),
        BackfillCommands::Owner(args) => (BackfillJob::owner(), args),
    };

    let mut job = job.dry_run(args.dry_run).with_concurrency(args.concurrency);
    if let Some(value) = args.value {
        if value.trim().is_empty() {
            bail!("--value must not be empty");
        }
        job = job.with_value(value);
    }

    let config = config::config();
    if config.store.backend == StoreBackend::Memory {
        tracing::warn!("Backfilling the in-memory store; nothing outlives this process");
    }

    let store = StoreManager::connect(&config.store)
        .await
        .context("failed to initialise task store")?;
    let repository = TaskRepository::new(store, config.store.owner_index.clone())
        .with_page_size(config.store.page_size);

    let summary = job.run(&repository).await.context("backfill scan failed")?;
    print_summary(&summary, &output_format)
}

fn print_summary(summary: &BackfillSummary, output_format: &OutputFormat) -> anyhow::Result<()> {
    let message = format!(
        "Backfill of {} complete{}",
        summary.field,
        if summary.dry_run { " (dry run)" } else { "" }
    );

    if let OutputFormat::Json = output_format {
        return output_success(output_format, &message, Some(serde_json::to_value(summary)?));
    }

    output_success(output_format, &message, None)?;
    println!("  value:   {}", summary.value);
    println!("  scanned: {}", summary.scanned);
    println!(
        "  {}: {}",
        if summary.dry_run { "would update" } else { "updated" },
        summary.updated
    );
    println!("  skipped: {}", summary.skipped);
    println!("  failed:  {}", summary.failed.len());
    for failure in &summary.failed {
        println!("    {}: {}", failure.id, failure.error);
    }
    Ok(())
}
