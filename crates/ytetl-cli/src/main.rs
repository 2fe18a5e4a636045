use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use ytetl_storage::PgStore;
use ytetl_sync::{build_scheduler, RunSummary, SyncConfig};

#[derive(Debug, Parser)]
#[command(name = "ytetl-cli")]
#[command(about = "Incremental YouTube channel/video/comment loader")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one extract → transform → load pass.
    Run,
    /// Run on the configured cron schedule until interrupted.
    Schedule,
    /// Apply database migrations and exit.
    Migrate,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("YTETL_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_summary(summary: &RunSummary) {
    match &summary.load {
        Some(load) => println!(
            "sync complete: run_id={} channels={} new_videos={} new_comments={}",
            summary.run_id, load.channels_upserted, load.videos_appended, load.comments_appended
        ),
        None => println!("sync finished: run_id={} status={:?}", summary.run_id, summary.status),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let summary = ytetl_sync::run_sync_once_from_env().await?;
            print_summary(&summary);
        }
        Commands::Schedule => {
            let (config, pipeline) = ytetl_sync::pipeline_from_env().await?;
            let channel_ids = config.resolve_channel_ids()?;
            let mut sched = build_scheduler(Arc::new(pipeline), channel_ids, &config.scheduler_cron).await?;
            sched.start().await.context("starting scheduler")?;
            info!(cron = %config.scheduler_cron, "scheduler running; press Ctrl-C to stop");
            tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
        Commands::Migrate => {
            let database_url = SyncConfig::database_url_from_env();
            let store = PgStore::connect(&database_url)
                .await
                .context("connecting to the database")?;
            store.migrate().await.context("applying migrations")?;
            println!("migrations applied");
        }
    }

    Ok(())
}
