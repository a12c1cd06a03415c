use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use jobboard_ashby::AshbyClient;
use jobboard_store::JobStore;
use jobboard_sync::{FetchScheduler, SyncConfig, SyncService};
use jobboard_web::AppState;
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Parser)]
#[command(name = "jobboard-cli")]
#[command(about = "Ashby job board sync service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one fetch-and-reconcile pass.
    Sync,
    /// Create the database and apply pending migrations.
    Migrate,
    /// Store the organization and daily fetch times, then sync once.
    Setup {
        /// Ashby organization slug, as it appears in the job board URL.
        #[arg(long)]
        org: String,
        /// Daily fetch time as HH:MM, up to three times.
        #[arg(long = "time", required = true)]
        times: Vec<String>,
    },
    /// Print settings, cache counts and the last run as JSON.
    Status,
    /// Serve the JSON API with the scheduler running.
    Serve,
}

fn init_logging() {
    let level = std::env::var("JOBBOARD_LOG")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(tracing::Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

async fn build_service(config: &SyncConfig) -> Result<SyncService> {
    let store = JobStore::connect(&config.database_url).await?;
    let client = AshbyClient::new(config.client_config())?;
    Ok(SyncService::new(store, Box::new(client)))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let service = build_service(&config).await?;
            let summary = service.run_once().await?;
            println!(
                "sync complete: added={} updated={} removed={} failed_writes={}",
                summary.added, summary.updated, summary.removed, summary.failed_writes
            );
        }
        Commands::Migrate => {
            JobStore::connect(&config.database_url).await?;
            println!("database ready at {}", config.database_url);
        }
        Commands::Setup { org, times } => {
            let service = build_service(&config).await?;
            let saved = service.save_setup(&org, &times).await?;
            let times: Vec<String> = saved.times_of_day.iter().map(|t| t.to_string()).collect();
            println!(
                "setup saved: organization={} times={}",
                saved.organization_id,
                times.join(",")
            );
            let summary = service.run_once().await?;
            println!(
                "initial sync: added={} updated={} removed={} failed_writes={}",
                summary.added, summary.updated, summary.removed, summary.failed_writes
            );
        }
        Commands::Status => {
            let service = build_service(&config).await?;
            let status = service.schedule_status(chrono::Utc::now()).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Serve => {
            let service = Arc::new(build_service(&config).await?);
            let scheduler = FetchScheduler::new(service.clone()).await?;
            if config.scheduler_enabled {
                if let Some(settings) = service.store().load_settings().await? {
                    if settings.setup_complete {
                        scheduler.configure(&settings.times_of_day).await?;
                    }
                }
                scheduler.start().await?;
            }
            let state = AppState {
                service,
                scheduler: Arc::new(scheduler),
            };
            jobboard_web::serve(state, config.web_port).await?;
        }
    }

    Ok(())
}
