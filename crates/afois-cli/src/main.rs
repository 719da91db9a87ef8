use afois_storage::PgStore;
use afois_sync::{open_stores, run_daily_digest, DigestOutcome, IngestConfig, IngestPipeline, LogNotificationService};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "afois-cli")]
#[command(about = "Federal opportunity ingestion and intelligence")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Ingest SAM.gov opportunities for every targeted NAICS code.
    Ingest {
        /// Use this organization's targeting instead of the defaults.
        #[arg(long)]
        org: Option<Uuid>,
    },
    /// Ingest the SBA SubNet feed.
    Subnet,
    /// Apply database migrations.
    Migrate,
    /// Run the HTTP API (and the scheduler, when enabled).
    Serve,
    /// Send the daily digest of high-scoring opportunities.
    Notify,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "afois=info,tower_http=info".into());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();
    let config = IngestConfig::from_env();

    match cli.command.unwrap_or(Commands::Ingest { org: None }) {
        Commands::Ingest { org } => {
            let stores = open_stores(&config).await?;
            let pipeline = IngestPipeline::from_config(config, stores.opportunities)?;
            let report = pipeline.run_sam(org).await?;
            println!("{}", report.report_text);
            println!("{}", serde_json::to_string_pretty(&report.debug)?);
        }
        Commands::Subnet => {
            let stores = open_stores(&config).await?;
            let pipeline = IngestPipeline::from_config(config, stores.opportunities)?;
            let report = pipeline.run_subnet().await;
            println!("{}", report.report_text);
        }
        Commands::Migrate => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is required to migrate")?;
            let store = PgStore::connect(url).await?;
            store.migrate().await?;
            info!("migrations applied");
        }
        Commands::Serve => {
            afois_web::serve_from_env().await?;
        }
        Commands::Notify => {
            let stores = open_stores(&config).await?;
            match run_daily_digest(
                stores.analyses.as_ref(),
                &LogNotificationService,
                config.digest_min_score,
                config.digest_limit,
            )
            .await?
            {
                DigestOutcome::Sent { count } => println!("digest sent: {count} opportunities"),
                DigestOutcome::Empty => println!("no new high-score opportunities"),
            }
        }
    }

    Ok(())
}
