use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dealmatch_engine::{
    EngineConfig, MatchRequest, MatchRunSummary, MatchingEngine, PgAuditSink,
};
use dealmatch_store::PgMatchStore;
use dealmatch_web::AppState;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "dealmatch-cli")]
#[command(about = "Mandate-to-company matching engine command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the matching HTTP API.
    Serve,
    /// Re-match one company against all active mandates.
    MatchCompany { id: Uuid },
    /// Match one mandate against its candidate companies.
    MatchMandate { id: Uuid },
    /// Prune stale matches and re-match a bounded batch of companies.
    RecalculateAll,
    /// Apply the engine-owned database migrations.
    Migrate,
}

async fn build_engine(config: &EngineConfig) -> Result<Arc<MatchingEngine>> {
    let pool = dealmatch_store::connect(&config.database_url)
        .await
        .context("connecting to database")?;
    let store = Arc::new(PgMatchStore::new(pool.clone()));
    let audit = Arc::new(PgAuditSink::new(pool));
    Ok(Arc::new(MatchingEngine::new(store, audit, config.clone())))
}

fn print_summary(summary: &MatchRunSummary) {
    println!(
        "run {} ({}): processed={} new={} updated={} skipped={}",
        summary.run_id,
        summary.mode.as_str(),
        summary.processed_companies,
        summary.new_matches,
        summary.updated_matches,
        summary.skipped
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::from_env();

    match cli.command {
        Commands::Serve => {
            let engine = build_engine(&config).await?;
            let port = engine.config().web_port;
            dealmatch_web::serve(AppState::new(engine), port).await?;
        }
        Commands::MatchCompany { id } => {
            let engine = build_engine(&config).await?;
            let summary = engine.run(MatchRequest::Company(id)).await?;
            print_summary(&summary);
        }
        Commands::MatchMandate { id } => {
            let engine = build_engine(&config).await?;
            let summary = engine.run(MatchRequest::Mandate(id)).await?;
            print_summary(&summary);
        }
        Commands::RecalculateAll => {
            let engine = build_engine(&config).await?;
            let summary = engine.run(MatchRequest::RecalculateAll).await?;
            print_summary(&summary);
        }
        Commands::Migrate => {
            let pool = dealmatch_store::connect(&config.database_url)
                .await
                .context("connecting to database")?;
            dealmatch_store::run_migrations(&pool).await?;
            println!("migrations applied");
        }
    }

    Ok(())
}
