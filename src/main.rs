//! # Lead Intelligence Engine Entry Point
//!
//! Runs the sync scheduler and discovery poller as a long-lived service, or
//! performs one-off enrichment, discovery and sync passes from the command
//! line.

use std::net::IpAddr;

use anyhow::Context;
use clap::{Parser, Subcommand};
use leadintel::{
    config::ConfigLoader, engine::Engine, enrichment::upsert_record, telemetry::init_tracing,
};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "leadintel", version, about = "Lead enrichment and sync engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the scheduler and discovery poller until interrupted (default).
    Run,
    /// Run a single discovery pass and print its statistics.
    Discover,
    /// Enrich a domain from every connected provider and print the record.
    Enrich {
        domain: String,
        /// Visitor IP forwarded to providers that resolve by address.
        #[arg(long)]
        ip: Option<IpAddr>,
        /// Merge the result into the stored lead.
        #[arg(long)]
        save: bool,
    },
    /// Run a sync for one provider now and print the job.
    Sync { provider: String },
    /// Print the highest-scoring stored leads.
    Leads {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration from layered env files and variables
    let config = ConfigLoader::new()
        .load()
        .context("failed to load configuration")?;
    init_tracing(&config).context("failed to initialize tracing")?;

    info!(profile = %config.profile, "configuration loaded");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(configuration = %redacted_json, "effective configuration");
    }

    let engine = Engine::connect(config).await?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            engine.start().await.context("failed to start engine")?;
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for shutdown signal")?;
            info!("shutdown signal received");
            engine.stop().await;
        }
        Command::Discover => {
            let stats = engine.poller.discover_now().await;
            println!(
                "discovered={} processed={} discarded={} failed_providers={} failed_candidates={}",
                stats.discovered,
                stats.processed,
                stats.discarded,
                stats.failed_providers,
                stats.failed_candidates
            );
        }
        Command::Enrich { domain, ip, save } => {
            let enrichment = engine
                .aggregator
                .enrich(&domain, ip)
                .await
                .with_context(|| format!("failed to enrich '{domain}'"))?;
            for failure in &enrichment.failures {
                eprintln!("{}: {}", failure.provider_id, failure.error);
            }

            let record = if save {
                upsert_record(
                    engine.repository.as_ref(),
                    &engine.scorer,
                    enrichment.record,
                    "enrichment",
                )
                .await
                .context("failed to store enriched lead")?
                .into_record()
            } else {
                enrichment.record
            };
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Sync { provider } => {
            let job = engine
                .scheduler
                .run_sync(&provider)
                .await
                .with_context(|| format!("failed to sync '{provider}'"))?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        Command::Leads { limit } => {
            let leads = engine
                .repository
                .list(limit)
                .await
                .context("failed to list leads")?;
            println!("{}", serde_json::to_string_pretty(&leads)?);
        }
    }

    Ok(())
}
