//! Graph Discovery - Main Server
//!
//! Connection discovery and insight digests over a personal knowledge graph.

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use graph_discovery::ledger::CostWindow;
use graph_discovery::neo4j::models::{DigestPeriod, PeriodKind};
use graph_discovery::{AppState, Config};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "graph-discovery")]
#[command(about = "Connection discovery engine for a personal knowledge graph")]
struct Cli {
    /// Path to config.yaml (defaults to ./config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use the in-memory graph store instead of Neo4j
    #[arg(long, global = true)]
    in_memory: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API and the job scheduler
    Serve {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run one discovery pass and print its report
    Discover {
        #[arg(long)]
        max_invocations: Option<u32>,

        #[arg(long)]
        max_cost: Option<f64>,

        /// Wall-clock cap in seconds
        #[arg(long)]
        max_duration_secs: Option<u64>,
    },

    /// Generate the insight digest for a period
    Digest {
        /// day or week
        #[arg(short, long, default_value = "week")]
        period: PeriodKind,

        /// Any date inside the period (defaults to the previous period)
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },

    /// Print the LLM cost summary
    Costs {
        /// Trailing UTC days, or "all"
        #[arg(short, long, default_value = "7")]
        days: CostWindow,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,graph_discovery=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_yaml_and_env(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.server_port = port;
            }
            graph_discovery::start_server(config, cli.in_memory).await
        }
        Commands::Discover {
            max_invocations,
            max_cost,
            max_duration_secs,
        } => {
            let mut budget = config.budget;
            if let Some(n) = max_invocations {
                budget.max_invocations = n;
            }
            if let Some(cost) = max_cost {
                budget.max_cost = cost;
            }
            if let Some(secs) = max_duration_secs {
                budget.max_duration = Some(Duration::from_secs(secs));
            }

            let state = AppState::new(config, cli.in_memory).await?;
            let report = state.service.run_discovery(budget).await?;
            state.ledger.flush().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Digest { period, date } => {
            let period = match date {
                Some(date) => DigestPeriod::containing(period, date),
                None => DigestPeriod::containing(period, Utc::now().date_naive()).previous(),
            };
            let state = AppState::new(config, cli.in_memory).await?;
            let digest = state.service.summarize_period(period).await?;
            state.ledger.flush().await?;
            println!("{}", serde_json::to_string_pretty(&digest)?);
            Ok(())
        }
        Commands::Costs { days } => {
            let state = AppState::new(config, cli.in_memory).await?;
            let summary = state.service.get_cost_summary(days);
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
    }
}
