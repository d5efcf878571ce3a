use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use text2sql::{with_selector, AppConfig, BackendRouter, Text2SqlService};
use tracing::info;

#[derive(Parser)]
#[command(name = "text2sql")]
#[command(about = "Natural-language questions to read-only SQL")]
struct Args {
    /// JSON configuration file (defaults plus environment otherwise)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer a question
    Ask {
        query: String,

        /// Datasource name or alias to run against
        #[arg(short, long)]
        data_source: Option<String>,

        /// Comma separated table names to steer generation
        #[arg(short, long)]
        tables: Option<String>,

        /// Run the five-stage pipeline instead of the single-shot path
        #[arg(long)]
        steps: bool,
    },
    /// List tables of a datasource
    Tables {
        #[arg(short, long)]
        data_source: Option<String>,
    },
    /// Check connectivity of every datasource
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = AppConfig::resolve(args.config.as_deref())?;

    let output = match args.command {
        Command::Ask {
            query,
            data_source,
            tables,
            steps,
        } => {
            let service = Text2SqlService::from_config(&config)?;
            info!("Question: {}", query);
            with_selector(data_source.as_deref(), async {
                if steps {
                    serde_json::to_value(service.process_with_steps_hint(&query, tables.as_deref()).await)
                } else {
                    serde_json::to_value(service.process(&query, tables.as_deref()).await)
                }
            })
            .await?
        }
        Command::Tables { data_source } => {
            let router = BackendRouter::from_config(&config)?;
            let backend = router.resolve(data_source.as_deref());
            let tables = backend.list_tables().await?;
            json!({ "dataSource": backend.name(), "tables": tables })
        }
        Command::Check => {
            let router = BackendRouter::from_config(&config)?;
            let report = router.health_check_all().await;
            let all_ok = report.iter().all(|(_, ok)| *ok);
            let entries: Vec<_> = report
                .into_iter()
                .map(|(name, ok)| json!({ "dataSource": name, "reachable": ok }))
                .collect();
            json!({ "allReachable": all_ok, "dataSources": entries })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
