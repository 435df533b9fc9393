use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use marketplace_etl::config::{Config, PipelineConfig};
use marketplace_etl::error::Result;
use marketplace_etl::pipeline::Pipeline;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Items,
    Orders,
    Full,
}

/// Marketplace analytics ETL.
///
/// `etl [CONFIG.json]` runs every configured seller;
/// `etl SELLER [items|orders|full]` runs one seller.
#[derive(Debug, Parser)]
#[command(name = "etl", version)]
struct Cli {
    /// Seller id, or a pipeline config file ending in `.json`
    target: Option<String>,

    /// Pipeline to run for a single seller
    #[arg(value_enum, default_value_t = Mode::Full)]
    mode: Mode,

    /// Pipeline config file for single-seller runs
    #[arg(long, env = "PIPELINE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    let code = match run(cli, cfg).await {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            error!("Fatal error: {e}");
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli, cfg: Config) -> Result<bool> {
    let (config_path, seller_id) = match cli.target {
        Some(target) if target.ends_with(".json") => (Some(PathBuf::from(target)), None),
        Some(seller_id) => (cli.config, Some(seller_id)),
        None => (cli.config, None),
    };

    let pipeline_cfg = match config_path {
        Some(path) => {
            let loaded = PipelineConfig::from_file_or_default(&path);
            info!("Pipeline configuration from {}", path.display());
            loaded
        }
        None => PipelineConfig::default(),
    };

    let mut pipeline = Pipeline::new(&cfg, pipeline_cfg)?;
    if !pipeline.validate_environment().await {
        error!("Environment validation failed. Exiting.");
        return Ok(false);
    }

    let Some(seller_id) = seller_id else {
        info!("Multi-seller mode: processing all configured sellers");
        pipeline.run_multi(None).await;
        return Ok(pipeline.finish());
    };

    info!("Running {:?} pipeline for seller {seller_id}", cli.mode);
    let ok = match cli.mode {
        Mode::Items => pipeline.run_items(&seller_id).await,
        Mode::Orders => pipeline.run_orders(&seller_id).await,
        Mode::Full => {
            let (items, orders) = pipeline.run_full(&seller_id).await;
            items && orders
        }
    };
    pipeline.finish();
    Ok(ok)
}
