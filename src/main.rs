//! Onramp Service
//!
//! Service binary that wires the pipeline together: loads configuration,
//! opens the intent store, connects the chain and processor clients,
//! starts the disbursement engine, and runs the API server.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -- --config config/onramp.toml
//! ```
//!
//! Or set the config path via environment variable:
//!
//! ```bash
//! ONRAMP_CONFIG_PATH=config/onramp.toml cargo run
//! ```

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use onramp::chain::{ChainClient, EvmRpcClient};
use onramp::config::Config;
use onramp::disburse::DisbursementEngine;
use onramp::processor::HttpProcessorClient;
use onramp::store::{FileIntentStore, IntentStore, MemoryIntentStore};
use onramp::ApiServer;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured logging for debugging and monitoring
    tracing_subscriber::fmt::init();

    info!("Starting Onramp Service");

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        println!("Onramp Service");
        println!();
        println!("Usage: onramp [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --config <path>   Use custom config file path");
        println!("  --help, -h        Show this help message");
        println!();
        println!("Environment variables:");
        println!("  ONRAMP_CONFIG_PATH    Path to config file (overrides --config)");
        return Ok(());
    }

    // Check for custom config path
    let mut config_path = None;
    for (i, arg) in args.iter().enumerate() {
        if arg == "--config" && i + 1 < args.len() {
            config_path = Some(args[i + 1].clone());
            break;
        }
    }
    if let Some(path) = config_path {
        std::env::set_var("ONRAMP_CONFIG_PATH", &path);
        info!("Using custom config: {}", path);
    }

    let config = Config::load()?;
    info!("Configuration loaded successfully");
    info!(
        "Serving {} via {}",
        config.chain.network, config.chain.name
    );

    // Open the intent store: durable when a snapshot path is configured.
    let store: Arc<dyn IntentStore> = match &config.store.path {
        Some(path) => {
            info!("Using file-backed intent store at {}", path);
            Arc::new(FileIntentStore::open(path)?)
        }
        None => {
            info!("Using in-memory intent store");
            Arc::new(MemoryIntentStore::new())
        }
    };

    let chain: Arc<dyn ChainClient> = Arc::new(EvmRpcClient::new(&config.chain)?);
    info!("Funding account: {}", chain.funding_address());

    let processor = Arc::new(HttpProcessorClient::new(&config.processor));

    // Start the disbursement worker and reconciler
    let disburser = DisbursementEngine::start(store.clone(), chain.clone(), &config);

    // Run the API server (this blocks until shutdown)
    let api_server = ApiServer::new(config, store, processor, chain, disburser);
    api_server.run().await?;

    Ok(())
}
