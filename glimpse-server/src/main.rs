use std::sync::Arc;

use clap::Parser;
use glimpse_core::{Classifier, GlimpseConfig, OnnxClassifier, OnnxClassifierConfig};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use glimpse_server::http::{self, HttpState};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "glimpse.toml")]
    config: String,

    /// Load config and model, print a summary and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience; production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match GlimpseConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging; RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.service.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    if args.check {
        let onnx_config = OnnxClassifierConfig::from(&config.classifier);
        let model_path = onnx_config.model_path.display().to_string();
        match OnnxClassifier::new(onnx_config) {
            Ok(classifier) => println!("✅ Model loaded: {} ({})", classifier.name(), model_path),
            Err(e) => {
                println!("❌ Model load failed: {}", e);
                std::process::exit(1);
            }
        }
        println!("✅ Fact source: {}", config.facts.base_url);
        println!("✅ Glimpse config check passed");
        return Ok(());
    }

    let state = match HttpState::from_config(config).await {
        Ok(s) => Arc::new(s),
        Err(e) => {
            eprintln!("Failed to initialise Glimpse: {}", e);
            std::process::exit(1);
        }
    };

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    http::start_http_server(state, tx.subscribe()).await?;

    Ok(())
}
