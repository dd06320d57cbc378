//! glimpse-cli: command-line client for the Glimpse HTTP API
//!
//! # Subcommands
//! - `classify <path> [--json]`: upload an image, print label and facts
//! - `status`                  : show server health

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

const DEFAULT_SERVER: &str = "http://127.0.0.1:8765";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "glimpse-cli",
    version,
    about = "Classify images with a Glimpse server and print related facts"
)]
struct Cli {
    /// Glimpse HTTP server URL (overrides GLIMPSE_HTTP_URL env var)
    #[arg(long, env = "GLIMPSE_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Upload an image and print the predicted label with facts
    Classify {
        /// Path to the image file
        path: PathBuf,

        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },

    /// Show Glimpse server status
    Status,
}

// ============================================================================
// API Response Types
// ============================================================================

/// Success body from POST /classify
#[derive(Debug, Serialize, Deserialize)]
pub struct ClassifyResponse {
    pub prediction: String,
    pub facts: Vec<String>,
}

/// Render a classification for humans.
pub fn render_text(resp: &ClassifyResponse) -> String {
    let mut out = format!("Prediction: {}\n", resp.prediction.replace('_', " "));
    for fact in &resp.facts {
        out.push_str(&format!("  • {}\n", fact));
    }
    out
}

/// Pull a readable message out of a 4xx body.
///
/// The server answers with `{"error": ...}`, `{"detail": ...}` or
/// field errors like `{"image": ["No file was submitted."]}`.
pub fn describe_error(body: &serde_json::Value) -> String {
    if let Some(msg) = body["error"].as_str().or_else(|| body["detail"].as_str()) {
        return msg.to_string();
    }

    match body.as_object() {
        Some(fields) if !fields.is_empty() => fields
            .iter()
            .map(|(field, messages)| {
                let joined = messages
                    .as_array()
                    .map(|m| {
                        m.iter()
                            .filter_map(|v| v.as_str())
                            .collect::<Vec<_>>()
                            .join(" ")
                    })
                    .unwrap_or_else(|| messages.to_string());
                format!("{}: {}", field, joined)
            })
            .collect::<Vec<_>>()
            .join("; "),
        _ => body.to_string(),
    }
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

/// Upload an image to POST /classify.
fn do_classify(server: &str, path: &Path, json_output: bool) -> anyhow::Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(120))
        .build()?;

    let form = match reqwest::blocking::multipart::Form::new().file("image", path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("glimpse-cli: cannot read {}: {}", path.display(), e);
            std::process::exit(1);
        }
    };

    let url = format!("{}/classify", server);
    let resp = match client.post(&url).multipart(form).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("glimpse-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    let status = resp.status();
    if !status.is_success() {
        let body: serde_json::Value = resp.json().unwrap_or_default();
        eprintln!("glimpse-cli: server returned {}: {}", status, describe_error(&body));
        std::process::exit(1);
    }

    let classify_resp: ClassifyResponse = match resp.json() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("glimpse-cli: failed to parse classify response: {}", e);
            std::process::exit(1);
        }
    };

    if json_output {
        println!("{}", serde_json::to_string_pretty(&classify_resp)?);
    } else {
        print!("{}", render_text(&classify_resp));
    }

    Ok(())
}

/// Show the server status by calling GET /health.
fn do_status(server: &str) -> anyhow::Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()?;

    let url = format!("{}/health", server);
    let resp = client.get(&url).send();

    match resp {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().unwrap_or_default();
            println!("Glimpse server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:        {}", body["version"].as_str().unwrap_or("?"));
            println!("Classifier:     {}", body["classifier"].as_str().unwrap_or("?"));
            println!("Model loaded:   {}", body["model_loaded"].as_bool().unwrap_or(false));
            println!("Facts source:   {}", body["facts_source"].as_str().unwrap_or("?"));
        }
        Ok(r) => {
            let status = r.status();
            eprintln!("glimpse-cli: server unhealthy (HTTP {})", status);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("glimpse-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Classify { path, json } => do_classify(&server, &path, json),
        Commands::Status => do_status(&server),
    };

    if let Err(e) = result {
        eprintln!("glimpse-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
