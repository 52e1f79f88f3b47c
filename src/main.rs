//! Main application entry point (CLI binary).
//!
//! This is a thin wrapper around the `stockrush` library that handles:
//! - Command-line argument parsing
//! - Environment variable loading (.env file)
//! - Logger and crypto provider initialization
//! - User-facing output formatting

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use std::process;

use stockrush::initialization::{init_crypto_provider, init_logger_with};
use stockrush::{run_probe, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // .env next to the working directory first, then next to the executable
    if dotenvy::dotenv().is_err() {
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                let env_path = exe_dir.join(".env");
                if env_path.exists() {
                    let _ = dotenvy::from_path(&env_path);
                }
            }
        }
    }

    let config = Config::parse();

    init_logger_with(config.log_level.into(), config.log_format)
        .context("Failed to initialize logger")?;
    init_crypto_provider();

    match run_probe(config).await {
        Ok(report) => {
            for result in &report.results {
                match (&result.status, &result.protocol, &result.error) {
                    (Some(status), Some(protocol), _) => println!(
                        "{} {} {} {} bytes in {}ms",
                        status.to_string().green(),
                        protocol,
                        result.url,
                        result.body_bytes,
                        result.elapsed.as_millis()
                    ),
                    (_, _, error) => println!(
                        "{} {} {}",
                        "ERR".red(),
                        result.url,
                        error.as_deref().unwrap_or("unknown error")
                    ),
                }
            }
            println!(
                "{}/{} URL{} answered, {} handshake{}{} in {:.1}s",
                report.successful(),
                report.results.len(),
                if report.results.len() == 1 { "" } else { "s" },
                report.handshakes,
                if report.handshakes == 1 { "" } else { "s" },
                report
                    .proxy
                    .as_ref()
                    .map(|p| format!(" via {p}"))
                    .unwrap_or_default(),
                report.elapsed_seconds
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("stockrush error: {:#}", e);
            process::exit(1);
        }
    }
}
