//! Configuration types and CLI options.
//!
//! This module defines enums and structs used for command-line argument parsing
//! and configuration.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::constants::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::transport::ClientIdentity;

/// Verbosity of the `stockrush` log target.
///
/// Dependency targets stay capped regardless; see `initialization::init_logger_with`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    /// Worker lifecycle, handshakes and stock discoveries
    Info,
    /// Adds proxy assignment and per-attempt step detail
    Debug,
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Self::Error,
            LogLevel::Warn => Self::Warn,
            LogLevel::Info => Self::Info,
            LogLevel::Debug => Self::Debug,
            LogLevel::Trace => Self::Trace,
        }
    }
}

/// Log line layout: colored text for terminals, or one JSON object per line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Plain,
    Json,
}

/// Browser fingerprint to impersonate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum IdentityPreset {
    /// Chrome on Windows (label "Chrome-Auto")
    Chrome,
    /// Firefox on Windows
    Firefox,
    /// Safari on macOS
    Safari,
}

impl IdentityPreset {
    /// Builds the client identity described by this preset.
    pub fn identity(self) -> ClientIdentity {
        match self {
            IdentityPreset::Chrome => ClientIdentity::chrome(),
            IdentityPreset::Firefox => ClientIdentity::firefox(),
            IdentityPreset::Safari => ClientIdentity::safari(),
        }
    }
}

/// Command-line options and library configuration.
///
/// All options have sensible defaults and can be overridden via command-line flags.
///
/// # Examples
///
/// ```bash
/// # Probe two storefronts with the default Chrome identity
/// stockrush https://shop.example.com/ https://store.example.org/
///
/// # Through a proxy list, impersonating Firefox
/// stockrush --proxies proxies.txt --identity firefox https://shop.example.com/
/// ```
#[derive(Debug, Clone, Parser)]
#[command(
    name = "stockrush",
    about = "Issues fingerprinted requests and reports the negotiated protocol."
)]
pub struct Config {
    /// URLs to request
    #[arg(value_parser, required = true)]
    pub urls: Vec<String>,

    /// Log level: error|warn|info|debug|trace
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Log format: plain|json
    #[arg(long, value_enum, default_value_t = LogFormat::Plain)]
    pub log_format: LogFormat,

    /// Client fingerprint to impersonate
    #[arg(long, value_enum, default_value_t = IdentityPreset::Chrome)]
    pub identity: IdentityPreset,

    /// Proxy list file (`host:port` or `host:port:user:pass` per line)
    #[arg(long, value_parser)]
    pub proxies: Option<PathBuf>,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    pub timeout_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            log_level: LogLevel::Info,
            log_format: LogFormat::Plain,
            identity: IdentityPreset::Chrome,
            proxies: None,
            timeout_seconds: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}
