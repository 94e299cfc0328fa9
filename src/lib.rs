//! Mero Hisab core.
//!
//! A personal ledger for Nepali shopkeepers and lenders: customers and
//! suppliers, given/received entries dated in Bikram Sambat, interest on
//! outstanding balances, and an offline queue that syncs to Firestore once
//! the device is back online. Sign-in is by SMS one-time code.
//!
//! The `commands` layer exposes every operation as a JSON-in/JSON-out
//! handler; the `mero-hisab` binary drives those handlers from the terminal.

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use clap::Parser;
use std::path::Path;
use std::process::ExitCode;
use tracing::{info, level_filters::LevelFilter};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub mod auth;
pub mod calendar;
pub mod cli;
pub mod commands;
pub mod config;
pub mod customers;
pub mod db;
pub mod diagnostics;
pub mod error;
pub mod firestore;
pub mod interest;
pub mod models;
pub mod preferences;
pub mod sms;
pub mod storage;
pub mod sync;
pub mod transactions;

#[cfg(test)]
mod test_support;

use crate::cli::Cli;
use crate::commands::AppState;
use crate::config::AppConfig;

/// UTC timestamp with millisecond precision, e.g. `2024-08-31T04:15:00.123Z`.
pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn value_str(v: &serde_json::Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = v.get(*key).and_then(|x| x.as_str()) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

pub(crate) fn value_f64(v: &serde_json::Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| v.get(*key).and_then(|x| x.as_f64()))
}

/// Booleans, plus `"true"`/`"1"`-style strings from loosely typed callers.
pub(crate) fn value_bool(v: &serde_json::Value, keys: &[&str]) -> Option<bool> {
    for key in keys {
        match v.get(*key) {
            Some(serde_json::Value::Bool(b)) => return Some(*b),
            Some(serde_json::Value::String(s)) => {
                match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" | "yes" => return Some(true),
                    "false" | "0" | "no" => return Some(false),
                    _ => {}
                }
            }
            Some(serde_json::Value::Number(n)) => return Some(n.as_i64() != Some(0)),
            _ => {}
        }
    }
    None
}

/// Console logs go to stderr so command output on stdout stays valid JSON.
/// The daily file under `log_dir` always records at the `RUST_LOG` level.
fn init_logging(log_dir: &Path, verbose: u8) -> WorkerGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,mero_hisab_lib=debug"));

    diagnostics::prune_old_logs(log_dir);
    std::fs::create_dir_all(log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(log_dir, diagnostics::LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_level = match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        _ => LevelFilter::DEBUG,
    };
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbose > 1)
        .with_filter(console_level);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();
    guard
}

fn run_cli(cli: Cli) -> anyhow::Result<()> {
    let mut config = AppConfig::from_env();
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    std::fs::create_dir_all(&config.data_dir).with_context(|| {
        format!("failed to create data directory {}", config.data_dir.display())
    })?;

    // Flushes the log file on drop.
    let _log_guard = init_logging(&config.log_dir(), cli.verbose);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %config.data_dir.display(),
        "starting Mero Hisab"
    );
    config.hydrate_credentials();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let state = AppState::new(config).context("failed to open the local database")?;

    let output = runtime.block_on(cli::execute(&cli.command, &state))?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    match run_cli(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_helpers() {
        let v = json!({ "name": "  ", "alias": " Ram ", "amount": 12.5, "flag": "yes", "n": 0 });
        assert_eq!(value_str(&v, &["name", "alias"]).as_deref(), Some("Ram"));
        assert_eq!(value_f64(&v, &["missing", "amount"]), Some(12.5));
        assert_eq!(value_bool(&v, &["flag"]), Some(true));
        assert_eq!(value_bool(&v, &["n"]), Some(false));
        assert_eq!(value_bool(&v, &["name"]), None);
    }

    #[test]
    fn test_now_rfc3339_is_utc_millis() {
        let now = now_rfc3339();
        assert!(now.ends_with('Z'));
        assert_eq!(now.len(), "2024-08-31T04:15:00.123Z".len());
    }
}
