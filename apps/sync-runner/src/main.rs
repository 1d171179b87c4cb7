//! # KSeF Sync Runner
//!
//! Process entry point: loads configuration and credentials once, opens the
//! database and runs sync cycles.
//!
//! ## Startup
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  tracing (RUST_LOG, default info, stderr)                               │
//! │      │                                                                  │
//! │      ▼                                                                  │
//! │  SyncConfig::load (file + env) ──► --check? ──► probe, print, exit      │
//! │      │                                                                  │
//! │      ▼                                                                  │
//! │  KSEF_TAX_ID / KSEF_TOKEN, public key, SQLite (migrations on open)      │
//! │      │                                                                  │
//! │      ▼                                                                  │
//! │  SyncTrigger ──► one cycle (default) │ --watch: interval + backoff      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod watch;

use anyhow::{bail, Context};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use ksef_db::{Database, DbConfig};
use ksef_sync::config::credential_from_env;
use ksef_sync::{protocol, SyncConfig, SyncOrchestrator, SyncTrigger};

const USAGE: &str = "\
Usage: ksef-sync-runner [--watch | --check] [--config <path>]

  (no flag)        run one sync cycle and print the report as JSON
  --watch          run a cycle every schedule.interval_secs until stopped
  --check          probe the KSeF endpoint and exit
  --config <path>  config file (default: $KSEF_CONFIG or the platform path)

Credentials are read from KSEF_TAX_ID and KSEF_TOKEN.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Once,
    Watch,
    Check,
}

#[derive(Debug, PartialEq, Eq)]
struct Args {
    mode: Mode,
    config_path: Option<PathBuf>,
}

/// Parses command line arguments (without the program name).
fn parse_args<I>(args: I) -> anyhow::Result<Option<Args>>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = Mode::Once;
    let mut config_path = None;
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--watch" | "--check" if mode != Mode::Once => {
                bail!("--watch and --check are mutually exclusive")
            }
            "--watch" => mode = Mode::Watch,
            "--check" => mode = Mode::Check,
            "--config" => {
                let path = args.next().context("--config needs a path")?;
                config_path = Some(PathBuf::from(path));
            }
            "-h" | "--help" => return Ok(None),
            other => bail!("unknown argument '{}'\n\n{}", other, USAGE),
        }
    }

    Ok(Some(Args { mode, config_path }))
}

/// Initializes logging. Reports go to stdout, so logs go to stderr.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=ksef_sync=trace` - Trace the sync engine only
/// - Default: INFO level
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::TRACE)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    init_tracing();

    let Some(args) = parse_args(std::env::args().skip(1))? else {
        println!("{}", USAGE);
        return Ok(ExitCode::SUCCESS);
    };

    let config = SyncConfig::load(args.config_path).context("loading configuration")?;
    info!(
        environment = %config.ksef.environment,
        version = %config.ksef.protocol_version,
        mode = ?args.mode,
        "Configuration loaded"
    );

    let client = protocol::connect(&config)?;

    if args.mode == Mode::Check {
        let reachable = client.check_connectivity().await;
        let report = serde_json::json!({
            "reachable": reachable,
            "environment": config.ksef.environment,
            "protocol_version": config.ksef.protocol_version,
            "base_url": config.base_url()?.as_str(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(exit_code(reachable));
    }

    let credential = credential_from_env().context("reading credentials")?;
    let public_key = config.load_public_key().context("loading public key")?;

    let database = Database::new(DbConfig::new(config.database_path()))
        .await
        .context("opening database")?;

    let orchestrator =
        SyncOrchestrator::with_database(client, database.clone(), public_key, &config);
    let trigger = SyncTrigger::new(orchestrator, credential).with_journal(Arc::new(database.clone()));

    let code = match args.mode {
        Mode::Watch => {
            tokio::select! {
                _ = watch::run(&trigger, &config.schedule) => {}
                _ = watch::shutdown_signal() => {}
            }
            ExitCode::SUCCESS
        }
        _ => {
            let report = trigger.run_now().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            exit_code(report.success)
        }
    };

    database.close().await;
    info!("Runner finished");
    Ok(code)
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<Option<Args>> {
        parse_args(args.iter().map(|a| a.to_string()))
    }

    #[test]
    fn test_default_is_one_shot() {
        let args = parse(&[]).unwrap().unwrap();
        assert_eq!(args.mode, Mode::Once);
        assert_eq!(args.config_path, None);
    }

    #[test]
    fn test_modes_and_config() {
        let args = parse(&["--watch", "--config", "/etc/ksef/sync.toml"])
            .unwrap()
            .unwrap();
        assert_eq!(args.mode, Mode::Watch);
        assert_eq!(args.config_path, Some(PathBuf::from("/etc/ksef/sync.toml")));

        assert_eq!(parse(&["--check"]).unwrap().unwrap().mode, Mode::Check);
        assert!(parse(&["--help"]).unwrap().is_none());
    }

    #[test]
    fn test_bad_arguments() {
        assert!(parse(&["--watch", "--check"]).is_err());
        assert!(parse(&["--config"]).is_err());
        assert!(parse(&["--verbose"]).is_err());
    }
}
