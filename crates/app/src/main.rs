//! Wormhole - help-queue service
//!
//! Runs the ticket engine, serves the live queue to displays and sends
//! reminder digests. Also exports closed tickets for reporting.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use wormhole_net::QueueServer;

mod bridge;
mod config;
mod error;
mod reminders;
mod state;

use config::Config;
use error::{AppError, Result};
use state::AppState;

const USAGE: &str = "usage: wormhole [--config <path>] [serve | export <since> <until> [out] | digest]";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Serve,
    Export {
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        out: Option<PathBuf>,
    },
    Digest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Cli {
    config: Option<PathBuf>,
    command: Command,
}

fn parse_args<I>(args: I) -> Result<Cli>
where
    I: IntoIterator<Item = String>,
{
    let mut config = None;
    let mut positional = Vec::new();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = args
                    .next()
                    .ok_or_else(|| AppError::Usage("--config needs a path".into()))?;
                config = Some(PathBuf::from(path));
            }
            "--help" | "-h" => return Err(AppError::Usage(USAGE.into())),
            _ => positional.push(arg),
        }
    }

    let command = match positional.first().map(String::as_str) {
        None | Some("serve") if positional.len() <= 1 => Command::Serve,
        Some("digest") if positional.len() == 1 => Command::Digest,
        Some("export") if (3..=4).contains(&positional.len()) => Command::Export {
            since: parse_bound(&positional[1])?,
            until: parse_bound(&positional[2])?,
            out: positional.get(3).map(PathBuf::from),
        },
        _ => return Err(AppError::Usage(USAGE.into())),
    };

    Ok(Cli { config, command })
}

/// RFC 3339 timestamp, or a bare date meaning its UTC midnight
fn parse_bound(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| AppError::Usage(format!("invalid timestamp '{}'", value)))
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = match parse_args(std::env::args().skip(1)) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(2);
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli
        .config
        .or_else(|| std::env::var_os("WORMHOLE_CONFIG").map(PathBuf::from));
    let config = Config::load(config_path.as_deref())?;
    let state = AppState::open(config)?;

    match cli.command {
        Command::Serve => serve(state).await,
        Command::Export { since, until, out } => {
            let engine = state.engine.clone();
            tokio::task::spawn_blocking(move || export(&engine, since, until, out))
                .await
                .map_err(|e| AppError::Io(io::Error::other(e)))?
        }
        Command::Digest => {
            let engine = state.engine.clone();
            let count = tokio::task::spawn_blocking(move || {
                reminders::deliver_digests(&engine, &reminders::LogNotifier)
            })
            .await
            .map_err(|e| AppError::Io(io::Error::other(e)))??;
            tracing::info!(count, "Digests delivered");
            Ok(())
        }
    }
}

fn export(
    engine: &wormhole_core::AssignmentEngine,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
    out: Option<PathBuf>,
) -> Result<()> {
    let count = match &out {
        Some(path) => {
            let mut writer = BufWriter::new(File::create(path)?);
            let count = engine.export_terminal(since, until, &mut writer)?;
            writer.flush()?;
            count
        }
        None => {
            let stdout = io::stdout();
            let mut writer = stdout.lock();
            let count = engine.export_terminal(since, until, &mut writer)?;
            writer.flush()?;
            count
        }
    };
    tracing::info!(count, "Exported closed tickets");
    Ok(())
}

async fn serve(state: AppState) -> Result<()> {
    tracing::info!("Starting Wormhole");

    let server = Arc::new(
        QueueServer::start(
            state.config.listen_addr,
            state.config.topic.clone(),
            Arc::new(bridge::EngineSnapshot::new(state.engine.clone())),
        )
        .await?,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let relay = tokio::spawn(bridge::run(
        state.broadcaster.subscribe(),
        server.clone(),
        shutdown_rx.clone(),
    ));

    let reminder_job = match state.config.reminder_interval_secs {
        0 => None,
        secs => Some(tokio::spawn(reminders::run(
            state.engine.clone(),
            Arc::new(reminders::LogNotifier),
            Duration::from_secs(secs),
            shutdown_rx,
        ))),
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    let _ = shutdown_tx.send(true);
    server.shutdown().await;
    if let Err(e) = relay.await {
        tracing::warn!("Event relay ended abnormally: {}", e);
    }
    if let Some(job) = reminder_job {
        if let Err(e) = job.await {
            tracing::warn!("Reminder job ended abnormally: {}", e);
        }
    }

    tracing::info!(
        archive_failures = state.engine.archive_failures(),
        publish_failures = state.engine.publish_failures(),
        "Stopped"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_no_args_serves() {
        let cli = parse_args(args(&[])).unwrap();
        assert_eq!(cli.command, Command::Serve);
        assert_eq!(cli.config, None);
    }

    #[test]
    fn test_config_flag_anywhere() {
        let cli = parse_args(args(&["digest", "--config", "/etc/wormhole.toml"])).unwrap();
        assert_eq!(cli.command, Command::Digest);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/wormhole.toml")));
    }

    #[test]
    fn test_export_bounds() {
        let cli = parse_args(args(&[
            "export",
            "2024-03-01",
            "2024-03-04T15:00:00-05:00",
            "out.csv",
        ]))
        .unwrap();
        match cli.command {
            Command::Export { since, until, out } => {
                assert_eq!(since.to_rfc3339(), "2024-03-01T00:00:00+00:00");
                assert_eq!(until.to_rfc3339(), "2024-03-04T20:00:00+00:00");
                assert_eq!(out, Some(PathBuf::from("out.csv")));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_bad_usage() {
        assert!(parse_args(args(&["export", "2024-03-01"])).is_err());
        assert!(parse_args(args(&["export", "yesterday", "today"])).is_err());
        assert!(parse_args(args(&["--config"])).is_err());
        assert!(parse_args(args(&["frobnicate"])).is_err());
    }
}
