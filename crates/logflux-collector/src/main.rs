// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use chrono::SecondsFormat;
use clap::{Parser, Subcommand};
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use logflux::{
    collector::Collector,
    config::CollectorConfig,
    file_tail::{FileTailConfig, FileTailSource},
    http::{HttpConfig, HttpSource},
    queue::RecordReceiver,
    record::Record,
    source::Source,
    syslog::{Protocol, SyslogConfig, SyslogSource},
};

/// Extra time on top of the shutdown grace before giving up on the consumer.
const CONSUMER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Slack over the per-source grace so that sources report their own shutdown timeouts.
const SHUTDOWN_MARGIN: Duration = Duration::from_secs(1);

/// Collects log records from one source and prints them to stdout
#[derive(Parser, Debug)]
#[command(name = "logflux-collector", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Tail a file, emitting every appended line
    File {
        /// File to follow
        path: PathBuf,
    },
    /// Receive syslog messages
    Syslog {
        /// udp or tcp
        protocol: String,
        /// Bind address, e.g. 0.0.0.0:514 or :514
        address: String,
    },
    /// Accept records over HTTP on /logs and /batch
    Http {
        /// Bind address, e.g. 0.0.0.0:8080 or :8080
        address: String,
    },
}

#[tokio::main]
pub async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match CollectorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let env_filter = format!("h2=off,hyper=off,{}", config.log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    match run(cli.mode, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(mode: Mode, config: CollectorConfig) -> anyhow::Result<()> {
    let source = build_source(mode, &config)?;

    let mut collector = Collector::new(config);
    collector.add_source(source);
    let shutdown_grace = collector.config().shutdown_grace;

    let cancel = CancellationToken::new();
    let records = collector.start(&cancel).await?;
    let mut consumer = tokio::spawn(print_records(records));

    let consumer_finished = tokio::select! {
        res = shutdown_signal() => {
            res.context("failed to listen for shutdown signals")?;
            info!("Shutdown signal received, stopping sources");
            false
        }
        _ = &mut consumer => {
            warn!("Record stream ended before a shutdown signal");
            true
        }
    };

    cancel.cancel();
    let deadline = shutdown_deadline(shutdown_grace);
    match timeout(deadline, collector.shutdown()).await {
        Ok(Ok(())) => info!("Collector stopped"),
        Ok(Err(e)) => warn!("Collector stopped with errors: {e}"),
        Err(_) => warn!("Collector did not stop within {deadline:?}"),
    }

    if !consumer_finished {
        match timeout(CONSUMER_DRAIN_TIMEOUT, consumer).await {
            Ok(Ok(printed)) => debug!("Printed {printed} records"),
            Ok(Err(e)) => error!("Consumer task failed: {e:?}"),
            Err(_) => warn!("Consumer did not drain within {CONSUMER_DRAIN_TIMEOUT:?}"),
        }
    }
    Ok(())
}

fn shutdown_deadline(grace: Duration) -> Duration {
    grace + SHUTDOWN_MARGIN
}

fn build_source(mode: Mode, config: &CollectorConfig) -> anyhow::Result<Arc<dyn Source>> {
    let source: Arc<dyn Source> = match mode {
        Mode::File { path } => {
            let mut file_config = FileTailConfig::new(path);
            file_config.poll_interval = config.poll_interval;
            file_config.shutdown_grace = config.shutdown_grace;
            Arc::new(FileTailSource::new(file_config))
        }
        Mode::Syslog { protocol, address } => {
            let protocol: Protocol = protocol.parse()?;
            let mut syslog_config = SyslogConfig::new(address, protocol);
            syslog_config.shutdown_grace = config.shutdown_grace;
            Arc::new(SyslogSource::new(syslog_config))
        }
        Mode::Http { address } => {
            let mut http_config = HttpConfig::new(address);
            http_config.shutdown_grace = config.shutdown_grace;
            Arc::new(HttpSource::new(http_config))
        }
    };
    Ok(source)
}

/// Prints every record until the queue is exhausted. Returns how many were printed.
async fn print_records(mut records: RecordReceiver) -> u64 {
    let mut count = 0;
    while let Some(record) = records.recv().await {
        count += 1;
        println!("{}", format_record(count, &record));
    }
    count
}

fn format_record(n: u64, record: &Record) -> String {
    format!(
        "[{n}] {} [{}] {}: {}",
        record.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        record.level,
        record.source,
        record.message.trim_end_matches(['\r', '\n'])
    )
}

async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res,
            _ = terminate.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use clap::error::ErrorKind;
    use logflux::record::Level;

    #[test]
    fn test_parse_modes() {
        let cli = Cli::try_parse_from(["logflux-collector", "file", "/var/log/app.log"]).unwrap();
        assert!(matches!(cli.mode, Mode::File { ref path } if path == &PathBuf::from("/var/log/app.log")));

        let cli = Cli::try_parse_from(["logflux-collector", "syslog", "udp", ":514"]).unwrap();
        assert!(matches!(
            cli.mode,
            Mode::Syslog { ref protocol, ref address } if protocol == "udp" && address == ":514"
        ));

        let cli = Cli::try_parse_from(["logflux-collector", "http", ":8080"]).unwrap();
        assert!(matches!(cli.mode, Mode::Http { ref address } if address == ":8080"));
    }

    #[test]
    fn test_usage_errors() {
        let err = Cli::try_parse_from(["logflux-collector"]).unwrap_err();
        assert_eq!(
            err.kind(),
            ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
        );

        let err = Cli::try_parse_from(["logflux-collector", "kafka"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);

        let err = Cli::try_parse_from(["logflux-collector", "syslog", "udp"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_build_source_names() {
        let config = CollectorConfig::default();

        let source = build_source(
            Mode::File {
                path: PathBuf::from("/tmp/app.log"),
            },
            &config,
        )
        .unwrap();
        assert_eq!(source.name(), "file:/tmp/app.log");

        let source = build_source(
            Mode::Syslog {
                protocol: "TCP".to_string(),
                address: ":514".to_string(),
            },
            &config,
        )
        .unwrap();
        assert_eq!(source.name(), "syslog:tcp@:514");

        let source = build_source(
            Mode::Http {
                address: ":8080".to_string(),
            },
            &config,
        )
        .unwrap();
        assert_eq!(source.name(), "http@:8080");
    }

    #[test]
    fn test_unsupported_protocol() {
        let err = build_source(
            Mode::Syslog {
                protocol: "sctp".to_string(),
                address: ":514".to_string(),
            },
            &CollectorConfig::default(),
        )
        .err()
        .unwrap();
        assert_eq!(err.to_string(), "unsupported protocol: sctp");
    }

    #[test]
    fn test_shutdown_deadline_outlasts_source_grace() {
        let config = CollectorConfig::default();
        assert!(shutdown_deadline(config.shutdown_grace) > config.shutdown_grace);
        assert_eq!(
            shutdown_deadline(Duration::from_secs(5)),
            Duration::from_secs(6)
        );
    }

    #[test]
    fn test_format_record() {
        let mut record = Record::new("syslog:udp", "disk almost full").with_level(Level::Warning);
        record.timestamp = chrono::Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();

        assert_eq!(
            format_record(7, &record),
            "[7] 2024-03-01T12:30:05Z [WARNING] syslog:udp: disk almost full"
        );

        let record = Record::new("/var/log/app.log", "tailed line\r\n");
        assert!(format_record(1, &record).ends_with("[INFO] /var/log/app.log: tailed line"));
    }
}
