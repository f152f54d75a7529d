// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use logflux_tools::http_client::{demo_batch, IngestClient, DEFAULT_TIMEOUT};

/// Send logs to a logflux HTTP receiver
#[derive(Parser, Debug)]
#[command(name = "send-http", version, about, long_about = None)]
#[command(after_help = "Examples:
  send-http single localhost:8080 ERROR 'Connection failed'
  send-http batch localhost:8080
  send-http health localhost:8080")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a single log entry
    Single {
        address: String,
        level: String,
        message: String,
    },
    /// Send a fixed batch of five log entries
    Batch { address: String },
    /// Check server health
    Health { address: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Single {
            address,
            level,
            message,
        } => {
            let accepted = IngestClient::new(&address, DEFAULT_TIMEOUT)?
                .send_single(&level, &message)
                .await?;
            println!("Log sent successfully! ID: {}", accepted.id);
        }
        Command::Batch { address } => {
            let accepted = IngestClient::new(&address, DEFAULT_TIMEOUT)?
                .send_batch(&demo_batch())
                .await?;
            println!("Batch sent successfully!");
            println!("   Total: {}, Accepted: {}", accepted.total, accepted.accepted);
        }
        Command::Health { address } => {
            let health = IngestClient::new(&address, DEFAULT_TIMEOUT)?.health().await?;
            println!("Server is healthy!");
            println!("   Status: {}", health.status);
            println!("   Time: {}", health.time);
        }
    }
    Ok(())
}
