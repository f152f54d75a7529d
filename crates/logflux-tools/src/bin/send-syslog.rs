// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::process::ExitCode;

use clap::Parser;
use logflux::syslog::Protocol;
use logflux_tools::syslog_client::send_message;

/// Send one syslog message to a logflux syslog receiver
#[derive(Parser, Debug)]
#[command(name = "send-syslog", version, about, long_about = None)]
#[command(after_help = "Example: send-syslog udp localhost:5140 \"<34>Test message\"")]
struct Cli {
    /// udp or tcp
    protocol: String,
    /// Receiver address, e.g. localhost:5140
    address: String,
    /// Message to send, optionally starting with a <priority> tag
    message: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let protocol: Protocol = match cli.protocol.parse() {
        Ok(protocol) => protocol,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match send_message(protocol, &cli.address, &cli.message).await {
        Ok(target) => {
            println!("{} message sent to {target}", protocol.as_str().to_uppercase());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
