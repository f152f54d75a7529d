// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sends a single syslog message over UDP or TCP.

use std::net::SocketAddr;

use anyhow::Context;
use logflux::syslog::Protocol;
use tokio::io::AsyncWriteExt;
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tracing::debug;

use crate::connect_address;

/// Sends `message` to `address`. Over TCP a trailing newline is added to a non-empty message
/// that lacks one.
pub async fn send_message(
    protocol: Protocol,
    address: &str,
    message: &str,
) -> anyhow::Result<SocketAddr> {
    let target = resolve(address).await?;
    match protocol {
        Protocol::Udp => send_udp(target, message).await?,
        Protocol::Tcp => send_tcp(target, message).await?,
    }
    debug!("Sent {} bytes over {protocol} to {target}", message.len());
    Ok(target)
}

async fn resolve(address: &str) -> anyhow::Result<SocketAddr> {
    let address = connect_address(address);
    let target = lookup_host(&address)
        .await
        .with_context(|| format!("failed to resolve {address}"))?
        .next()
        .with_context(|| format!("no address found for {address}"))?;
    Ok(target)
}

async fn send_udp(target: SocketAddr, message: &str) -> anyhow::Result<()> {
    let bind = if target.is_ipv4() {
        "0.0.0.0:0"
    } else {
        "[::]:0"
    };
    let socket = UdpSocket::bind(bind)
        .await
        .context("error creating UDP socket")?;
    socket
        .send_to(message.as_bytes(), target)
        .await
        .context("error sending")?;
    Ok(())
}

async fn send_tcp(target: SocketAddr, message: &str) -> anyhow::Result<()> {
    let mut stream = TcpStream::connect(target)
        .await
        .context("error connecting")?;
    stream
        .write_all(tcp_frame(message).as_bytes())
        .await
        .context("error sending")?;
    stream.flush().await.context("error sending")?;
    stream.shutdown().await.context("error closing connection")?;
    Ok(())
}

fn tcp_frame(message: &str) -> String {
    if message.is_empty() || message.ends_with('\n') {
        message.to_string()
    } else {
        format!("{message}\n")
    }
}
