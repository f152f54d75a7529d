// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use std::net::SocketAddr;
use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use logflux::queue::RecordReceiver;
use logflux::record::Record;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Send an HTTP request over TCP and return the response
pub async fn send_tcp_request(
    addr: SocketAddr,
    uri: &str,
    method: &str,
    body: Option<&str>,
) -> Result<Response<hyper::body::Incoming>, Box<dyn std::error::Error>> {
    let stream = timeout(Duration::from_secs(2), TcpStream::connect(addr)).await??;

    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;

    tokio::spawn(async move {
        let _ = conn.await;
    });

    let mut request_builder = Request::builder()
        .uri(uri)
        .method(method)
        .header("Host", addr.to_string())
        .header("Content-Type", "application/json");

    let request = if let Some(body_data) = body {
        request_builder = request_builder.header("Content-Length", body_data.len().to_string());
        request_builder.body(Full::new(Bytes::from(body_data.to_string())))?
    } else {
        request_builder.body(Full::new(Bytes::new()))?
    };

    Ok(timeout(Duration::from_secs(2), sender.send_request(request)).await??)
}

/// Collect a response body and parse it as JSON
pub async fn response_json(
    response: Response<hyper::body::Incoming>,
) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let bytes = response.into_body().collect().await?.to_bytes();
    Ok(serde_json::from_slice(&bytes)?)
}

/// Next record from the queue, or None if nothing arrives within [`RECV_TIMEOUT`]
pub async fn recv_record(rx: &mut RecordReceiver) -> Option<Record> {
    timeout(RECV_TIMEOUT, rx.recv()).await.ok().flatten()
}

/// Asserts that no record arrives for a short while
pub async fn assert_no_record(rx: &mut RecordReceiver) {
    let next = timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(
        !matches!(next, Ok(Some(_))),
        "unexpected record: {next:?}"
    );
}

pub async fn send_udp(addr: SocketAddr, message: &str) -> std::io::Result<()> {
    let socket = UdpSocket::bind("127.0.0.1:0").await?;
    socket.send_to(message.as_bytes(), addr).await?;
    Ok(())
}

/// Open a TCP connection and write `payload` verbatim
pub async fn connect_and_write(addr: SocketAddr, payload: &[u8]) -> std::io::Result<TcpStream> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(payload).await?;
    stream.flush().await?;
    Ok(stream)
}
