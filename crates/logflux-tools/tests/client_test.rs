// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use logflux::http::{HttpConfig, HttpSource};
use logflux::queue;
use logflux::record::{FieldValue, Level};
use logflux::source::Source;
use logflux::syslog::{Protocol, SyslogConfig, SyslogSource};
use logflux_tools::http_client::{demo_batch, IngestClient, TEST_TOOL_SOURCE};
use logflux_tools::syslog_client::send_message;
use mockito::{Matcher, Server};
use serde_json::json;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn test_send_single_posts_tagged_record() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/logs")
        .match_header("content-type", "application/json")
        .match_body(Matcher::Json(json!({
            "level": "ERROR",
            "message": "Database connection failed",
            "source": TEST_TOOL_SOURCE,
            "fields": { "test": true },
        })))
        .with_status(202)
        .with_body(r#"{"status":"accepted","id":"abc-123"}"#)
        .create_async()
        .await;

    let client = IngestClient::new(&server.host_with_port(), TIMEOUT).unwrap();
    let accepted = client
        .send_single("ERROR", "Database connection failed")
        .await
        .unwrap();

    assert_eq!(accepted.id, "abc-123");
    assert_eq!(accepted.status, "accepted");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_send_batch_posts_demo_records() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/batch")
        .match_body(Matcher::Json(demo_batch()))
        .with_status(202)
        .with_body(r#"{"status":"accepted","total":5,"accepted":4}"#)
        .create_async()
        .await;

    let client = IngestClient::new(&server.url(), TIMEOUT).unwrap();
    let accepted = client.send_batch(&demo_batch()).await.unwrap();

    assert_eq!(accepted.total, 5);
    assert_eq!(accepted.accepted, 4);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_unexpected_status_is_error() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/logs")
        .with_status(503)
        .with_body(r#"{"message":"Log queue is full"}"#)
        .create_async()
        .await;

    let client = IngestClient::new(&server.host_with_port(), TIMEOUT).unwrap();
    let err = client.send_single("INFO", "hello").await.unwrap_err();

    assert_eq!(err.to_string(), "Server returned status: 503");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_health() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/health")
        .with_status(200)
        .with_body(r#"{"status":"healthy","time":"2024-01-01T00:00:00Z"}"#)
        .create_async()
        .await;

    let client = IngestClient::new(&server.host_with_port(), TIMEOUT).unwrap();
    let health = client.health().await.unwrap();

    assert_eq!(health.status, "healthy");
    assert_eq!(health.time, "2024-01-01T00:00:00Z");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_demo_batch_against_http_source() {
    let source = HttpSource::new(HttpConfig::new("127.0.0.1:0"));
    let (tx, mut rx) = queue::bounded(10).unwrap();
    source.start(CancellationToken::new(), tx).await.unwrap();
    let addr = source.local_addr().await.unwrap();

    let client = IngestClient::new(&addr.to_string(), TIMEOUT).unwrap();
    let accepted = client.send_batch(&demo_batch()).await.unwrap();
    assert_eq!((accepted.total, accepted.accepted), (5, 5));

    let mut records = Vec::new();
    for _ in 0..5 {
        records.push(timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap());
    }
    let levels: Vec<Level> = records.iter().map(|r| r.level).collect();
    assert_eq!(
        levels,
        vec![
            Level::Info,
            Level::Debug,
            Level::Warning,
            Level::Error,
            Level::Critical
        ]
    );
    assert_eq!(records[3].source, "database");
    assert_eq!(records[3].fields["host"].as_str(), Some("db.example.com"));
    assert!(matches!(records[3].fields["timeout"], FieldValue::Number(_)));

    let accepted = client.send_single("WARN", "from the tool").await.unwrap();
    let record = timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(accepted.id, record.id.to_string());
    assert_eq!(record.source, TEST_TOOL_SOURCE);
    assert_eq!(record.level, Level::Warning);
    assert_eq!(record.fields["test"], FieldValue::Bool(true));

    source.stop().await.unwrap();
}

#[tokio::test]
async fn test_send_syslog_round_trip() {
    for protocol in [Protocol::Udp, Protocol::Tcp] {
        let source = SyslogSource::new(SyslogConfig::new("127.0.0.1:0", protocol));
        let (tx, mut rx) = queue::bounded(10).unwrap();
        source.start(CancellationToken::new(), tx).await.unwrap();
        let addr = source.local_addr().await.unwrap();

        send_message(protocol, &addr.to_string(), "<34>Test message")
            .await
            .unwrap();

        let record = timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(record.message, "<34>Test message");
        assert_eq!(record.source, protocol.source_tag());
        assert_eq!(record.fields["priority"].as_str(), Some("34"));

        source.stop().await.unwrap();
    }
}

#[tokio::test]
async fn test_send_syslog_unreachable_tcp() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    assert!(send_message(Protocol::Tcp, &addr.to_string(), "nobody home")
        .await
        .is_err());
}
