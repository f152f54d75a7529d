// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod common;

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use common::helpers::{recv_record, response_json, send_tcp_request, send_udp};
use hyper::StatusCode;
use logflux::collector::Collector;
use logflux::config::CollectorConfig;
use logflux::errors::{CollectorError, SourceError};
use logflux::file_tail::{FileTailConfig, FileTailSource};
use logflux::http::{HttpConfig, HttpSource};
use logflux::record::Record;
use logflux::source::{Lifecycle, Source};
use logflux::syslog::{Protocol, SyslogConfig, SyslogSource};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_all_sources_fan_in() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "file line").unwrap();
    file.flush().unwrap();

    let mut file_config = FileTailConfig::new(file.path());
    file_config.poll_interval = Duration::from_millis(20);
    let file_source = Arc::new(FileTailSource::new(file_config));
    let syslog = Arc::new(SyslogSource::new(SyslogConfig::new(
        "127.0.0.1:0",
        Protocol::Udp,
    )));
    let http = Arc::new(HttpSource::new(HttpConfig::new("127.0.0.1:0")));

    let mut collector = Collector::new(CollectorConfig::default());
    collector.add_source(file_source.clone());
    collector.add_source(syslog.clone());
    collector.add_source(http.clone());

    let mut rx = collector.start(&CancellationToken::new()).await.unwrap();

    send_udp(syslog.local_addr().await.unwrap(), "<13>from syslog")
        .await
        .unwrap();
    let response = send_tcp_request(
        http.local_addr().await.unwrap(),
        "/logs",
        "POST",
        Some(r#"{"message":"from http","source":"e2e"}"#),
    )
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(response_json(response).await.unwrap()["status"], "accepted");

    let mut records: Vec<Record> = Vec::new();
    for _ in 0..3 {
        records.push(recv_record(&mut rx).await.expect("missing record"));
    }
    let mut messages: Vec<&str> = records.iter().map(|r| r.message.as_str()).collect();
    messages.sort_unstable();
    assert_eq!(messages, vec!["<13>from syslog", "file line\n", "from http"]);

    collector.shutdown().await.unwrap();
    for source in [
        file_source.lifecycle().await,
        syslog.lifecycle().await,
        http.lifecycle().await,
    ] {
        assert_eq!(source, Lifecycle::Stopped);
    }
    let end = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap();
    assert!(end.is_none(), "queue should be exhausted after shutdown");
}

#[tokio::test]
async fn test_setup_failure_releases_started_sources() {
    let http = Arc::new(HttpSource::new(HttpConfig::new("127.0.0.1:0")));
    let missing = tempfile::tempdir().unwrap().path().join("absent.log");

    let mut collector = Collector::new(CollectorConfig::default());
    collector.add_source(http.clone());
    collector.add_source(Arc::new(FileTailSource::new(FileTailConfig::new(&missing))));

    let err = collector.start(&CancellationToken::new()).await.unwrap_err();
    match &err {
        CollectorError::Setup { name, err } => {
            assert_eq!(name, &format!("file:{}", missing.display()));
            assert!(matches!(err, SourceError::FileNotFound { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().starts_with("Failed to start file:"));

    assert_eq!(http.lifecycle().await, Lifecycle::Stopped);
    assert!(http.local_addr().await.is_none());
    assert!(!collector.is_running().await);
}

#[tokio::test]
async fn test_bind_conflict_is_setup_error() {
    let first = Arc::new(SyslogSource::new(SyslogConfig::new(
        "127.0.0.1:0",
        Protocol::Tcp,
    )));
    let mut collector = Collector::new(CollectorConfig::default());
    collector.add_source(first.clone());
    let _rx = collector.start(&CancellationToken::new()).await.unwrap();
    let taken = first.local_addr().await.unwrap();

    let mut conflicting = Collector::new(CollectorConfig::default());
    conflicting.add_source(Arc::new(HttpSource::new(HttpConfig::new(taken.to_string()))));
    let err = conflicting
        .start(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CollectorError::Setup {
            err: SourceError::Bind { .. },
            ..
        }
    ));

    collector.shutdown().await.unwrap();
}
