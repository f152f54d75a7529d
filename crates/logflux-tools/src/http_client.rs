// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Client for the HTTP ingestion endpoints.

use std::time::Duration;

use anyhow::{bail, Context};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::connect_address;

/// Source tag attached to records sent with [`IngestClient::send_single`].
pub const TEST_TOOL_SOURCE: &str = "http-test-tool";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SingleAccepted {
    pub status: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BatchAccepted {
    pub status: String,
    pub total: u64,
    pub accepted: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Health {
    pub status: String,
    pub time: String,
}

/// Builds a reqwest client with the given request timeout.
pub fn build_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("failed to build HTTP client")
}

pub struct IngestClient {
    client: reqwest::Client,
    base_url: String,
}

impl IngestClient {
    /// `address` is `host:port` (or `:port`) or a full `http://` base URL.
    pub fn new(address: &str, timeout: Duration) -> anyhow::Result<Self> {
        let address = connect_address(address);
        let base_url = if address.starts_with("http://") || address.starts_with("https://") {
            address.trim_end_matches('/').to_string()
        } else {
            format!("http://{address}")
        };
        Ok(Self {
            client: build_client(timeout)?,
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn send_single(&self, level: &str, message: &str) -> anyhow::Result<SingleAccepted> {
        let response = self
            .client
            .post(format!("{}/logs", self.base_url))
            .json(&single_payload(level, message))
            .send()
            .await
            .context("failed to send request")?;
        expect_json(response, StatusCode::ACCEPTED).await
    }

    pub async fn send_batch(&self, records: &Value) -> anyhow::Result<BatchAccepted> {
        let response = self
            .client
            .post(format!("{}/batch", self.base_url))
            .json(records)
            .send()
            .await
            .context("failed to send request")?;
        expect_json(response, StatusCode::ACCEPTED).await
    }

    pub async fn health(&self) -> anyhow::Result<Health> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .context("failed to connect")?;
        expect_json(response, StatusCode::OK).await
    }
}

async fn expect_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    expected: StatusCode,
) -> anyhow::Result<T> {
    let status = response.status();
    if status != expected {
        let body = response.text().await.unwrap_or_default();
        debug!("Unexpected response body: {body}");
        bail!("Server returned status: {}", status.as_u16());
    }
    response
        .json::<T>()
        .await
        .context("failed to decode server response")
}

/// Payload for one record, tagged as coming from this tool.
pub fn single_payload(level: &str, message: &str) -> Value {
    json!({
        "level": level,
        "message": message,
        "source": TEST_TOOL_SOURCE,
        "fields": { "test": true },
    })
}

/// Fixed five record batch covering every level.
pub fn demo_batch() -> Value {
    json!([
        { "level": "INFO", "message": "Application started", "source": "app" },
        { "level": "DEBUG", "message": "Loading configuration", "source": "app" },
        { "level": "WARNING", "message": "High memory usage: 85%", "source": "monitor" },
        {
            "level": "ERROR",
            "message": "Database connection timeout",
            "source": "database",
            "fields": { "host": "db.example.com", "timeout": 30 },
        },
        { "level": "CRITICAL", "message": "System crash imminent", "source": "system" },
    ])
}
