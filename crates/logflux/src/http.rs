// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP ingestion source.
//!
//! Serves `POST /logs` (one record), `POST /batch` (an array of records) and `/health`.
//! Handlers never wait for queue capacity: a full queue is reported to the caller as a 503
//! for single submissions and as a lower `accepted` count for batches.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::{Body, Bytes};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{http, Method, Request, StatusCode};
use hyper_util::rt::{TokioIo, TokioTimer};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::DEFAULT_SHUTDOWN_GRACE;
use crate::errors::{OfferError, SourceError};
use crate::http_utils::{
    create_json_response, log_and_create_http_response, verify_request_content_length,
    HttpResponse,
};
use crate::queue::RecordSender;
use crate::record::{fields_from_json, Level, Record};
use crate::source::{Lifecycle, Runner, Source, TaskGroup};
use crate::util::normalize_bind_address;

const LOGS_ENDPOINT_PATH: &str = "/logs";
const BATCH_ENDPOINT_PATH: &str = "/batch";
const HEALTH_ENDPOINT_PATH: &str = "/health";

/// Source tag for submissions that do not name one.
pub const DEFAULT_SOURCE: &str = "http";
pub const DEFAULT_MAX_REQUEST_CONTENT_LENGTH: usize = 10 * 1024 * 1024;

const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(10);
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Bind address, e.g. `0.0.0.0:8080` or `:8080`
    pub address: String,
    pub max_request_content_length: usize,
    /// Time allowed for in-flight requests once shutdown is requested
    pub shutdown_grace: Duration,
}

impl HttpConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            max_request_content_length: DEFAULT_MAX_REQUEST_CONTENT_LENGTH,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

pub struct HttpSource {
    config: HttpConfig,
    runner: Mutex<Runner>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl HttpSource {
    pub fn new(config: HttpConfig) -> Self {
        Self {
            config,
            runner: Mutex::new(Runner::default()),
            local_addr: Mutex::new(None),
        }
    }

    /// Address actually bound while running; resolves a configured port 0.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }
}

#[async_trait]
impl Source for HttpSource {
    async fn start(
        &self,
        cancel: CancellationToken,
        out: RecordSender,
    ) -> Result<(), SourceError> {
        let mut runner = self.runner.lock().await;
        runner.ensure_startable(&self.name())?;

        let address = normalize_bind_address(&self.config.address);
        let bind_error = |err| SourceError::Bind {
            address: address.clone(),
            err,
        };
        let listener = TcpListener::bind(&address).await.map_err(bind_error)?;
        let local = listener.local_addr().map_err(bind_error)?;

        let mut tasks = TaskGroup::new(&cancel);
        let handler = Arc::new(IngestHandler::new(
            out,
            self.config.max_request_content_length,
        ));
        tasks.spawn(serve_tcp(listener, handler, tasks.token()));

        *self.local_addr.lock().await = Some(local);
        runner.set_running(tasks);
        info!("HTTP ingestion listening on {local}");
        Ok(())
    }

    async fn stop(&self) -> Result<(), SourceError> {
        let mut runner = self.runner.lock().await;
        let Some(tasks) = runner.begin_stop() else {
            return Ok(());
        };

        let result = tasks
            .shutdown(&self.name(), self.config.shutdown_grace)
            .await;
        *self.local_addr.lock().await = None;
        info!("HTTP ingestion on {} stopped", self.config.address);
        result
    }

    fn name(&self) -> String {
        format!("http@{}", self.config.address)
    }

    async fn lifecycle(&self) -> Lifecycle {
        self.runner.lock().await.lifecycle()
    }
}

async fn serve_tcp(listener: TcpListener, handler: Arc<IngestHandler>, cancel: CancellationToken) {
    let mut server = http1::Builder::new();
    server
        .timer(TokioTimer::new())
        .header_read_timeout(HEADER_READ_TIMEOUT);
    let mut joinset = JoinSet::new();

    loop {
        let conn = tokio::select! {
            () = cancel.cancelled() => break,
            con_res = listener.accept() => match con_res {
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionAborted
                            | io::ErrorKind::ConnectionReset
                            | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    error!("Server error: {e}");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    continue;
                }
                Ok((conn, _)) => conn,
            },
            finished = async {
                match joinset.join_next().await {
                    Some(finished) => finished,
                    None => std::future::pending().await,
                }
            } => match finished {
                Err(e) if e.is_panic() => {
                    error!("Connection handler panicked: {:?}", e);
                    continue;
                },
                Ok(()) | Err(_) => continue,
            },
        };

        let conn = TokioIo::new(conn);
        let server = server.clone();
        let handler = Arc::clone(&handler);
        let cancel = cancel.clone();
        joinset.spawn(async move {
            let service = service_fn(move |req| {
                let handler = Arc::clone(&handler);
                async move { handler.handle(req).await }
            });
            let mut conn = std::pin::pin!(server.serve_connection(conn, service));

            let result = tokio::select! {
                res = conn.as_mut() => res,
                () = cancel.cancelled() => {
                    conn.as_mut().graceful_shutdown();
                    conn.await
                }
            };
            if let Err(e) = result {
                debug!("Connection error: {e}");
            }
        });
    }

    drop(listener);
    while let Some(finished) = joinset.join_next().await {
        if let Err(e) = finished {
            if e.is_panic() {
                error!("Connection handler panicked: {:?}", e);
            }
        }
    }
    debug!("HTTP serve loop exited");
}

/// One submitted record, as sent to `/logs` or as an element of a `/batch` array.
#[derive(Debug, Default, Deserialize)]
struct Submission {
    level: Option<String>,
    message: Option<String>,
    source: Option<String>,
    fields: Option<serde_json::Map<String, Value>>,
}

impl Submission {
    /// JSON objects are submissions; `null` is an empty one.
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Object(map) => {
                serde_json::from_value(Value::Object(map)).map_err(|e| e.to_string())
            }
            other => Err(format!("expected a JSON object, got {}", json_kind(&other))),
        }
    }

    fn into_record(self) -> Record {
        let source = self
            .source
            .filter(|source| !source.is_empty())
            .unwrap_or_else(|| DEFAULT_SOURCE.to_string());
        let mut record = Record::new(source, self.message.unwrap_or_default());
        record.level = self
            .level
            .as_deref()
            .map(Level::from_submitted)
            .unwrap_or_default();
        if let Some(fields) = self.fields {
            record.fields = fields_from_json(fields);
        }
        record
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

struct IngestHandler {
    out: RecordSender,
    max_request_content_length: usize,
}

impl IngestHandler {
    fn new(out: RecordSender, max_request_content_length: usize) -> Self {
        Self {
            out,
            max_request_content_length,
        }
    }

    async fn handle<B>(&self, req: Request<B>) -> http::Result<HttpResponse>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        match (req.method(), req.uri().path()) {
            (_, HEALTH_ENDPOINT_PATH) => Self::health(),
            (&Method::POST, LOGS_ENDPOINT_PATH) => self.submit_single(req).await,
            (&Method::POST, BATCH_ENDPOINT_PATH) => self.submit_batch(req).await,
            (method, LOGS_ENDPOINT_PATH | BATCH_ENDPOINT_PATH) => log_and_create_http_response(
                &format!("Method {method} not allowed"),
                StatusCode::METHOD_NOT_ALLOWED,
            ),
            (_, path) => log_and_create_http_response(
                &format!("Not found: {path}"),
                StatusCode::NOT_FOUND,
            ),
        }
    }

    fn health() -> http::Result<HttpResponse> {
        create_json_response(
            StatusCode::OK,
            &json!({
                "status": "healthy",
                "time": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            }),
        )
    }

    async fn submit_single<B>(&self, req: Request<B>) -> http::Result<HttpResponse>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let value = match self.read_json(req, "Error processing log").await {
            Ok(value) => value,
            Err(response) => return response,
        };
        let submission = match Submission::from_value(value) {
            Ok(submission) => submission,
            Err(e) => {
                return log_and_create_http_response(
                    &format!("Error processing log: {e}"),
                    StatusCode::BAD_REQUEST,
                )
            }
        };

        let record = submission.into_record();
        let id = record.id;
        match self.out.offer(record) {
            Ok(()) => create_json_response(
                StatusCode::ACCEPTED,
                &json!({ "status": "accepted", "id": id.to_string() }),
            ),
            Err(OfferError::Full(_)) => log_and_create_http_response(
                "Log queue is full",
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            Err(OfferError::Closed(_)) => log_and_create_http_response(
                "Log queue is closed",
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        }
    }

    async fn submit_batch<B>(&self, req: Request<B>) -> http::Result<HttpResponse>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let value = match self.read_json(req, "Error processing batch").await {
            Ok(value) => value,
            Err(response) => return response,
        };
        let items = match value {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => {
                return log_and_create_http_response(
                    &format!(
                        "Error processing batch: expected a JSON array, got {}",
                        json_kind(&other)
                    ),
                    StatusCode::BAD_REQUEST,
                )
            }
        };

        let submissions = match items
            .into_iter()
            .map(Submission::from_value)
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(submissions) => submissions,
            Err(e) => {
                return log_and_create_http_response(
                    &format!("Error processing batch: {e}"),
                    StatusCode::BAD_REQUEST,
                )
            }
        };

        let total = submissions.len();
        let mut accepted = 0;
        for submission in submissions {
            match self.out.offer(submission.into_record()) {
                Ok(()) => accepted += 1,
                Err(e) => debug!("Dropping batch item: {e}"),
            }
        }
        if accepted < total {
            debug!("Batch admitted {accepted} of {total} records");
        }

        create_json_response(
            StatusCode::ACCEPTED,
            &json!({ "status": "accepted", "total": total, "accepted": accepted }),
        )
    }

    /// Reads the whole body, bounded by the configured limit, and parses it as JSON. Any
    /// failure is already turned into the response to send.
    async fn read_json<B>(
        &self,
        req: Request<B>,
        error_message_prefix: &str,
    ) -> Result<Value, http::Result<HttpResponse>>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        if let Some(response) = verify_request_content_length(
            req.headers(),
            self.max_request_content_length,
            error_message_prefix,
        ) {
            return Err(response);
        }

        let body = Limited::new(req.into_body(), self.max_request_content_length);
        let bytes: Bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                return Err(log_and_create_http_response(
                    &format!("{error_message_prefix}: Payload too large"),
                    StatusCode::PAYLOAD_TOO_LARGE,
                ))
            }
            Err(e) => {
                return Err(log_and_create_http_response(
                    &format!("{error_message_prefix}: Failed to read request body: {e}"),
                    StatusCode::BAD_REQUEST,
                ))
            }
        };

        serde_json::from_slice(&bytes).map_err(|e| {
            log_and_create_http_response(
                &format!("{error_message_prefix}: Invalid JSON: {e}"),
                StatusCode::BAD_REQUEST,
            )
        })
    }
}
