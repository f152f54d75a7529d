// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Syslog receiver over UDP or TCP.
//!
//! Over UDP one datagram is one message. Over TCP every accepted connection gets its own
//! reader task and each newline terminated line is one message. Every blocking socket call
//! is bounded by a timeout and raced against the cancellation token, so shutdown is noticed
//! promptly.
//!
//! Parsing is intentionally minimal: an optional leading `<priority>` tag is split off and
//! the severity is guessed from keywords in the remaining text.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::DEFAULT_SHUTDOWN_GRACE;
use crate::errors::SourceError;
use crate::queue::RecordSender;
use crate::record::{Level, Record};
use crate::source::{Lifecycle, Runner, Source, TaskGroup};
use crate::util::normalize_bind_address;

/// Largest message accepted, for a datagram as well as for a TCP line.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_LINE_TIMEOUT: Duration = Duration::from_secs(5);

/// A priority tag is only recognised when its closing `>` sits within this many bytes.
const MAX_PRIORITY_END: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Udp,
    Tcp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Udp => "udp",
            Protocol::Tcp => "tcp",
        }
    }

    /// Value used for [`Record::source`].
    pub fn source_tag(&self) -> &'static str {
        match self {
            Protocol::Udp => "syslog:udp",
            Protocol::Tcp => "syslog:tcp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "udp" => Ok(Protocol::Udp),
            "tcp" => Ok(Protocol::Tcp),
            _ => Err(SourceError::UnsupportedProtocol(s.to_string())),
        }
    }
}

/// Configuration for the syslog receiver
#[derive(Debug, Clone)]
pub struct SyslogConfig {
    /// Bind address, e.g. `0.0.0.0:514` or `:514`
    pub address: String,
    pub protocol: Protocol,
    /// Upper bound on a single datagram read or accept wait
    pub read_timeout: Duration,
    /// A TCP peer that sends no complete line for this long is disconnected
    pub line_timeout: Duration,
    pub max_message_size: usize,
    pub shutdown_grace: Duration,
}

impl SyslogConfig {
    pub fn new(address: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            address: address.into(),
            protocol,
            read_timeout: DEFAULT_READ_TIMEOUT,
            line_timeout: DEFAULT_LINE_TIMEOUT,
            max_message_size: MAX_MESSAGE_SIZE,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

pub struct SyslogSource {
    config: SyslogConfig,
    runner: Mutex<Runner>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl SyslogSource {
    pub fn new(config: SyslogConfig) -> Self {
        Self {
            config,
            runner: Mutex::new(Runner::default()),
            local_addr: Mutex::new(None),
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.config.protocol
    }

    /// Address actually bound while running; resolves a configured port 0.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    fn bind_error(address: &str, err: std::io::Error) -> SourceError {
        SourceError::Bind {
            address: address.to_string(),
            err,
        }
    }
}

#[async_trait]
impl Source for SyslogSource {
    async fn start(
        &self,
        cancel: CancellationToken,
        out: RecordSender,
    ) -> Result<(), SourceError> {
        let mut runner = self.runner.lock().await;
        runner.ensure_startable(&self.name())?;

        let address = normalize_bind_address(&self.config.address);
        let mut tasks = TaskGroup::new(&cancel);

        let local = match self.config.protocol {
            Protocol::Udp => {
                let socket = UdpSocket::bind(&address)
                    .await
                    .map_err(|e| Self::bind_error(&address, e))?;
                let local = socket
                    .local_addr()
                    .map_err(|e| Self::bind_error(&address, e))?;
                let receiver = UdpReceiver {
                    socket,
                    read_timeout: self.config.read_timeout,
                    max_message_size: self.config.max_message_size,
                    out,
                    cancel: tasks.token(),
                };
                tasks.spawn(receiver.run());
                local
            }
            Protocol::Tcp => {
                let listener = TcpListener::bind(&address)
                    .await
                    .map_err(|e| Self::bind_error(&address, e))?;
                let local = listener
                    .local_addr()
                    .map_err(|e| Self::bind_error(&address, e))?;
                let acceptor = TcpAcceptor {
                    listener,
                    accept_timeout: self.config.read_timeout,
                    line_timeout: self.config.line_timeout,
                    max_message_size: self.config.max_message_size,
                    out,
                    cancel: tasks.token(),
                };
                tasks.spawn(acceptor.run());
                local
            }
        };

        *self.local_addr.lock().await = Some(local);
        runner.set_running(tasks);
        info!(
            "syslog receiver listening on {} {local}",
            self.config.protocol
        );
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
        info!("syslog receiver on {} stopped", self.config.protocol);
        result
    }

    fn name(&self) -> String {
        format!("syslog:{}@{}", self.config.protocol, self.config.address)
    }

    async fn lifecycle(&self) -> Lifecycle {
        self.runner.lock().await.lifecycle()
    }
}

struct UdpReceiver {
    socket: UdpSocket,
    read_timeout: Duration,
    max_message_size: usize,
    out: RecordSender,
    cancel: CancellationToken,
}

impl UdpReceiver {
    async fn run(self) {
        let mut buf = vec![0u8; self.max_message_size];

        loop {
            let received = tokio::select! {
                () = self.cancel.cancelled() => break,
                res = timeout(self.read_timeout, self.socket.recv_from(&mut buf)) => res,
            };

            let (len, peer) = match received {
                // Read timeouts only exist to re-check cancellation.
                Err(_) => continue,
                Ok(Err(e)) => {
                    warn!("Error reading UDP: {e}");
                    continue;
                }
                Ok(Ok(received)) => received,
            };
            if len == 0 {
                continue;
            }

            let raw = String::from_utf8_lossy(&buf[..len]);
            trace!("Received syslog datagram from {peer}: {raw}");
            let record = parse_message(&raw, Protocol::Udp);

            if let Err(e) = self.out.send(record, &self.cancel).await {
                debug!("syslog UDP receiver ending: {e}");
                break;
            }
        }
        debug!("syslog UDP receive loop exited");
    }
}

struct TcpAcceptor {
    listener: TcpListener,
    accept_timeout: Duration,
    line_timeout: Duration,
    max_message_size: usize,
    out: RecordSender,
    cancel: CancellationToken,
}

impl TcpAcceptor {
    async fn run(self) {
        let TcpAcceptor {
            listener,
            accept_timeout,
            line_timeout,
            max_message_size,
            out,
            cancel,
        } = self;
        let mut connections = JoinSet::new();

        loop {
            let accepted = tokio::select! {
                () = cancel.cancelled() => break,
                res = timeout(accept_timeout, listener.accept()) => res,
                finished = async {
                    match connections.join_next().await {
                        Some(finished) => finished,
                        None => std::future::pending().await,
                    }
                } => {
                    if let Err(e) = finished {
                        if e.is_panic() {
                            error!("Syslog connection handler panicked: {e:?}");
                        }
                    }
                    continue;
                }
            };

            match accepted {
                // Accept timeouts only exist to re-check cancellation.
                Err(_) => continue,
                Ok(Err(e)) => {
                    warn!("Error accepting connection: {e}");
                    continue;
                }
                Ok(Ok((stream, peer))) => {
                    debug!("Accepted syslog connection from {peer}");
                    let reader = ConnectionReader {
                        peer,
                        line_timeout,
                        max_message_size,
                        out: out.clone(),
                        cancel: cancel.clone(),
                    };
                    connections.spawn(reader.run(stream));
                }
            }
        }

        drop(listener);
        drop(out);
        while let Some(finished) = connections.join_next().await {
            if let Err(e) = finished {
                if e.is_panic() {
                    error!("Syslog connection handler panicked: {e:?}");
                }
            }
        }
        debug!("syslog TCP accept loop exited");
    }
}

struct ConnectionReader {
    peer: SocketAddr,
    line_timeout: Duration,
    max_message_size: usize,
    out: RecordSender,
    cancel: CancellationToken,
}

impl ConnectionReader {
    async fn run(self, stream: TcpStream) {
        let mut reader = BufReader::new(stream);
        let mut line = Vec::with_capacity(1024);
        let limit = self.max_message_size as u64 + 1;

        loop {
            line.clear();
            let mut limited = (&mut reader).take(limit);
            let read = tokio::select! {
                () = self.cancel.cancelled() => break,
                res = timeout(self.line_timeout, limited.read_until(b'\n', &mut line)) => res,
            };

            match read {
                Err(_) => {
                    debug!(
                        "No complete line from {} within {:?}, closing connection",
                        self.peer, self.line_timeout
                    );
                    break;
                }
                Ok(Err(e)) => {
                    debug!("Error reading from {}: {e}", self.peer);
                    break;
                }
                Ok(Ok(0)) => break,
                Ok(Ok(_)) => {}
            }

            if !line.ends_with(b"\n") && line.len() > self.max_message_size {
                warn!(
                    "Syslog line from {} exceeds {} bytes, closing connection",
                    self.peer, self.max_message_size
                );
                break;
            }

            let text = String::from_utf8_lossy(&line);
            let message = text.trim_end_matches('\n').trim_end_matches('\r');
            if message.is_empty() {
                continue;
            }

            let record = parse_message(message, Protocol::Tcp);
            if let Err(e) = self.out.send(record, &self.cancel).await {
                debug!("syslog connection from {} ending: {e}", self.peer);
                break;
            }
        }
        debug!("Closed syslog connection from {}", self.peer);
    }
}

/// Builds a record from one raw syslog message.
///
/// `message` keeps the full input. A leading `<priority>` tag (closing `>` within the
/// first 10 bytes) is stored in the `priority` field; the text after it is stored verbatim
/// in the `raw` field and drives the severity guess of [`classify_severity`].
///
/// ```
/// use logflux::record::Level;
/// use logflux::syslog::{parse_message, Protocol};
///
/// let record = parse_message("<34>Test message", Protocol::Udp);
/// assert_eq!(record.fields["priority"].as_str(), Some("34"));
/// assert_eq!(record.fields["raw"].as_str(), Some("Test message"));
/// assert_eq!(record.level, Level::Info);
/// assert_eq!(record.source, "syslog:udp");
/// ```
pub fn parse_message(raw: &str, protocol: Protocol) -> Record {
    let mut record = Record::new(protocol.source_tag(), raw);
    let mut body = raw;

    if raw.starts_with('<') {
        if let Some(end) = raw.find('>') {
            if end > 0 && end < MAX_PRIORITY_END {
                record.fields.insert("priority".into(), (&raw[1..end]).into());
                body = &raw[end + 1..];
            }
        }
    }

    record.fields.insert("raw".into(), body.into());
    record.level = classify_severity(body);
    record
}

/// Keyword based severity guess, checked in fixed precedence order against the lower-cased
/// text. Any occurrence counts, so "no errors found" is an ERROR.
pub fn classify_severity(text: &str) -> Level {
    let lower = text.to_lowercase();
    let contains_any = |keywords: &[&str]| keywords.iter().any(|k| lower.contains(k));

    if contains_any(&["crit", "emerg", "alert"]) {
        Level::Critical
    } else if contains_any(&["err", "error"]) {
        Level::Error
    } else if contains_any(&["warn"]) {
        Level::Warning
    } else if contains_any(&["debug"]) {
        Level::Debug
    } else {
        Level::Info
    }
}
