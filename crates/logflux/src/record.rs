// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The record model shared by every source.
//!
//! A [`Record`] is built entirely inside the producing source, handed once into the fan-in
//! queue and owned by the consumer afterwards.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Severity of a record, ordered from least to most severe.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl Level {
    /// Maps a level string submitted by a client to a [`Level`].
    ///
    /// Matching is exact and case-sensitive. `WARN` and `CRIT` are accepted as aliases, and
    /// anything unrecognised falls back to [`Level::Info`].
    ///
    /// ```
    /// use logflux::record::Level;
    ///
    /// assert_eq!(Level::from_submitted("WARN"), Level::Warning);
    /// assert_eq!(Level::from_submitted("CRIT"), Level::Critical);
    /// assert_eq!(Level::from_submitted("error"), Level::Info);
    /// ```
    pub fn from_submitted(level: &str) -> Self {
        match level {
            "DEBUG" => Level::Debug,
            "INFO" => Level::Info,
            "WARNING" | "WARN" => Level::Warning,
            "ERROR" => Level::Error,
            "CRITICAL" | "CRIT" => Level::Critical,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value stored in [`Record::fields`].
///
/// Deliberately a closed set so serialization stays well defined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Map(HashMap<String, FieldValue>),
}

pub type Fields = HashMap<String, FieldValue>;

impl FieldValue {
    /// Converts a decoded JSON value. Returns `None` for `null` and arrays, which have no
    /// field representation.
    pub fn from_json(value: serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(FieldValue::Bool(b)),
            serde_json::Value::Number(n) => Some(FieldValue::Number(n)),
            serde_json::Value::String(s) => Some(FieldValue::String(s)),
            serde_json::Value::Object(map) => Some(FieldValue::Map(fields_from_json(map))),
            serde_json::Value::Null | serde_json::Value::Array(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Builds a field mapping from a JSON object, dropping entries that cannot be represented.
pub fn fields_from_json(map: serde_json::Map<String, serde_json::Value>) -> Fields {
    map.into_iter()
        .filter_map(|(key, value)| match FieldValue::from_json(value) {
            Some(field) => Some((key, field)),
            None => {
                debug!("Dropping field {key}: null and array values are not supported");
                None
            }
        })
        .collect()
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Number(value.into())
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::Number(value.into())
    }
}

/// One collected log event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: Uuid,
    /// Wall-clock creation time, never changed afterwards.
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    /// Origin tag, e.g. `syslog:udp` or a file path. Never empty.
    pub source: String,
    pub message: String,
    #[serde(default)]
    pub fields: Fields,
}

impl Record {
    /// Creates a record with a fresh id, the current time, [`Level::Info`] and no fields.
    pub fn new(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            level: Level::default(),
            source: source.into(),
            message: message.into(),
            fields: Fields::new(),
        }
    }

    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}
