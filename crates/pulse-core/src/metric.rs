//! Metric domain model.
//!
//! A metric is identified by `(name, kind)`. Gauges hold the last written
//! `f64`; counters hold the running `i64` sum of every accepted delta.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// The two metric kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            other => Err(ValidationError::UnknownType(other.to_string())),
        }
    }
}

/// Point-in-time metric; every write replaces the value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gauge {
    pub name: String,
    pub value: f64,
}

/// Accumulating metric; every write adds its delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    pub name: String,
    pub value: i64,
}

/// A validated write, ready for the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    Gauge { name: String, value: f64 },
    Counter { name: String, delta: i64 },
}

impl Update {
    /// Build an update from the legacy path form `/{kind}/{name}/{value}`.
    pub fn from_path(kind: &str, name: &str, raw: &str) -> Result<Self, ValidationError> {
        let kind: MetricKind = kind.parse()?;
        if name.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        let invalid = || ValidationError::InvalidValue {
            kind,
            raw: raw.to_string(),
        };
        match kind {
            MetricKind::Gauge => {
                let value: f64 = raw.parse().map_err(|_| invalid())?;
                if !value.is_finite() {
                    return Err(invalid());
                }
                Ok(Update::Gauge {
                    name: name.to_string(),
                    value,
                })
            }
            MetricKind::Counter => Ok(Update::Counter {
                name: name.to_string(),
                delta: raw.parse().map_err(|_| invalid())?,
            }),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Update::Gauge { name, .. } | Update::Counter { name, .. } => name,
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            Update::Gauge { .. } => MetricKind::Gauge,
            Update::Counter { .. } => MetricKind::Counter,
        }
    }
}
