//! Wire form of a metric.
//!
//! `{"id": "...", "type": "gauge"|"counter", "value"?: f64, "delta"?: i64}`.
//! Exactly one of `value`/`delta` is populated, matching `type`.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::metric::{Counter, Gauge, MetricKind, Update};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub mtype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
}

impl MetricRecord {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            mtype: MetricKind::Gauge.to_string(),
            value: Some(value),
            delta: None,
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            mtype: MetricKind::Counter.to_string(),
            value: None,
            delta: Some(delta),
        }
    }

    /// Parse `type`, rejecting anything but `gauge` and `counter`.
    pub fn kind(&self) -> Result<MetricKind, ValidationError> {
        self.mtype.parse()
    }

    /// Turn the record into a store write, enforcing the one-field rule.
    pub fn validate(&self) -> Result<Update, ValidationError> {
        let kind = self.kind()?;
        if self.id.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        match (kind, self.value, self.delta) {
            (MetricKind::Gauge, Some(value), None) => {
                if !value.is_finite() {
                    return Err(ValidationError::InvalidValue {
                        kind,
                        raw: value.to_string(),
                    });
                }
                Ok(Update::Gauge {
                    name: self.id.clone(),
                    value,
                })
            }
            (MetricKind::Counter, None, Some(delta)) => Ok(Update::Counter {
                name: self.id.clone(),
                delta,
            }),
            (MetricKind::Gauge, _, Some(_)) | (MetricKind::Counter, Some(_), _) => {
                Err(ValidationError::Malformed(format!(
                    "{kind} record {:?} populates the wrong field",
                    self.id
                )))
            }
            (MetricKind::Gauge, None, None) => Err(ValidationError::MissingValue {
                kind,
                name: self.id.clone(),
                field: "value",
            }),
            (MetricKind::Counter, None, None) => Err(ValidationError::MissingValue {
                kind,
                name: self.id.clone(),
                field: "delta",
            }),
        }
    }
}

impl From<&Gauge> for MetricRecord {
    fn from(g: &Gauge) -> Self {
        MetricRecord::gauge(g.name.clone(), g.value)
    }
}

impl From<&Counter> for MetricRecord {
    fn from(c: &Counter) -> Self {
        MetricRecord::counter(c.name.clone(), c.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_without_absent_fields() {
        let json = serde_json::to_string(&MetricRecord::counter("PollCount", 4)).unwrap();
        assert_eq!(json, r#"{"id":"PollCount","type":"counter","delta":4}"#);
    }

    #[test]
    fn deserializes_batch() {
        let body = r#"[{"id":"a","type":"gauge","value":1.5},{"id":"b","type":"counter","delta":2}]"#;
        let records: Vec<MetricRecord> = serde_json::from_str(body).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0].validate().unwrap(),
            Update::Gauge {
                name: "a".to_string(),
                value: 1.5
            }
        );
        assert_eq!(
            records[1].validate().unwrap(),
            Update::Counter {
                name: "b".to_string(),
                delta: 2
            }
        );
    }

    #[test]
    fn unknown_type_rejected() {
        let record = MetricRecord {
            id: "x".to_string(),
            mtype: "summary".to_string(),
            value: Some(1.0),
            delta: None,
        };
        assert_eq!(
            record.validate(),
            Err(ValidationError::UnknownType("summary".to_string()))
        );
    }

    #[test]
    fn both_fields_absent_rejected() {
        let record = MetricRecord {
            id: "x".to_string(),
            mtype: "counter".to_string(),
            value: None,
            delta: None,
        };
        assert!(matches!(
            record.validate(),
            Err(ValidationError::MissingValue { field: "delta", .. })
        ));
    }

    #[test]
    fn wrong_field_rejected() {
        let record = MetricRecord {
            id: "x".to_string(),
            mtype: "gauge".to_string(),
            value: None,
            delta: Some(3),
        };
        assert!(matches!(record.validate(), Err(ValidationError::Malformed(_))));
    }
}
