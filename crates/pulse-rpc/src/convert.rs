//! Mapping between JSON-shaped [`MetricRecord`]s and wire [`proto::Metric`]s.
//!
//! Proto3 scalars have no presence, so the field that does not belong to
//! the metric's kind is dropped on the way in and zeroed on the way out.

use pulse_core::{MetricKind, MetricRecord};

use crate::proto;

impl From<MetricKind> for proto::MetricType {
    fn from(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Gauge => proto::MetricType::Gauge,
            MetricKind::Counter => proto::MetricType::Counter,
        }
    }
}

impl From<proto::MetricType> for MetricKind {
    fn from(mtype: proto::MetricType) -> Self {
        match mtype {
            proto::MetricType::Gauge => MetricKind::Gauge,
            proto::MetricType::Counter => MetricKind::Counter,
        }
    }
}

/// Convert an outgoing record. Records with an unknown type are sent as
/// gauges, matching the proto default; the server rejects what it cannot read.
pub fn to_proto(record: &MetricRecord) -> proto::Metric {
    let mtype = record
        .kind()
        .map(proto::MetricType::from)
        .unwrap_or(proto::MetricType::Gauge);
    proto::Metric {
        id: record.id.clone(),
        mtype: mtype as i32,
        value: record.value.unwrap_or_default(),
        delta: record.delta.unwrap_or_default(),
    }
}

/// Convert an incoming wire metric. An out-of-range enum value yields a
/// record whose type string fails validation downstream.
pub fn from_proto(metric: proto::Metric) -> MetricRecord {
    match proto::MetricType::try_from(metric.mtype) {
        Ok(proto::MetricType::Gauge) => MetricRecord::gauge(metric.id, metric.value),
        Ok(proto::MetricType::Counter) => MetricRecord::counter(metric.id, metric.delta),
        Err(_) => MetricRecord {
            id: metric.id,
            mtype: metric.mtype.to_string(),
            value: None,
            delta: None,
        },
    }
}

/// Wrap a batch for `UpdateAllMetrics`.
pub fn to_list(records: &[MetricRecord]) -> proto::MetricsList {
    proto::MetricsList {
        metrics: records.iter().map(to_proto).collect(),
    }
}
