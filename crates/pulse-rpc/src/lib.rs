//! pulse-rpc: the `metricsapi.MetricsApi` gRPC contract.
//!
//! ```text
//! service MetricsApi {
//!   rpc UpdateAllMetrics(MetricsList) returns (UpdateResponse);
//!   rpc GetPing(google.protobuf.Empty) returns (Pong);
//! }
//! ```
//!
//! Agents stamp every call with `when` (RFC 3339), `sender` and `ip`
//! metadata. The server checks `ip` against its trusted subnet.

pub mod convert;

/// Metadata key carrying the sender's address.
pub const IP_METADATA: &str = "ip";
/// Metadata key carrying the send time.
pub const WHEN_METADATA: &str = "when";
/// Metadata key naming the sending component.
pub const SENDER_METADATA: &str = "sender";

/// Wire messages and generated service stubs.
pub mod proto {
    /// Metric kind on the wire.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum MetricType {
        Gauge = 0,
        Counter = 1,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Metric {
        #[prost(string, tag = "1")]
        pub id: String,
        #[prost(enumeration = "MetricType", tag = "2")]
        pub mtype: i32,
        #[prost(double, tag = "3")]
        pub value: f64,
        #[prost(int64, tag = "4")]
        pub delta: i64,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct MetricsList {
        #[prost(message, repeated, tag = "1")]
        pub metrics: Vec<Metric>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct UpdateResponse {
        #[prost(string, tag = "1")]
        pub message: String,
    }

    /// Same wire form as `google.protobuf.Empty`.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Empty {}

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Pong {
        #[prost(bool, tag = "1")]
        pub pong: bool,
    }

    include!(concat!(env!("OUT_DIR"), "/metricsapi.MetricsApi.rs"));
}

pub use proto::metrics_api_client::MetricsApiClient;
pub use proto::metrics_api_server::{MetricsApi, MetricsApiServer};
