//! Delivery of metric batches to the aggregation server.
//!
//! ```text
//! records ─► JSON ─► sign ─► encrypt ─► gzip ─► POST /updates/   (HttpTransport)
//! records ─► MetricsList ─────────────────────► UpdateAllMetrics (GrpcTransport)
//! ```
//!
//! Both variants retry transient failures through [`RetryPolicy`].

pub mod envelope;
pub mod grpc;
pub mod http;
pub mod retry;

use std::fmt;
use std::net::{IpAddr, UdpSocket};
use std::str::FromStr;

use async_trait::async_trait;
use pulse_core::MetricRecord;

use crate::error::TransportResult;

pub use envelope::{Sealed, Sealer};
pub use grpc::GrpcTransport;
pub use http::HttpTransport;
pub use retry::{RetryPolicy, Sleeper, TokioSleeper};

/// Sends one batch. An empty batch succeeds without touching the network.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, records: &[MetricRecord]) -> TransportResult<()>;
}

/// Which wire protocol the agent speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    #[default]
    Http,
    Grpc,
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(TransportKind::Http),
            "grpc" => Ok(TransportKind::Grpc),
            other => Err(format!("unknown transport {other:?} (expected http or grpc)")),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportKind::Http => "http",
            TransportKind::Grpc => "grpc",
        })
    }
}

/// Prefix `http://` onto an address given without a scheme.
pub fn with_scheme(address: &str) -> String {
    let address = address.trim().trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{address}")
    }
}

/// Address of the interface the default route leaves through.
///
/// Connecting a UDP socket sends nothing; it only selects a source address.
pub fn outbound_ipv4() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (ip.is_ipv4() && !ip.is_loopback() && !ip.is_unspecified()).then_some(ip)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_is_added_once() {
        assert_eq!(with_scheme("localhost:8080"), "http://localhost:8080");
        assert_eq!(with_scheme("http://10.0.0.1:80/"), "http://10.0.0.1:80");
        assert_eq!(with_scheme("https://metrics.local"), "https://metrics.local");
    }

    #[test]
    fn transport_kind_parses() {
        assert_eq!("http".parse::<TransportKind>().unwrap(), TransportKind::Http);
        assert_eq!("GRPC".parse::<TransportKind>().unwrap(), TransportKind::Grpc);
        assert!("udp".parse::<TransportKind>().is_err());
    }
}
