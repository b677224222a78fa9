//! `UpdateAllMetrics` over gRPC.
//!
//! Every call carries `when`, `sender` and `ip` metadata. The channel is
//! lazy, so an unreachable server shows up as `Unavailable` on send.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use pulse_core::MetricRecord;
use pulse_rpc::{IP_METADATA, MetricsApiClient, SENDER_METADATA, WHEN_METADATA, convert, proto};
use tonic::metadata::MetadataValue;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info, warn};

use super::{RetryPolicy, Transport, outbound_ipv4, with_scheme};
use crate::error::{TransportError, TransportResult};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Value sent in the `sender` metadata entry.
const SENDER: &str = "agent";

pub struct GrpcTransport {
    client: MetricsApiClient<Channel>,
    target: String,
    retry: RetryPolicy,
    real_ip: Option<String>,
}

impl GrpcTransport {
    /// Build a lazily connecting client. Must run inside a tokio runtime.
    pub fn new(address: &str) -> TransportResult<Self> {
        let target = with_scheme(address);
        let channel = Endpoint::from_shared(target.clone())
            .map_err(|e| TransportError::Address {
                address: address.to_string(),
                reason: e.to_string(),
            })?
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(REQUEST_TIMEOUT)
            .connect_lazy();

        Ok(Self {
            client: MetricsApiClient::new(channel),
            target,
            retry: RetryPolicy::default(),
            real_ip: outbound_ipv4().map(|ip| ip.to_string()),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Override the `ip` metadata value; `None` omits it.
    pub fn with_real_ip(mut self, real_ip: Option<String>) -> Self {
        self.real_ip = real_ip;
        self
    }

    fn request(&self, list: proto::MetricsList) -> tonic::Request<proto::MetricsList> {
        let mut request = tonic::Request::new(list);
        let metadata = request.metadata_mut();

        let when = chrono::Local::now().to_rfc3339();
        match MetadataValue::try_from(when.as_str()) {
            Ok(value) => {
                metadata.insert(WHEN_METADATA, value);
            }
            Err(e) => warn!(error = %e, "unencodable send time"),
        }
        metadata.insert(SENDER_METADATA, MetadataValue::from_static(SENDER));
        if let Some(ip) = self.real_ip.as_deref() {
            match MetadataValue::try_from(ip) {
                Ok(value) => {
                    metadata.insert(IP_METADATA, value);
                }
                Err(e) => warn!(error = %e, ip, "unencodable ip metadata"),
            }
        }
        request
    }

    async fn send_once(&self, list: &proto::MetricsList) -> TransportResult<()> {
        let mut client = self.client.clone();
        let response = client.update_all_metrics(self.request(list.clone())).await?;
        debug!(message = %response.into_inner().message, "server acknowledged batch");
        Ok(())
    }
}

#[async_trait]
impl Transport for GrpcTransport {
    async fn send(&self, records: &[MetricRecord]) -> TransportResult<()> {
        if records.is_empty() {
            debug!("empty batch, nothing to send");
            return Ok(());
        }

        let list = convert::to_list(records);
        let started = Instant::now();
        self.retry.execute(|| self.send_once(&list)).await?;

        info!(
            target_uri = %self.target,
            metrics = records.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch delivered"
        );
        Ok(())
    }
}
