//! gRPC `MetricsApi` service.
//!
//! Shares the [`AggregationService`] with the HTTP router. When a trusted
//! subnet is configured, callers must send their address in `ip` metadata.
//! Every call is bounded by [`REQUEST_TIMEOUT`].

use std::future::Future;

use pulse_core::TrustedSubnet;
use pulse_rpc::{IP_METADATA, MetricsApi, MetricsApiServer, convert, proto};
use tonic::{Request, Response, Status};
use tracing::{debug, warn};

use crate::REQUEST_TIMEOUT;
use crate::service::{AggregationService, ServiceError};

/// gRPC implementation of the metrics API.
#[derive(Clone)]
pub struct MetricsRpc {
    service: AggregationService,
    trusted_subnet: Option<TrustedSubnet>,
}

impl MetricsRpc {
    pub fn new(service: AggregationService, trusted_subnet: Option<TrustedSubnet>) -> Self {
        Self {
            service,
            trusted_subnet,
        }
    }

    /// Get the tonic service for mounting on a gRPC server.
    pub fn into_service(self) -> MetricsApiServer<Self> {
        MetricsApiServer::new(self)
    }

    fn check_subnet<T>(&self, request: &Request<T>) -> Result<(), Status> {
        let Some(subnet) = self.trusted_subnet.as_ref() else {
            return Ok(());
        };
        let ip = request
            .metadata()
            .get(IP_METADATA)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Status::invalid_argument("missing ip metadata"))?;
        if subnet.contains_str(ip) {
            Ok(())
        } else {
            warn!(%subnet, ip, "rpc sender outside trusted subnet");
            Err(Status::permission_denied("sender not in trusted subnet"))
        }
    }
}

fn to_status(e: ServiceError) -> Status {
    match e {
        ServiceError::Validation(e) => Status::invalid_argument(e.to_string()),
        ServiceError::NotFound { .. } => Status::not_found(e.to_string()),
        ServiceError::Write(_) | ServiceError::Read(_) => Status::internal(e.to_string()),
    }
}

/// Run a service call under the per-request deadline.
async fn within_deadline<T>(
    call: impl Future<Output = Result<T, ServiceError>>,
) -> Result<T, Status> {
    match tokio::time::timeout(REQUEST_TIMEOUT, call).await {
        Ok(result) => result.map_err(to_status),
        Err(_) => {
            warn!(timeout_ms = REQUEST_TIMEOUT.as_millis() as u64, "rpc deadline exceeded");
            Err(Status::deadline_exceeded("request timed out"))
        }
    }
}

#[tonic::async_trait]
impl MetricsApi for MetricsRpc {
    async fn update_all_metrics(
        &self,
        request: Request<proto::MetricsList>,
    ) -> Result<Response<proto::UpdateResponse>, Status> {
        self.check_subnet(&request)?;
        let records: Vec<_> = request
            .into_inner()
            .metrics
            .into_iter()
            .map(convert::from_proto)
            .collect();

        let applied = within_deadline(self.service.update_batch(&records)).await?;
        debug!(applied, "rpc batch applied");

        Ok(Response::new(proto::UpdateResponse {
            message: format!("applied {applied} metrics"),
        }))
    }

    async fn get_ping(
        &self,
        request: Request<proto::Empty>,
    ) -> Result<Response<proto::Pong>, Status> {
        self.check_subnet(&request)?;
        within_deadline(self.service.ping()).await?;
        Ok(Response::new(proto::Pong { pong: true }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use pulse_core::MetricRecord;
    use pulse_store::{MemoryStore, MetricSet, MetricStore, StoreResult, Written};

    use super::*;

    /// Memory store whose writes and ping stall past the request deadline.
    struct StalledStore(MemoryStore);

    const STALL: Duration = Duration::from_secs(30);

    #[async_trait]
    impl MetricStore for StalledStore {
        async fn get_gauge(&self, name: &str) -> StoreResult<f64> {
            self.0.get_gauge(name).await
        }
        async fn get_counter(&self, name: &str) -> StoreResult<i64> {
            self.0.get_counter(name).await
        }
        async fn create_or_update_gauge(
            &self,
            name: &str,
            value: f64,
        ) -> StoreResult<Written<f64>> {
            tokio::time::sleep(STALL).await;
            self.0.create_or_update_gauge(name, value).await
        }
        async fn create_or_update_counter(
            &self,
            name: &str,
            delta: i64,
        ) -> StoreResult<Written<i64>> {
            tokio::time::sleep(STALL).await;
            self.0.create_or_update_counter(name, delta).await
        }
        async fn list_all(&self) -> StoreResult<MetricSet> {
            self.0.list_all().await
        }
        async fn ping(&self) -> StoreResult<()> {
            tokio::time::sleep(STALL).await;
            self.0.ping().await
        }
        async fn close(&self) -> StoreResult<()> {
            self.0.close().await
        }
    }

    fn rpc(subnet: Option<&str>) -> MetricsRpc {
        let service = AggregationService::new(Arc::new(MemoryStore::new()));
        MetricsRpc::new(service, subnet.map(|s| s.parse().unwrap()))
    }

    fn batch() -> proto::MetricsList {
        convert::to_list(&[
            MetricRecord::gauge("Alloc", 12.5),
            MetricRecord::counter("PollCount", 3),
        ])
    }

    #[tokio::test]
    async fn batch_lands_in_store() {
        let rpc = rpc(None);
        rpc.update_all_metrics(Request::new(batch())).await.unwrap();
        rpc.update_all_metrics(Request::new(batch())).await.unwrap();

        assert_eq!(rpc.service.get_gauge("Alloc").await.unwrap(), 12.5);
        assert_eq!(rpc.service.get_counter("PollCount").await.unwrap(), 6);
    }

    #[tokio::test]
    async fn trusted_subnet_requires_ip_metadata() {
        let rpc = rpc(Some("10.0.0.0/8"));

        let status = rpc
            .update_all_metrics(Request::new(batch()))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let mut outside = Request::new(batch());
        outside
            .metadata_mut()
            .insert(IP_METADATA, "192.168.1.5".parse().unwrap());
        let status = rpc.update_all_metrics(outside).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::PermissionDenied);

        let mut inside = Request::new(batch());
        inside
            .metadata_mut()
            .insert(IP_METADATA, "10.1.2.3".parse().unwrap());
        rpc.update_all_metrics(inside).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_type_is_invalid_argument() {
        let rpc = rpc(None);
        let list = proto::MetricsList {
            metrics: vec![proto::Metric {
                id: "x".into(),
                mtype: 9,
                value: 0.0,
                delta: 0,
            }],
        };
        let status = rpc.update_all_metrics(Request::new(list)).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn ping_answers_pong() {
        let pong = rpc(None)
            .get_ping(Request::new(proto::Empty {}))
            .await
            .unwrap();
        assert!(pong.into_inner().pong);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_store_hits_the_deadline() {
        let store = Arc::new(StalledStore(MemoryStore::new()));
        let rpc = MetricsRpc::new(AggregationService::new(store.clone()), None);

        let started = tokio::time::Instant::now();
        let status = rpc
            .update_all_metrics(Request::new(batch()))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::DeadlineExceeded);
        assert!(started.elapsed() >= REQUEST_TIMEOUT);
        assert!(started.elapsed() < STALL);

        let status = rpc
            .get_ping(Request::new(proto::Empty {}))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::DeadlineExceeded);
        assert!(store.0.list_all().await.unwrap().gauges.is_empty());
    }
}
