//! End-to-end pipeline tests.
//!
//! Real listeners on loopback, real agent transports, assertions against
//! the server's store.

use std::sync::Arc;
use std::time::Duration;

use pulse_agent::sampler::{POLL_COUNT, RANDOM_VALUE};
use pulse_agent::{
    Agent, AgentSettings, GrpcTransport, HttpTransport, RetryPolicy, Sealer, Transport,
};
use pulse_api::{AggregationService, MetricsRpc, REQUEST_TIMEOUT, SecurityConfig, build_router};
use pulse_core::MetricRecord;
use pulse_rpc::{IP_METADATA, MetricsApiClient, proto};
use pulse_core::security::{generate_key_pair, read_private_key, read_public_key};
use pulse_store::{MemoryStore, MetricStore};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_stream::wrappers::TcpListenerStream;

fn service() -> AggregationService {
    let store: Arc<dyn MetricStore> = Arc::new(MemoryStore::new());
    AggregationService::new(store)
}

async fn spawn_http(service: AggregationService, security: SecurityConfig) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = build_router(service, security);
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr.to_string()
}

#[tokio::test]
async fn http_batch_lands_in_store() {
    let service = service();
    let addr = spawn_http(service.clone(), SecurityConfig::default()).await;

    let transport = HttpTransport::new(&addr, Sealer::new(None, None, true))
        .unwrap()
        .with_retry(RetryPolicy::none());
    let batch = vec![
        MetricRecord::gauge("temp", 21.5),
        MetricRecord::counter("hits", 4),
        MetricRecord::counter("hits", 6),
    ];
    transport.send(&batch).await.unwrap();

    assert_eq!(service.get_gauge("temp").await.unwrap(), 21.5);
    assert_eq!(service.get_counter("hits").await.unwrap(), 10);
}

#[tokio::test]
async fn sealed_batch_is_accepted_and_wrong_key_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let pair = generate_key_pair(1024).unwrap();
    std::fs::write(dir.path().join("private.pem"), &pair.private_pem).unwrap();
    std::fs::write(dir.path().join("public.pem"), &pair.public_pem).unwrap();
    let private = read_private_key(&dir.path().join("private.pem")).unwrap();
    let public = Arc::new(read_public_key(&dir.path().join("public.pem")).unwrap());

    let service = service();
    let security = SecurityConfig {
        key: Some(b"shared-secret".to_vec()),
        private_key: Some(Arc::new(private)),
        trusted_subnet: Some("127.0.0.0/8".parse().unwrap()),
    };
    let addr = spawn_http(service.clone(), security).await;

    let sealed = HttpTransport::new(
        &addr,
        Sealer::new(Some(b"shared-secret".to_vec()), Some(public.clone()), true),
    )
    .unwrap()
    .with_retry(RetryPolicy::none())
    .with_real_ip(Some("127.0.0.1".into()));
    sealed
        .send(&[MetricRecord::counter("sealed", 3)])
        .await
        .unwrap();
    assert_eq!(service.get_counter("sealed").await.unwrap(), 3);

    let forged = HttpTransport::new(
        &addr,
        Sealer::new(Some(b"other-secret".to_vec()), Some(public), true),
    )
    .unwrap()
    .with_retry(RetryPolicy::none())
    .with_real_ip(Some("127.0.0.1".into()));
    assert!(forged.send(&[MetricRecord::counter("sealed", 1)]).await.is_err());
    assert_eq!(service.get_counter("sealed").await.unwrap(), 3);
}

#[tokio::test]
async fn grpc_batch_lands_in_store() {
    let service = service();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let rpc = MetricsRpc::new(service.clone(), Some("127.0.0.0/8".parse().unwrap()));
    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .timeout(REQUEST_TIMEOUT)
            .add_service(rpc.into_service())
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });

    let mut client = MetricsApiClient::connect(format!("http://{addr}"))
        .await
        .unwrap();
    let mut ping = tonic::Request::new(proto::Empty {});
    ping.metadata_mut().insert(IP_METADATA, "127.0.0.1".parse().unwrap());
    assert!(client.get_ping(ping).await.unwrap().into_inner().pong);

    let transport = GrpcTransport::new(&addr.to_string())
        .unwrap()
        .with_retry(RetryPolicy::none())
        .with_real_ip(Some("127.0.0.1".into()));
    transport
        .send(&[
            MetricRecord::gauge("load", 0.75),
            MetricRecord::counter("reqs", 2),
        ])
        .await
        .unwrap();

    assert_eq!(service.get_gauge("load").await.unwrap(), 0.75);
    assert_eq!(service.get_counter("reqs").await.unwrap(), 2);
}

#[tokio::test]
async fn agent_reports_until_shutdown() {
    let service = service();
    let addr = spawn_http(service.clone(), SecurityConfig::default()).await;

    let transport = HttpTransport::new(&addr, Sealer::new(None, None, false))
        .unwrap()
        .with_retry(RetryPolicy::none());
    let settings = AgentSettings {
        poll_interval: Duration::from_millis(20),
        report_interval: Duration::from_millis(60),
        rate_limit: 2,
    };

    let (stop_tx, stop_rx) = watch::channel(false);
    let agent = tokio::spawn(Agent::new(settings, Arc::new(transport)).run(stop_rx));

    let mut reported = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if service.get_counter(POLL_COUNT).await.is_ok() {
            reported = true;
            break;
        }
    }
    stop_tx.send(true).unwrap();
    let stats = tokio::time::timeout(Duration::from_secs(5), agent)
        .await
        .unwrap()
        .unwrap();

    assert!(reported, "no snapshot reached the server");
    assert!(stats.sent >= 1);
    assert!(service.get_counter(POLL_COUNT).await.unwrap() >= 1);
    assert!(service.get_gauge(RANDOM_VALUE).await.is_ok());
}
