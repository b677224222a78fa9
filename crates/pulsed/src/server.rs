use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use pulse_api::{AggregationService, MetricsRpc, REQUEST_TIMEOUT, SecurityConfig, build_router};
use pulse_core::security::read_private_key;
use pulse_store::StoreConfig;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::{error, info};

use crate::config::ServerConfig;

/// Time allowed for in-flight requests once shutdown starts.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the aggregation server until `shutdown` resolves.
///
/// The store is closed only after both listeners drained. If draining
/// exceeds [`SHUTDOWN_TIMEOUT`] the server exits with an error and the
/// store is left as is.
pub async fn run(
    config: ServerConfig,
    shutdown: impl Future<Output = ()> + Send,
) -> anyhow::Result<()> {
    config.log_effective();

    let private_key = config
        .crypto_key
        .as_deref()
        .map(read_private_key)
        .transpose()
        .context("failed to load private key")?
        .map(Arc::new);
    let security = SecurityConfig {
        key: config.key.clone().map(String::into_bytes),
        private_key,
        trusted_subnet: config.trusted_subnet,
    };

    let store = pulse_store::open(&StoreConfig {
        database_dsn: config.database_dsn.clone(),
        store_file: config.store_file.clone(),
        store_interval: config.store_interval,
        restore: config.restore,
    })
    .await
    .context("failed to open metric store")?;

    let service = AggregationService::new(store.clone());
    let router = build_router(service.clone(), security);

    let listener = TcpListener::bind(&config.address)
        .await
        .with_context(|| format!("failed to bind {}", config.address))?;
    info!(addr = %listener.local_addr()?, "http listener started");

    let (stop_tx, stop_rx) = watch::channel(false);

    let grpc = match &config.grpc_address {
        Some(addr) => {
            let addr: SocketAddr = addr
                .parse()
                .with_context(|| format!("invalid gRPC address {addr}"))?;
            let rpc = MetricsRpc::new(service.clone(), config.trusted_subnet);
            info!(%addr, "grpc listener started");
            Some(tokio::spawn(
                tonic::transport::Server::builder()
                    .timeout(REQUEST_TIMEOUT)
                    .add_service(rpc.into_service())
                    .serve_with_shutdown(addr, stopped(stop_rx.clone())),
            ))
        }
        None => None,
    };

    let mut http = tokio::spawn(
        axum::serve(listener, router)
            .with_graceful_shutdown(stopped(stop_rx))
            .into_future(),
    );

    let mut http_exit = None;
    tokio::select! {
        _ = shutdown => info!("shutdown signal received, draining requests"),
        joined = &mut http => {
            error!("http listener exited before shutdown");
            http_exit = Some(joined);
        }
    }
    let _ = stop_tx.send(true);

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async move {
        let http = match http_exit {
            Some(joined) => joined,
            None => http.await,
        };
        let grpc = match grpc {
            Some(handle) => Some(handle.await),
            None => None,
        };
        (http, grpc)
    })
    .await;

    let Ok((http, grpc)) = drained else {
        bail!(
            "requests still in flight after {}s, exiting without closing the store",
            SHUTDOWN_TIMEOUT.as_secs()
        );
    };

    let mut outcome = joined("http server", http);
    if let Some(grpc) = grpc {
        outcome = outcome.and(joined("grpc server", grpc));
    }

    store.close().await.context("failed to close metric store")?;
    info!("server stopped");
    outcome
}

async fn stopped(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

fn joined<E>(what: &str, result: Result<Result<(), E>, JoinError>) -> anyhow::Result<()>
where
    E: std::error::Error + Send + Sync + 'static,
{
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(anyhow!(e).context(format!("{what} failed"))),
        Err(e) => Err(anyhow!(e).context(format!("{what} task panicked"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serves_until_shutdown_then_flushes_backup() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("metrics.json");
        let config = ServerConfig {
            address: "127.0.0.1:0".into(),
            store_file: Some(file.clone()),
            store_interval: Duration::from_secs(300),
            restore: false,
            ..ServerConfig::default()
        };

        run(config, async {}).await.unwrap();

        let written = std::fs::read_to_string(&file).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert!(parsed["gauge_metrics"].is_object());
        assert!(parsed["counter_metrics"].is_object());
    }

    #[tokio::test]
    async fn missing_private_key_is_fatal() {
        let config = ServerConfig {
            address: "127.0.0.1:0".into(),
            store_file: None,
            crypto_key: Some("/nonexistent/private.pem".into()),
            ..ServerConfig::default()
        };
        assert!(run(config, async {}).await.is_err());
    }
}
