use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use pulse_agent::{Agent, AgentSettings, GrpcTransport, HttpTransport, Sealer, Transport, TransportKind};
use pulse_core::security::read_public_key;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::AgentConfig;

/// Run the collector agent until `shutdown` resolves.
pub async fn run(config: AgentConfig, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
    config.log_effective();

    let transport = build_transport(&config)?;
    let settings = AgentSettings {
        poll_interval: config.poll_interval,
        report_interval: config.report_interval,
        rate_limit: config.rate_limit,
    };

    let (stop_tx, stop_rx) = watch::channel(false);
    let agent = tokio::spawn(Agent::new(settings, transport).run(stop_rx));

    shutdown.await;
    info!("shutdown signal received, stopping agent");
    let _ = stop_tx.send(true);

    let stats = agent.await.context("agent task panicked")?;
    info!(sent = stats.sent, failed = stats.failed, "agent exited");
    Ok(())
}

fn build_transport(config: &AgentConfig) -> anyhow::Result<Arc<dyn Transport>> {
    match config.transport {
        TransportKind::Http => {
            let public_key = config
                .crypto_key
                .as_deref()
                .map(read_public_key)
                .transpose()
                .context("failed to load public key")?
                .map(Arc::new);
            let sealer = Sealer::new(
                config.key.clone().map(String::into_bytes),
                public_key,
                config.compress,
            );
            let transport = HttpTransport::new(&config.address, sealer)
                .context("invalid server address")?;
            Ok(Arc::new(transport))
        }
        TransportKind::Grpc => {
            if config.key.is_some() || config.crypto_key.is_some() {
                warn!("request signing and body encryption are http only; ignored for grpc");
            }
            let transport = GrpcTransport::new(&config.address).context("invalid server address")?;
            Ok(Arc::new(transport))
        }
    }
}
