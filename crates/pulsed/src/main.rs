//! pulsed: the Pulse daemon.
//!
//! One binary, three roles:
//! - `server`: HTTP (and optionally gRPC) aggregation server over a metric store
//! - `agent`: host sampler that reports to a server on a fixed cadence
//! - `keygen`: RSA key pair for encrypted request bodies
//!
//! # Usage
//!
//! ```text
//! pulsed server -a 0.0.0.0:8080 -f /var/lib/pulse/metrics.json
//! pulsed agent -a localhost:8080 -r 10s -p 2s -l 3
//! pulsed keygen --out-dir /etc/pulse
//! ```

mod agent;
mod config;
mod keygen;
mod server;
mod shutdown;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use crate::config::{AgentArgs, AgentConfig, ServerArgs, ServerConfig};

#[derive(Parser)]
#[command(name = "pulsed", about = "Pulse metrics daemon", version)]
struct Cli {
    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the aggregation server.
    Server(ServerArgs),

    /// Run the collector agent.
    Agent(AgentArgs),

    /// Write private.pem and public.pem for request body encryption.
    Keygen {
        /// Directory that receives the key files.
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,

        /// RSA modulus size.
        #[arg(long, default_value_t = keygen::DEFAULT_BITS)]
        bits: usize,
    },
}

/// `RUST_LOG` wins over the configured level.
fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let env = |key: &str| std::env::var(key).ok();

    match cli.command {
        Command::Server(args) => {
            let config = ServerConfig::load(&args, &env)?;
            init_tracing(&config.log_level, cli.log_format);
            server::run(config, shutdown::signal()).await
        }
        Command::Agent(args) => {
            let config = AgentConfig::load(&args, &env)?;
            init_tracing(&config.log_level, cli.log_format);
            agent::run(config, shutdown::signal()).await
        }
        Command::Keygen { out_dir, bits } => {
            init_tracing("info", cli.log_format);
            keygen::write_key_pair(&out_dir, bits).map(|_| ())
        }
    }
}
