//! pulse-agent: the Pulse metrics collector.
//!
//! Samples runtime and host metrics on a poll interval, batches them on a
//! report interval and ships each batch to the aggregation server through
//! a [`Transport`](transport::Transport).
//!
//! Memory stays bounded: the sample queue blocks the sampler when full and
//! the dispatcher drops snapshots the worker pool cannot take.

pub mod agent;
pub mod dispatcher;
pub mod error;
pub mod queue;
pub mod sampler;
pub mod transport;
pub mod worker;

pub use agent::{Agent, AgentSettings};
pub use error::{TransportError, TransportResult};
pub use sampler::{HostProbe, Sampler, Snapshot, SysinfoProbe};
pub use transport::{GrpcTransport, HttpTransport, RetryPolicy, Sealer, Transport, TransportKind};
