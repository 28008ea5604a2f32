//! logdist distribution core
//!
//! This crate implements the log-packet distribution pipeline: packets
//! submitted in batches are validated, tracked for retry, queued, and
//! dispatched to exactly one of a fixed set of analyzer backends chosen
//! by smooth weighted round-robin. Transient failures re-enter the
//! pipeline with a bounded backoff; packets that exhaust their retry
//! budget are parked in an on-disk dead-letter file. In-flight work and
//! registry counters are checkpointed to disk and recovered on startup.
//!
//! # Architecture
//!
//! The [`Distributor`] owns three bounded queues (packets, results,
//! retries) and wires the components together:
//!
//! 1. **Validation**: [`PacketValidator`] rejects malformed packets at
//!    the door; nothing invalid is ever tracked or queued.
//! 2. **Selection**: [`WeightedLoadBalancer`] picks one healthy analyzer
//!    per dispatch so that long-run dispatch shares converge to the
//!    configured weights.
//! 3. **Health**: [`HealthMonitor`] probes every analyzer on an interval
//!    and tells the balancer when the healthy set changed.
//! 4. **Processing**: [`PacketProcessor`] simulates analyzer work and
//!    emits a success or failure result per dispatch.
//! 5. **Retry**: [`RetryTracker`] owns the in-flight packet set and the
//!    retry state machine, dead-lettering packets that run out of
//!    attempts.
//! 6. **Persistence**: [`PersistenceManager`] snapshots a consistent
//!    view of the pipeline and recovers it after a restart.
//!
//! The HTTP surface in [`http_server`] is a thin axum shell over the
//! distributor's submit/stats contract.

pub mod dead_letter;
pub mod distributor;
pub mod health_monitor;
pub mod http_server;
pub mod load_balancer;
pub mod persistence;
pub mod processor;
pub mod retry_tracker;
pub mod validator;

pub use dead_letter::DeadLetterStore;
pub use distributor::Distributor;
pub use health_monitor::HealthMonitor;
pub use http_server::HttpServer;
pub use load_balancer::WeightedLoadBalancer;
pub use persistence::PersistenceManager;
pub use processor::PacketProcessor;
pub use retry_tracker::RetryTracker;
pub use validator::PacketValidator;
