//! Shared types for the logdist log-packet distribution service.
//!
//! This crate holds everything the distributor core and its HTTP surface
//! agree on: the packet/result data model, the live analyzer registry
//! entry and its serializable snapshot, the persisted state shape, the
//! configuration struct, and the error taxonomy.

pub mod config;
pub mod error;
pub mod models;

pub use config::{default_analyzers, AnalyzerConfig, DistributorConfig};
pub use error::{DistributorError, Result};
pub use models::{
    AnalysisResult, Analyzer, AnalyzerSnapshot, DeadLetterEntry, DistributorState,
    DistributorStats, LogMessage, LogPacket,
};
