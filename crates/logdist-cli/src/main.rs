//! # logdist entry point
//!
//! Starts the log-packet distribution service: builds the stock
//! analyzer registry, starts the distribution pipeline, serves the HTTP
//! ingestion/stats API and shuts everything down cleanly on ctrl-c.
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults (0.0.0.0:8080, state files in the working dir)
//! logdist
//!
//! # Custom bind address and file locations
//! logdist -b 127.0.0.1:9090 \
//!     --state-file /var/lib/logdist/distributor_state.json.gz \
//!     --dead-letter-file /var/lib/logdist/failed_packets.json
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use argh::FromArgs;
use logdist_common::{default_analyzers, DistributorConfig};
use logdist_distributor::{Distributor, HttpServer};
use tracing::{error, info};

/// log-packet distribution service
#[derive(FromArgs)]
struct Cli {
    /// address to bind the HTTP API to
    ///
    /// Defaults to "0.0.0.0:8080".
    #[argh(option, short = 'b', default = "\"0.0.0.0:8080\".into()")]
    bind: String,

    /// path of the gzip-compressed state snapshot
    ///
    /// The snapshot is written on every checkpoint and on shutdown, and
    /// recovered on the next start.
    #[argh(option, long = "state-file")]
    state_file: Option<PathBuf>,

    /// path of the dead-letter JSON file
    ///
    /// Packets that exhaust their retry budget are appended here.
    #[argh(option, long = "dead-letter-file")]
    dead_letter_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let mut config = DistributorConfig::default();
    if let Some(state_file) = cli.state_file {
        config.state_file = state_file;
    }
    if let Some(dead_letter_file) = cli.dead_letter_file {
        config.dead_letter_file = dead_letter_file;
    }

    let addr: SocketAddr = cli
        .bind
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid bind address {}: {}", cli.bind, e))?;

    info!("starting logdist v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "packet workers: {}, health check interval: {:?}, checkpoint interval: {:?}",
        config.packet_workers, config.health_check_interval, config.checkpoint_interval
    );

    let distributor = Distributor::new(default_analyzers(), config)?;
    distributor.start().await?;
    info!(
        "distributor running with {} analyzers",
        distributor.stats().analyzer_stats.len()
    );

    let server = HttpServer::new(distributor.clone());
    let server_task = tokio::spawn(async move {
        if let Err(e) = server.run(addr).await {
            error!("http server error: {}", e);
        }
    });

    info!("service ready, press ctrl-c to shut down");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    server_task.abort();
    if let Err(e) = distributor.stop().await {
        error!("failed to stop distributor cleanly: {}", e);
    }

    info!("service shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli: Cli = Cli::from_args(&["logdist"], &[]).unwrap();
        assert_eq!(cli.bind, "0.0.0.0:8080");
        assert!(cli.state_file.is_none());
        assert!(cli.dead_letter_file.is_none());
    }

    #[test]
    fn test_cli_parse_bind() {
        let cli: Cli = Cli::from_args(&["logdist"], &["-b", "127.0.0.1:9090"]).unwrap();
        assert_eq!(cli.bind, "127.0.0.1:9090");
    }

    #[test]
    fn test_cli_parse_file_paths() {
        let cli: Cli = Cli::from_args(
            &["logdist"],
            &[
                "--state-file",
                "/tmp/state.json.gz",
                "--dead-letter-file",
                "/tmp/failed.json",
            ],
        )
        .unwrap();
        assert_eq!(cli.state_file, Some(PathBuf::from("/tmp/state.json.gz")));
        assert_eq!(
            cli.dead_letter_file,
            Some(PathBuf::from("/tmp/failed.json"))
        );
    }
}
