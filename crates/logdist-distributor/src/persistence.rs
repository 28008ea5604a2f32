use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use logdist_common::{DistributorState, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Gzip-compressed JSON snapshots of the distributor state.
pub struct PersistenceManager {
    state_file: PathBuf,
    checkpoint_interval: Duration,
}

impl PersistenceManager {
    pub fn new(state_file: PathBuf, checkpoint_interval: Duration) -> Self {
        Self {
            state_file,
            checkpoint_interval,
        }
    }

    /// Serializes, compresses and writes the snapshot to the state file.
    pub fn save_state(&self, state: &DistributorState) -> Result<()> {
        let data = serde_json::to_vec(state)?;

        let file = File::create(&self.state_file)?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(&data)?;
        encoder.finish()?;
        Ok(())
    }

    /// Reads the snapshot back. A missing file surfaces as an io
    /// `NotFound` error; callers treat that as a fresh start.
    pub fn recover_state(&self) -> Result<DistributorState> {
        let file = File::open(&self.state_file)?;
        let mut decoder = GzDecoder::new(file);
        let mut data = Vec::new();
        decoder.read_to_end(&mut data)?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Periodic checkpoint loop. Each tick captures a state snapshot via
    /// `get_state` and saves it; save failures are logged and the loop
    /// keeps going. The first tick happens one full interval after
    /// spawn, and cancellation stops the loop promptly.
    pub fn spawn_checkpointer<F>(
        self: Arc<Self>,
        cancel: CancellationToken,
        get_state: F,
    ) -> JoinHandle<()>
    where
        F: Fn() -> DistributorState + Send + Sync + 'static,
    {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + self.checkpoint_interval;
            let mut ticker = tokio::time::interval_at(start, self.checkpoint_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.save_state(&get_state()) {
                            error!("failed to checkpoint state: {}", e);
                        }
                    }
                    _ = cancel.cancelled() => return,
                }
            }
        })
    }
}
