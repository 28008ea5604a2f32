use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use logdist_common::{AnalysisResult, DeadLetterEntry, DistributorConfig, LogPacket, Result};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::dead_letter::DeadLetterStore;

/// Owner of the in-flight packet set and the retry state machine.
///
/// Every accepted packet is tracked here until a successful result
/// removes it or its retry budget runs out and it is parked in the
/// dead-letter store. All mutations of the in-flight map go through this
/// type; the distributor and persistence layer only ever see snapshots.
pub struct RetryTracker {
    in_flight: RwLock<HashMap<String, LogPacket>>,
    retry_tx: mpsc::Sender<LogPacket>,
    dead_letter: DeadLetterStore,
    max_retries: u32,
    base_retry_delay: Duration,
    retry_backoff_factor: u32,
    submission_timeout: Duration,
    cancel: CancellationToken,
}

impl RetryTracker {
    pub fn new(
        retry_tx: mpsc::Sender<LogPacket>,
        dead_letter: DeadLetterStore,
        config: &DistributorConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            in_flight: RwLock::new(HashMap::new()),
            retry_tx,
            dead_letter,
            max_retries: config.max_retries,
            base_retry_delay: config.base_retry_delay,
            retry_backoff_factor: config.retry_backoff_factor,
            submission_timeout: config.submission_timeout,
            cancel,
        }
    }

    /// Inserts a packet into the in-flight set. Re-tracking an id
    /// overwrites the previous entry, so the call is idempotent.
    pub fn track(&self, packet: LogPacket) {
        self.in_flight.write().insert(packet.id.clone(), packet);
    }

    /// Removes a packet from the in-flight set; absent ids are a no-op.
    pub fn untrack(&self, packet_id: &str) {
        self.in_flight.write().remove(packet_id);
    }

    pub fn is_tracked(&self, packet_id: &str) -> bool {
        self.in_flight.read().contains_key(packet_id)
    }

    /// Independent copy of every in-flight packet, for persistence.
    pub fn tracked_snapshot(&self) -> Vec<LogPacket> {
        self.in_flight.read().values().cloned().collect()
    }

    /// Drives the retry state machine for one failed result.
    ///
    /// A packet with budget left gets its retry count bumped and a
    /// delayed re-enqueue scheduled; a packet at the cap is removed and
    /// dead-lettered. A failure for an id that is no longer tracked is a
    /// late duplicate for an already-resolved packet and is dropped.
    pub fn handle_failure(&self, result: AnalysisResult) {
        let mut in_flight = self.in_flight.write();

        let Some(packet) = in_flight.get(&result.packet_id) else {
            drop(in_flight);
            warn!(
                "failed packet {} not tracked, ignoring late result",
                result.packet_id
            );
            return;
        };
        let mut packet = packet.clone();
        let final_error = result.error.as_deref().unwrap_or("unknown error");

        if packet.retry_count < self.max_retries {
            packet.retry_count += 1;
            let delay = self.base_retry_delay * (packet.retry_count * self.retry_backoff_factor);
            in_flight.insert(packet.id.clone(), packet.clone());
            drop(in_flight);

            self.schedule_retry(packet, delay);
        } else {
            in_flight.remove(&result.packet_id);
            drop(in_flight);

            error!(
                "packet {} failed permanently after {} retries: {}",
                packet.id, packet.retry_count, final_error
            );
            self.dead_letter.append(&packet, final_error);
        }
    }

    /// One-shot timer: sleep the backoff, then hand the packet to the
    /// retries queue without blocking. Cancellation aborts the timer;
    /// a full queue drops the attempt (the packet stays in-flight and
    /// survives via the next snapshot).
    fn schedule_retry(&self, packet: LogPacket, delay: Duration) {
        let retry_tx = self.retry_tx.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    match retry_tx.try_send(packet) {
                        Ok(()) => {}
                        Err(TrySendError::Full(packet)) => {
                            error!("failed to schedule retry for packet {}: retry queue full", packet.id);
                        }
                        Err(TrySendError::Closed(_)) => {}
                    }
                }
                _ = cancel.cancelled() => {}
            }
        });
    }

    /// Pump loop: drains the retries queue back onto the packets queue.
    /// Runs until cancellation or until either queue closes.
    pub async fn run_retry_pump(
        self: Arc<Self>,
        mut retry_rx: mpsc::Receiver<LogPacket>,
        packet_tx: mpsc::Sender<LogPacket>,
    ) {
        loop {
            let packet = tokio::select! {
                maybe = retry_rx.recv() => match maybe {
                    Some(packet) => packet,
                    None => return,
                },
                _ = self.cancel.cancelled() => return,
            };

            // Re-track so the stored retry count matches the queued copy.
            self.track(packet.clone());

            match packet_tx
                .send_timeout(packet, self.submission_timeout)
                .await
            {
                Ok(()) => {}
                Err(SendTimeoutError::Timeout(packet)) => {
                    error!(
                        "failed to resubmit retry packet {}: packet queue full",
                        packet.id
                    );
                }
                Err(SendTimeoutError::Closed(_)) => return,
            }
        }
    }

    /// Contents of the dead-letter file.
    pub fn dead_letter_entries(&self) -> Result<Vec<DeadLetterEntry>> {
        self.dead_letter.load()
    }
}
