use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use logdist_common::config::{MAX_ANALYZER_NAME_LENGTH, MAX_WEIGHT, MIN_WEIGHT};
use logdist_common::{
    AnalysisResult, Analyzer, AnalyzerConfig, DeadLetterEntry, DistributorConfig,
    DistributorError, DistributorState, DistributorStats, LogPacket, Result,
};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use crate::dead_letter::DeadLetterStore;
use crate::health_monitor::HealthMonitor;
use crate::load_balancer::WeightedLoadBalancer;
use crate::persistence::PersistenceManager;
use crate::processor::PacketProcessor;
use crate::retry_tracker::RetryTracker;
use crate::validator::PacketValidator;

type SharedReceiver<T> = Arc<AsyncMutex<mpsc::Receiver<T>>>;

/// The distribution pipeline orchestrator.
///
/// Owns the three bounded queues (packets, results, retries) and the
/// analyzer registry, wires the validator, load balancer, health
/// monitor, processor, retry tracker and persistence manager together,
/// and exposes the submit / stats / lifecycle contract.
///
/// `Distributor` is a cheap clone over shared state, so worker tasks
/// and the HTTP surface hold their own copies. A pipeline is built
/// once, started once and stopped once.
#[derive(Clone)]
pub struct Distributor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Distributor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Distributor").finish_non_exhaustive()
    }
}

struct Inner {
    config: DistributorConfig,
    analyzers: HashMap<String, Arc<Analyzer>>,
    validator: PacketValidator,
    load_balancer: Arc<WeightedLoadBalancer>,
    processor: Arc<PacketProcessor>,
    retry_tracker: Arc<RetryTracker>,
    persistence: Arc<PersistenceManager>,

    packet_tx: mpsc::Sender<LogPacket>,
    result_tx: mpsc::Sender<AnalysisResult>,
    retry_tx: mpsc::Sender<LogPacket>,
    packet_rx: Mutex<Option<mpsc::Receiver<LogPacket>>>,
    result_rx: Mutex<Option<mpsc::Receiver<AnalysisResult>>>,
    retry_rx: Mutex<Option<mpsc::Receiver<LogPacket>>>,

    cancel: CancellationToken,
    is_running: RwLock<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started_at: Instant,
    total_packets_received: AtomicU64,
    total_messages_routed: AtomicU64,
}

impl Distributor {
    /// Builds a distributor over the given registry. Fails when an
    /// analyzer config is out of bounds.
    pub fn new(analyzer_configs: Vec<AnalyzerConfig>, config: DistributorConfig) -> Result<Self> {
        let mut analyzers = HashMap::new();
        for cfg in analyzer_configs {
            validate_analyzer_config(&cfg)?;
            analyzers.insert(
                cfg.id.clone(),
                Arc::new(Analyzer::new(
                    cfg.id,
                    cfg.name,
                    cfg.weight,
                    cfg.processing_time_ms,
                )),
            );
        }

        let (packet_tx, packet_rx) = mpsc::channel(config.packet_channel_buffer);
        let (result_tx, result_rx) = mpsc::channel(config.result_channel_buffer);
        let (retry_tx, retry_rx) = mpsc::channel(config.retry_channel_buffer);

        let cancel = CancellationToken::new();
        let load_balancer = Arc::new(WeightedLoadBalancer::new(&analyzers));
        let dead_letter = DeadLetterStore::new(
            config.dead_letter_file.clone(),
            config.max_dead_letter_entries,
        );
        let retry_tracker = Arc::new(RetryTracker::new(
            retry_tx.clone(),
            dead_letter,
            &config,
            cancel.clone(),
        ));
        let persistence = Arc::new(PersistenceManager::new(
            config.state_file.clone(),
            config.checkpoint_interval,
        ));
        let processor = Arc::new(PacketProcessor::new(config.analyzer_failure_rate));

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                analyzers,
                validator: PacketValidator::new(),
                load_balancer,
                processor,
                retry_tracker,
                persistence,
                packet_tx,
                result_tx,
                retry_tx,
                packet_rx: Mutex::new(Some(packet_rx)),
                result_rx: Mutex::new(Some(result_rx)),
                retry_rx: Mutex::new(Some(retry_rx)),
                cancel,
                is_running: RwLock::new(false),
                tasks: Mutex::new(Vec::new()),
                started_at: Instant::now(),
                total_packets_received: AtomicU64::new(0),
                total_messages_routed: AtomicU64::new(0),
            }),
        })
    }

    /// Recovers any previous snapshot and spawns the worker pools, the
    /// retry pump, the checkpointer and the health monitor.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;

        if inner.cancel.is_cancelled() {
            return Err(DistributorError::ShuttingDown);
        }
        {
            let mut running = inner.is_running.write();
            if *running {
                return Err(DistributorError::AlreadyRunning);
            }
            *running = true;
        }

        match inner.persistence.recover_state() {
            Ok(state) => self.recover_from_state(state),
            Err(e) if e.is_not_found() => {
                info!("no previous state snapshot found, starting fresh");
            }
            Err(e) => error!("failed to recover previous state: {}", e),
        }

        let packet_rx = inner
            .packet_rx
            .lock()
            .take()
            .ok_or(DistributorError::ShuttingDown)?;
        let result_rx = inner
            .result_rx
            .lock()
            .take()
            .ok_or(DistributorError::ShuttingDown)?;
        let retry_rx = inner
            .retry_rx
            .lock()
            .take()
            .ok_or(DistributorError::ShuttingDown)?;

        let packet_rx: SharedReceiver<LogPacket> = Arc::new(AsyncMutex::new(packet_rx));
        let result_rx: SharedReceiver<AnalysisResult> = Arc::new(AsyncMutex::new(result_rx));

        let mut tasks = Vec::with_capacity(inner.config.packet_workers * 2 + 3);
        for _ in 0..inner.config.packet_workers {
            tasks.push(tokio::spawn(
                self.clone().run_packet_worker(Arc::clone(&packet_rx)),
            ));
            tasks.push(tokio::spawn(
                self.clone().run_result_worker(Arc::clone(&result_rx)),
            ));
        }

        tasks.push(tokio::spawn(
            Arc::clone(&inner.retry_tracker).run_retry_pump(retry_rx, inner.packet_tx.clone()),
        ));

        let snapshot_source = self.clone();
        tasks.push(
            Arc::clone(&inner.persistence)
                .spawn_checkpointer(inner.cancel.clone(), move || snapshot_source.get_state()),
        );

        let monitor = HealthMonitor::new(
            inner.analyzers.clone(),
            inner.config.health_check_interval,
            inner.config.health_failure_rate,
        );
        let balancer = Arc::clone(&inner.load_balancer);
        tasks.push(monitor.spawn(inner.cancel.clone(), move || balancer.notify_health_change()));

        inner.tasks.lock().extend(tasks);
        info!(
            "distributor started with {} analyzers and {} packet workers",
            inner.analyzers.len(),
            inner.config.packet_workers
        );
        Ok(())
    }

    /// Persists a final snapshot, cancels every task and waits for the
    /// worker pools to drain out.
    pub async fn stop(&self) -> Result<()> {
        let inner = &self.inner;

        {
            let mut running = inner.is_running.write();
            if !*running {
                return Err(DistributorError::NotRunning);
            }
            *running = false;
        }

        if let Err(e) = inner.persistence.save_state(&self.get_state()) {
            error!("failed to save state during shutdown: {}", e);
        }

        inner.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *inner.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }

        info!("distributor stopped");
        Ok(())
    }

    /// Validates and accepts one packet into the pipeline.
    ///
    /// Packets without an id get one assigned. An accepted packet is
    /// tracked before it is queued, so its fate is always accounted for;
    /// if the queue stays full past the submission timeout the packet is
    /// untracked again and the caller sees `QueueFull`.
    pub async fn submit(&self, mut packet: LogPacket) -> Result<()> {
        let inner = &self.inner;

        inner.validator.validate(&packet)?;

        if packet.id.is_empty() {
            packet.id = Uuid::new_v4().to_string();
        }
        let packet_id = packet.id.clone();

        inner.retry_tracker.track(packet.clone());

        tokio::select! {
            sent = inner
                .packet_tx
                .send_timeout(packet, inner.config.submission_timeout) =>
            {
                match sent {
                    Ok(()) => {
                        inner.total_packets_received.fetch_add(1, Ordering::Relaxed);
                        Ok(())
                    }
                    Err(SendTimeoutError::Timeout(_)) => {
                        inner.retry_tracker.untrack(&packet_id);
                        Err(DistributorError::QueueFull)
                    }
                    Err(SendTimeoutError::Closed(_)) => Err(DistributorError::ShuttingDown),
                }
            }
            _ = inner.cancel.cancelled() => Err(DistributorError::ShuttingDown),
        }
    }

    /// Point-in-time statistics snapshot.
    pub fn stats(&self) -> DistributorStats {
        let inner = &self.inner;
        let _running = inner.is_running.read();

        let analyzer_stats: HashMap<String, _> = inner
            .analyzers
            .iter()
            .map(|(id, analyzer)| (id.clone(), analyzer.snapshot()))
            .collect();
        let active_analyzers = analyzer_stats.values().filter(|a| a.healthy).count();

        DistributorStats {
            total_packets_received: inner.total_packets_received.load(Ordering::Relaxed),
            total_messages_routed: inner.total_messages_routed.load(Ordering::Relaxed),
            active_analyzers,
            packet_channel_util_percent: queue_utilization(&inner.packet_tx),
            result_channel_util_percent: queue_utilization(&inner.result_tx),
            retry_channel_util_percent: queue_utilization(&inner.retry_tx),
            analyzer_stats,
            uptime_ms: inner.started_at.elapsed().as_millis() as u64,
        }
    }

    /// Independent copy of the in-flight packet set.
    pub fn tracked_packets(&self) -> Vec<LogPacket> {
        self.inner.retry_tracker.tracked_snapshot()
    }

    /// Contents of the dead-letter file.
    pub fn dead_letter_entries(&self) -> Result<Vec<DeadLetterEntry>> {
        self.inner.retry_tracker.dead_letter_entries()
    }

    /// Manually overrides one analyzer's health flag, e.g. to drain a
    /// backend ahead of maintenance. Returns false for an unknown id.
    /// The next health probe may flip the flag back.
    pub fn set_analyzer_health(&self, analyzer_id: &str, healthy: bool) -> bool {
        let Some(analyzer) = self.inner.analyzers.get(analyzer_id) else {
            return false;
        };
        analyzer.set_healthy(healthy);
        analyzer.touch_health_check();
        self.inner.load_balancer.notify_health_change();
        info!(
            "analyzer {} health manually set to {}",
            analyzer_id, healthy
        );
        true
    }

    /// Composes a self-consistent snapshot for persistence.
    fn get_state(&self) -> DistributorState {
        let inner = &self.inner;
        let _running = inner.is_running.read();

        DistributorState {
            analyzers: inner
                .analyzers
                .iter()
                .map(|(id, analyzer)| (id.clone(), analyzer.snapshot()))
                .collect(),
            pending_packets: inner.retry_tracker.tracked_snapshot(),
            last_checkpoint: Utc::now(),
            total_processed: inner.total_packets_received.load(Ordering::Relaxed),
        }
    }

    /// Applies a recovered snapshot: merges counters onto the live
    /// registry, restores the received total, and re-enqueues pending
    /// packets without blocking. Packets that do not fit stay tracked
    /// and are driven by later retry or health events.
    fn recover_from_state(&self, state: DistributorState) {
        let inner = &self.inner;

        for (id, snapshot) in &state.analyzers {
            if let Some(existing) = inner.analyzers.get(id) {
                existing.add_counts(snapshot.processed_count, snapshot.error_count);
                existing.set_last_health_check(snapshot.last_health_check);
            }
        }

        let pending = state.pending_packets.len();
        let mut resubmitted = 0;
        for packet in state.pending_packets {
            inner.retry_tracker.track(packet.clone());
            match inner.packet_tx.try_send(packet) {
                Ok(()) => resubmitted += 1,
                Err(TrySendError::Full(packet)) => {
                    info!(
                        "packet queue full during recovery, packet {} stays tracked",
                        packet.id
                    );
                }
                Err(TrySendError::Closed(_)) => break,
            }
        }

        inner
            .total_packets_received
            .store(state.total_processed, Ordering::Relaxed);

        if pending > 0 {
            info!(
                "state recovery completed: {} pending packets, {} resubmitted",
                pending, resubmitted
            );
        }
    }

    /// Packet worker loop: pull one packet at a time off the shared
    /// receiver and dispatch it. Dispatching only selects an analyzer
    /// and spawns the processing task, so a slow analyzer never stalls
    /// the worker.
    async fn run_packet_worker(self, rx: SharedReceiver<LogPacket>) {
        loop {
            let packet = {
                let mut rx = rx.lock().await;
                tokio::select! {
                    maybe = rx.recv() => match maybe {
                        Some(packet) => packet,
                        None => return,
                    },
                    _ = self.inner.cancel.cancelled() => return,
                }
            };
            self.dispatch_packet(packet);
        }
    }

    fn dispatch_packet(&self, packet: LogPacket) {
        let inner = &self.inner;

        let Some(analyzer) = inner.load_balancer.select() else {
            error!(
                "no healthy analyzers available, requeueing packet {}",
                packet.id
            );
            self.requeue_packet_with_delay(packet, inner.config.no_analyzer_backoff);
            return;
        };

        inner
            .total_messages_routed
            .fetch_add(packet.messages.len() as u64, Ordering::Relaxed);

        let this = self.clone();
        tokio::spawn(async move {
            this.send_to_analyzer(analyzer, packet).await;
        });
    }

    /// Runs one dispatch end to end and delivers the result. When the
    /// results queue stays full past the result timeout, or shutdown
    /// interrupts delivery, a synthesized failure goes through the retry
    /// state machine instead so the packet is never lost track of.
    async fn send_to_analyzer(self, analyzer: Arc<Analyzer>, packet: LogPacket) {
        let inner = &self.inner;

        let result = inner.processor.process(&analyzer, &packet).await;

        tokio::select! {
            sent = inner
                .result_tx
                .send_timeout(result, inner.config.result_timeout) =>
            {
                match sent {
                    Ok(()) => {}
                    Err(SendTimeoutError::Timeout(_)) => {
                        inner.retry_tracker.handle_failure(AnalysisResult::failure(
                            &packet.id,
                            &analyzer.id,
                            "result channel timeout",
                        ));
                    }
                    Err(SendTimeoutError::Closed(_)) => {
                        inner.retry_tracker.handle_failure(AnalysisResult::failure(
                            &packet.id,
                            &analyzer.id,
                            "processing interrupted by shutdown",
                        ));
                    }
                }
            }
            _ = inner.cancel.cancelled() => {
                inner.retry_tracker.handle_failure(AnalysisResult::failure(
                    &packet.id,
                    &analyzer.id,
                    "processing interrupted by shutdown",
                ));
            }
        }
    }

    /// Result worker loop: successes resolve the packet, failures feed
    /// the retry state machine.
    async fn run_result_worker(self, rx: SharedReceiver<AnalysisResult>) {
        loop {
            let result = {
                let mut rx = rx.lock().await;
                tokio::select! {
                    maybe = rx.recv() => match maybe {
                        Some(result) => result,
                        None => return,
                    },
                    _ = self.inner.cancel.cancelled() => return,
                }
            };

            if result.success {
                self.inner.retry_tracker.untrack(&result.packet_id);
            } else {
                self.inner.retry_tracker.handle_failure(result);
            }
        }
    }

    /// One-shot delayed requeue for packets that found no healthy
    /// analyzer. If the queue is full when the timer fires the packet is
    /// dropped with an error log; it remains tracked and survives via
    /// the next snapshot.
    fn requeue_packet_with_delay(&self, packet: LogPacket, delay: Duration) {
        let packet_tx = self.inner.packet_tx.clone();
        let cancel = self.inner.cancel.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    match packet_tx.try_send(packet) {
                        Ok(()) => {}
                        Err(TrySendError::Full(packet)) => {
                            error!("failed to requeue packet {}: queue full", packet.id);
                        }
                        Err(TrySendError::Closed(_)) => {}
                    }
                }
                _ = cancel.cancelled() => {}
            }
        });
    }
}

fn validate_analyzer_config(cfg: &AnalyzerConfig) -> Result<()> {
    if cfg.weight < MIN_WEIGHT || cfg.weight > MAX_WEIGHT {
        return Err(DistributorError::InvalidAnalyzerConfig {
            id: cfg.id.clone(),
            reason: format!(
                "weight {:.2} must be between {:.2} and {:.2}",
                cfg.weight, MIN_WEIGHT, MAX_WEIGHT
            ),
        });
    }
    if cfg.name.len() > MAX_ANALYZER_NAME_LENGTH {
        return Err(DistributorError::InvalidAnalyzerConfig {
            id: cfg.id.clone(),
            reason: format!(
                "name length {} exceeds maximum {}",
                cfg.name.len(),
                MAX_ANALYZER_NAME_LENGTH
            ),
        });
    }
    Ok(())
}

fn queue_utilization<T>(tx: &mpsc::Sender<T>) -> f64 {
    let capacity = tx.max_capacity();
    if capacity == 0 {
        return 0.0;
    }
    let occupied = capacity - tx.capacity();
    occupied as f64 / capacity as f64 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use logdist_common::LogMessage;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> DistributorConfig {
        DistributorConfig {
            packet_workers: 4,
            submission_timeout: Duration::from_millis(100),
            result_timeout: Duration::from_millis(200),
            base_retry_delay: Duration::from_millis(10),
            health_check_interval: Duration::from_secs(3600),
            checkpoint_interval: Duration::from_secs(3600),
            analyzer_failure_rate: 0.0,
            health_failure_rate: 0.0,
            state_file: dir.path().join("distributor_state.json.gz"),
            dead_letter_file: dir.path().join("failed_packets.json"),
            ..DistributorConfig::default()
        }
    }

    fn single_analyzer() -> Vec<AnalyzerConfig> {
        vec![AnalyzerConfig::new("a1", "Analyzer A", 1.0, 1)]
    }

    fn test_packet() -> LogPacket {
        LogPacket::new(vec![LogMessage::new("info", "hello", "test", None)])
    }

    #[test]
    fn test_new_rejects_out_of_range_weight() {
        let dir = TempDir::new().unwrap();
        let configs = vec![AnalyzerConfig::new("a1", "Analyzer A", 1.5, 1)];
        let err = Distributor::new(configs, test_config(&dir)).unwrap_err();
        assert!(matches!(
            err,
            DistributorError::InvalidAnalyzerConfig { ref id, .. } if id == "a1"
        ));
    }

    #[test]
    fn test_new_rejects_oversized_name() {
        let dir = TempDir::new().unwrap();
        let configs = vec![AnalyzerConfig::new(
            "a1",
            "x".repeat(MAX_ANALYZER_NAME_LENGTH + 1),
            0.5,
            1,
        )];
        assert!(Distributor::new(configs, test_config(&dir)).is_err());
    }

    #[tokio::test]
    async fn test_double_start_is_rejected() {
        let dir = TempDir::new().unwrap();
        let dist = Distributor::new(single_analyzer(), test_config(&dir)).unwrap();

        dist.start().await.unwrap();
        assert!(matches!(
            dist.start().await,
            Err(DistributorError::AlreadyRunning)
        ));
        dist.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_without_start_is_rejected() {
        let dir = TempDir::new().unwrap();
        let dist = Distributor::new(single_analyzer(), test_config(&dir)).unwrap();
        assert!(matches!(
            dist.stop().await,
            Err(DistributorError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn test_repeated_stop_is_rejected_after_first() {
        let dir = TempDir::new().unwrap();
        let dist = Distributor::new(single_analyzer(), test_config(&dir)).unwrap();

        dist.start().await.unwrap();
        dist.stop().await.unwrap();
        assert!(matches!(
            dist.stop().await,
            Err(DistributorError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn test_submit_surfaces_validation_error() {
        let dir = TempDir::new().unwrap();
        let dist = Distributor::new(single_analyzer(), test_config(&dir)).unwrap();

        let err = dist.submit(LogPacket::new(vec![])).await.unwrap_err();
        assert!(matches!(err, DistributorError::EmptyMessages));
        assert!(dist.tracked_packets().is_empty());
    }

    #[tokio::test]
    async fn test_submit_assigns_id_and_tracks() {
        let dir = TempDir::new().unwrap();
        let dist = Distributor::new(single_analyzer(), test_config(&dir)).unwrap();

        let mut packet = test_packet();
        packet.id = String::new();
        dist.submit(packet).await.unwrap();

        let tracked = dist.tracked_packets();
        assert_eq!(tracked.len(), 1);
        assert!(!tracked[0].id.is_empty());
        assert_eq!(dist.stats().total_packets_received, 1);
    }

    #[tokio::test]
    async fn test_submit_full_queue_returns_queue_full_and_untracks() {
        let dir = TempDir::new().unwrap();
        let config = DistributorConfig {
            packet_channel_buffer: 1,
            ..test_config(&dir)
        };
        // Never started, so nothing drains the queue.
        let dist = Distributor::new(single_analyzer(), config).unwrap();

        dist.submit(test_packet()).await.unwrap();
        let err = dist.submit(test_packet()).await.unwrap_err();
        assert!(matches!(err, DistributorError::QueueFull));

        // The rejected packet is untracked; the accepted one is not.
        assert_eq!(dist.tracked_packets().len(), 1);
        assert_eq!(dist.stats().total_packets_received, 1);
    }

    #[tokio::test]
    async fn test_submit_after_stop_returns_shutting_down() {
        let dir = TempDir::new().unwrap();
        let dist = Distributor::new(single_analyzer(), test_config(&dir)).unwrap();

        dist.start().await.unwrap();
        dist.stop().await.unwrap();

        let err = dist.submit(test_packet()).await.unwrap_err();
        assert!(matches!(err, DistributorError::ShuttingDown));
    }

    #[tokio::test]
    async fn test_set_analyzer_health_overrides_flag() {
        let dir = TempDir::new().unwrap();
        let dist = Distributor::new(single_analyzer(), test_config(&dir)).unwrap();

        assert!(dist.set_analyzer_health("a1", false));
        assert_eq!(dist.stats().active_analyzers, 0);
        assert!(dist.set_analyzer_health("a1", true));
        assert_eq!(dist.stats().active_analyzers, 1);
        assert!(!dist.set_analyzer_health("missing", false));
    }

    #[tokio::test]
    async fn test_stats_reports_queue_utilization() {
        let dir = TempDir::new().unwrap();
        let config = DistributorConfig {
            packet_channel_buffer: 4,
            ..test_config(&dir)
        };
        let dist = Distributor::new(single_analyzer(), config).unwrap();

        dist.submit(test_packet()).await.unwrap();
        dist.submit(test_packet()).await.unwrap();

        let stats = dist.stats();
        assert_eq!(stats.packet_channel_util_percent, 50.0);
        assert_eq!(stats.result_channel_util_percent, 0.0);
        assert_eq!(stats.active_analyzers, 1);
    }
}
