use std::path::PathBuf;
use std::time::Duration;

/// Sum-of-bodies cap per packet.
pub const MAX_PACKET_SIZE_BYTES: usize = 1024 * 1024;
/// Message-count cap per packet.
pub const MAX_MESSAGES_PER_PACKET: usize = 1000;
/// Per-message body cap in bytes.
pub const MAX_LOG_MESSAGE_LENGTH: usize = 10_000;
/// Bounds on analyzer weight.
pub const MIN_WEIGHT: f64 = 0.0;
pub const MAX_WEIGHT: f64 = 1.0;
/// Cap on analyzer display names.
pub const MAX_ANALYZER_NAME_LENGTH: usize = 100;

/// Tunables for the distribution pipeline.
///
/// File paths live here rather than in process-wide constants so tests
/// can point each instance at its own temp directory.
#[derive(Debug, Clone)]
pub struct DistributorConfig {
    /// Capacity of the packets queue.
    pub packet_channel_buffer: usize,
    /// Capacity of the results queue.
    pub result_channel_buffer: usize,
    /// Capacity of the retries queue.
    pub retry_channel_buffer: usize,
    /// Number of packet workers; the same number of result workers is spawned.
    pub packet_workers: usize,
    /// Cadence of state snapshots.
    pub checkpoint_interval: Duration,
    /// Cadence of health probes.
    pub health_check_interval: Duration,
    /// Maximum wait when enqueueing onto the packets queue.
    pub submission_timeout: Duration,
    /// Maximum wait when enqueueing onto the results queue.
    pub result_timeout: Duration,
    /// Delay before re-enqueueing a packet when no analyzer is healthy.
    pub no_analyzer_backoff: Duration,
    /// Cap on per-packet retry attempts.
    pub max_retries: u32,
    /// Base unit for retry backoff.
    pub base_retry_delay: Duration,
    /// Linear multiplier on the attempt number.
    pub retry_backoff_factor: u32,
    /// Probability that a simulated analysis fails.
    pub analyzer_failure_rate: f64,
    /// Probability that a simulated health probe reports unhealthy.
    pub health_failure_rate: f64,
    /// Path of the gzip-compressed state snapshot.
    pub state_file: PathBuf,
    /// Path of the dead-letter JSON file.
    pub dead_letter_file: PathBuf,
    /// Cap on dead-letter entries; the file is halved when it is reached.
    pub max_dead_letter_entries: usize,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            packet_channel_buffer: 2000,
            result_channel_buffer: 2000,
            retry_channel_buffer: 1000,
            packet_workers: 100,
            checkpoint_interval: Duration::from_secs(30),
            health_check_interval: Duration::from_secs(10),
            submission_timeout: Duration::from_secs(5),
            result_timeout: Duration::from_secs(1),
            no_analyzer_backoff: Duration::from_secs(5),
            max_retries: 3,
            base_retry_delay: Duration::from_secs(2),
            retry_backoff_factor: 2,
            analyzer_failure_rate: 0.05,
            health_failure_rate: 0.05,
            state_file: PathBuf::from("distributor_state.json.gz"),
            dead_letter_file: PathBuf::from("failed_packets.json"),
            max_dead_letter_entries: 10_000,
        }
    }
}

/// Static description of one analyzer backend.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub id: String,
    pub name: String,
    pub weight: f64,
    pub processing_time_ms: u64,
}

impl AnalyzerConfig {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        weight: f64,
        processing_time_ms: u64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            weight,
            processing_time_ms,
        }
    }
}

/// The stock four-analyzer registry. Weights sum to 1.0.
pub fn default_analyzers() -> Vec<AnalyzerConfig> {
    vec![
        AnalyzerConfig::new("analyzer-a1", "Analyzer A", 0.4, 100),
        AnalyzerConfig::new("analyzer-a2", "Analyzer B", 0.3, 150),
        AnalyzerConfig::new("analyzer-a3", "Analyzer C", 0.2, 80),
        AnalyzerConfig::new("analyzer-a4", "Analyzer D", 0.1, 200),
    ]
}
