use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single log entry inside a packet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogMessage {
    #[serde(default)]
    pub id: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub message: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl LogMessage {
    /// Creates a log message with a generated id and the current timestamp.
    pub fn new(
        level: impl Into<String>,
        message: impl Into<String>,
        source: impl Into<String>,
        metadata: Option<HashMap<String, serde_json::Value>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            level: level.into(),
            message: message.into(),
            source: source.into(),
            metadata,
        }
    }
}

/// A batch of log messages, the atomic unit of dispatch and retry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogPacket {
    #[serde(default)]
    pub id: String,
    pub messages: Vec<LogMessage>,
    #[serde(default)]
    pub retry_count: u32,
}

impl LogPacket {
    /// Creates a packet with a generated id and a zero retry count.
    pub fn new(messages: Vec<LogMessage>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            messages,
            retry_count: 0,
        }
    }

    /// Summed size in bytes of all message bodies.
    pub fn body_bytes(&self) -> usize {
        self.messages.iter().map(|m| m.message.len()).sum()
    }
}

/// Live registry entry for one analyzer backend.
///
/// Identity, weight and simulated duration are fixed at construction.
/// Health and the processing counters are mutated concurrently: the
/// counters by processing tasks, health by the health monitor. All of
/// them are atomics so readers never need a lock.
#[derive(Debug)]
pub struct Analyzer {
    pub id: String,
    pub name: String,
    pub weight: f64,
    pub processing_time_ms: u64,
    healthy: AtomicBool,
    last_health_check_ms: AtomicI64,
    processed_count: AtomicU64,
    error_count: AtomicU64,
}

impl Analyzer {
    /// Creates an analyzer that starts healthy with zeroed counters.
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
            healthy: AtomicBool::new(true),
            last_health_check_ms: AtomicI64::new(Utc::now().timestamp_millis()),
            processed_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }

    pub fn last_health_check(&self) -> DateTime<Utc> {
        let ms = self.last_health_check_ms.load(Ordering::Relaxed);
        DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    pub fn set_last_health_check(&self, at: DateTime<Utc>) {
        self.last_health_check_ms
            .store(at.timestamp_millis(), Ordering::Relaxed);
    }

    /// Stamps the last health check with the current time.
    pub fn touch_health_check(&self) {
        self.set_last_health_check(Utc::now());
    }

    pub fn processed_count(&self) -> u64 {
        self.processed_count.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub fn record_processed(&self) {
        self.processed_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Merges recovered counter values onto the live ones.
    pub fn add_counts(&self, processed: u64, errors: u64) {
        self.processed_count.fetch_add(processed, Ordering::Relaxed);
        self.error_count.fetch_add(errors, Ordering::Relaxed);
    }

    /// Point-in-time copy of the whole record.
    pub fn snapshot(&self) -> AnalyzerSnapshot {
        AnalyzerSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            weight: self.weight,
            processing_time_ms: self.processing_time_ms,
            healthy: self.is_healthy(),
            last_health_check: self.last_health_check(),
            processed_count: self.processed_count(),
            error_count: self.error_count(),
        }
    }
}

/// Serializable view of an [`Analyzer`], used in stats and snapshots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalyzerSnapshot {
    pub id: String,
    pub name: String,
    pub weight: f64,
    pub processing_time_ms: u64,
    pub healthy: bool,
    pub last_health_check: DateTime<Utc>,
    pub processed_count: u64,
    pub error_count: u64,
}

/// Outcome of one dispatch of a packet to an analyzer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResult {
    pub packet_id: String,
    pub analyzer_id: String,
    pub success: bool,
    pub processed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<HashMap<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnalysisResult {
    pub fn success(
        packet_id: impl Into<String>,
        analyzer_id: impl Into<String>,
        results: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            packet_id: packet_id.into(),
            analyzer_id: analyzer_id.into(),
            success: true,
            processed_at: Utc::now(),
            results: Some(results),
            error: None,
        }
    }

    pub fn failure(
        packet_id: impl Into<String>,
        analyzer_id: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            packet_id: packet_id.into(),
            analyzer_id: analyzer_id.into(),
            success: false,
            processed_at: Utc::now(),
            results: None,
            error: Some(error.into()),
        }
    }
}

/// Everything that must survive a restart: registry counters, the
/// in-flight packet set, and the received-packet total.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DistributorState {
    pub analyzers: HashMap<String, AnalyzerSnapshot>,
    pub pending_packets: Vec<LogPacket>,
    pub last_checkpoint: DateTime<Utc>,
    pub total_processed: u64,
}

/// Point-in-time statistics exposed by the distributor.
#[derive(Debug, Clone, Serialize)]
pub struct DistributorStats {
    pub total_packets_received: u64,
    pub total_messages_routed: u64,
    pub active_analyzers: usize,
    pub packet_channel_util_percent: f64,
    pub result_channel_util_percent: f64,
    pub retry_channel_util_percent: f64,
    pub analyzer_stats: HashMap<String, AnalyzerSnapshot>,
    pub uptime_ms: u64,
}

/// One permanently-failed packet parked in the dead-letter file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeadLetterEntry {
    pub packet: LogPacket,
    pub final_error: String,
    pub failed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_message_generates_id_and_timestamp() {
        let msg = LogMessage::new("info", "hello", "app", None);
        assert!(!msg.id.is_empty());
        assert_eq!(msg.level, "info");
        assert_eq!(msg.message, "hello");
        assert_eq!(msg.source, "app");
        assert!(msg.metadata.is_none());
    }

    #[test]
    fn test_log_packet_generates_id() {
        let packet = LogPacket::new(vec![LogMessage::new("info", "a", "app", None)]);
        assert!(!packet.id.is_empty());
        assert_eq!(packet.retry_count, 0);
        assert_eq!(packet.messages.len(), 1);
    }

    #[test]
    fn test_log_packet_body_bytes() {
        let packet = LogPacket::new(vec![
            LogMessage::new("info", "abc", "app", None),
            LogMessage::new("info", "defgh", "app", None),
        ]);
        assert_eq!(packet.body_bytes(), 8);
    }

    #[test]
    fn test_packet_deserializes_without_id_or_retry_count() {
        let json = r#"{"messages":[{"id":"m1","timestamp":"2024-01-01T00:00:00Z","level":"info","message":"x","source":"app"}]}"#;
        let packet: LogPacket = serde_json::from_str(json).unwrap();
        assert!(packet.id.is_empty());
        assert_eq!(packet.retry_count, 0);
        assert_eq!(packet.messages[0].message, "x");
    }

    #[test]
    fn test_analyzer_counters_are_monotonic() {
        let analyzer = Analyzer::new("a1", "Analyzer A", 0.5, 100);
        assert_eq!(analyzer.processed_count(), 0);
        analyzer.record_processed();
        analyzer.record_processed();
        analyzer.record_error();
        assert_eq!(analyzer.processed_count(), 2);
        assert_eq!(analyzer.error_count(), 1);

        analyzer.add_counts(10, 5);
        assert_eq!(analyzer.processed_count(), 12);
        assert_eq!(analyzer.error_count(), 6);
    }

    #[test]
    fn test_analyzer_health_flip() {
        let analyzer = Analyzer::new("a1", "Analyzer A", 0.5, 100);
        assert!(analyzer.is_healthy());
        analyzer.set_healthy(false);
        assert!(!analyzer.is_healthy());
    }

    #[test]
    fn test_analyzer_snapshot_mirrors_live_state() {
        let analyzer = Analyzer::new("a1", "Analyzer A", 0.4, 100);
        analyzer.record_processed();
        analyzer.set_healthy(false);

        let snap = analyzer.snapshot();
        assert_eq!(snap.id, "a1");
        assert_eq!(snap.weight, 0.4);
        assert_eq!(snap.processed_count, 1);
        assert!(!snap.healthy);
    }

    #[test]
    fn test_analysis_result_constructors() {
        let ok = AnalysisResult::success("p1", "a1", HashMap::new());
        assert!(ok.success);
        assert!(ok.error.is_none());

        let failed = AnalysisResult::failure("p1", "a1", "boom");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert!(failed.results.is_none());
    }

    #[test]
    fn test_distributor_state_round_trips_through_json() {
        let analyzer = Analyzer::new("a1", "Analyzer A", 0.4, 100);
        let mut analyzers = HashMap::new();
        analyzers.insert("a1".to_string(), analyzer.snapshot());

        let state = DistributorState {
            analyzers,
            pending_packets: vec![LogPacket::new(vec![LogMessage::new(
                "info", "msg", "app", None,
            )])],
            last_checkpoint: Utc::now(),
            total_processed: 42,
        };

        let json = serde_json::to_string(&state).unwrap();
        let recovered: DistributorState = serde_json::from_str(&json).unwrap();
        assert_eq!(recovered, state);
    }

    #[test]
    fn test_dead_letter_entry_serializes_expected_fields() {
        let entry = DeadLetterEntry {
            packet: LogPacket::new(vec![LogMessage::new("error", "x", "app", None)]),
            final_error: "simulated processing error".to_string(),
            failed_at: Utc::now(),
        };
        let value: serde_json::Value = serde_json::to_value(&entry).unwrap();
        assert!(value.get("packet").is_some());
        assert_eq!(
            value.get("final_error").and_then(|v| v.as_str()),
            Some("simulated processing error")
        );
        assert!(value.get("failed_at").is_some());
    }
}
