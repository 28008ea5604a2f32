use std::collections::HashMap;
use std::time::Duration;

use logdist_common::{AnalysisResult, Analyzer, LogPacket};
use rand::Rng;
use serde_json::json;

/// Simulated analyzer work.
///
/// Processing sleeps for the analyzer's configured duration, then
/// succeeds with probability `1 - failure_rate`. Rates of 0.0 and 1.0
/// pin the outcome, which is how tests drive each branch
/// deterministically.
pub struct PacketProcessor {
    failure_rate: f64,
}

impl PacketProcessor {
    pub fn new(failure_rate: f64) -> Self {
        Self { failure_rate }
    }

    /// Runs one dispatch. Safe to call concurrently for distinct
    /// (analyzer, packet) pairs; the counters it bumps are atomic.
    pub async fn process(&self, analyzer: &Analyzer, packet: &LogPacket) -> AnalysisResult {
        tokio::time::sleep(Duration::from_millis(analyzer.processing_time_ms)).await;

        let success = rand::thread_rng().gen::<f64>() >= self.failure_rate;

        if success {
            analyzer.record_processed();
            let mut results = HashMap::new();
            results.insert(
                "processed_messages".to_string(),
                json!(packet.messages.len()),
            );
            results.insert("analyzer_type".to_string(), json!(analyzer.name));
            results.insert(
                "processing_time_ms".to_string(),
                json!(analyzer.processing_time_ms),
            );
            AnalysisResult::success(&packet.id, &analyzer.id, results)
        } else {
            analyzer.record_error();
            AnalysisResult::failure(&packet.id, &analyzer.id, "simulated processing error")
        }
    }
}
