use std::collections::HashMap;
use std::sync::Arc;

use logdist_common::Analyzer;
use parking_lot::Mutex;

/// Smooth weighted round-robin selection over the analyzer registry.
///
/// Two weight maps are kept per analyzer: `original`, fixed at
/// construction, and `current`, which drifts as selections are made. On
/// every selection each healthy analyzer's current weight grows by its
/// original weight, the largest current weight wins, and the winner is
/// pushed back down by the total healthy weight. Over long runs each
/// healthy analyzer receives exactly its share of selections without
/// bursting the same analyzer consecutively.
pub struct WeightedLoadBalancer {
    /// Registry entries sorted by id so that argmax ties break
    /// deterministically toward the smallest id.
    analyzers: Vec<Arc<Analyzer>>,
    weights: Mutex<WeightState>,
}

struct WeightState {
    current: HashMap<String, f64>,
    original: HashMap<String, f64>,
}

impl WeightedLoadBalancer {
    pub fn new(analyzers: &HashMap<String, Arc<Analyzer>>) -> Self {
        let mut list: Vec<Arc<Analyzer>> = analyzers.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));

        let original: HashMap<String, f64> =
            list.iter().map(|a| (a.id.clone(), a.weight)).collect();
        let current = original.clone();

        Self {
            analyzers: list,
            weights: Mutex::new(WeightState { current, original }),
        }
    }

    /// Selects one healthy analyzer, or `None` when no healthy analyzer
    /// carries weight. Selection and [`notify_health_change`] are
    /// mutually exclusive.
    ///
    /// [`notify_health_change`]: WeightedLoadBalancer::notify_health_change
    pub fn select(&self) -> Option<Arc<Analyzer>> {
        let mut state = self.weights.lock();
        let state = &mut *state;

        let healthy: Vec<&Arc<Analyzer>> =
            self.analyzers.iter().filter(|a| a.is_healthy()).collect();
        if healthy.is_empty() {
            return None;
        }

        let total_weight: f64 = healthy
            .iter()
            .filter_map(|a| state.original.get(&a.id))
            .sum();
        if total_weight == 0.0 {
            return None;
        }

        for analyzer in &healthy {
            let original = state.original.get(&analyzer.id).copied().unwrap_or(0.0);
            if let Some(current) = state.current.get_mut(&analyzer.id) {
                *current += original;
            }
        }

        let mut selected: Option<&Arc<Analyzer>> = None;
        let mut max_weight = f64::NEG_INFINITY;
        for analyzer in &healthy {
            let current = state.current.get(&analyzer.id).copied().unwrap_or(0.0);
            if current > max_weight {
                max_weight = current;
                selected = Some(*analyzer);
            }
        }

        let selected = selected?;
        if let Some(current) = state.current.get_mut(&selected.id) {
            *current -= total_weight;
        }
        Some(Arc::clone(selected))
    }

    /// Resets the current weight of every healthy analyzer back to its
    /// original weight. Entries for unhealthy analyzers are left alone;
    /// they are never read while unhealthy, and resetting them on
    /// recovery prevents a long-absent analyzer from hoarding the next
    /// selections.
    pub fn notify_health_change(&self) {
        let mut state = self.weights.lock();
        let state = &mut *state;

        for analyzer in &self.analyzers {
            if analyzer.is_healthy() {
                if let Some(original) = state.original.get(&analyzer.id).copied() {
                    state.current.insert(analyzer.id.clone(), original);
                }
            }
        }
    }
}
