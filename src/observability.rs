//! Observability: counters for the processing pipeline

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::info;

/// Shared counter map, cheap to clone
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<RwLock<MetricsInner>>,
}

struct MetricsInner {
    counters: HashMap<String, u64>,
    start_time: Instant,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(MetricsInner {
                counters: HashMap::new(),
                start_time: Instant::now(),
            })),
        }
    }

    /// Increment a counter
    pub async fn increment(&self, name: &str, value: u64) {
        let mut inner = self.inner.write().await;
        let counter = inner.counters.entry(name.to_string()).or_insert(0);
        *counter += value;
    }

    pub async fn get_counter(&self, name: &str) -> u64 {
        let inner = self.inner.read().await;
        inner.counters.get(name).copied().unwrap_or(0)
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.read().await;
        MetricsSnapshot {
            counters: inner.counters.clone(),
            uptime_secs: inner.start_time.elapsed().as_secs(),
        }
    }

    /// Log every known counter, zeros included
    pub async fn print_stats(&self) {
        let snapshot = self.snapshot().await;
        info!("=== Vision agent stats ({}s uptime) ===", snapshot.uptime_secs);
        for name in metrics::ALL {
            info!(
                "  {}: {}",
                name,
                snapshot.counters.get(*name).copied().unwrap_or(0)
            );
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub counters: HashMap<String, u64>,
    pub uptime_secs: u64,
}

/// Predefined metric names
pub mod metrics {
    // Pipeline
    pub const FRAMES_PROCESSED: &str = "frames_processed_total";
    pub const CLASSIFIER_FAILURES: &str = "classifier_failures_total";

    // Signals
    pub const SIGNALS_GENERATED: &str = "signals_generated_total";
    pub const SIGNALS_SENT: &str = "signals_sent_total";
    pub const SIGNALS_EXECUTED: &str = "signals_executed_total";
    pub const SIGNALS_SUPPRESSED: &str = "signals_suppressed_total";
    pub const DISPATCH_FAILURES: &str = "dispatch_failures_total";

    // Sessions
    pub const SESSIONS_COMPLETED: &str = "sessions_completed_total";
    pub const SESSIONS_FAILED: &str = "sessions_failed_total";

    pub const ALL: &[&str] = &[
        FRAMES_PROCESSED,
        CLASSIFIER_FAILURES,
        SIGNALS_GENERATED,
        SIGNALS_SENT,
        SIGNALS_EXECUTED,
        SIGNALS_SUPPRESSED,
        DISPATCH_FAILURES,
        SESSIONS_COMPLETED,
        SESSIONS_FAILED,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counters_shared_between_clones() {
        let collector = MetricsCollector::new();
        let clone = collector.clone();

        collector.increment(metrics::SIGNALS_SENT, 1).await;
        clone.increment(metrics::SIGNALS_SENT, 2).await;

        assert_eq!(collector.get_counter(metrics::SIGNALS_SENT).await, 3);
        assert_eq!(collector.get_counter(metrics::SESSIONS_FAILED).await, 0);
    }
}
