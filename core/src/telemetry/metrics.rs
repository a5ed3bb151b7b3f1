use parking_lot::Mutex;
use serde::Serialize;

pub struct MetricsRecorder {
    inner: Mutex<PipelineMetrics>,
}

/// Counters kept by the distributor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineMetrics {
    pub submitted: u64,
    pub dropped: u64,
    pub delivered: u64,
    pub screened: u64,
    pub projection_failures: u64,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PipelineMetrics::default()),
        }
    }

    pub fn record_submitted(&self) {
        self.inner.lock().submitted += 1;
    }

    pub fn record_dropped(&self) {
        self.inner.lock().dropped += 1;
    }

    pub fn record_delivered(&self) {
        self.inner.lock().delivered += 1;
    }

    pub fn record_screened(&self) {
        self.inner.lock().screened += 1;
    }

    pub fn record_failure(&self) {
        self.inner.lock().projection_failures += 1;
    }

    pub fn snapshot(&self) -> PipelineMetrics {
        *self.inner.lock()
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}
