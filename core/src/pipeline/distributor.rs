use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};

use crate::ensemble::Ensemble;
use crate::prelude::{PipelineError, PipelineResult, Projection};
use crate::telemetry::{LogManager, MetricsRecorder, PipelineMetrics};

pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

const THREAD_NAME: &str = "ensemble-distributor";

#[derive(Default)]
struct QueueState {
    entries: VecDeque<Arc<Ensemble>>,
    /// Set by the first submit into an empty queue, cleared once drained.
    signaled: bool,
    draining: bool,
    overflowing: bool,
}

struct Shared {
    capacity: usize,
    queue: Mutex<QueueState>,
    wake: Condvar,
    idle: Condvar,
    projections: RwLock<Vec<Arc<dyn Projection>>>,
    alive: AtomicBool,
    metrics: MetricsRecorder,
    log: LogManager,
}

impl Shared {
    fn run(&self) {
        self.log.record("consumer started");
        loop {
            let batch = {
                let mut queue = self.queue.lock();
                while !queue.signaled && self.alive.load(Ordering::Acquire) {
                    self.wake.wait(&mut queue);
                }
                if !self.alive.load(Ordering::Acquire) {
                    break;
                }
                queue.draining = true;
                std::mem::take(&mut queue.entries)
            };

            let projections = self.projections.read().clone();
            for ensemble in batch {
                self.dispatch(&projections, &ensemble);
            }

            let mut queue = self.queue.lock();
            queue.draining = false;
            if queue.entries.is_empty() {
                queue.signaled = false;
                queue.overflowing = false;
            }
            self.idle.notify_all();
        }

        let mut queue = self.queue.lock();
        queue.draining = false;
        self.idle.notify_all();
        drop(queue);
        self.log.record("consumer stopped");
    }

    fn dispatch(&self, projections: &[Arc<dyn Projection>], ensemble: &Arc<Ensemble>) {
        if ensemble.ensemble.is_none() {
            self.metrics.record_screened();
            self.log.detail("screened record without ensemble data-set");
            return;
        }

        for projection in projections {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| projection.set_ens(ensemble)));
            if outcome.is_err() {
                self.metrics.record_failure();
                self.log.error(&format!(
                    "projection {} failed on ensemble {}",
                    projection.name(),
                    ensemble.number().unwrap_or_default()
                ));
            }
        }
        self.metrics.record_delivered();
    }
}

/// Bounded drop-oldest queue drained by one consumer thread that fans every
/// ensemble out to the registered projections in registration order.
pub struct EnsembleDistributor {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EnsembleDistributor {
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                capacity: capacity.max(1),
                queue: Mutex::new(QueueState::default()),
                wake: Condvar::new(),
                idle: Condvar::new(),
                projections: RwLock::new(Vec::new()),
                alive: AtomicBool::new(false),
                metrics: MetricsRecorder::new(),
                log: LogManager::new("distributor"),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn register(&self, projection: Arc<dyn Projection>) {
        self.shared
            .log
            .detail(&format!("registered projection {}", projection.name()));
        self.shared.projections.write().push(projection);
    }

    pub fn projection_names(&self) -> Vec<&'static str> {
        self.shared
            .projections
            .read()
            .iter()
            .map(|projection| projection.name())
            .collect()
    }

    /// Enqueues without blocking; evicts the oldest entry when full.
    pub fn submit(&self, ensemble: impl Into<Arc<Ensemble>>) {
        let ensemble = ensemble.into();
        let shared = &self.shared;
        shared.metrics.record_submitted();

        let mut queue = shared.queue.lock();
        if queue.entries.len() >= shared.capacity {
            queue.entries.pop_front();
            shared.metrics.record_dropped();
            if !queue.overflowing {
                queue.overflowing = true;
                shared.log.warn(&format!(
                    "queue full at {} ensembles, dropping oldest",
                    shared.capacity
                ));
            }
        }
        queue.entries.push_back(ensemble);
        if !queue.signaled {
            queue.signaled = true;
            shared.wake.notify_one();
        }
    }

    pub fn queued(&self) -> usize {
        self.shared.queue.lock().entries.len()
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    pub fn start(&self) -> PipelineResult<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(PipelineError::AlreadyRunning(THREAD_NAME));
        }

        self.shared.alive.store(true, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || shared.run())
            .map_err(|source| {
                self.shared.alive.store(false, Ordering::Release);
                PipelineError::Spawn {
                    name: THREAD_NAME,
                    source,
                }
            })?;
        *worker = Some(handle);
        Ok(())
    }

    /// Stops the consumer after its current drain and joins it.
    pub fn shutdown(&self) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };
        self.shared.alive.store(false, Ordering::Release);
        {
            let _queue = self.shared.queue.lock();
            self.shared.wake.notify_all();
        }
        if handle.join().is_err() {
            self.shared.log.error("consumer thread panicked");
        }
    }

    /// Discards queued ensembles, waits out a drain in progress, then resets
    /// every projection. The queue stays locked until the reset completes so
    /// no earlier ensemble reaches a projection afterwards.
    pub fn reset_all(&self) {
        let shared = &self.shared;
        let mut queue = shared.queue.lock();
        let discarded = queue.entries.len();
        queue.entries.clear();
        queue.signaled = false;
        queue.overflowing = false;
        while queue.draining {
            shared.idle.wait(&mut queue);
        }

        for projection in shared.projections.read().iter() {
            projection.reset();
        }
        drop(queue);
        if discarded > 0 {
            shared
                .log
                .detail(&format!("discarded {} queued ensemble(s)", discarded));
        }
        shared.log.detail("reset all projections");
    }

    /// Waits until the queue is empty and no drain is in flight.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut queue = self.shared.queue.lock();
        while !queue.entries.is_empty() || queue.draining {
            if self
                .shared
                .idle
                .wait_until(&mut queue, deadline)
                .timed_out()
            {
                return queue.entries.is_empty() && !queue.draining;
            }
        }
        true
    }

    pub fn metrics(&self) -> PipelineMetrics {
        self.shared.metrics.snapshot()
    }
}

impl Default for EnsembleDistributor {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl Drop for EnsembleDistributor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::fixtures::bare_ensemble;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<u32>>,
    }

    impl Projection for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn set_ens(&self, ensemble: &Arc<Ensemble>) {
            self.seen.lock().push(ensemble.number().unwrap_or_default());
        }

        fn reset(&self) {
            self.seen.lock().clear();
        }
    }

    struct Faulty;

    impl Projection for Faulty {
        fn name(&self) -> &'static str {
            "faulty"
        }

        fn set_ens(&self, _ensemble: &Arc<Ensemble>) {
            panic!("faulty projection");
        }

        fn reset(&self) {}
    }

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn overflow_keeps_most_recent_in_order() {
        let distributor = EnsembleDistributor::new(DEFAULT_QUEUE_CAPACITY);
        let recorder = Arc::new(Recorder::default());
        distributor.register(recorder.clone());

        for n in 0..1500 {
            distributor.submit(bare_ensemble(n, 1));
        }
        assert_eq!(distributor.queued(), 1000);

        distributor.start().unwrap();
        assert!(distributor.wait_idle(WAIT));

        let seen = recorder.seen.lock().clone();
        assert_eq!(seen, (500..1500).collect::<Vec<u32>>());
        let metrics = distributor.metrics();
        assert_eq!(metrics.submitted, 1500);
        assert_eq!(metrics.dropped, 500);
        assert_eq!(metrics.delivered, 1000);
        distributor.shutdown();
    }

    #[test]
    fn failing_projection_does_not_block_others() {
        let distributor = EnsembleDistributor::default();
        let before = Arc::new(Recorder::default());
        let after = Arc::new(Recorder::default());
        distributor.register(before.clone());
        distributor.register(Arc::new(Faulty));
        distributor.register(after.clone());
        distributor.start().unwrap();

        distributor.submit(bare_ensemble(7, 1));
        distributor.submit(bare_ensemble(8, 1));
        assert!(distributor.wait_idle(WAIT));

        assert_eq!(*before.seen.lock(), vec![7, 8]);
        assert_eq!(*after.seen.lock(), vec![7, 8]);
        assert_eq!(distributor.metrics().projection_failures, 2);
    }

    #[test]
    fn records_without_ensemble_data_are_screened() {
        let distributor = EnsembleDistributor::default();
        let recorder = Arc::new(Recorder::default());
        distributor.register(recorder.clone());
        distributor.start().unwrap();

        distributor.submit(Ensemble::default());
        distributor.submit(bare_ensemble(3, 1));
        assert!(distributor.wait_idle(WAIT));

        assert_eq!(*recorder.seen.lock(), vec![3]);
        assert_eq!(distributor.metrics().screened, 1);
    }

    #[test]
    fn reset_all_and_lifecycle() {
        let distributor = EnsembleDistributor::default();
        let recorder = Arc::new(Recorder::default());
        distributor.register(recorder.clone());
        assert_eq!(distributor.projection_names(), vec!["recorder"]);

        distributor.start().unwrap();
        assert!(matches!(
            distributor.start(),
            Err(PipelineError::AlreadyRunning(_))
        ));
        distributor.submit(bare_ensemble(1, 1));
        assert!(distributor.wait_idle(WAIT));

        distributor.reset_all();
        assert!(recorder.seen.lock().is_empty());

        distributor.shutdown();
        assert!(!distributor.is_running());
        distributor.shutdown();
    }

    /// Holds the consumer inside `set_ens` until released.
    struct Gate {
        entered: Mutex<bool>,
        open: Mutex<bool>,
        changed: Condvar,
    }

    impl Projection for Gate {
        fn name(&self) -> &'static str {
            "gate"
        }

        fn set_ens(&self, _ensemble: &Arc<Ensemble>) {
            *self.entered.lock() = true;
            let mut open = self.open.lock();
            while !*open {
                self.changed.wait(&mut open);
            }
        }

        fn reset(&self) {}
    }

    #[test]
    fn reset_all_discards_queued_ensembles() {
        let distributor = EnsembleDistributor::default();
        let recorder = Arc::new(Recorder::default());
        distributor.register(recorder.clone());
        for n in 100..105 {
            distributor.submit(bare_ensemble(n, 1));
        }

        distributor.reset_all();
        assert_eq!(distributor.queued(), 0);

        distributor.start().unwrap();
        distributor.submit(bare_ensemble(1, 1));
        assert!(distributor.wait_idle(WAIT));
        assert_eq!(*recorder.seen.lock(), vec![1]);
    }

    #[test]
    fn reset_all_waits_for_drain_in_progress() {
        let distributor = Arc::new(EnsembleDistributor::default());
        let gate = Arc::new(Gate {
            entered: Mutex::new(false),
            open: Mutex::new(false),
            changed: Condvar::new(),
        });
        let recorder = Arc::new(Recorder::default());
        distributor.register(gate.clone());
        distributor.register(recorder.clone());
        distributor.start().unwrap();

        distributor.submit(bare_ensemble(1, 1));
        let deadline = Instant::now() + WAIT;
        while !*gate.entered.lock() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(*gate.entered.lock());

        let resetter = Arc::clone(&distributor);
        let reset = thread::spawn(move || resetter.reset_all());
        thread::sleep(Duration::from_millis(20));
        *gate.open.lock() = true;
        gate.changed.notify_all();
        reset.join().unwrap();

        // Ensemble 1 finished its drain before the reset ran.
        assert!(recorder.seen.lock().is_empty());
        assert!(distributor.wait_idle(WAIT));
    }

    #[test]
    fn wait_idle_times_out_without_consumer() {
        let distributor = EnsembleDistributor::default();
        distributor.submit(bare_ensemble(1, 1));
        assert!(!distributor.wait_idle(Duration::from_millis(20)));
    }
}
