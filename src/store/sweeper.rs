use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{ProfilerError, Result};

use super::ResultStore;

enum SweepMessage {
    Trigger,
    Shutdown,
}

/// Background thread that evicts expired traces every `interval`.
///
/// Holds only a weak handle to the store; the worker exits once the store is
/// dropped, on [`shutdown`](Self::shutdown), or when the sweeper is dropped.
pub struct Sweeper {
    sender: Sender<SweepMessage>,
    passes: Arc<AtomicU64>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Sweeper {
    /// Starts the worker. Fails for a zero `interval` or if the thread cannot be spawned.
    pub fn spawn(store: &Arc<ResultStore>, interval: Duration, retention: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(ProfilerError::InvalidArgument(
                "sweep interval must be non-zero".into(),
            ));
        }
        let (sender, receiver) = mpsc::channel();
        let passes = Arc::new(AtomicU64::new(0));
        let store = Arc::downgrade(store);
        let worker_passes = Arc::clone(&passes);
        let handle = thread::Builder::new()
            .name("reqprof-sweeper".into())
            .spawn(move || Self::sweep_loop(store, receiver, interval, retention, worker_passes))?;
        info!(
            interval_secs = interval.as_secs(),
            retention_secs = retention.as_secs(),
            "store.sweeper.started"
        );
        Ok(Self {
            sender,
            passes,
            handle: Some(handle),
        })
    }

    /// Requests an immediate sweep pass.
    pub fn trigger(&self) -> Result<()> {
        self.sender
            .send(SweepMessage::Trigger)
            .map_err(|_| ProfilerError::Worker("sweeper channel closed".into()))
    }

    /// Number of completed sweep passes.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Acquire)
    }

    /// Stops the worker and waits for it to exit.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        // The worker may already be gone if the store was dropped.
        let _ = self.sender.send(SweepMessage::Shutdown);
        handle
            .join()
            .map_err(|_| ProfilerError::Worker("sweeper thread panicked".into()))
    }

    fn sweep_loop(
        store: Weak<ResultStore>,
        receiver: Receiver<SweepMessage>,
        interval: Duration,
        retention: Duration,
        passes: Arc<AtomicU64>,
    ) {
        loop {
            match receiver.recv_timeout(interval) {
                Ok(SweepMessage::Trigger) | Err(RecvTimeoutError::Timeout) => {
                    let Some(store) = store.upgrade() else {
                        debug!("store.sweeper.store_dropped");
                        break;
                    };
                    store.sweep_expired(retention);
                    passes.fetch_add(1, Ordering::Release);
                }
                Ok(SweepMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("store.sweeper.exit");
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::Trace;
    use std::time::Instant;

    fn wait_for_passes(sweeper: &Sweeper, target: u64) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while sweeper.passes() < target {
            assert!(Instant::now() < deadline, "sweeper never ran");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn trigger_runs_a_pass() {
        let store = Arc::new(ResultStore::new());
        store.put(Trace::create("/", "GET /", "localhost"));
        let sweeper = Sweeper::spawn(&store, Duration::from_secs(3600), Duration::ZERO).unwrap();
        thread::sleep(Duration::from_millis(5));
        sweeper.trigger().unwrap();
        wait_for_passes(&sweeper, 1);
        assert!(store.is_empty());
        sweeper.shutdown().unwrap();
    }

    #[test]
    fn periodic_passes_happen_without_trigger() {
        let store = Arc::new(ResultStore::new());
        let sweeper =
            Sweeper::spawn(&store, Duration::from_millis(10), Duration::from_secs(60)).unwrap();
        wait_for_passes(&sweeper, 2);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let store = Arc::new(ResultStore::new());
        assert!(Sweeper::spawn(&store, Duration::ZERO, Duration::ZERO).is_err());
    }

    #[test]
    fn dropped_store_stops_worker() {
        let store = Arc::new(ResultStore::new());
        let sweeper =
            Sweeper::spawn(&store, Duration::from_millis(5), Duration::from_secs(60)).unwrap();
        drop(store);
        sweeper.shutdown().unwrap();
    }
}
