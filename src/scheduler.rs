//! The scheduler (C8): fires the cache's periodic `nearest:*` auto-renewal
//! sweep at a fixed interval, on a dedicated background thread that exits
//! cleanly on a shutdown signal.
//!
//! The interval wait is abstracted behind [`Ticker`] so tests can drive
//! cycles deterministically instead of sleeping real wall-clock time.

use crate::cache::TieredCache;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{trace, warn};

/// A source of "it's time to do the periodic work" signals.
pub trait Ticker: Send {
    /// Block until the next tick or until `shutdown` is observed, per
    /// the worker's own poll cadence. Returns `false` once no further
    /// ticks will ever arrive (shutdown requested).
    fn wait_for_tick(&mut self, shutdown: &AtomicBool) -> bool;
}

/// Production ticker: wakes every `interval`, checking the shutdown flag
/// at a finer grain so shutdown latency is bounded even on a long interval.
pub struct IntervalTicker {
    interval: Duration,
    poll: Duration,
}

impl IntervalTicker {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            poll: Duration::from_millis(100).min(interval),
        }
    }
}

impl Ticker for IntervalTicker {
    fn wait_for_tick(&mut self, shutdown: &AtomicBool) -> bool {
        let mut waited = Duration::ZERO;
        while waited < self.interval {
            if shutdown.load(Ordering::Relaxed) {
                return false;
            }
            let remaining = self.interval - waited;
            let step = self.poll.min(remaining);
            std::thread::sleep(step);
            waited += step;
        }
        !shutdown.load(Ordering::Relaxed)
    }
}

/// Test-only ticker, fired explicitly by a test through a channel instead
/// of by wall-clock time.
pub struct ManualTicker {
    receiver: mpsc::Receiver<()>,
}

pub struct ManualTickerHandle {
    sender: mpsc::Sender<()>,
}

impl ManualTickerHandle {
    pub fn fire(&self) {
        let _ = self.sender.send(());
    }
}

impl ManualTicker {
    pub fn new() -> (Self, ManualTickerHandle) {
        let (sender, receiver) = mpsc::channel();
        (Self { receiver }, ManualTickerHandle { sender })
    }
}

impl Ticker for ManualTicker {
    fn wait_for_tick(&mut self, shutdown: &AtomicBool) -> bool {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                return false;
            }
            match self.receiver.recv_timeout(Duration::from_millis(50)) {
                Ok(()) => return !shutdown.load(Ordering::Relaxed),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
    }
}

/// Handle to a running background worker; dropping it does not stop the
/// worker — call [`Scheduler::shutdown`] explicitly, mirroring a
/// long-lived service's own lifecycle rather than a scope guard's.
pub struct Scheduler {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn the auto-renewal worker. The default production interval is
    /// 15 minutes (`cache.autoRenewalSec` = 900), supplied by the caller
    /// via the ticker rather than hardcoded here.
    pub fn spawn(mut ticker: impl Ticker + 'static, cache: Arc<TieredCache>) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let worker_shutdown = shutdown.clone();

        let handle = std::thread::spawn(move || {
            while ticker.wait_for_tick(&worker_shutdown) {
                let evicted = cache.auto_renew();
                trace!(evicted, "auto-renewal cycle completed");
                if evicted == 0 {
                    continue;
                }
                trace!(evicted, "nearest:* namespace cleared");
            }
        });

        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Signal the worker to stop and block until it exits.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("scheduler worker thread panicked");
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}
