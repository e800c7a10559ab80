//! Cooperative interruption: an externally settable flag and a watchdog clock.
//!
//! Neither is pre-emptive. The interpreter polls both at loop back-edges and
//! function entry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Clonable handle that asks a running script to stop.
///
/// The handle does not need the engine lock, so another thread can use it
/// while a script holds the lock.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle {
    flag: Arc<AtomicBool>,
}

impl InterruptHandle {
    /// Create a handle with the flag cleared
    pub fn new() -> Self {
        Self::default()
    }

    /// Request interruption at the next check
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether interruption has been requested
    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clear a pending request, returning whether one was set
    pub(crate) fn take(&self) -> bool {
        self.flag.swap(false, Ordering::SeqCst)
    }
}

/// Time limit for one top-level invocation.
#[derive(Debug)]
pub(crate) struct Watchdog {
    limit: Option<Duration>,
    started: Option<Instant>,
    ticks: u32,
    ticks_per_check: u32,
}

impl Watchdog {
    pub(crate) fn new(limit: Option<Duration>, ticks_per_check: u32) -> Self {
        Self {
            limit,
            started: None,
            ticks: 0,
            ticks_per_check: ticks_per_check.max(1),
        }
    }

    pub(crate) fn set_limit(&mut self, limit: Option<Duration>) {
        self.limit = limit;
    }

    /// Start timing a top-level invocation
    pub(crate) fn arm(&mut self) {
        self.started = Some(Instant::now());
        self.ticks = 0;
    }

    pub(crate) fn disarm(&mut self) {
        self.started = None;
    }

    /// Count a check; reads the clock every `ticks_per_check` calls.
    pub(crate) fn tick(&mut self) -> bool {
        let (Some(limit), Some(started)) = (self.limit, self.started) else {
            return false;
        };
        self.ticks += 1;
        if self.ticks < self.ticks_per_check {
            return false;
        }
        self.ticks = 0;
        started.elapsed() >= limit
    }
}
