//! Periodic drivers for run mode.
//!
//! The controller never owns a timer. A driver calls
//! [`SimulationController::tick`] until it reports that the run is over;
//! another thread can end a run early through a [`StopHandle`].
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::sim::controller::SimulationController;

/// Cross-thread stop request, observed by the controller at the next tick.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    requested: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.requested.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Consumes a pending request.
    pub fn take(&self) -> bool {
        self.requested.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn reset(&self) {
        self.requested.store(false, Ordering::Release);
    }
}

pub trait RunDriver {
    /// Ticks `controller` until the run ends. Returns the number of ticks
    /// that advanced the simulation.
    fn drive(&mut self, controller: &mut SimulationController) -> u64;
}

/// Fixed wall-clock cadence. A tick that overruns the cadence is followed
/// immediately by the next one; missed ticks are not replayed.
#[derive(Debug, Clone)]
pub struct IntervalDriver {
    cadence: Duration,
}

impl IntervalDriver {
    pub fn new(cadence: Duration) -> Self {
        Self { cadence }
    }

    pub fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }
}

impl RunDriver for IntervalDriver {
    fn drive(&mut self, controller: &mut SimulationController) -> u64 {
        let mut advanced = 0;
        loop {
            let started = Instant::now();
            if !controller.tick() {
                break;
            }
            advanced += 1;
            if let Some(rest) = self.cadence.checked_sub(started.elapsed()) {
                thread::sleep(rest);
            }
        }
        log::debug!("interval driver stopped after {} ticks", advanced);
        advanced
    }
}
