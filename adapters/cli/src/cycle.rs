use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use patchworld_core::CycleHandle;
use patchworld_system_scheduler::{ExpansionScheduler, StepOutcome};
use tracing::{debug, warn};

/// Fixed-rate thread stepping the scheduler until cancelled or out of cycles.
pub(crate) struct CycleThread {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CycleThread {
    /// Spawns the cycle thread. `cycles` counts every step taken.
    pub(crate) fn spawn(
        scheduler: Arc<ExpansionScheduler>,
        interval: Duration,
        max_cycles: u64,
        cycles: Arc<AtomicU64>,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let thread = thread::spawn(move || {
            while !thread_stop.load(Ordering::SeqCst) {
                if cycles.load(Ordering::SeqCst) >= max_cycles {
                    debug!(max_cycles, "cycle budget exhausted");
                    break;
                }
                let outcome = scheduler.step();
                let _ = cycles.fetch_add(1, Ordering::SeqCst);
                if outcome == StepOutcome::Stopped {
                    break;
                }
                thread::sleep(interval);
            }
        });
        Self {
            stop,
            thread: Some(thread),
        }
    }
}

impl CycleHandle for CycleThread {
    fn cancel(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("cycle thread panicked");
            }
        }
    }
}
