#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Dual-priority, budget-bounded expansion scheduler.
//!
//! The scheduler owns an urgent FIFO queue, a key-ordered normal queue and at
//! most one active [`CopyTask`]. An external cycle source calls
//! [`ExpansionScheduler::step`] at a fixed rate; each step performs at most
//! `max_units_per_cycle` units of copy work. Requests may arrive from other
//! threads at any time.
//!
//! The scheduler never holds its own lock while calling into the registry,
//! the donor selector or the stores. Capacity is reserved under the lock
//! before the registry is consulted, and the active task is checked out of
//! the shared state for the duration of its advance.

use std::{
    collections::{BTreeMap, HashSet, VecDeque},
    fmt,
    sync::Arc,
};

use parking_lot::Mutex;
use patchworld_core::{
    CellCoord, CellStatus, ConfigurationError, CycleHandle, Priority, RegionCopier,
};
use patchworld_system_copy_task::{CopyService, CopyTask};
use patchworld_system_donor::DonorSelector;
use patchworld_system_registry::CellRegistry;
use tracing::{debug, error, info, warn};

/// Budget and capacity limits of the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    max_units_per_cycle: usize,
    max_queued: usize,
}

impl Config {
    /// Creates a configuration, rejecting zero budgets and capacities.
    pub const fn new(
        max_units_per_cycle: usize,
        max_queued: usize,
    ) -> Result<Self, ConfigurationError> {
        if max_units_per_cycle == 0 {
            return Err(ConfigurationError::ZeroBudget);
        }
        if max_queued == 0 {
            return Err(ConfigurationError::ZeroQueueCapacity);
        }
        Ok(Self {
            max_units_per_cycle,
            max_queued,
        })
    }

    /// Units of copy work performed per cycle at most.
    #[must_use]
    pub const fn max_units_per_cycle(&self) -> usize {
        self.max_units_per_cycle
    }

    /// Combined capacity of the urgent and normal queues.
    #[must_use]
    pub const fn max_queued(&self) -> usize {
        self.max_queued
    }
}

/// What a single call to [`ExpansionScheduler::step`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// Nothing was queued and no task was active.
    Idle,
    /// The active task copied `units` and still has work left.
    Progressed {
        /// Cell being generated.
        cell: CellCoord,
        /// Units copied during this cycle.
        units: usize,
    },
    /// The active task finished and its cell was recorded as done.
    Completed {
        /// Cell that was generated.
        cell: CellCoord,
        /// Units copied during this cycle.
        units: usize,
    },
    /// A popped request could not start generating and was discarded.
    Dropped {
        /// Cell whose request was discarded.
        cell: CellCoord,
    },
    /// The active task faulted and its cell was reset.
    Failed {
        /// Cell that was reset.
        cell: CellCoord,
    },
    /// The scheduler was shut down.
    Stopped,
}

#[derive(Clone, Copy, Debug)]
struct Request {
    target: CellCoord,
    donor: CellCoord,
}

enum Work {
    Resume(CopyTask),
    Start(Request),
}

#[derive(Default)]
struct SchedulerState {
    urgent: VecDeque<Request>,
    normal: BTreeMap<(i32, u64), Request>,
    reserved: usize,
    next_sequence: u64,
    active: Option<CopyTask>,
    in_flight: Option<CellCoord>,
    stopped: bool,
    epoch: u64,
    cycle: Option<Box<dyn CycleHandle>>,
}

impl SchedulerState {
    fn queued(&self) -> usize {
        self.urgent.len() + self.normal.len()
    }

    fn pop_next(&mut self) -> Option<Request> {
        self.urgent
            .pop_front()
            .or_else(|| self.normal.pop_first().map(|(_, request)| request))
    }
}

/// Drives cell generation one bounded cycle at a time.
pub struct ExpansionScheduler {
    registry: Arc<CellRegistry>,
    selector: Arc<DonorSelector>,
    service: CopyService,
    accelerator: Option<Arc<dyn RegionCopier>>,
    config: Config,
    state: Mutex<SchedulerState>,
}

impl fmt::Debug for ExpansionScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpansionScheduler")
            .field("config", &self.config)
            .field("queue_depth", &self.queue_depth())
            .field("accelerated", &self.accelerator.is_some())
            .finish_non_exhaustive()
    }
}

impl ExpansionScheduler {
    /// Creates a scheduler that is ready to step.
    #[must_use]
    pub fn new(
        registry: Arc<CellRegistry>,
        selector: Arc<DonorSelector>,
        service: CopyService,
        accelerator: Option<Arc<dyn RegionCopier>>,
        config: Config,
    ) -> Self {
        Self {
            registry,
            selector,
            service,
            accelerator,
            config,
            state: Mutex::new(SchedulerState::default()),
        }
    }

    /// Limits the scheduler was created with.
    #[must_use]
    pub fn config(&self) -> Config {
        self.config
    }

    /// Admits `cell` with a uniformly chosen donor.
    ///
    /// Returns `false` when the queues are full or the cell is already
    /// tracked or done.
    pub fn request(&self, cell: CellCoord, priority: Priority) -> bool {
        self.admit(cell, priority, || self.selector.pick_uniform())
    }

    /// Admits `cell` with a donor biased towards dry land.
    pub fn request_prefer_land(
        &self,
        cell: CellCoord,
        priority: Priority,
        max_attempts: u32,
    ) -> bool {
        self.admit(cell, priority, || {
            self.selector
                .pick_prefer_land(self.service.source().as_ref(), max_attempts)
        })
    }

    /// Admits every cell within `radius` rings of `center`, nearest first.
    ///
    /// Cells are visited by ring distance, then Manhattan distance, so a
    /// capacity ceiling truncates the outermost cells. Rings are generated
    /// lazily and the walk stops as soon as the queues are full or a ring
    /// holds no addressable cell. With a normal priority each cell's key is
    /// the base key plus its Manhattan offset. Returns the number of cells
    /// admitted.
    pub fn request_around(&self, center: CellCoord, radius: i32, priority: Priority) -> usize {
        let size = self.service.size();
        let mut admitted = 0;
        for ring in 0..=radius.max(0) {
            let mut addressable = false;
            for other in 0..=ring {
                for (dx, dz) in ring_offsets(ring, other) {
                    let Some(cell) = center.offset(dx, dz) else {
                        continue;
                    };
                    if cell.footprint(size).is_err() {
                        continue;
                    }
                    addressable = true;
                    if self.is_full() {
                        debug!(%center, radius, admitted, "queue full; stopping ring walk");
                        return admitted;
                    }
                    let priority = match priority {
                        Priority::Urgent => Priority::Urgent,
                        Priority::Normal(base) => {
                            Priority::Normal(base.saturating_add(ring.saturating_add(other)))
                        }
                    };
                    if self.request(cell, priority) {
                        admitted += 1;
                    }
                }
            }
            if !addressable {
                break;
            }
        }
        admitted
    }

    /// Queued requests plus the active task, if any.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        let state = self.state.lock();
        let active = state.active.is_some() || state.in_flight.is_some();
        state.queued() + usize::from(active)
    }

    /// Current status of `cell`.
    #[must_use]
    pub fn status_of(&self, cell: CellCoord) -> CellStatus {
        self.registry.status_of(cell)
    }

    /// Number of completed cells.
    #[must_use]
    pub fn count_done(&self) -> usize {
        self.registry.count_done()
    }

    /// Snapshot of every tracked cell whose status is one of `statuses`.
    #[must_use]
    pub fn cells_with_status(&self, statuses: &[CellStatus]) -> HashSet<CellCoord> {
        self.registry.cells_with_status(statuses)
    }

    /// Attaches the cycle source and resumes stepping after a shutdown.
    pub fn start(&self, handle: Box<dyn CycleHandle>) {
        let previous = {
            let mut state = self.state.lock();
            state.stopped = false;
            state.cycle.replace(handle)
        };
        if let Some(mut previous) = previous {
            previous.cancel();
        }
        info!("expansion scheduler started");
    }

    /// Cancels the cycle source and releases every queued and active cell.
    ///
    /// Released cells return to [`CellStatus::NotStarted`] so a later start
    /// can request them again.
    pub fn shutdown(&self) {
        let (handle, released) = {
            let mut state = self.state.lock();
            state.stopped = true;
            state.epoch += 1;

            let mut released: Vec<CellCoord> = state.urgent.drain(..).map(|r| r.target).collect();
            released.extend(std::mem::take(&mut state.normal).into_values().map(|r| r.target));
            released.extend(state.active.take().map(|task| task.target()));
            released.extend(state.in_flight.take());
            (state.cycle.take(), released)
        };

        if let Some(mut handle) = handle {
            handle.cancel();
        }
        for cell in &released {
            self.registry.reset_to_not_started(*cell);
        }
        info!(released = released.len(), "expansion scheduler shut down");
    }

    /// Runs one cycle: starts the next request if idle, then advances the
    /// active task by the per-cycle budget.
    pub fn step(&self) -> StepOutcome {
        let (work, epoch) = {
            let mut state = self.state.lock();
            if state.stopped {
                return StepOutcome::Stopped;
            }
            if state.in_flight.is_some() {
                return StepOutcome::Idle;
            }
            let work = match state.active.take() {
                Some(task) => Work::Resume(task),
                None => match state.pop_next() {
                    Some(request) => Work::Start(request),
                    None => return StepOutcome::Idle,
                },
            };
            state.in_flight = Some(match &work {
                Work::Resume(task) => task.target(),
                Work::Start(request) => request.target,
            });
            (work, state.epoch)
        };

        let mut task = match work {
            Work::Resume(task) => task,
            Work::Start(request) => match self.registry.try_start_generating(request.target) {
                Ok(()) => {
                    debug!(cell = %request.target, donor = %request.donor, "generation started");
                    CopyTask::new(
                        request.target,
                        request.donor,
                        self.service.clone(),
                        self.accelerator.clone(),
                    )
                }
                Err(conflict) => {
                    warn!(%conflict, "dropping request that cannot start");
                    self.registry.reset_to_not_started(request.target);
                    let _ = self.finish(epoch, None);
                    return StepOutcome::Dropped {
                        cell: request.target,
                    };
                }
            },
        };

        let cell = task.target();
        match task.advance(self.config.max_units_per_cycle) {
            Ok(units) if task.is_complete() => {
                if !self.finish(epoch, None) {
                    self.registry.reset_to_not_started(cell);
                    return StepOutcome::Stopped;
                }
                self.registry.mark_done(cell);
                info!(%cell, donor = %task.donor(), "cell generated");
                StepOutcome::Completed { cell, units }
            }
            Ok(units) => {
                if !self.finish(epoch, Some(task)) {
                    self.registry.reset_to_not_started(cell);
                    return StepOutcome::Stopped;
                }
                StepOutcome::Progressed { cell, units }
            }
            Err(fault) => {
                error!(%cell, %fault, "cell generation failed; resetting cell");
                let _ = self.finish(epoch, None);
                self.registry.reset_to_not_started(cell);
                StepOutcome::Failed { cell }
            }
        }
    }

    /// Returns the checked-out task to the shared state.
    ///
    /// Returns `false` when a shutdown happened while the task was out, in
    /// which case the task is discarded.
    fn finish(&self, epoch: u64, task: Option<CopyTask>) -> bool {
        let mut state = self.state.lock();
        if state.epoch != epoch {
            return false;
        }
        state.in_flight = None;
        state.active = task;
        true
    }

    fn is_full(&self) -> bool {
        let state = self.state.lock();
        state.queued() + state.reserved >= self.config.max_queued
    }

    fn admit(
        &self,
        cell: CellCoord,
        priority: Priority,
        pick_donor: impl FnOnce() -> CellCoord,
    ) -> bool {
        if let Err(error) = cell.footprint(self.service.size()) {
            debug!(%cell, %error, "cell outside world coordinates; request rejected");
            return false;
        }

        let epoch = {
            let mut state = self.state.lock();
            if state.queued() + state.reserved >= self.config.max_queued {
                debug!(%cell, capacity = self.config.max_queued, "queue full; request rejected");
                return false;
            }
            state.reserved += 1;
            state.epoch
        };

        if !self.registry.try_queue(cell) {
            self.state.lock().reserved -= 1;
            debug!(%cell, "cell already tracked; request rejected");
            return false;
        }

        let donor = pick_donor();
        let request = Request {
            target: cell,
            donor,
        };

        let admitted = {
            let mut state = self.state.lock();
            state.reserved -= 1;
            if state.epoch == epoch {
                let sequence = state.next_sequence;
                state.next_sequence += 1;
                match priority {
                    Priority::Urgent => state.urgent.push_back(request),
                    Priority::Normal(key) => {
                        let _ = state.normal.insert((key, sequence), request);
                    }
                }
                true
            } else {
                false
            }
        };

        if admitted {
            debug!(%cell, %donor, ?priority, "cell queued");
        } else {
            self.registry.reset_to_not_started(cell);
            debug!(%cell, "scheduler shut down during admission; request released");
        }
        admitted
    }
}

/// Offsets on ring `ring` whose shorter axis spans `other` cells.
///
/// Every offset returned lies at Manhattan distance `ring + other`; walking
/// `other` upwards from zero visits the whole ring nearest first.
fn ring_offsets(ring: i32, other: i32) -> Vec<(i32, i32)> {
    if ring == 0 {
        return vec![(0, 0)];
    }
    if other == 0 {
        return vec![(ring, 0), (-ring, 0), (0, ring), (0, -ring)];
    }
    if other == ring {
        return vec![(ring, ring), (ring, -ring), (-ring, ring), (-ring, -ring)];
    }
    vec![
        (ring, other),
        (ring, -other),
        (-ring, other),
        (-ring, -other),
        (other, ring),
        (-other, ring),
        (other, -ring),
        (-other, -ring),
    ]
}
