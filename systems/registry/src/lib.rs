#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Cell lifecycle registry.
//!
//! The registry is the single authority answering "what is the status of
//! cell C". Cells move along `NotStarted → Queued → Generating → Done`, and the
//! only admission points, [`CellRegistry::try_queue`] and
//! [`CellRegistry::try_start_generating`], are check-and-set operations under
//! one lock, so no two callers can ever generate the same cell.
//!
//! Completed cells are mirrored from the [`GenerationLedger`] at construction
//! and written through to it on [`CellRegistry::mark_done`]. The ledger call
//! happens after the registry lock is released.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use parking_lot::Mutex;
use patchworld_core::{AdmissionConflict, CellCoord, CellStatus};
use patchworld_ledger::GenerationLedger;

#[derive(Debug, Default)]
struct RegistryState {
    transient: HashMap<CellCoord, CellStatus>,
    done: HashSet<CellCoord>,
}

impl RegistryState {
    fn status_of(&self, cell: CellCoord) -> CellStatus {
        if self.done.contains(&cell) {
            return CellStatus::Done;
        }
        self.transient
            .get(&cell)
            .copied()
            .unwrap_or(CellStatus::NotStarted)
    }
}

/// Mutex-guarded lifecycle state machine over cells.
#[derive(Debug)]
pub struct CellRegistry {
    ledger: Arc<GenerationLedger>,
    state: Mutex<RegistryState>,
}

impl CellRegistry {
    /// Creates a registry whose completed cells are seeded from `ledger`.
    ///
    /// Every other cell starts out [`CellStatus::NotStarted`]; transient states
    /// never survive a restart.
    #[must_use]
    pub fn new(ledger: Arc<GenerationLedger>) -> Self {
        let state = RegistryState {
            transient: HashMap::new(),
            done: ledger.generated_cells(),
        };
        Self {
            ledger,
            state: Mutex::new(state),
        }
    }

    /// Current status of `cell`.
    #[must_use]
    pub fn status_of(&self, cell: CellCoord) -> CellStatus {
        self.state.lock().status_of(cell)
    }

    /// Moves `cell` from `NotStarted` to `Queued`.
    ///
    /// Returns `false` when the cell is already tracked or done.
    pub fn try_queue(&self, cell: CellCoord) -> bool {
        let mut state = self.state.lock();
        if state.status_of(cell) != CellStatus::NotStarted {
            return false;
        }
        let _ = state.transient.insert(cell, CellStatus::Queued);
        true
    }

    /// Moves `cell` from `Queued` to `Generating`.
    pub fn try_start_generating(&self, cell: CellCoord) -> Result<(), AdmissionConflict> {
        let mut state = self.state.lock();
        let found = state.status_of(cell);
        if found != CellStatus::Queued {
            return Err(AdmissionConflict { cell, found });
        }
        let _ = state.transient.insert(cell, CellStatus::Generating);
        Ok(())
    }

    /// Records `cell` as done and writes the completion through to the ledger.
    pub fn mark_done(&self, cell: CellCoord) {
        {
            let mut state = self.state.lock();
            let _ = state.transient.remove(&cell);
            let _ = state.done.insert(cell);
        }
        let _ = self.ledger.mark_generated(cell);
    }

    /// Drops any transient tracking so the cell can be queued again.
    ///
    /// Completed cells are unaffected.
    pub fn reset_to_not_started(&self, cell: CellCoord) {
        let _ = self.state.lock().transient.remove(&cell);
    }

    /// Number of completed cells.
    #[must_use]
    pub fn count_done(&self) -> usize {
        self.state.lock().done.len()
    }

    /// Snapshot of every tracked cell whose status is one of `statuses`.
    ///
    /// Untracked cells are never reported, so asking for
    /// [`CellStatus::NotStarted`] yields an empty set.
    #[must_use]
    pub fn cells_with_status(&self, statuses: &[CellStatus]) -> HashSet<CellCoord> {
        let state = self.state.lock();
        let mut cells = HashSet::new();
        if statuses.contains(&CellStatus::Done) {
            cells.extend(state.done.iter().copied());
        }
        cells.extend(
            state
                .transient
                .iter()
                .filter(|(_, status)| statuses.contains(status))
                .map(|(cell, _)| *cell),
        );
        cells
    }
}
