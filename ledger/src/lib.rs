#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Durable generation ledger for the Patchworld expansion engine.
//!
//! The ledger owns the only persisted state of the engine: the set of cells
//! that were fully copied, the fingerprint of the target world identity and
//! cell size they were copied under, and an optional set-once progression
//! marker. Every mutation is atomic on its own and writes through to the
//! backing [`LedgerStore`]. A failed write is logged and leaves the in-memory
//! state authoritative.

mod store;

pub use store::{FileLedgerStore, LedgerError, LedgerRecord, LedgerStore, MemoryLedgerStore};

use std::collections::HashSet;

use parking_lot::Mutex;
use patchworld_core::{BlockPos, CellCoord, CellSize};
use tracing::{error, warn};

/// Outcome of [`GenerationLedger::reset_if_world_identity_changed`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorldReset {
    /// Whether the completed set was discarded.
    pub reset: bool,
    /// Completed cells recorded before the call.
    pub previous_count: usize,
    /// Completed cells recorded after the call.
    pub current_count: usize,
}

/// Outcome of [`GenerationLedger::migrate_cell_grid_if_needed`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridMigration {
    /// Whether completed cells were remapped onto a new grid.
    pub migrated: bool,
    /// Completed cells recorded before the call.
    pub previous_count: usize,
    /// Completed cells recorded after the call.
    pub current_count: usize,
    /// Cell size the ledger is fingerprinted with after the call.
    pub size: CellSize,
}

#[derive(Debug, Default)]
struct LedgerState {
    generated: HashSet<CellCoord>,
    world_identity: Option<String>,
    cell_size: Option<CellSize>,
    progression_marker: Option<BlockPos>,
}

impl LedgerState {
    fn from_record(record: LedgerRecord) -> Self {
        let cell_size = CellSize::new(record.cell_width, record.cell_length).ok();
        let mut generated = HashSet::with_capacity(record.generated.len());
        for key in &record.generated {
            match key.parse::<CellCoord>() {
                Ok(cell) => match cell_size.map(|size| cell.footprint(size)) {
                    Some(Err(error)) => {
                        warn!(%key, %error, "skipping invalid cell entry in ledger");
                    }
                    _ => {
                        let _ = generated.insert(cell);
                    }
                },
                Err(error) => warn!(%key, %error, "skipping invalid cell entry in ledger"),
            }
        }

        Self {
            generated,
            world_identity: record
                .world_identity
                .filter(|identity| !identity.trim().is_empty()),
            cell_size,
            progression_marker: record.progression_marker,
        }
    }

    fn to_record(&self) -> LedgerRecord {
        let mut cells: Vec<CellCoord> = self.generated.iter().copied().collect();
        cells.sort_unstable();
        LedgerRecord {
            world_identity: self.world_identity.clone(),
            cell_width: self.cell_size.map_or(0, |size| size.width()),
            cell_length: self.cell_size.map_or(0, |size| size.length()),
            generated: cells.iter().map(CellCoord::key).collect(),
            progression_marker: self.progression_marker,
        }
    }
}

/// Durable record of completed cells and the fingerprints they depend on.
pub struct GenerationLedger {
    store: Box<dyn LedgerStore>,
    state: Mutex<LedgerState>,
}

impl std::fmt::Debug for GenerationLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationLedger")
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl GenerationLedger {
    /// Opens the ledger persisted in `store`.
    pub fn open(store: impl LedgerStore + 'static) -> Result<Self, LedgerError> {
        let ledger = Self {
            store: Box::new(store),
            state: Mutex::new(LedgerState::default()),
        };
        ledger.load()?;
        Ok(ledger)
    }

    /// Replaces the in-memory state with the persisted record.
    ///
    /// Malformed cell keys are skipped with a warning; a record that cannot
    /// be read or decoded at all is reported to the caller.
    pub fn load(&self) -> Result<(), LedgerError> {
        let record = self.store.read()?;
        *self.state.lock() = record.map(LedgerState::from_record).unwrap_or_default();
        Ok(())
    }

    /// Reports whether `cell` was fully generated.
    #[must_use]
    pub fn is_generated(&self, cell: CellCoord) -> bool {
        self.state.lock().generated.contains(&cell)
    }

    /// Snapshot of every completed cell.
    #[must_use]
    pub fn generated_cells(&self) -> HashSet<CellCoord> {
        self.state.lock().generated.clone()
    }

    /// Number of completed cells.
    #[must_use]
    pub fn count_done(&self) -> usize {
        self.state.lock().generated.len()
    }

    /// Target world identity the ledger is fingerprinted with.
    #[must_use]
    pub fn world_identity(&self) -> Option<String> {
        self.state.lock().world_identity.clone()
    }

    /// Cell size the ledger is fingerprinted with.
    #[must_use]
    pub fn stored_cell_size(&self) -> Option<CellSize> {
        self.state.lock().cell_size
    }

    /// Records `cell` as complete, persisting only when the set changed.
    pub fn mark_generated(&self, cell: CellCoord) -> bool {
        let mut state = self.state.lock();
        if !state.generated.insert(cell) {
            return false;
        }
        self.persist(&state);
        true
    }

    /// Discards all prior generation when the target world was recreated.
    ///
    /// The first call on a fresh ledger only adopts `identity`. A different
    /// identity clears the completed set, the stored cell size and the
    /// progression marker before adopting the new identity.
    pub fn reset_if_world_identity_changed(&self, identity: &str) -> WorldReset {
        let mut state = self.state.lock();
        let previous_count = state.generated.len();

        let stored = state.world_identity.clone();
        match stored.as_deref() {
            None => {
                state.world_identity = Some(identity.to_owned());
                self.persist(&state);
                WorldReset {
                    reset: false,
                    previous_count: 0,
                    current_count: previous_count,
                }
            }
            Some(stored) if stored == identity => WorldReset {
                reset: false,
                previous_count,
                current_count: previous_count,
            },
            Some(stored) => {
                warn!(
                    previous = %stored,
                    current = %identity,
                    cleared = previous_count,
                    "target world identity changed; discarding generated cells"
                );
                state.generated.clear();
                state.cell_size = None;
                state.progression_marker = None;
                state.world_identity = Some(identity.to_owned());
                self.persist(&state);
                WorldReset {
                    reset: true,
                    previous_count,
                    current_count: 0,
                }
            }
        }
    }

    /// Re-expresses the completed set under a new cell size.
    ///
    /// Every old cell becomes the inclusive range of new cells its footprint
    /// touches. The result over-approximates: shrinking the grid marks every
    /// new cell that overlaps copied content, so a round trip through a finer
    /// grid and back may report more cells than were literally copied but
    /// never fewer.
    pub fn migrate_cell_grid_if_needed(&self, size: CellSize) -> GridMigration {
        let mut state = self.state.lock();
        let previous_count = state.generated.len();

        let Some(old_size) = state.cell_size else {
            state.cell_size = Some(size);
            self.persist(&state);
            return GridMigration {
                migrated: false,
                previous_count: 0,
                current_count: previous_count,
                size,
            };
        };

        if old_size == size {
            return GridMigration {
                migrated: false,
                previous_count,
                current_count: previous_count,
                size,
            };
        }

        let migrated = remap_cells(&state.generated, old_size, size);
        state.generated = migrated;
        state.cell_size = Some(size);
        self.persist(&state);

        let current_count = state.generated.len();
        warn!(
            from = %old_size,
            to = %size,
            previous_count,
            current_count,
            "migrated generated cells to new grid size"
        );
        GridMigration {
            migrated: true,
            previous_count,
            current_count,
            size,
        }
    }

    /// Records the progression marker unless one is already set.
    pub fn mark_progression_marker(&self, pos: BlockPos) -> bool {
        let mut state = self.state.lock();
        if state.progression_marker.is_some() {
            return false;
        }
        state.progression_marker = Some(pos);
        self.persist(&state);
        true
    }

    /// Location recorded by [`GenerationLedger::mark_progression_marker`].
    #[must_use]
    pub fn progression_marker(&self) -> Option<BlockPos> {
        self.state.lock().progression_marker
    }

    fn persist(&self, state: &LedgerState) {
        if let Err(error) = self.store.write(&state.to_record()) {
            error!(%error, "failed to persist generation ledger");
        }
    }
}

fn remap_cells(
    cells: &HashSet<CellCoord>,
    old_size: CellSize,
    new_size: CellSize,
) -> HashSet<CellCoord> {
    let mut migrated = HashSet::new();
    for cell in cells {
        let area = match cell.footprint(old_size) {
            Ok(area) => area,
            Err(error) => {
                warn!(%cell, %error, "dropping unaddressable cell during grid migration");
                continue;
            }
        };
        let low = CellCoord::containing(area.min_x(), area.min_z(), new_size);
        let high = CellCoord::containing(area.max_x(), area.max_z(), new_size);
        for x in low.x()..=high.x() {
            for z in low.z()..=high.z() {
                let _ = migrated.insert(CellCoord::new(x, z));
            }
        }
    }
    migrated
}
