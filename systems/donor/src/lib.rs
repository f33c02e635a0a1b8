#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Donor selection policy.
//!
//! Picks the source cell whose content is copied into a target cell. The
//! configured donor range is converted into an inclusive range of cells at
//! construction so every candidate's full footprint lies inside the range.

use parking_lot::Mutex;
use patchworld_core::{BlockArea, BlockPos, CellCoord, CellSize, ConfigurationError, SourceStore};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

/// Randomised donor cell picker over a bounded source region.
#[derive(Debug)]
pub struct DonorSelector {
    size: CellSize,
    min_cell: CellCoord,
    max_cell: CellCoord,
    rng: Mutex<ChaCha8Rng>,
}

impl DonorSelector {
    /// Creates a selector over the inclusive block range `range`.
    ///
    /// Fails when the range cannot hold one full cell footprint on either axis.
    pub fn new(range: BlockArea, size: CellSize, seed: u64) -> Result<Self, ConfigurationError> {
        let (min_cell, max_cell) = donor_cell_range(range, size)?;
        Ok(Self {
            size,
            min_cell,
            max_cell,
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        })
    }

    /// Smallest donor cell that can be returned.
    #[must_use]
    pub fn min_cell(&self) -> CellCoord {
        self.min_cell
    }

    /// Largest donor cell that can be returned.
    #[must_use]
    pub fn max_cell(&self) -> CellCoord {
        self.max_cell
    }

    /// Chooses a donor cell uniformly at random.
    pub fn pick_uniform(&self) -> CellCoord {
        let mut rng = self.rng.lock();
        CellCoord::new(
            rng.gen_range(self.min_cell.x()..=self.max_cell.x()),
            rng.gen_range(self.min_cell.z()..=self.max_cell.z()),
        )
    }

    /// Chooses a donor cell, preferring candidates that are mostly dry.
    ///
    /// Each candidate is sampled at nine points (the footprint centre and
    /// offsets of a third of the cell on each axis) at the topmost occupied
    /// layer. A candidate qualifies when strictly fewer than a third of the
    /// samples are liquid. When no candidate qualifies the last one examined
    /// is returned.
    pub fn pick_prefer_land(&self, source: &dyn SourceStore, max_attempts: u32) -> CellCoord {
        let attempts = max_attempts.max(1);
        let mut candidate = self.pick_uniform();
        for attempt in 1..=attempts {
            if attempt > 1 {
                candidate = self.pick_uniform();
            }
            if self.is_mostly_land(source, candidate) {
                return candidate;
            }
        }
        debug!(
            cell = %candidate,
            attempts,
            "no land donor found; using last candidate"
        );
        candidate
    }

    fn is_mostly_land(&self, source: &dyn SourceStore, candidate: CellCoord) -> bool {
        let Ok(area) = candidate.footprint(self.size) else {
            return false;
        };
        let center_x = area.min_x() + self.size.width() / 2;
        let center_z = area.min_z() + self.size.length() / 2;
        let step_x = self.size.width() / 3;
        let step_z = self.size.length() / 3;
        let floor = source.layers().min();

        let mut total = 0_u32;
        let mut liquid = 0_u32;
        for dx in [0, -step_x, step_x] {
            for dz in [0, -step_z, step_z] {
                let (x, z) = (center_x + dx, center_z + dz);
                let sample = source.highest_occupied(x, z).and_then(|y| {
                    source.biome_at(BlockPos::new(x, y.max(floor), z))
                });
                match sample {
                    Ok(biome) => {
                        total += 1;
                        if biome.is_liquid() {
                            liquid += 1;
                        }
                    }
                    Err(error) => {
                        debug!(cell = %candidate, %error, "donor sample failed");
                        return false;
                    }
                }
            }
        }
        liquid * 3 < total
    }
}

/// Inclusive range of cells whose full footprint lies inside `range`.
///
/// Fails when no such cell exists.
pub fn donor_cell_range(
    range: BlockArea,
    size: CellSize,
) -> Result<(CellCoord, CellCoord), ConfigurationError> {
    let too_small = ConfigurationError::DonorRangeTooSmall { size, range };
    let min_cell = CellCoord::new(
        ceil_div(range.min_x(), size.width()),
        ceil_div(range.min_z(), size.length()),
    );
    // Highest origin whose footprint still ends inside the range.
    let (Some(last_x), Some(last_z)) = (
        range.max_x().checked_sub(size.width() - 1),
        range.max_z().checked_sub(size.length() - 1),
    ) else {
        return Err(too_small);
    };
    let max_cell = CellCoord::new(
        last_x.div_euclid(size.width()),
        last_z.div_euclid(size.length()),
    );
    if max_cell.x() < min_cell.x() || max_cell.z() < min_cell.z() {
        return Err(too_small);
    }
    Ok((min_cell, max_cell))
}

fn ceil_div(value: i32, divisor: i32) -> i32 {
    let quotient = value.div_euclid(divisor);
    if value.rem_euclid(divisor) == 0 {
        quotient
    } else {
        quotient + 1
    }
}
