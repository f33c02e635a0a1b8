#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Resumable, budgeted copy of one donor cell into one target cell.
//!
//! A [`CopyTask`] prepares both footprints on its first advance and then
//! delegates to a [`CopyStrategy`]: either the per-unit [`ColumnCopy`] that
//! resumes from a cursor, or the [`BulkCopy`] accelerator that moves the whole
//! cell in one call. The scheduler cannot tell the two apart.

mod strategy;

pub use strategy::{BulkCopy, ColumnCopy, CopyStrategy};

use std::{fmt, sync::Arc};

use patchworld_core::{
    BlockPos, CellCoord, CellSize, CopyFault, LayerRange, RegionCopier, SourceStore, TargetStore,
    UnaddressableCell,
};

/// Store access and copy settings shared by every task.
#[derive(Clone)]
pub struct CopyService {
    source: Arc<dyn SourceStore>,
    target: Arc<dyn TargetStore>,
    size: CellSize,
    copy_biomes: bool,
}

impl fmt::Debug for CopyService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CopyService")
            .field("size", &self.size)
            .field("copy_biomes", &self.copy_biomes)
            .field("layers", &self.layers())
            .finish_non_exhaustive()
    }
}

impl CopyService {
    /// Creates a service copying from `source` into `target`.
    #[must_use]
    pub fn new(
        source: Arc<dyn SourceStore>,
        target: Arc<dyn TargetStore>,
        size: CellSize,
        copy_biomes: bool,
    ) -> Self {
        Self {
            source,
            target,
            size,
            copy_biomes,
        }
    }

    /// Cell size every task copies.
    #[must_use]
    pub fn size(&self) -> CellSize {
        self.size
    }

    /// Store donor content is read from.
    #[must_use]
    pub fn source(&self) -> &Arc<dyn SourceStore> {
        &self.source
    }

    /// Layers present in both stores.
    #[must_use]
    pub fn layers(&self) -> LayerRange {
        self.source.layers().intersect(self.target.layers())
    }

    /// Number of units a full copy of one cell transfers.
    #[must_use]
    pub fn cell_volume(&self) -> u64 {
        self.size.columns() * self.layers().height()
    }

    /// Makes both footprints addressable.
    pub fn prepare(&self, target: CellCoord, donor: CellCoord) -> Result<(), CopyFault> {
        self.source.ensure_loaded(donor.footprint(self.size)?)?;
        self.target.ensure_loaded(target.footprint(self.size)?)?;
        Ok(())
    }

    /// Copies the unit at local offset `(dx, dz)` and layer `y`.
    pub fn copy_unit(
        &self,
        target: CellCoord,
        donor: CellCoord,
        dx: i32,
        dz: i32,
        y: i32,
    ) -> Result<(), CopyFault> {
        let from = self.unit_pos(donor, dx, y, dz)?;
        let to = self.unit_pos(target, dx, y, dz)?;

        let block = self.source.block_at(from)?;
        self.target.set_block(to, block)?;
        if self.copy_biomes {
            let biome = self.source.biome_at(from)?;
            self.target.set_biome(to, biome)?;
        }
        Ok(())
    }

    fn unit_pos(&self, cell: CellCoord, dx: i32, y: i32, dz: i32) -> Result<BlockPos, CopyFault> {
        let unaddressable = UnaddressableCell {
            cell,
            size: self.size,
        };
        let area = cell.footprint(self.size)?;
        match (area.min_x().checked_add(dx), area.min_z().checked_add(dz)) {
            (Some(x), Some(z)) => Ok(BlockPos::new(x, y, z)),
            _ => Err(unaddressable.into()),
        }
    }
}

/// Copy of one target cell from one donor cell, advanced in bounded steps.
pub struct CopyTask {
    target: CellCoord,
    donor: CellCoord,
    service: CopyService,
    prepared: bool,
    strategy: Box<dyn CopyStrategy>,
}

impl fmt::Debug for CopyTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CopyTask")
            .field("target", &self.target)
            .field("donor", &self.donor)
            .field("prepared", &self.prepared)
            .field("complete", &self.is_complete())
            .finish_non_exhaustive()
    }
}

impl CopyTask {
    /// Creates a task copying `donor` into `target`.
    ///
    /// When `accelerator` is supplied the whole cell is copied through it in
    /// a single advance; otherwise content is copied unit by unit.
    #[must_use]
    pub fn new(
        target: CellCoord,
        donor: CellCoord,
        service: CopyService,
        accelerator: Option<Arc<dyn RegionCopier>>,
    ) -> Self {
        let strategy: Box<dyn CopyStrategy> = match accelerator {
            Some(copier) => Box::new(BulkCopy::new(target, donor, &service, copier)),
            None => Box::new(ColumnCopy::new(target, donor, &service)),
        };
        Self {
            target,
            donor,
            service,
            prepared: false,
            strategy,
        }
    }

    /// Cell being written.
    #[must_use]
    pub fn target(&self) -> CellCoord {
        self.target
    }

    /// Cell being read.
    #[must_use]
    pub fn donor(&self) -> CellCoord {
        self.donor
    }

    /// Reports whether every unit has been copied.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.strategy.is_complete()
    }

    /// Copies at most `budget` units and returns how many were copied.
    ///
    /// The first call loads both footprints before any copying. A completed
    /// task always returns `Ok(0)`.
    pub fn advance(&mut self, budget: usize) -> Result<usize, CopyFault> {
        if self.is_complete() || budget == 0 {
            return Ok(0);
        }
        if !self.prepared {
            self.service.prepare(self.target, self.donor)?;
            self.prepared = true;
        }
        self.strategy.advance(&self.service, budget)
    }
}
