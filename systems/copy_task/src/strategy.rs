use std::sync::Arc;

use patchworld_core::{CellCoord, CopyFault, LayerRange, RegionCopier};

use crate::CopyService;

/// Interchangeable way of moving a cell's content.
pub trait CopyStrategy: Send {
    /// Copies at most `budget` units and returns how many were copied.
    fn advance(&mut self, service: &CopyService, budget: usize) -> Result<usize, CopyFault>;

    /// Reports whether the whole cell has been copied.
    fn is_complete(&self) -> bool;
}

/// Unit-by-unit copy resuming from a cursor.
///
/// The cursor walks local x in the outer loop, local z in the middle and the
/// layer in the inner loop, so each column is finished before the next.
#[derive(Debug)]
pub struct ColumnCopy {
    target: CellCoord,
    donor: CellCoord,
    layers: LayerRange,
    width: i32,
    length: i32,
    dx: i32,
    dz: i32,
    y: i32,
    complete: bool,
}

impl ColumnCopy {
    /// Creates a cursor at the first unit of the cell.
    #[must_use]
    pub fn new(target: CellCoord, donor: CellCoord, service: &CopyService) -> Self {
        let layers = service.layers();
        Self {
            target,
            donor,
            layers,
            width: service.size().width(),
            length: service.size().length(),
            dx: 0,
            dz: 0,
            y: layers.min(),
            complete: layers.is_empty(),
        }
    }

    fn step_cursor(&mut self) {
        if self.y < self.layers.max() {
            self.y += 1;
            return;
        }
        self.y = self.layers.min();
        self.dz += 1;
        if self.dz < self.length {
            return;
        }
        self.dz = 0;
        self.dx += 1;
        if self.dx >= self.width {
            self.complete = true;
        }
    }
}

impl CopyStrategy for ColumnCopy {
    fn advance(&mut self, service: &CopyService, budget: usize) -> Result<usize, CopyFault> {
        let mut copied = 0;
        while copied < budget && !self.complete {
            service.copy_unit(self.target, self.donor, self.dx, self.dz, self.y)?;
            copied += 1;
            self.step_cursor();
        }
        Ok(copied)
    }

    fn is_complete(&self) -> bool {
        self.complete
    }
}

/// Whole-cell copy delegated to an external accelerator.
pub struct BulkCopy {
    target: CellCoord,
    donor: CellCoord,
    copier: Arc<dyn RegionCopier>,
    volume: usize,
    complete: bool,
}

impl std::fmt::Debug for BulkCopy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkCopy")
            .field("target", &self.target)
            .field("donor", &self.donor)
            .field("volume", &self.volume)
            .field("complete", &self.complete)
            .finish_non_exhaustive()
    }
}

impl BulkCopy {
    /// Creates a bulk copy through `copier`.
    #[must_use]
    pub fn new(
        target: CellCoord,
        donor: CellCoord,
        service: &CopyService,
        copier: Arc<dyn RegionCopier>,
    ) -> Self {
        let volume = usize::try_from(service.cell_volume()).unwrap_or(usize::MAX);
        Self {
            target,
            donor,
            copier,
            volume,
            complete: volume == 0,
        }
    }
}

impl CopyStrategy for BulkCopy {
    fn advance(&mut self, _service: &CopyService, _budget: usize) -> Result<usize, CopyFault> {
        if self.complete {
            return Ok(0);
        }
        self.copier.copy_region(self.target, self.donor)?;
        self.complete = true;
        Ok(self.volume)
    }

    fn is_complete(&self) -> bool {
        self.complete
    }
}
