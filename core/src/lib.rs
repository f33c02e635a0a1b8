#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Core contracts shared across the Patchworld expansion engine.
//!
//! This crate defines the grid addressing scheme that maps world points onto
//! fixed-size cells, the value types exchanged between the ledger, the
//! lifecycle registry and the scheduler, and the seams through which the
//! engine reaches the spatial stores it copies between. Stores, accelerators
//! and cycle sources are supplied by the host; the engine only ever talks to
//! them through the traits declared here.

use std::{fmt, num::ParseIntError, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Separator used between the two components of a persisted cell key.
pub const CELL_KEY_SEPARATOR: char = ',';

/// Integer address of a single cell on the expansion grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellCoord {
    x: i32,
    z: i32,
}

impl CellCoord {
    /// Creates a new cell coordinate.
    #[must_use]
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Cell index along the world x axis.
    #[must_use]
    pub const fn x(&self) -> i32 {
        self.x
    }

    /// Cell index along the world z axis.
    #[must_use]
    pub const fn z(&self) -> i32 {
        self.z
    }

    /// Returns the cell containing the provided world point.
    ///
    /// Uses floor division so negative coordinates land in the cell that
    /// actually contains them: with a width of 16, `x = -1` maps to cell `-1`.
    #[must_use]
    pub const fn containing(point_x: i32, point_z: i32, size: CellSize) -> Self {
        Self {
            x: point_x.div_euclid(size.width),
            z: point_z.div_euclid(size.length),
        }
    }

    /// World-space origin of the cell, i.e. its minimum `(x, z)` corner.
    ///
    /// Fails when the corner does not fit in `i32` world coordinates.
    pub fn min_corner(&self, size: CellSize) -> Result<(i32, i32), UnaddressableCell> {
        let unaddressable = UnaddressableCell { cell: *self, size };
        let x = self.x.checked_mul(size.width).ok_or(unaddressable)?;
        let z = self.z.checked_mul(size.length).ok_or(unaddressable)?;
        Ok((x, z))
    }

    /// Inclusive world-space footprint covered by the cell.
    ///
    /// Fails when any column of the cell lies outside `i32` world coordinates.
    pub fn footprint(&self, size: CellSize) -> Result<BlockArea, UnaddressableCell> {
        let unaddressable = UnaddressableCell { cell: *self, size };
        let (min_x, min_z) = self.min_corner(size)?;
        let max_x = min_x.checked_add(size.width - 1).ok_or(unaddressable)?;
        let max_z = min_z.checked_add(size.length - 1).ok_or(unaddressable)?;
        Ok(BlockArea::new(min_x, max_x, min_z, max_z))
    }

    /// Returns the cell displaced by the provided number of cells, or `None`
    /// when the result leaves the `i32` grid.
    #[must_use]
    pub const fn offset(&self, dx: i32, dz: i32) -> Option<Self> {
        match (self.x.checked_add(dx), self.z.checked_add(dz)) {
            (Some(x), Some(z)) => Some(Self::new(x, z)),
            _ => None,
        }
    }

    /// Computes the Manhattan distance between two cell coordinates.
    #[must_use]
    pub const fn manhattan_distance(self, other: CellCoord) -> u32 {
        self.x
            .abs_diff(other.x)
            .saturating_add(self.z.abs_diff(other.z))
    }

    /// Computes the Chebyshev ("ring") distance between two cell coordinates.
    #[must_use]
    pub fn ring_distance(self, other: CellCoord) -> u32 {
        self.x.abs_diff(other.x).max(self.z.abs_diff(other.z))
    }

    /// Textual key used when the coordinate is persisted, formatted as `"x,z"`.
    #[must_use]
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CellCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{CELL_KEY_SEPARATOR}{}", self.x, self.z)
    }
}

impl FromStr for CellCoord {
    type Err = CellKeyError;

    fn from_str(key: &str) -> Result<Self, Self::Err> {
        let mut parts = key.split(CELL_KEY_SEPARATOR);
        let (Some(x), Some(z), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(CellKeyError::Malformed {
                key: key.to_owned(),
            });
        };

        let parse = |component: &str| {
            component
                .parse::<i32>()
                .map_err(|source| CellKeyError::InvalidComponent {
                    key: key.to_owned(),
                    source,
                })
        };
        Ok(Self::new(parse(x)?, parse(z)?))
    }
}

/// Maps a world point onto the cell containing it, validating the cell size.
pub fn cell_of(
    point_x: i32,
    point_z: i32,
    width: i32,
    length: i32,
) -> Result<CellCoord, ConfigurationError> {
    let size = CellSize::new(width, length)?;
    Ok(CellCoord::containing(point_x, point_z, size))
}

/// Returns the world-space origin of `cell`, validating the cell size.
pub fn min_corner(cell: CellCoord, width: i32, length: i32) -> Result<(i32, i32), GridError> {
    let size = CellSize::new(width, length)?;
    Ok(cell.min_corner(size)?)
}

/// Validated horizontal dimensions of every cell on the grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CellSize {
    width: i32,
    length: i32,
}

impl CellSize {
    /// Creates a new cell size, rejecting non-positive dimensions.
    pub const fn new(width: i32, length: i32) -> Result<Self, ConfigurationError> {
        if width <= 0 || length <= 0 {
            return Err(ConfigurationError::NonPositiveCellSize { width, length });
        }
        Ok(Self { width, length })
    }

    /// Extent of a cell along the world x axis.
    #[must_use]
    pub const fn width(&self) -> i32 {
        self.width
    }

    /// Extent of a cell along the world z axis.
    #[must_use]
    pub const fn length(&self) -> i32 {
        self.length
    }

    /// Number of columns contained in a single cell footprint.
    #[must_use]
    pub const fn columns(&self) -> u64 {
        self.width as u64 * self.length as u64
    }
}

impl fmt::Display for CellSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.length)
    }
}

/// Lifecycle position of a cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CellStatus {
    /// The cell has never been generated and is not tracked.
    NotStarted,
    /// The cell was admitted into a scheduler queue.
    Queued,
    /// The cell is being copied by the active task.
    Generating,
    /// The cell was fully copied and recorded in the ledger.
    Done,
}

/// Scheduling class attached to a generation request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Priority {
    /// FIFO tier that always drains before any normal request.
    Urgent,
    /// Ordered tier; lower keys are served first, ties in admission order.
    Normal(i32),
}

/// Inclusive horizontal rectangle expressed in world coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockArea {
    min_x: i32,
    max_x: i32,
    min_z: i32,
    max_z: i32,
}

impl BlockArea {
    /// Creates an area from inclusive bounds on both axes.
    #[must_use]
    pub const fn new(min_x: i32, max_x: i32, min_z: i32, max_z: i32) -> Self {
        Self {
            min_x,
            max_x,
            min_z,
            max_z,
        }
    }

    /// Smallest x coordinate inside the area.
    #[must_use]
    pub const fn min_x(&self) -> i32 {
        self.min_x
    }

    /// Largest x coordinate inside the area.
    #[must_use]
    pub const fn max_x(&self) -> i32 {
        self.max_x
    }

    /// Smallest z coordinate inside the area.
    #[must_use]
    pub const fn min_z(&self) -> i32 {
        self.min_z
    }

    /// Largest z coordinate inside the area.
    #[must_use]
    pub const fn max_z(&self) -> i32 {
        self.max_z
    }

    /// Reports whether the point lies inside the area.
    #[must_use]
    pub const fn contains(&self, x: i32, z: i32) -> bool {
        x >= self.min_x && x <= self.max_x && z >= self.min_z && z <= self.max_z
    }
}

/// Inclusive span of vertical layers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LayerRange {
    min: i32,
    max: i32,
}

impl LayerRange {
    /// Creates a range spanning `min..=max`. The range is empty when `max < min`.
    #[must_use]
    pub const fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    /// Creates a range from a store's `[min_height, max_height)` extent.
    #[must_use]
    pub const fn from_extent(min_height: i32, max_height: i32) -> Self {
        Self::new(min_height, max_height - 1)
    }

    /// Lowest layer in the range.
    #[must_use]
    pub const fn min(&self) -> i32 {
        self.min
    }

    /// Highest layer in the range.
    #[must_use]
    pub const fn max(&self) -> i32 {
        self.max
    }

    /// Reports whether the range contains no layers.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.max < self.min
    }

    /// Number of layers contained in the range.
    #[must_use]
    pub const fn height(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            self.max.abs_diff(self.min) as u64 + 1
        }
    }

    /// Layers shared by both ranges.
    #[must_use]
    pub fn intersect(self, other: LayerRange) -> LayerRange {
        LayerRange::new(self.min.max(other.min), self.max.min(other.max))
    }
}

/// Location of a single addressable unit in a spatial store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockPos {
    /// World x coordinate.
    pub x: i32,
    /// Vertical layer.
    pub y: i32,
    /// World z coordinate.
    pub z: i32,
}

impl BlockPos {
    /// Creates a new block position.
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Full descriptor (material and state) of the smallest addressable unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct BlockState(u32);

impl BlockState {
    /// Descriptor used for unoccupied space.
    pub const EMPTY: BlockState = BlockState(0);

    /// Creates a descriptor from its packed numeric representation.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Retrieves the packed numeric representation.
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }

    /// Reports whether the descriptor denotes unoccupied space.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0 == Self::EMPTY.0
    }
}

/// Coarse content tag attached to every biome.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BiomeKind {
    /// Dry terrain suitable as a starting donor.
    Land,
    /// Ocean-like biomes dominated by liquid.
    Liquid,
}

/// Coarse environmental classification of a column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Biome {
    id: u16,
    kind: BiomeKind,
}

impl Biome {
    /// Creates a biome with the provided identifier and content tag.
    #[must_use]
    pub const fn new(id: u16, kind: BiomeKind) -> Self {
        Self { id, kind }
    }

    /// Store-specific biome identifier.
    #[must_use]
    pub const fn id(&self) -> u16 {
        self.id
    }

    /// Coarse content tag of the biome.
    #[must_use]
    pub const fn kind(&self) -> BiomeKind {
        self.kind
    }

    /// Reports whether the biome is ocean-like.
    #[must_use]
    pub const fn is_liquid(&self) -> bool {
        matches!(self.kind, BiomeKind::Liquid)
    }
}

/// Read access to a spatial store that content is copied from.
///
/// Stores are externally synchronised: every method takes `&self` and the
/// engine assumes it is the only writer to any cell it holds in
/// [`CellStatus::Generating`].
pub trait SourceStore: Send + Sync {
    /// Vertical extent of the store as an inclusive layer range.
    fn layers(&self) -> LayerRange;

    /// Makes every column inside `area` addressable before copying begins.
    fn ensure_loaded(&self, area: BlockArea) -> Result<(), StoreError>;

    /// Reads the content descriptor stored at `pos`.
    fn block_at(&self, pos: BlockPos) -> Result<BlockState, StoreError>;

    /// Reads the environmental classification at `pos`.
    fn biome_at(&self, pos: BlockPos) -> Result<Biome, StoreError>;

    /// Elevation of the topmost occupied unit of the column at `(x, z)`.
    fn highest_occupied(&self, x: i32, z: i32) -> Result<i32, StoreError>;
}

/// Write access to the store that is being expanded.
pub trait TargetStore: SourceStore {
    /// Replaces the content descriptor stored at `pos`.
    fn set_block(&self, pos: BlockPos, block: BlockState) -> Result<(), StoreError>;

    /// Replaces the environmental classification at `pos`.
    fn set_biome(&self, pos: BlockPos, biome: Biome) -> Result<(), StoreError>;
}

/// External accelerator able to copy an entire cell in one call.
pub trait RegionCopier: Send + Sync {
    /// Copies the donor cell's content into the target cell.
    fn copy_region(&self, target: CellCoord, donor: CellCoord) -> Result<(), CopyFault>;
}

/// Handle to the recurring cycle source driving the scheduler.
pub trait CycleHandle: Send {
    /// Stops the recurring cycle. Calling it more than once has no effect.
    fn cancel(&mut self);
}

/// Configuration rejected before the engine starts.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    /// Cell dimensions must both be strictly positive.
    #[error("cell size must be > 0, got {width}x{length}")]
    NonPositiveCellSize {
        /// Configured width.
        width: i32,
        /// Configured length.
        length: i32,
    },
    /// The donor range cannot hold a single full cell footprint.
    #[error(
        "donor range is too small for cell size {size}: x=[{}..{}], z=[{}..{}]",
        .range.min_x(), .range.max_x(), .range.min_z(), .range.max_z()
    )]
    DonorRangeTooSmall {
        /// Configured cell size.
        size: CellSize,
        /// Configured donor range.
        range: BlockArea,
    },
    /// The per-cycle work budget must allow at least one unit.
    #[error("per-cycle work budget must be > 0")]
    ZeroBudget,
    /// The scheduler must be able to queue at least one request.
    #[error("queue capacity must be > 0")]
    ZeroQueueCapacity,
}

/// A cell whose footprint does not fit in `i32` world coordinates.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("cell {cell} is not addressable at cell size {size}")]
pub struct UnaddressableCell {
    /// Offending cell.
    pub cell: CellCoord,
    /// Cell size the footprint was computed for.
    pub size: CellSize,
}

/// Failure of the validating grid helpers.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GridError {
    /// The cell size was rejected.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// The cell lies outside the addressable world.
    #[error(transparent)]
    Unaddressable(#[from] UnaddressableCell),
}

/// Persisted cell key that could not be parsed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CellKeyError {
    /// The key did not consist of exactly two comma-separated components.
    #[error("invalid cell key `{key}`: expected `x,z`")]
    Malformed {
        /// Offending key.
        key: String,
    },
    /// One of the components was not an integer.
    #[error("invalid cell key `{key}`")]
    InvalidComponent {
        /// Offending key.
        key: String,
        /// Underlying integer parse failure.
        #[source]
        source: ParseIntError,
    },
}

/// Failure reported by a spatial store.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The store cannot currently serve requests.
    #[error("store unavailable: {detail}")]
    Unavailable {
        /// Human readable description supplied by the store.
        detail: String,
    },
    /// The position lies outside what the store can address.
    #[error("position {pos} is outside the store bounds")]
    OutOfBounds {
        /// Offending position.
        pos: BlockPos,
    },
}

/// Runtime failure of a copy task.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CopyFault {
    /// A store operation failed while copying.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The cell footprint lies outside world coordinates.
    #[error(transparent)]
    Unaddressable(#[from] UnaddressableCell),
    /// The bulk accelerator rejected the copy.
    #[error("bulk region copy failed: {detail}")]
    Accelerator {
        /// Human readable description supplied by the accelerator.
        detail: String,
    },
}

/// A lifecycle transition was requested from the wrong state.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("cell {cell} cannot start generating while {found:?}")]
pub struct AdmissionConflict {
    /// Cell whose transition was refused.
    pub cell: CellCoord,
    /// Status the cell held when the transition was attempted.
    pub found: CellStatus,
}
