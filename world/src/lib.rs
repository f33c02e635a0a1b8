#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! In-memory voxel world backing the Patchworld stores.
//!
//! [`VoxelWorld`] implements both [`SourceStore`] and [`TargetStore`] so the
//! same type serves as the bounded donor region and the growing target. A
//! deterministic terrain filler populates donor worlds with land and ocean
//! columns, which gives the donor selector something to discriminate between.
//! [`WorldRegionCopier`] moves a whole cell between two worlds in one call.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use parking_lot::RwLock;
use patchworld_core::{
    Biome, BiomeKind, BlockArea, BlockPos, BlockState, CellCoord, CellSize, CopyFault,
    LayerRange, RegionCopier, SourceStore, StoreError, TargetStore,
};

const RNG_MULTIPLIER: u64 = 6_364_136_223_846_793_005;
const RNG_INCREMENT: u64 = 1_442_695_040_888_963_407;

/// Biome reported for columns that were never assigned one.
pub const PLAINS: Biome = Biome::new(1, BiomeKind::Land);
/// Biome assigned to terrain columns that sit below sea level.
pub const OCEAN: Biome = Biome::new(2, BiomeKind::Liquid);

/// Block written below the surface of generated terrain.
pub const STONE: BlockState = BlockState::new(1);
/// Block written at the surface of dry terrain columns.
pub const GRASS: BlockState = BlockState::new(2);
/// Block filling ocean columns up to sea level.
pub const WATER: BlockState = BlockState::new(3);

const TERRAIN_FEATURE_SIZE: i32 = 8;
const TERRAIN_RELIEF: u64 = 12;
const TERRAIN_DEPTH_BELOW_SEA: i32 = 6;

/// Parameters for [`VoxelWorld::fill_terrain`].
#[derive(Clone, Copy, Debug)]
pub struct TerrainSpec {
    /// Region to populate.
    pub area: BlockArea,
    /// Seed controlling the height field.
    pub seed: u64,
    /// Columns whose surface lies below this layer become ocean.
    pub sea_level: i32,
}

/// Thread-safe in-memory spatial store.
#[derive(Debug)]
pub struct VoxelWorld {
    name: String,
    layers: LayerRange,
    bounds: Option<BlockArea>,
    blocks: RwLock<HashMap<BlockPos, BlockState>>,
    biomes: RwLock<HashMap<BlockPos, Biome>>,
    loads: AtomicUsize,
    writes: AtomicUsize,
    unavailable: AtomicBool,
}

impl VoxelWorld {
    /// Creates an empty, horizontally unbounded world spanning `[min_height, max_height)`.
    #[must_use]
    pub fn new(name: impl Into<String>, min_height: i32, max_height: i32) -> Self {
        Self {
            name: name.into(),
            layers: LayerRange::from_extent(min_height, max_height),
            bounds: None,
            blocks: RwLock::new(HashMap::new()),
            biomes: RwLock::new(HashMap::new()),
            loads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Restricts horizontal addressing to `bounds`.
    #[must_use]
    pub fn with_bounds(mut self, bounds: BlockArea) -> Self {
        self.bounds = Some(bounds);
        self
    }

    /// Name the world was created with.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Populates `spec.area` with a deterministic height field.
    ///
    /// Terrain is laid out in square plateaus so neighbouring columns share a
    /// surface height. Plateaus whose surface lies below sea level are filled
    /// with water and tagged [`OCEAN`]; the rest are capped with grass and
    /// tagged [`PLAINS`].
    pub fn fill_terrain(&self, spec: TerrainSpec) {
        let mut blocks = self.blocks.write();
        let mut biomes = self.biomes.write();
        let floor = self.layers.min();

        for x in spec.area.min_x()..=spec.area.max_x() {
            for z in spec.area.min_z()..=spec.area.max_z() {
                let surface =
                    terrain_height(spec.seed, spec.sea_level, x, z).min(self.layers.max());
                let biome = if surface < spec.sea_level { OCEAN } else { PLAINS };
                let top = surface.max(spec.sea_level.min(self.layers.max()));

                for y in floor..=top {
                    let block = if y < surface {
                        STONE
                    } else if y == surface && biome == PLAINS {
                        GRASS
                    } else if y == surface {
                        STONE
                    } else {
                        WATER
                    };
                    let pos = BlockPos::new(x, y, z);
                    let _ = blocks.insert(pos, block);
                    let _ = biomes.insert(pos, biome);
                }
            }
        }
    }

    /// Makes every subsequent store call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of successful [`SourceStore::ensure_loaded`] calls.
    #[must_use]
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Number of block writes, through [`TargetStore::set_block`] or a region copy.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Reads a block without going through the fallible store interface.
    #[must_use]
    pub fn peek(&self, pos: BlockPos) -> BlockState {
        self.blocks
            .read()
            .get(&pos)
            .copied()
            .unwrap_or(BlockState::EMPTY)
    }

    /// Reads a biome without going through the fallible store interface.
    #[must_use]
    pub fn peek_biome(&self, pos: BlockPos) -> Biome {
        self.biomes.read().get(&pos).copied().unwrap_or(PLAINS)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                detail: format!("world `{}` is offline", self.name),
            });
        }
        Ok(())
    }

    fn check_area(&self, area: BlockArea) -> Result<(), StoreError> {
        self.check_available()?;
        let Some(bounds) = self.bounds else {
            return Ok(());
        };
        let corners = [(area.min_x(), area.min_z()), (area.max_x(), area.max_z())];
        match corners.iter().find(|(x, z)| !bounds.contains(*x, *z)) {
            Some(&(x, z)) => Err(StoreError::OutOfBounds {
                pos: BlockPos::new(x, self.layers.min(), z),
            }),
            None => Ok(()),
        }
    }

    fn check_addressable(&self, pos: BlockPos) -> Result<(), StoreError> {
        self.check_available()?;
        let in_layers = pos.y >= self.layers.min() && pos.y <= self.layers.max();
        let in_bounds = self
            .bounds
            .map_or(true, |bounds| bounds.contains(pos.x, pos.z));
        if in_layers && in_bounds {
            Ok(())
        } else {
            Err(StoreError::OutOfBounds { pos })
        }
    }
}

impl SourceStore for VoxelWorld {
    fn layers(&self) -> LayerRange {
        self.layers
    }

    fn ensure_loaded(&self, area: BlockArea) -> Result<(), StoreError> {
        self.check_area(area)?;
        let _ = self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn block_at(&self, pos: BlockPos) -> Result<BlockState, StoreError> {
        self.check_addressable(pos)?;
        Ok(self.peek(pos))
    }

    fn biome_at(&self, pos: BlockPos) -> Result<Biome, StoreError> {
        self.check_addressable(pos)?;
        Ok(self.peek_biome(pos))
    }

    fn highest_occupied(&self, x: i32, z: i32) -> Result<i32, StoreError> {
        self.check_addressable(BlockPos::new(x, self.layers.min(), z))?;
        let blocks = self.blocks.read();
        let highest = (self.layers.min()..=self.layers.max())
            .rev()
            .find(|&y| {
                blocks
                    .get(&BlockPos::new(x, y, z))
                    .is_some_and(|block| !block.is_empty())
            })
            .unwrap_or(self.layers.min());
        Ok(highest)
    }
}

impl TargetStore for VoxelWorld {
    fn set_block(&self, pos: BlockPos, block: BlockState) -> Result<(), StoreError> {
        self.check_addressable(pos)?;
        let _ = self.blocks.write().insert(pos, block);
        let _ = self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn set_biome(&self, pos: BlockPos, biome: Biome) -> Result<(), StoreError> {
        self.check_addressable(pos)?;
        let _ = self.biomes.write().insert(pos, biome);
        Ok(())
    }
}

/// Bulk accelerator copying whole cells between two [`VoxelWorld`]s.
///
/// Each copy reads the donor footprint under a single read lock and writes
/// it under a single write lock, so source and target may be the same world.
#[derive(Debug)]
pub struct WorldRegionCopier {
    source: Arc<VoxelWorld>,
    target: Arc<VoxelWorld>,
    size: CellSize,
    copy_biomes: bool,
}

impl WorldRegionCopier {
    /// Creates a copier between `source` and `target`.
    #[must_use]
    pub fn new(
        source: Arc<VoxelWorld>,
        target: Arc<VoxelWorld>,
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
}

type ColumnContent = (BlockPos, Option<BlockState>, Option<Biome>);

impl RegionCopier for WorldRegionCopier {
    fn copy_region(&self, target: CellCoord, donor: CellCoord) -> Result<(), CopyFault> {
        let donor_area = donor.footprint(self.size)?;
        let target_area = target.footprint(self.size)?;
        self.source.check_area(donor_area)?;
        self.target.check_area(target_area)?;

        let layers = self.source.layers.intersect(self.target.layers);
        if layers.is_empty() {
            return Ok(());
        }
        let (donor_x, donor_z) = (donor_area.min_x(), donor_area.min_z());
        let (target_x, target_z) = (target_area.min_x(), target_area.min_z());

        let mut content: Vec<ColumnContent> = Vec::new();
        {
            let blocks = self.source.blocks.read();
            let biomes = self.source.biomes.read();
            for dx in 0..self.size.width() {
                for dz in 0..self.size.length() {
                    for y in layers.min()..=layers.max() {
                        let from = BlockPos::new(donor_x + dx, y, donor_z + dz);
                        let to = BlockPos::new(target_x + dx, y, target_z + dz);
                        content.push((to, blocks.get(&from).copied(), biomes.get(&from).copied()));
                    }
                }
            }
        }

        let mut blocks = self.target.blocks.write();
        let mut biomes = self.target.biomes.write();
        for (pos, block, biome) in &content {
            let _ = match block {
                Some(block) => blocks.insert(*pos, *block),
                None => blocks.remove(pos),
            };
            if self.copy_biomes {
                let _ = match biome {
                    Some(biome) => biomes.insert(*pos, *biome),
                    None => biomes.remove(pos),
                };
            }
        }
        let _ = self.target.writes.fetch_add(content.len(), Ordering::SeqCst);
        Ok(())
    }
}

fn terrain_height(seed: u64, sea_level: i32, x: i32, z: i32) -> i32 {
    let plateau_x = x.div_euclid(TERRAIN_FEATURE_SIZE);
    let plateau_z = z.div_euclid(TERRAIN_FEATURE_SIZE);
    let mixed = mix(seed ^ mix(plateau_x as u64) ^ mix((plateau_z as u64).rotate_left(32)));
    let relief = (mixed % TERRAIN_RELIEF) as i32;
    sea_level - TERRAIN_DEPTH_BELOW_SEA + relief
}

fn mix(value: u64) -> u64 {
    let state = value
        .wrapping_mul(RNG_MULTIPLIER)
        .wrapping_add(RNG_INCREMENT);
    (state ^ (state >> 33)).wrapping_mul(RNG_MULTIPLIER)
}
