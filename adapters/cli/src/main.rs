#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Command-line adapter that runs the Patchworld expansion engine against
//! in-memory worlds and a file-backed generation ledger.

mod config;
mod cycle;

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::Instant,
};

use anyhow::{Context, Result};
use clap::Parser;
use glam::DVec2;
use patchworld_core::{
    BlockPos, CellCoord, CellStatus, Priority, RegionCopier, SourceStore, TargetStore,
};
use patchworld_ledger::{FileLedgerStore, GenerationLedger};
use patchworld_system_copy_task::CopyService;
use patchworld_system_donor::DonorSelector;
use patchworld_system_proximity::{distance_priority, CheckThrottle, EdgeTrigger};
use patchworld_system_registry::CellRegistry;
use patchworld_system_scheduler::ExpansionScheduler;
use patchworld_world::{TerrainSpec, VoxelWorld, WorldRegionCopier};
use tracing::{debug, info};
use tracing_subscriber::{prelude::*, EnvFilter};

use crate::{
    config::{EngineConfig, Settings},
    cycle::CycleThread,
};

const SPAWN_CELL: CellCoord = CellCoord::new(0, 0);
const OBSERVER_ID: u32 = 0;

/// Command-line arguments for the Patchworld binary.
#[derive(Debug, Parser)]
#[command(name = "patchworld", about = "Grow a world cell by cell from a donor region")]
struct Cli {
    /// Path to a TOML engine configuration.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Directory holding the generation ledger.
    #[arg(long, default_value = "data")]
    ledger: PathBuf,
    /// Maximum number of scheduler cycles to run.
    #[arg(long, default_value_t = 2_000)]
    cycles: u64,
    /// Number of one-block steps the simulated observer walks east.
    #[arg(long, default_value_t = 64)]
    walk_steps: u32,
    /// Overrides the donor selection seed from the configuration.
    #[arg(long)]
    seed: Option<u64>,
}

/// Entry point for the Patchworld command-line interface.
fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref())?;
    let settings = config.validate().context("invalid engine configuration")?;
    run(&cli, &config, &settings)
}

fn run(cli: &Cli, config: &EngineConfig, settings: &Settings) -> Result<()> {
    let worlds = &config.worlds;
    let source = Arc::new(
        VoxelWorld::new("source", worlds.source_min_height, worlds.source_max_height)
            .with_bounds(settings.donor_range),
    );
    source.fill_terrain(TerrainSpec {
        area: settings.donor_range,
        seed: worlds.terrain_seed,
        sea_level: worlds.sea_level,
    });
    let target = Arc::new(VoxelWorld::new(
        worlds.target_name.clone(),
        worlds.target_min_height,
        worlds.target_max_height,
    ));

    let seed = cli.seed.unwrap_or(config.donor.seed);
    let selector = Arc::new(DonorSelector::new(settings.donor_range, settings.size, seed)?);

    let ledger = Arc::new(
        GenerationLedger::open(FileLedgerStore::for_target(&cli.ledger, target.name()))
            .context("failed to open generation ledger")?,
    );
    let reset = ledger.reset_if_world_identity_changed(&worlds.target_identity);
    let migration = ledger.migrate_cell_grid_if_needed(settings.size);
    info!(
        identity = %worlds.target_identity,
        reset = reset.reset,
        migrated = migration.migrated,
        done = ledger.count_done(),
        "generation ledger ready"
    );

    let registry = Arc::new(CellRegistry::new(Arc::clone(&ledger)));
    let source_store: Arc<dyn SourceStore> = source.clone();
    let target_store: Arc<dyn TargetStore> = target.clone();
    let service = CopyService::new(
        source_store,
        target_store,
        settings.size,
        config.copy.copy_biomes,
    );
    let accelerator: Option<Arc<dyn RegionCopier>> = config.copy.bulk.then(|| {
        Arc::new(WorldRegionCopier::new(
            Arc::clone(&source),
            Arc::clone(&target),
            settings.size,
            config.copy.copy_biomes,
        )) as Arc<dyn RegionCopier>
    });
    let scheduler = Arc::new(ExpansionScheduler::new(
        registry,
        selector,
        service,
        accelerator,
        settings.scheduler,
    ));

    let _ = scheduler.request_prefer_land(
        SPAWN_CELL,
        Priority::Urgent,
        config.donor.prefer_land_attempts,
    );
    let pregen = scheduler.request_around(
        SPAWN_CELL,
        config.generation.pregen_radius,
        Priority::Normal(0),
    );
    info!(pregen, "pregeneration requested");

    let cycles = Arc::new(AtomicU64::new(0));
    scheduler.start(Box::new(CycleThread::spawn(
        Arc::clone(&scheduler),
        settings.cycle_interval,
        cli.cycles,
        Arc::clone(&cycles),
    )));

    walk_observer(cli, config, settings, &scheduler)?;

    while scheduler.queue_depth() > 0 && cycles.load(Ordering::SeqCst) < cli.cycles {
        thread::sleep(settings.cycle_interval);
    }
    let pending = scheduler.queue_depth();
    scheduler.shutdown();

    if scheduler.status_of(SPAWN_CELL) == CellStatus::Done {
        let (x, z) = SPAWN_CELL.min_corner(settings.size)?;
        let (x, z) = (x + settings.size.width() / 2, z + settings.size.length() / 2);
        let y = target.highest_occupied(x, z)?;
        if ledger.mark_progression_marker(BlockPos::new(x, y, z)) {
            info!(x, y, z, "progression marker recorded");
        }
    }

    println!(
        "cycles run: {}, cells done: {}, released on shutdown: {pending}, blocks written: {}",
        cycles.load(Ordering::SeqCst),
        scheduler.count_done(),
        target.write_count(),
    );
    if let Some(marker) = ledger.progression_marker() {
        println!("progression marker: {marker}");
    }
    Ok(())
}

/// Walks a simulated observer east from the spawn cell, requesting the cells
/// it approaches.
fn walk_observer(
    cli: &Cli,
    config: &EngineConfig,
    settings: &Settings,
    scheduler: &ExpansionScheduler,
) -> Result<()> {
    let trigger = EdgeTrigger::new(settings.size, config.generation.edge_trigger_distance);
    let mut throttle = CheckThrottle::new(settings.check_interval);
    let look = DVec2::new(1.0, 0.0);
    let (spawn_x, spawn_z) = SPAWN_CELL.min_corner(settings.size)?;
    let mut position = DVec2::new(
        f64::from(spawn_x) + f64::from(settings.size.width()) / 2.0,
        f64::from(spawn_z) + f64::from(settings.size.length()) / 2.0,
    );

    for _ in 0..cli.walk_steps {
        let next = position + look;
        thread::sleep(settings.cycle_interval);
        if throttle.should_check(OBSERVER_ID, Instant::now()) {
            if let Some(cell) = trigger.approached_neighbor(position, next, look) {
                let observer = CellCoord::containing(
                    next.x.floor() as i32,
                    next.y.floor() as i32,
                    settings.size,
                );
                let priority = distance_priority(cell, &[observer]);
                let admitted = scheduler.request(cell, Priority::Normal(priority));
                debug!(%cell, admitted, "observer approached cell edge");
            }
        }
        position = next;
    }
    Ok(())
}
