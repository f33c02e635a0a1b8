use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};

use patchworld_core::{
    BlockArea, CellCoord, CellSize, CellStatus, CopyFault, CycleHandle, Priority, RegionCopier,
    SourceStore, TargetStore,
};
use patchworld_ledger::{GenerationLedger, MemoryLedgerStore};
use patchworld_system_copy_task::CopyService;
use patchworld_system_donor::DonorSelector;
use patchworld_system_registry::CellRegistry;
use patchworld_system_scheduler::{Config, ExpansionScheduler, StepOutcome};
use patchworld_world::{TerrainSpec, VoxelWorld};

const VOLUME: usize = 4 * 4 * 4;

struct Harness {
    source: Arc<VoxelWorld>,
    registry: Arc<CellRegistry>,
    ledger: Arc<GenerationLedger>,
    scheduler: ExpansionScheduler,
}

fn harness(budget: usize, capacity: usize) -> Harness {
    harness_with(budget, capacity, None)
}

fn harness_with(
    budget: usize,
    capacity: usize,
    accelerator: Option<Arc<dyn RegionCopier>>,
) -> Harness {
    let size = CellSize::new(4, 4).expect("valid size");
    let donor_range = BlockArea::new(0, 15, 0, 15);

    let source = Arc::new(VoxelWorld::new("source", 0, 4).with_bounds(donor_range));
    source.fill_terrain(TerrainSpec {
        area: donor_range,
        seed: 3,
        sea_level: 2,
    });
    let target = Arc::new(VoxelWorld::new("target", 0, 4));

    let ledger = Arc::new(GenerationLedger::open(MemoryLedgerStore::new()).expect("open"));
    let registry = Arc::new(CellRegistry::new(Arc::clone(&ledger)));
    let selector = Arc::new(DonorSelector::new(donor_range, size, 21).expect("valid range"));
    let source_store: Arc<dyn SourceStore> = source.clone();
    let target_store: Arc<dyn TargetStore> = target;
    let service = CopyService::new(source_store, target_store, size, true);
    let config = Config::new(budget, capacity).expect("valid config");

    let scheduler = ExpansionScheduler::new(
        Arc::clone(&registry),
        selector,
        service,
        accelerator,
        config,
    );
    Harness {
        source,
        registry,
        ledger,
        scheduler,
    }
}

fn run_until_idle(scheduler: &ExpansionScheduler) -> Vec<StepOutcome> {
    let mut outcomes = Vec::new();
    for _ in 0..10_000 {
        match scheduler.step() {
            StepOutcome::Idle => return outcomes,
            outcome => outcomes.push(outcome),
        }
    }
    panic!("scheduler never became idle");
}

fn completed(outcomes: &[StepOutcome]) -> Vec<CellCoord> {
    outcomes
        .iter()
        .filter_map(|outcome| match outcome {
            StepOutcome::Completed { cell, .. } => Some(*cell),
            _ => None,
        })
        .collect()
}

struct FlagHandle(Arc<AtomicBool>);

impl CycleHandle for FlagHandle {
    fn cancel(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

struct InstantCopier;

impl RegionCopier for InstantCopier {
    fn copy_region(&self, _target: CellCoord, _donor: CellCoord) -> Result<(), CopyFault> {
        Ok(())
    }
}

#[test]
fn queue_capacity_rejects_the_overflowing_request() {
    let h = harness(1_000, 2);
    assert!(h.scheduler.request(CellCoord::new(0, 0), Priority::Normal(0)));
    assert!(h.scheduler.request(CellCoord::new(1, 0), Priority::Urgent));

    let overflow = CellCoord::new(2, 0);
    assert!(!h.scheduler.request(overflow, Priority::Normal(0)));
    assert_eq!(h.scheduler.status_of(overflow), CellStatus::NotStarted);
    assert_eq!(h.scheduler.queue_depth(), 2);
}

#[test]
fn tracked_and_done_cells_are_not_readmitted() {
    let h = harness(1_000, 8);
    let cell = CellCoord::new(3, 3);
    assert!(h.scheduler.request(cell, Priority::Normal(0)));
    assert!(!h.scheduler.request(cell, Priority::Urgent));

    assert_eq!(
        h.scheduler.step(),
        StepOutcome::Completed {
            cell,
            units: VOLUME
        }
    );
    assert_eq!(h.scheduler.status_of(cell), CellStatus::Done);
    assert!(h.ledger.is_generated(cell));
    assert!(!h.scheduler.request(cell, Priority::Normal(0)));
    assert_eq!(h.scheduler.count_done(), 1);
}

#[test]
fn request_around_admits_the_block_center_first() {
    let h = harness(1_000, 16);
    let center = CellCoord::new(10, -4);

    assert_eq!(h.scheduler.request_around(center, 1, Priority::Normal(0)), 9);
    let order = completed(&run_until_idle(&h.scheduler));

    assert_eq!(order.len(), 9);
    assert_eq!(order[0], center);
    let orthogonal: HashSet<CellCoord> = order[1..5].iter().copied().collect();
    assert_eq!(
        orthogonal,
        [
            center.offset(-1, 0),
            center.offset(1, 0),
            center.offset(0, -1),
            center.offset(0, 1),
        ]
        .into_iter()
        .flatten()
        .collect()
    );
    assert_eq!(h.scheduler.count_done(), 9);
}

#[test]
fn request_around_under_capacity_keeps_the_nearest_ring() {
    let h = harness(1_000, 5);
    let center = CellCoord::new(0, 0);

    assert_eq!(h.scheduler.request_around(center, 2, Priority::Urgent), 5);
    let queued = h.scheduler.cells_with_status(&[CellStatus::Queued]);
    assert!(queued.contains(&center));
    assert!(queued.iter().all(|cell| center.manhattan_distance(*cell) <= 1));
}

#[test]
fn non_positive_radius_requests_only_the_center() {
    let h = harness(1_000, 16);
    let center = CellCoord::new(2, 2);
    assert_eq!(h.scheduler.request_around(center, 0, Priority::Normal(3)), 1);
    assert_eq!(h.scheduler.request_around(center, -2, Priority::Normal(3)), 0);
    assert_eq!(
        h.scheduler.cells_with_status(&[CellStatus::Queued]),
        [center].into_iter().collect()
    );
}

#[test]
fn urgent_requests_drain_before_normal_ones() {
    let h = harness(1_000, 8);
    let normal = CellCoord::new(0, 0);
    let urgent_a = CellCoord::new(5, 5);
    let urgent_b = CellCoord::new(6, 6);
    assert!(h.scheduler.request(normal, Priority::Normal(-100)));
    assert!(h.scheduler.request(urgent_a, Priority::Urgent));
    assert!(h.scheduler.request(urgent_b, Priority::Urgent));

    let order = completed(&run_until_idle(&h.scheduler));
    assert_eq!(order, vec![urgent_a, urgent_b, normal]);
}

#[test]
fn normal_requests_follow_key_then_admission_order() {
    let h = harness(1_000, 8);
    let far = CellCoord::new(9, 0);
    let near_first = CellCoord::new(1, 0);
    let near_second = CellCoord::new(-1, 0);
    assert!(h.scheduler.request(far, Priority::Normal(9)));
    assert!(h.scheduler.request(near_first, Priority::Normal(1)));
    assert!(h.scheduler.request(near_second, Priority::Normal(1)));

    let order = completed(&run_until_idle(&h.scheduler));
    assert_eq!(order, vec![near_first, near_second, far]);
}

#[test]
fn urgent_requests_do_not_preempt_the_active_task() {
    let h = harness(10, 8);
    let normal = CellCoord::new(0, 0);
    let urgent = CellCoord::new(1, 1);
    assert!(h.scheduler.request(normal, Priority::Normal(0)));
    assert_eq!(
        h.scheduler.step(),
        StepOutcome::Progressed {
            cell: normal,
            units: 10
        }
    );

    assert!(h.scheduler.request(urgent, Priority::Urgent));
    assert_eq!(h.scheduler.queue_depth(), 2, "queued urgent plus active task");

    let order = completed(&run_until_idle(&h.scheduler));
    assert_eq!(order, vec![normal, urgent]);
}

#[test]
fn budgeted_steps_sum_to_the_cell_volume() {
    let h = harness(7, 4);
    let cell = CellCoord::new(-2, 8);
    assert!(h.scheduler.request(cell, Priority::Normal(0)));

    let outcomes = run_until_idle(&h.scheduler);
    let total: usize = outcomes
        .iter()
        .map(|outcome| match outcome {
            StepOutcome::Progressed { units, .. } | StepOutcome::Completed { units, .. } => *units,
            _ => 0,
        })
        .sum();
    assert_eq!(total, VOLUME);
    assert!(outcomes.iter().all(|outcome| match outcome {
        StepOutcome::Progressed { units, .. } | StepOutcome::Completed { units, .. } =>
            *units <= 7,
        _ => false,
    }));
    assert_eq!(
        outcomes.last(),
        Some(&StepOutcome::Completed { cell, units: 1 })
    );
}

#[test]
fn at_most_one_cell_generates_at_a_time() {
    let h = harness(5, 32);
    assert_eq!(
        h.scheduler
            .request_around(CellCoord::new(0, 0), 2, Priority::Normal(0)),
        25
    );

    loop {
        let generating = h.scheduler.cells_with_status(&[CellStatus::Generating]);
        assert!(generating.len() <= 1);
        if h.scheduler.step() == StepOutcome::Idle {
            break;
        }
    }
    assert_eq!(h.scheduler.count_done(), 25);
}

#[test]
fn shutdown_releases_active_and_queued_cells() {
    let h = harness(1, 8);
    let cancelled = Arc::new(AtomicBool::new(false));
    h.scheduler
        .start(Box::new(FlagHandle(Arc::clone(&cancelled))));

    let first = CellCoord::new(0, 0);
    let second = CellCoord::new(1, 0);
    let urgent = CellCoord::new(2, 0);
    assert!(h.scheduler.request(first, Priority::Normal(0)));
    assert!(h.scheduler.request(second, Priority::Normal(1)));
    assert!(h.scheduler.request(urgent, Priority::Urgent));
    assert_eq!(
        h.scheduler.step(),
        StepOutcome::Progressed {
            cell: urgent,
            units: 1
        }
    );
    assert_eq!(h.scheduler.queue_depth(), 3);

    h.scheduler.shutdown();

    assert!(cancelled.load(Ordering::SeqCst));
    for cell in [first, second, urgent] {
        assert_eq!(h.scheduler.status_of(cell), CellStatus::NotStarted);
    }
    assert_eq!(h.scheduler.queue_depth(), 0);
    assert_eq!(h.scheduler.step(), StepOutcome::Stopped);
}

#[test]
fn restart_after_shutdown_accepts_released_cells() {
    let h = harness(1_000, 8);
    let cell = CellCoord::new(4, 4);
    assert!(h.scheduler.request(cell, Priority::Normal(0)));
    h.scheduler.shutdown();

    h.scheduler
        .start(Box::new(FlagHandle(Arc::new(AtomicBool::new(false)))));
    assert!(h.scheduler.request(cell, Priority::Normal(0)));
    assert_eq!(
        h.scheduler.step(),
        StepOutcome::Completed {
            cell,
            units: VOLUME
        }
    );
}

#[test]
fn copy_fault_resets_the_cell_and_keeps_running() {
    let h = harness(1_000, 8);
    let cell = CellCoord::new(7, 7);
    assert!(h.scheduler.request(cell, Priority::Urgent));

    h.source.set_unavailable(true);
    assert_eq!(h.scheduler.step(), StepOutcome::Failed { cell });
    assert_eq!(h.scheduler.status_of(cell), CellStatus::NotStarted);
    assert_eq!(h.scheduler.queue_depth(), 0);
    assert_eq!(h.scheduler.step(), StepOutcome::Idle);

    h.source.set_unavailable(false);
    assert!(h.scheduler.request(cell, Priority::Urgent));
    assert_eq!(
        h.scheduler.step(),
        StepOutcome::Completed {
            cell,
            units: VOLUME
        }
    );
}

#[test]
fn inconsistent_request_is_dropped() {
    let h = harness(1_000, 8);
    let cell = CellCoord::new(1, 2);
    assert!(h.scheduler.request(cell, Priority::Normal(0)));
    h.registry.reset_to_not_started(cell);

    assert_eq!(h.scheduler.step(), StepOutcome::Dropped { cell });
    assert_eq!(h.scheduler.status_of(cell), CellStatus::NotStarted);
    assert_eq!(h.scheduler.step(), StepOutcome::Idle);
}

#[test]
fn accelerated_copy_finishes_a_cell_in_one_step() {
    let h = harness_with(1, 8, Some(Arc::new(InstantCopier)));
    let cell = CellCoord::new(-5, 2);
    assert!(h.scheduler.request(cell, Priority::Normal(0)));
    assert_eq!(
        h.scheduler.step(),
        StepOutcome::Completed {
            cell,
            units: VOLUME
        }
    );
}

#[test]
fn prefer_land_request_is_admitted_like_any_other() {
    let h = harness(1_000, 8);
    let spawn = CellCoord::new(0, 0);
    assert!(h
        .scheduler
        .request_prefer_land(spawn, Priority::Normal(0), 16));
    assert!(!h
        .scheduler
        .request_prefer_land(spawn, Priority::Normal(0), 16));
    assert_eq!(
        h.scheduler.step(),
        StepOutcome::Completed {
            cell: spawn,
            units: VOLUME
        }
    );
}

#[test]
fn requests_from_another_thread_interleave_with_stepping() {
    let h = harness(16, 64);
    let cells: Vec<CellCoord> = (0..40).map(|i| CellCoord::new(i % 8, i / 8)).collect();
    let finished = AtomicBool::new(false);

    thread::scope(|scope| {
        let _ = scope.spawn(|| {
            for cell in &cells {
                assert!(h.scheduler.request(*cell, Priority::Normal(0)));
            }
            finished.store(true, Ordering::SeqCst);
        });

        let mut idle_after_finish = 0;
        while idle_after_finish < 2 {
            if h.scheduler.step() == StepOutcome::Idle && finished.load(Ordering::SeqCst) {
                idle_after_finish += 1;
            }
        }
    });

    let _ = run_until_idle(&h.scheduler);
    assert_eq!(h.scheduler.count_done(), cells.len());
    assert_eq!(h.ledger.count_done(), cells.len());
}

#[test]
fn cells_outside_world_coordinates_are_rejected_and_stepping_continues() {
    let h = harness(1_000, 8);
    let far = CellCoord::new(i32::MAX / 2, 0);
    assert!(!h.scheduler.request(far, Priority::Urgent));
    assert_eq!(h.scheduler.status_of(far), CellStatus::NotStarted);
    assert_eq!(h.scheduler.queue_depth(), 0);

    let near = CellCoord::new(1, 1);
    assert!(h.scheduler.request(near, Priority::Normal(0)));
    assert_eq!(
        h.scheduler.step(),
        StepOutcome::Completed {
            cell: near,
            units: VOLUME
        }
    );
    assert_eq!(h.scheduler.step(), StepOutcome::Idle);
}

#[test]
fn request_around_with_a_huge_radius_stops_at_capacity() {
    let h = harness(1_000, 5);
    let center = CellCoord::new(0, 0);
    assert_eq!(
        h.scheduler.request_around(center, i32::MAX, Priority::Normal(0)),
        5
    );
    let queued = h.scheduler.cells_with_status(&[CellStatus::Queued]);
    assert!(queued.iter().all(|cell| center.manhattan_distance(*cell) <= 1));
}

#[test]
fn request_around_skips_cells_past_the_edge_of_the_grid() {
    let h = harness(1_000, 16);
    // With 4-wide cells the last addressable column of cells is x = (i32::MAX - 3) / 4.
    let center = CellCoord::new((i32::MAX - 3) / 4, 0);
    assert_eq!(
        h.scheduler.request_around(center, 1, Priority::Normal(0)),
        6
    );
    assert_eq!(
        h.scheduler.request_around(CellCoord::new(i32::MAX, 0), i32::MAX, Priority::Urgent),
        0
    );
    assert_eq!(h.scheduler.queue_depth(), 6);
}
