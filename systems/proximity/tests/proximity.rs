use std::time::{Duration, Instant};

use glam::DVec2;
use patchworld_core::{CellCoord, CellSize};
use patchworld_system_proximity::{
    distance_priority, CheckThrottle, EdgeTrigger, UNOBSERVED_PRIORITY,
};

fn trigger() -> EdgeTrigger {
    EdgeTrigger::new(CellSize::new(16, 16).expect("valid size"), 3)
}

#[test]
fn walking_east_near_the_edge_requests_the_east_neighbor() {
    let neighbor = trigger().approached_neighbor(
        DVec2::new(12.2, 5.0),
        DVec2::new(13.1, 5.0),
        DVec2::ZERO,
    );
    assert_eq!(neighbor, Some(CellCoord::new(1, 0)));
}

#[test]
fn walking_in_the_middle_of_a_cell_requests_nothing() {
    let neighbor = trigger().approached_neighbor(
        DVec2::new(7.0, 7.0),
        DVec2::new(8.0, 7.0),
        DVec2::new(1.0, 0.0),
    );
    assert_eq!(neighbor, None);
}

#[test]
fn negative_coordinates_resolve_against_the_containing_cell() {
    // Block x = -14 is local offset 2 of cell -1.
    let neighbor = trigger().approached_neighbor(
        DVec2::new(-12.5, -20.0),
        DVec2::new(-13.5, -20.0),
        DVec2::ZERO,
    );
    assert_eq!(neighbor, Some(CellCoord::new(-2, -2)));
}

#[test]
fn facing_is_used_when_movement_points_elsewhere() {
    // Sidestepping along z in the middle of the cell while looking north,
    // close to the north edge.
    let neighbor = trigger().approached_neighbor(
        DVec2::new(8.0, 1.5),
        DVec2::new(8.0, 2.5),
        DVec2::new(0.0, -1.0),
    );
    assert_eq!(neighbor, Some(CellCoord::new(0, -1)));
}

#[test]
fn stationary_observers_never_trigger() {
    let neighbor = trigger().approached_neighbor(
        DVec2::new(15.0, 15.0),
        DVec2::new(15.0, 15.0),
        DVec2::new(1.0, 0.0),
    );
    assert_eq!(neighbor, None);
}

#[test]
fn distance_priority_uses_the_nearest_observer() {
    let target = CellCoord::new(4, 4);
    let observers = [CellCoord::new(0, 0), CellCoord::new(5, 2), CellCoord::new(-9, 4)];
    assert_eq!(distance_priority(target, &observers), 3);
    assert_eq!(distance_priority(target, &[]), UNOBSERVED_PRIORITY);
}

#[test]
fn throttle_limits_checks_per_observer() {
    let start = Instant::now();
    let mut throttle = CheckThrottle::new(Duration::from_millis(250));

    assert!(throttle.should_check(1_u32, start));
    assert!(!throttle.should_check(1, start + Duration::from_millis(100)));
    assert!(throttle.should_check(2, start + Duration::from_millis(100)));
    assert!(throttle.should_check(1, start + Duration::from_millis(250)));

    throttle.forget(&2);
    assert!(throttle.should_check(2, start + Duration::from_millis(260)));
}

#[test]
fn the_last_cell_on_the_grid_has_no_neighbor_beyond_it() {
    let trigger = EdgeTrigger::new(CellSize::new(1, 1).expect("valid size"), 1);
    let to = DVec2::new(f64::from(i32::MAX) + 0.5, 0.5);
    let neighbor = trigger.approached_neighbor(to - DVec2::new(1.0, 0.0), to, DVec2::ZERO);
    assert_eq!(neighbor, None);
}
