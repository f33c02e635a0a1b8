#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Proximity triggers that turn observer movement into generation requests.
//!
//! [`EdgeTrigger`] decides which neighbouring cell an observer is walking
//! towards, [`CheckThrottle`] limits how often one observer is evaluated and
//! [`distance_priority`] derives the normal-tier key from observer positions.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use glam::DVec2;
use patchworld_core::{CellCoord, CellSize};

const MOVEMENT_EPSILON: f64 = 1.0e-6;

/// Priority key used when no observer is present.
pub const UNOBSERVED_PRIORITY: i32 = i32::MAX / 2;

/// Side of a cell an observer can approach.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Edge {
    /// Towards decreasing x.
    West,
    /// Towards increasing x.
    East,
    /// Towards decreasing z.
    North,
    /// Towards increasing z.
    South,
}

impl Edge {
    /// Cell adjacent to `cell` across this edge, if it exists on the grid.
    #[must_use]
    pub const fn neighbor(self, cell: CellCoord) -> Option<CellCoord> {
        match self {
            Edge::West => cell.offset(-1, 0),
            Edge::East => cell.offset(1, 0),
            Edge::North => cell.offset(0, -1),
            Edge::South => cell.offset(0, 1),
        }
    }
}

/// Detects observers closing in on the edge of the cell they stand in.
#[derive(Clone, Copy, Debug)]
pub struct EdgeTrigger {
    size: CellSize,
    distance: i32,
}

impl EdgeTrigger {
    /// Creates a trigger firing within `trigger_distance` blocks of an edge.
    ///
    /// Distances below one are raised to one.
    #[must_use]
    pub fn new(size: CellSize, trigger_distance: i32) -> Self {
        Self {
            size,
            distance: trigger_distance.max(1),
        }
    }

    /// Effective trigger distance in blocks.
    #[must_use]
    pub fn distance(&self) -> i32 {
        self.distance
    }

    /// Returns the neighbouring cell an observer moving from `from` to `to`
    /// is approaching, if any.
    ///
    /// The movement vector selects the edge first; when it does not, the
    /// facing vector `look` is consulted. Stationary observers never trigger.
    #[must_use]
    pub fn approached_neighbor(&self, from: DVec2, to: DVec2, look: DVec2) -> Option<CellCoord> {
        if from.distance_squared(to) < MOVEMENT_EPSILON {
            return None;
        }
        let block_x = to.x.floor() as i32;
        let block_z = to.y.floor() as i32;
        let cell = CellCoord::containing(block_x, block_z, self.size);
        let local_x = block_x.rem_euclid(self.size.width());
        let local_z = block_z.rem_euclid(self.size.length());

        self.approached_edge(local_x, local_z, to - from)
            .or_else(|| self.approached_edge(local_x, local_z, look))
            .and_then(|edge| edge.neighbor(cell))
    }

    /// Picks the edge approached from local offset `(local_x, local_z)`
    /// along `direction`.
    ///
    /// Only the dominant axis is tested; when both axes are equally strong
    /// x is tested before z.
    #[must_use]
    pub fn approached_edge(&self, local_x: i32, local_z: i32, direction: DVec2) -> Option<Edge> {
        let abs = direction.abs();
        if abs.x < MOVEMENT_EPSILON && abs.y < MOVEMENT_EPSILON {
            return None;
        }

        if abs.x >= abs.y {
            if direction.x < 0.0 && local_x <= self.distance {
                return Some(Edge::West);
            }
            if direction.x > 0.0 && local_x >= self.size.width() - 1 - self.distance {
                return Some(Edge::East);
            }
        }
        if abs.y >= abs.x {
            if direction.y < 0.0 && local_z <= self.distance {
                return Some(Edge::North);
            }
            if direction.y > 0.0 && local_z >= self.size.length() - 1 - self.distance {
                return Some(Edge::South);
            }
        }
        None
    }
}

/// Minimum Manhattan distance from `target` to any observer cell.
///
/// Returns [`UNOBSERVED_PRIORITY`] when there are no observers.
#[must_use]
pub fn distance_priority(target: CellCoord, observers: &[CellCoord]) -> i32 {
    observers
        .iter()
        .map(|observer| i32::try_from(target.manhattan_distance(*observer)).unwrap_or(i32::MAX))
        .min()
        .unwrap_or(UNOBSERVED_PRIORITY)
}

/// Rate limiter allowing one evaluation per observer per interval.
#[derive(Debug)]
pub struct CheckThrottle<K> {
    interval: Duration,
    last_check: HashMap<K, Instant>,
}

impl<K: std::hash::Hash + Eq> CheckThrottle<K> {
    /// Creates a throttle; zero intervals are raised to one millisecond.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            last_check: HashMap::new(),
        }
    }

    /// Reports whether `observer` may be evaluated at `now`, recording the
    /// check when it may.
    pub fn should_check(&mut self, observer: K, now: Instant) -> bool {
        if let Some(last) = self.last_check.get(&observer) {
            if now.saturating_duration_since(*last) < self.interval {
                return false;
            }
        }
        let _ = self.last_check.insert(observer, now);
        true
    }

    /// Forgets `observer`, e.g. after it left the target world.
    pub fn forget(&mut self, observer: &K) {
        let _ = self.last_check.remove(observer);
    }
}
