//! Accumulated distance from seed cells over a passable region.
//!
//! Dijkstra over 8-connected steps with uniform unit cost, so the result is
//! the shortest path length through passable cells in ground units.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::raster::Raster;

#[derive(Debug, Clone, PartialEq)]
struct State {
    cost: f64,
    index: usize,
}

impl Eq for State {}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for State {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed for a min-heap
        other.cost.partial_cmp(&self.cost).unwrap_or(Ordering::Equal)
    }
}

const NEIGHBORS: [(isize, isize, f64); 8] = [
    (-1, -1, std::f64::consts::SQRT_2),
    (0, -1, 1.0),
    (1, -1, std::f64::consts::SQRT_2),
    (-1, 0, 1.0),
    (1, 0, 1.0),
    (-1, 1, std::f64::consts::SQRT_2),
    (0, 1, 1.0),
    (1, 1, std::f64::consts::SQRT_2),
];

/// Shortest distance from any of `sources` to every cell of `passable`.
///
/// Sources are always reachable (distance 0) even outside `passable`.
/// `cell_size` is the ground length of one cardinal step. Cells that cannot
/// be reached, or only beyond `max_distance`, are NaN.
pub fn cost_distance(
    passable: &Raster<u8>,
    sources: &[usize],
    cell_size: f64,
    max_distance: f64,
) -> Raster<f64> {
    let mut dist = vec![f64::INFINITY; passable.len()];
    let mut heap = BinaryHeap::new();

    for &s in sources {
        if s < dist.len() && dist[s] > 0.0 {
            dist[s] = 0.0;
            heap.push(State { cost: 0.0, index: s });
        }
    }

    while let Some(State { cost, index }) = heap.pop() {
        if cost > dist[index] {
            continue;
        }
        let (x, y) = passable.index_to_xy(index);
        for &(dx, dy, step) in &NEIGHBORS {
            let Some(n) = passable.offset(x, y, dx, dy) else {
                continue;
            };
            if !passable.is_set(n) {
                continue;
            }
            let next = cost + step * cell_size;
            if next > max_distance {
                continue;
            }
            if next < dist[n] {
                dist[n] = next;
                heap.push(State { cost: next, index: n });
            }
        }
    }

    let mut out = passable.like(f64::NAN);
    for (o, d) in out.data.iter_mut().zip(dist) {
        if d.is_finite() {
            *o = d;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_straight_and_diagonal_steps() {
        let passable = Raster::filled(5, 5, 1u8);
        let d = cost_distance(&passable, &[0], 30.0, 1e9);
        assert_eq!(d.get(0, 0), 0.0);
        assert!((d.get(2, 0) - 60.0).abs() < 1e-9);
        assert!((d.get(1, 1) - 30.0 * std::f64::consts::SQRT_2).abs() < 1e-9);
    }

    #[test]
    fn test_barrier_blocks_path() {
        let mut passable = Raster::filled(3, 3, 1u8);
        for y in 0..3 {
            passable.set(1, y, 0);
        }
        let d = cost_distance(&passable, &[0], 1.0, 1e9);
        assert!(d.get(2, 1).is_nan());
        assert_eq!(d.get(0, 2), 2.0);
    }

    #[test]
    fn test_max_distance_cuts_off() {
        let passable = Raster::filled(6, 1, 1u8);
        let d = cost_distance(&passable, &[0], 10.0, 25.0);
        assert_eq!(d.data[2], 20.0);
        assert!(d.data[3].is_nan());
    }

    #[test]
    fn test_source_outside_passable_still_seeds() {
        let passable = Raster::from_vec(3, 1, vec![0u8, 1, 1]).unwrap();
        let d = cost_distance(&passable, &[0], 1.0, 1e9);
        assert_eq!(d.data, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_no_sources_all_nan() {
        let passable = Raster::filled(2, 2, 1u8);
        let d = cost_distance(&passable, &[], 1.0, 1e9);
        assert!(d.data.iter().all(|v| v.is_nan()));
    }
}
