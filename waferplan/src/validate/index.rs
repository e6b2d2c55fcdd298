//! An axis-aligned interval index over die boundaries.
//!
//! Boundaries are sorted by `x_min` with a running maximum of `x_max`, so
//! a point lookup binary-searches the x interval and scans only the
//! candidates whose x range can still contain the query.

use wafergeom::Point;

use crate::schematic::DieBoundary;

pub struct BoundaryIndex {
    /// Indices into the original boundary slice, sorted by x_min.
    order: Vec<usize>,
    x_mins: Vec<f64>,
    /// prefix_max[i] = max x_max over order[0..=i].
    prefix_max: Vec<f64>,
    bounds: Vec<(f64, f64, f64, f64)>,
}

impl BoundaryIndex {
    pub fn new(boundaries: &[DieBoundary]) -> Self {
        let mut order: Vec<usize> = (0..boundaries.len()).collect();
        order.sort_by(|&a, &b| {
            boundaries[a]
                .bounds
                .x_min
                .partial_cmp(&boundaries[b].bounds.x_min)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let x_mins: Vec<f64> = order.iter().map(|&i| boundaries[i].bounds.x_min).collect();
        let mut prefix_max = Vec::with_capacity(order.len());
        let mut running = f64::NEG_INFINITY;
        for &i in &order {
            running = running.max(boundaries[i].bounds.x_max);
            prefix_max.push(running);
        }
        let bounds = order
            .iter()
            .map(|&i| {
                let b = boundaries[i].bounds;
                (b.x_min, b.y_min, b.x_max, b.y_max)
            })
            .collect();
        Self {
            order,
            x_mins,
            prefix_max,
            bounds,
        }
    }

    /// Returns the original index of a boundary containing `p`, preferring
    /// the lowest x_min on overlap. Containment is inclusive.
    pub fn find(&self, p: Point) -> Option<usize> {
        // Last slot whose x_min <= p.x.
        let upper = self.x_mins.partition_point(|&x| x <= p.x);
        if upper == 0 {
            return None;
        }
        let mut best: Option<usize> = None;
        for slot in (0..upper).rev() {
            if self.prefix_max[slot] < p.x {
                break;
            }
            let (x_min, y_min, x_max, y_max) = self.bounds[slot];
            if x_min <= p.x && p.x <= x_max && y_min <= p.y && p.y <= y_max {
                best = Some(slot);
            }
        }
        best.map(|slot| self.order[slot])
    }
}
