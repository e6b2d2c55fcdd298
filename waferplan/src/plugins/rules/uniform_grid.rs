//! Uniform-grid rule: a lattice of sample points snapped to the nearest
//! available dies.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use super::{from_value, CostClass, CostEstimate, RuleParams, RuleSite, SamplingRule};
use crate::exec::ExecContext;
use crate::plugins::ParamIssue;
use crate::wafer::WaferMap;
use wafergeom::{Point, Transformation};

#[derive(Debug)]
pub struct UniformGridRule;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireParams {
    grid_spacing: f64,
    #[serde(default)]
    offset_x: f64,
    #[serde(default)]
    offset_y: f64,
    #[serde(default)]
    rotation: f64,
}

impl SamplingRule for UniformGridRule {
    fn name(&self) -> &'static str {
        "uniformGrid"
    }

    fn validate(&self, params: &Value) -> Result<RuleParams, Vec<ParamIssue>> {
        let wire: WireParams = from_value(params)?;
        let mut issues = Vec::new();
        if !(wire.grid_spacing > 0.0) {
            issues.push(ParamIssue::new("gridSpacing", "must be positive"));
        }
        if !(-360.0..=360.0).contains(&wire.rotation) {
            issues.push(ParamIssue::new("rotation", "must be within [-360, 360]"));
        }
        if !issues.is_empty() {
            return Err(issues);
        }
        Ok(RuleParams::UniformGrid {
            grid_spacing: wire.grid_spacing,
            offset_x: wire.offset_x,
            offset_y: wire.offset_y,
            rotation_deg: wire.rotation,
        })
    }

    fn apply(&self, wafer: &WaferMap, params: &RuleParams, _ctx: &ExecContext) -> Vec<RuleSite> {
        let RuleParams::UniformGrid {
            grid_spacing,
            offset_x,
            offset_y,
            rotation_deg,
        } = params
        else {
            return Vec::new();
        };
        let Some((min_x, min_y, max_x, max_y)) = wafer.grid_bounds() else {
            return Vec::new();
        };
        let spacing = *grid_spacing;
        let rotation = Transformation::rotate(*rotation_deg);

        // Lattice extents cover the wafer with one spacing of slack so a
        // rotated lattice still reaches the corners.
        let half_diag = Point::new(min_x as f64, min_y as f64)
            .distance_to(Point::new(max_x as f64, max_y as f64))
            / 2.0
            + spacing;
        let center = Point::new(
            (min_x + max_x) as f64 / 2.0,
            (min_y + max_y) as f64 / 2.0,
        );
        let steps = (half_diag / spacing).ceil() as i64;
        let available: Vec<&crate::wafer::Die> = wafer.available_dies().collect();

        // Best lattice hit per die; duplicates keep the higher priority.
        let mut best: HashMap<(i32, i32), RuleSite> = HashMap::new();
        for i in -steps..=steps {
            for j in -steps..=steps {
                let lattice = Point::new(i as f64 * spacing, j as f64 * spacing);
                let p = rotation.apply(lattice);
                let p = Point::new(p.x + center.x + offset_x, p.y + center.y + offset_y);

                let mut nearest: Option<(f64, &crate::wafer::Die)> = None;
                for die in &available {
                    let d = die.position().distance_to(p);
                    if nearest.map_or(true, |(bd, _)| d < bd) {
                        nearest = Some((d, *die));
                    }
                }
                let Some((snap_distance, die)) = nearest else { continue };
                if snap_distance > spacing {
                    continue;
                }
                let priority = (1.0 - snap_distance / spacing).clamp(0.0, 1.0);
                let site = RuleSite::new(*die, priority);
                best.entry(die.coord())
                    .and_modify(|kept| {
                        if site.priority > kept.priority {
                            *kept = site;
                        }
                    })
                    .or_insert(site);
            }
        }

        let mut sites: Vec<RuleSite> = best.into_values().collect();
        sites.sort_by(|a, b| (a.die.y, a.die.x).cmp(&(b.die.y, b.die.x)));
        sites
    }

    fn estimate(&self, wafer: &WaferMap, params: &RuleParams) -> CostEstimate {
        let RuleParams::UniformGrid { grid_spacing, .. } = params else {
            return CostEstimate {
                expected_point_count: 0,
                expected_cost_class: CostClass::Low,
            };
        };
        let expected = match wafer.grid_bounds() {
            Some((min_x, min_y, max_x, max_y)) => {
                let w = (max_x - min_x + 1) as f64;
                let h = (max_y - min_y + 1) as f64;
                let cols = (w / grid_spacing).ceil() + 1.0;
                let rows = (h / grid_spacing).ceil() + 1.0;
                (cols * rows) as usize
            }
            None => 0,
        };
        let class = if expected > 10_000 {
            CostClass::High
        } else if expected > 1_000 {
            CostClass::Medium
        } else {
            CostClass::Low
        };
        CostEstimate {
            expected_point_count: expected.min(wafer.len()),
            expected_cost_class: class,
        }
    }
}
