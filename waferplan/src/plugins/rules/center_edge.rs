//! Center-edge rule: dies nearest the wafer centroid plus dies on the
//! edge-margin ring.

use serde::Deserialize;
use serde_json::Value;

use super::{from_value, CostClass, CostEstimate, RuleParams, RuleSite, SamplingRule};
use crate::exec::ExecContext;
use crate::plugins::ParamIssue;
use crate::wafer::{Die, WaferMap};

#[derive(Debug)]
pub struct CenterEdgeRule;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireParams {
    #[serde(default = "default_center_count")]
    center_count: usize,
    #[serde(default = "default_edge_count")]
    edge_count: usize,
    #[serde(default)]
    edge_margin: i32,
}

fn default_center_count() -> usize {
    1
}

fn default_edge_count() -> usize {
    4
}

impl SamplingRule for CenterEdgeRule {
    fn name(&self) -> &'static str {
        "centerEdge"
    }

    fn validate(&self, params: &Value) -> Result<RuleParams, Vec<ParamIssue>> {
        let wire: WireParams = from_value(params)?;
        let mut issues = Vec::new();
        if wire.center_count == 0 && wire.edge_count == 0 {
            issues.push(ParamIssue::general(
                "centerCount and edgeCount cannot both be zero",
            ));
        }
        if wire.edge_margin < 0 {
            issues.push(ParamIssue::new("edgeMargin", "must be non-negative"));
        }
        if !issues.is_empty() {
            return Err(issues);
        }
        Ok(RuleParams::CenterEdge {
            center_count: wire.center_count,
            edge_count: wire.edge_count,
            edge_margin: wire.edge_margin,
        })
    }

    fn apply(&self, wafer: &WaferMap, params: &RuleParams, _ctx: &ExecContext) -> Vec<RuleSite> {
        let RuleParams::CenterEdge {
            center_count,
            edge_count,
            edge_margin,
        } = params
        else {
            return Vec::new();
        };
        let Some(centroid) = wafer.centroid() else {
            return Vec::new();
        };
        let Some((min_x, min_y, max_x, max_y)) = wafer.grid_bounds() else {
            return Vec::new();
        };

        let mut sites = Vec::new();

        // Center picks: closest to the centroid, priority falling linearly
        // from 1.0 to 0.8.
        let mut center_candidates: Vec<&Die> = wafer.available_dies().collect();
        center_candidates.sort_by(|a, b| {
            let da = a.position().distance_to(centroid);
            let db = b.position().distance_to(centroid);
            da.partial_cmp(&db)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then((a.y, a.x).cmp(&(b.y, b.x)))
        });
        let chosen_center: Vec<&Die> = center_candidates
            .iter()
            .take(*center_count)
            .copied()
            .collect();
        let span = chosen_center.len().saturating_sub(1).max(1) as f64;
        for (i, die) in chosen_center.iter().enumerate() {
            sites.push(RuleSite::new(**die, 1.0 - 0.2 * i as f64 / span));
        }

        // Edge picks: distance to the margin ring, nearest first.
        let ring_distance = |die: &Die| {
            let to_edge = (die.x - min_x)
                .min(max_x - die.x)
                .min(die.y - min_y)
                .min(max_y - die.y);
            (to_edge - edge_margin).abs() as f64
        };
        let mut edge_candidates: Vec<&Die> = wafer
            .available_dies()
            .filter(|d| !chosen_center.iter().any(|c| c.coord() == d.coord()))
            .collect();
        edge_candidates.sort_by(|a, b| {
            ring_distance(a)
                .partial_cmp(&ring_distance(b))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then((a.y, a.x).cmp(&(b.y, b.x)))
        });
        for die in edge_candidates.iter().take(*edge_count) {
            let d = ring_distance(die);
            sites.push(RuleSite::new(**die, 0.8 / (1.0 + d)));
        }

        sites
    }

    fn estimate(&self, _wafer: &WaferMap, params: &RuleParams) -> CostEstimate {
        let expected = match params {
            RuleParams::CenterEdge {
                center_count,
                edge_count,
                ..
            } => center_count + edge_count,
            _ => 0,
        };
        CostEstimate {
            expected_point_count: expected,
            expected_cost_class: CostClass::Low,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::testing::{ctx, grid};
    use super::*;

    #[test]
    fn defaults_apply() {
        let rule = CenterEdgeRule;
        let params = rule.validate(&json!({})).unwrap();
        assert_eq!(
            params,
            RuleParams::CenterEdge {
                center_count: 1,
                edge_count: 4,
                edge_margin: 0
            }
        );
    }

    #[test]
    fn center_pick_is_the_centroid_die() {
        let rule = CenterEdgeRule;
        let params = RuleParams::CenterEdge {
            center_count: 1,
            edge_count: 4,
            edge_margin: 0,
        };
        let sites = rule.apply(&grid(5), &params, &ctx());
        assert_eq!(sites.len(), 5);
        assert_eq!(sites[0].die.coord(), (2, 2));
        assert_eq!(sites[0].priority, 1.0);
        // Edge picks sit on the outer ring.
        for site in &sites[1..] {
            let (x, y) = site.die.coord();
            assert!(x == 0 || x == 4 || y == 0 || y == 4, "({x}, {y}) not on edge");
            assert!(site.priority <= 0.8);
        }
    }

    #[test]
    fn margin_moves_the_ring_inward() {
        let rule = CenterEdgeRule;
        let params = RuleParams::CenterEdge {
            center_count: 0,
            edge_count: 4,
            edge_margin: 1,
        };
        let sites = rule.apply(&grid(5), &params, &ctx());
        for site in &sites {
            let (x, y) = site.die.coord();
            let to_edge = x.min(4 - x).min(y).min(4 - y);
            assert_eq!(to_edge, 1, "({x}, {y}) not on the margin ring");
        }
    }

    #[test]
    fn empty_wafer_yields_nothing() {
        let rule = CenterEdgeRule;
        let params = RuleParams::CenterEdge {
            center_count: 1,
            edge_count: 4,
            edge_margin: 0,
        };
        assert!(rule
            .apply(&crate::wafer::WaferMap::default(), &params, &ctx())
            .is_empty());
    }
}
