//! Fixed-point rule: selects explicitly listed grid coordinates.

use serde::Deserialize;
use serde_json::Value;

use super::{from_value, CostClass, CostEstimate, RuleParams, RuleSite, SamplingRule};
use crate::exec::ExecContext;
use crate::plugins::ParamIssue;
use crate::wafer::WaferMap;

#[derive(Debug)]
pub struct FixedPointRule;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireParams {
    #[serde(default)]
    points: Vec<(i32, i32)>,
}

impl SamplingRule for FixedPointRule {
    fn name(&self) -> &'static str {
        "fixedPoint"
    }

    fn validate(&self, params: &Value) -> Result<RuleParams, Vec<ParamIssue>> {
        let wire: WireParams = from_value(params)?;
        if wire.points.is_empty() {
            return Err(vec![ParamIssue::new(
                "points",
                "at least one point is required",
            )]);
        }
        Ok(RuleParams::FixedPoint {
            points: wire.points,
        })
    }

    fn apply(&self, wafer: &WaferMap, params: &RuleParams, _ctx: &ExecContext) -> Vec<RuleSite> {
        let RuleParams::FixedPoint { points } = params else {
            return Vec::new();
        };
        // Coordinates absent from the wafer map are dropped; the engine
        // reports a warning when nothing remains.
        points
            .iter()
            .filter_map(|&(x, y)| wafer.get(x, y))
            .map(|die| RuleSite::new(*die, 1.0))
            .collect()
    }

    fn estimate(&self, _wafer: &WaferMap, params: &RuleParams) -> CostEstimate {
        let expected = match params {
            RuleParams::FixedPoint { points } => points.len(),
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
    fn validate_requires_points() {
        let rule = FixedPointRule;
        let issues = rule.validate(&json!({ "points": [] })).unwrap_err();
        assert_eq!(issues[0].field.as_deref(), Some("points"));

        let params = rule
            .validate(&json!({ "points": [[0, 0], [2, 1]] }))
            .unwrap();
        assert_eq!(
            params,
            RuleParams::FixedPoint {
                points: vec![(0, 0), (2, 1)]
            }
        );
    }

    #[test]
    fn missing_coordinates_drop_silently() {
        let rule = FixedPointRule;
        let params = RuleParams::FixedPoint {
            points: vec![(0, 0), (1, 1), (99, 99)],
        };
        let sites = rule.apply(&grid(3), &params, &ctx());
        assert_eq!(sites.len(), 2);
        assert!(sites.iter().all(|s| s.priority == 1.0));
    }
}
