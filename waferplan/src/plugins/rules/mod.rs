//! Sampling rule plugins.
//!
//! Rules are pure functions of their inputs: the same wafer map, validated
//! parameters, and execution context always produce the same sites.
//! Priorities are local to the rule in [0, 1]; the execution engine
//! normalizes across rules via weights.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ParamIssue;
use crate::exec::ExecContext;
use crate::wafer::{Die, WaferMap};

pub mod center_edge;
pub mod fixed_point;
pub mod random;
pub mod uniform_grid;

/// A candidate site emitted by a rule.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RuleSite {
    pub die: Die,
    /// Rule-local priority in [0, 1].
    pub priority: f64,
}

impl RuleSite {
    pub fn new(die: Die, priority: f64) -> Self {
        Self {
            die,
            priority: priority.clamp(0.0, 1.0),
        }
    }
}

/// Validated parameters for the built-in rules.
///
/// Free-form wire parameters are checked by each plugin's `validate` and
/// narrowed into one of these variants before execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum RuleParams {
    FixedPoint {
        points: Vec<(i32, i32)>,
    },
    CenterEdge {
        center_count: usize,
        edge_count: usize,
        edge_margin: i32,
    },
    UniformGrid {
        grid_spacing: f64,
        offset_x: f64,
        offset_y: f64,
        rotation_deg: f64,
    },
    RandomSampling {
        count: usize,
        seed: Option<u64>,
    },
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CostClass {
    Low,
    Medium,
    High,
}

/// A rule's own estimate of its execution cost, used by the engine for
/// early warnings.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CostEstimate {
    pub expected_point_count: usize,
    pub expected_cost_class: CostClass,
}

/// The rule plugin contract.
pub trait SamplingRule: Send + Sync + std::fmt::Debug {
    /// Registry name, e.g. `"centerEdge"`.
    fn name(&self) -> &'static str;

    /// Checks free-form parameters, returning the validated form or every
    /// problem found.
    fn validate(&self, params: &Value) -> Result<RuleParams, Vec<ParamIssue>>;

    /// Emits candidate sites with rule-local priorities.
    fn apply(&self, wafer: &WaferMap, params: &RuleParams, ctx: &ExecContext) -> Vec<RuleSite>;

    /// Estimates point count and cost class for the given wafer.
    fn estimate(&self, wafer: &WaferMap, params: &RuleParams) -> CostEstimate;
}

/// Deserializes wire parameters into `T`, mapping serde failures onto a
/// single general issue.
pub(crate) fn from_value<T: serde::de::DeserializeOwned>(
    params: &Value,
) -> Result<T, Vec<ParamIssue>> {
    serde_json::from_value(params.clone()).map_err(|e| vec![ParamIssue::general(e.to_string())])
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::exec::ExecContext;
    use crate::wafer::{Die, WaferMap};

    pub fn grid(n: i32) -> WaferMap {
        WaferMap::new((0..n).flat_map(|x| (0..n).map(move |y| Die::new(x, y))))
    }

    pub fn ctx() -> ExecContext {
        ExecContext::default()
    }
}
