//! Random-sampling rule: a seeded draw without replacement from the
//! available dies.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Deserialize;
use serde_json::Value;

use super::{from_value, CostClass, CostEstimate, RuleParams, RuleSite, SamplingRule};
use crate::exec::ExecContext;
use crate::plugins::ParamIssue;
use crate::wafer::{Die, WaferMap};

#[derive(Debug)]
pub struct RandomSamplingRule;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireParams {
    count: usize,
    #[serde(default)]
    seed: Option<u64>,
}

impl SamplingRule for RandomSamplingRule {
    fn name(&self) -> &'static str {
        "randomSampling"
    }

    fn validate(&self, params: &Value) -> Result<RuleParams, Vec<ParamIssue>> {
        let wire: WireParams = from_value(params)?;
        if wire.count == 0 {
            return Err(vec![ParamIssue::new("count", "must be at least 1")]);
        }
        Ok(RuleParams::RandomSampling {
            count: wire.count,
            seed: wire.seed,
        })
    }

    fn apply(&self, wafer: &WaferMap, params: &RuleParams, ctx: &ExecContext) -> Vec<RuleSite> {
        let RuleParams::RandomSampling { count, seed } = params else {
            return Vec::new();
        };
        // Candidate order is fixed before the draw so the result depends
        // only on the seed, not on wafer-map insertion order.
        let mut candidates: Vec<&Die> = wafer.available_dies().collect();
        candidates.sort_by_key(|d| (d.y, d.x));

        let mut rng = StdRng::seed_from_u64(seed.unwrap_or(ctx.fallback_seed));
        let mut sites: Vec<RuleSite> = candidates
            .choose_multiple(&mut rng, *count)
            .map(|die| RuleSite::new(**die, 0.5))
            .collect();
        sites.sort_by_key(|s| (s.die.y, s.die.x));
        sites
    }

    fn estimate(&self, wafer: &WaferMap, params: &RuleParams) -> CostEstimate {
        let expected = match params {
            RuleParams::RandomSampling { count, .. } => (*count).min(wafer.available_count()),
            _ => 0,
        };
        CostEstimate {
            expected_point_count: expected,
            expected_cost_class: CostClass::Low,
        }
    }
}
