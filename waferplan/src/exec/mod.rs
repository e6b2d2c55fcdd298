//! The execution engine: runs a compiled strategy against a wafer map.
//!
//! Soft failures (no eligible rules, an empty wafer, infeasible tool
//! constraints) return a well-formed empty result with an explanatory
//! warning rather than an error, so interactive previews never crash.
//! Given the same compiled strategy, wafer, and context, execution is
//! bit-exact reproducible.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use indexmap::IndexMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use wafergeom::{Bounds, Point, TransformConfig, Transformation};

use crate::budget::OpBudget;
use crate::error::Result;
use crate::strategy::compile::CompiledStrategy;
use crate::wafer::WaferMap;

/// Tool-imposed limits on the selected site list.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolConstraints {
    pub max_sites: Option<usize>,
    /// Minimum Euclidean spacing between kept sites, on transformed
    /// coordinates.
    pub min_spacing: Option<f64>,
}

/// Runtime context a strategy executes against.
#[derive(Debug, Clone, Default)]
pub struct ExecContext {
    pub process_params: IndexMap<String, Value>,
    pub tool_constraints: ToolConstraints,
    pub wafer_size: Option<String>,
    pub product_type: Option<String>,
    pub process_layer: Option<String>,
    pub defect_density: Option<f64>,
    /// Seed injected into seedless random rules; the engine derives it
    /// from the compiled strategy before rules run.
    pub fallback_seed: u64,
}

/// One ranked measurement site.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SelectedPoint {
    pub x: f64,
    pub y: f64,
    /// Contributing rule names, comma-joined in alphabetical order.
    pub rule_source: String,
    pub priority: f64,
    pub available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CoverageStats {
    pub total_dies: usize,
    pub available_dies: usize,
    pub selected_count: usize,
    pub coverage_pct: f64,
    /// Points produced per rule; gated rules appear with a count of 0.
    pub rule_distribution: IndexMap<String, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub centroid: Option<Point>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_bounds: Option<Bounds>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub execution_ms: u64,
    pub rules_executed: usize,
    pub candidates_before_dedup: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub selected_points: Vec<SelectedPoint>,
    pub coverage_stats: CoverageStats,
    pub performance_metrics: PerformanceMetrics,
    pub warnings: Vec<String>,
}

/// Executes compiled strategies.
pub struct ExecutionEngine {
    /// Hard cap on sites after `max_sites` clamping.
    site_cap: usize,
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        Self { site_cap: 10_000 }
    }
}

impl ExecutionEngine {
    pub fn new(site_cap: usize) -> Self {
        Self { site_cap }
    }

    pub fn execute(
        &self,
        compiled: &CompiledStrategy,
        wafer: &WaferMap,
        ctx: &ExecContext,
        budget: &OpBudget,
    ) -> Result<SimulationResult> {
        let started = Instant::now();
        let mut warnings = Vec::new();
        let mut rule_distribution: IndexMap<String, usize> = compiled
            .rules
            .iter()
            .map(|r| (r.name.to_string(), 0))
            .collect();

        let empty = |warnings: Vec<String>, distribution: IndexMap<String, usize>, started: Instant| {
            SimulationResult {
                selected_points: Vec::new(),
                coverage_stats: CoverageStats {
                    total_dies: wafer.len(),
                    available_dies: wafer.available_count(),
                    selected_count: 0,
                    coverage_pct: 0.0,
                    rule_distribution: distribution,
                    centroid: None,
                    selected_bounds: None,
                },
                performance_metrics: PerformanceMetrics {
                    execution_ms: started.elapsed().as_millis() as u64,
                    rules_executed: 0,
                    candidates_before_dedup: 0,
                },
                warnings,
            }
        };

        if wafer.is_empty() {
            warnings.push("empty wafer map: no dies to sample".to_string());
            return Ok(empty(warnings, rule_distribution, started));
        }
        if ctx.tool_constraints.max_sites == Some(0) {
            warnings.push("tool constraint maxSites = 0 leaves no feasible sites".to_string());
            return Ok(empty(warnings, rule_distribution, started));
        }

        // Gate rules on their conditions and the strategy-wide conditions.
        let globally_gated = compiled
            .global_conditions
            .as_ref()
            .map(|c| !c.matches(ctx))
            .unwrap_or(false);
        let eligible: Vec<&crate::strategy::compile::CompiledRule> = if globally_gated {
            Vec::new()
        } else {
            compiled
                .rules
                .iter()
                .filter(|r| r.conditions.as_ref().map(|c| c.matches(ctx)).unwrap_or(true))
                .collect()
        };

        let weight_sum: f64 = eligible.iter().map(|r| r.weight).sum();
        if eligible.is_empty() || weight_sum <= 0.0 {
            warnings.push(
                "no eligible rules: every rule was gated out by its conditions or carries zero weight"
                    .to_string(),
            );
            return Ok(empty(warnings, rule_distribution, started));
        }

        // Inject the derived seed for seedless random rules.
        let ctx = ExecContext {
            fallback_seed: if ctx.fallback_seed != 0 {
                ctx.fallback_seed
            } else {
                compiled.derived_seed()
            },
            ..ctx.clone()
        };

        // Apply rules and merge with weight normalization; coordinate
        // collisions keep the maximum final priority and record every
        // contributing rule.
        struct Candidate {
            priority: f64,
            sources: BTreeSet<String>,
            available: bool,
        }
        let mut merged: BTreeMap<(i32, i32), Candidate> = BTreeMap::new();
        let mut candidates_before_dedup = 0usize;

        for rule in &eligible {
            budget.check()?;
            let estimate = rule.plugin.estimate(wafer, &rule.params);
            let sites = rule.plugin.apply(wafer, &rule.params, &ctx);
            rule_distribution.insert(rule.name.to_string(), sites.len());

            if sites.is_empty() {
                warnings.push(format!("rule {} produced no points", rule.name));
            } else if sites.len() > estimate.expected_point_count.saturating_mul(3) {
                warnings.push(format!(
                    "rule {} produced {} points, more than 3x its estimate of {}",
                    rule.name,
                    sites.len(),
                    estimate.expected_point_count
                ));
            }

            candidates_before_dedup += sites.len();
            let normalized_weight = rule.weight / weight_sum;
            for site in sites {
                let final_priority = site.priority * normalized_weight;
                let entry = merged
                    .entry(site.die.coord())
                    .or_insert_with(|| Candidate {
                        priority: final_priority,
                        sources: BTreeSet::new(),
                        available: site.die.available,
                    });
                entry.priority = entry.priority.max(final_priority);
                entry.sources.insert(rule.name.to_string());
            }
        }

        // Transform coordinates (flip, scale, rotate, translate).
        let transform = compiled
            .transformations
            .as_ref()
            .filter(|t| !t.is_identity())
            .map(Transformation::from_config);
        let wafer_bounds = wafer.grid_bounds().map(|(x0, y0, x1, y1)| {
            Bounds::new(x0 as f64, y0 as f64, x1 as f64, y1 as f64)
        });

        let mut points: Vec<SelectedPoint> = Vec::with_capacity(merged.len());
        let mut out_of_bounds = 0usize;
        for ((x, y), candidate) in merged {
            let raw = Point::new(x as f64, y as f64);
            let p = transform.as_ref().map(|t| t.apply(raw)).unwrap_or(raw);
            if let Some(b) = &wafer_bounds {
                if !b.contains(p) {
                    out_of_bounds += 1;
                }
            }
            points.push(SelectedPoint {
                x: p.x,
                y: p.y,
                rule_source: candidate.sources.iter().join(","),
                priority: candidate.priority,
                available: candidate.available,
            });
        }
        if out_of_bounds > 0 {
            warnings.push(format!(
                "{out_of_bounds} transformed point(s) fall outside the wafer map bounds"
            ));
        }

        sort_points(&mut points);

        // Tool constraints: greedy min-spacing from the highest priority,
        // then the max-sites truncation, then the engine's hard cap.
        let candidate_count = points.len();
        if let Some(min_spacing) = ctx.tool_constraints.min_spacing {
            if min_spacing > 0.0 {
                let mut kept: Vec<SelectedPoint> = Vec::with_capacity(points.len());
                for p in points.drain(..) {
                    let too_close = kept.iter().any(|k| {
                        Point::new(k.x, k.y).distance_to(Point::new(p.x, p.y)) < min_spacing
                    });
                    if !too_close {
                        kept.push(p);
                    }
                }
                let rejected = candidate_count - kept.len();
                if candidate_count > 0 && rejected * 5 > candidate_count {
                    warnings.push(format!(
                        "minSpacing rejected {rejected} of {candidate_count} candidates"
                    ));
                }
                points = kept;
            }
        }
        if let Some(max_sites) = ctx.tool_constraints.max_sites {
            points.truncate(max_sites);
        }
        points.truncate(self.site_cap);

        // Statistics over the final list.
        let selected_count = points.len();
        let available_dies = wafer.available_count();
        let coverage_pct = if available_dies > 0 {
            selected_count as f64 / available_dies as f64 * 100.0
        } else {
            0.0
        };
        let centroid = if selected_count > 0 {
            let sum = points
                .iter()
                .fold(Point::zero(), |acc, p| acc + Point::new(p.x, p.y));
            Some(Point::new(
                sum.x / selected_count as f64,
                sum.y / selected_count as f64,
            ))
        } else {
            None
        };
        let selected_bounds = Bounds::enclosing(
            points
                .iter()
                .map(|p| Bounds::from_point(Point::new(p.x, p.y))),
        );

        Ok(SimulationResult {
            selected_points: points,
            coverage_stats: CoverageStats {
                total_dies: wafer.len(),
                available_dies,
                selected_count,
                coverage_pct,
                rule_distribution,
                centroid,
                selected_bounds,
            },
            performance_metrics: PerformanceMetrics {
                execution_ms: started.elapsed().as_millis() as u64,
                rules_executed: eligible.len(),
                candidates_before_dedup,
            },
            warnings,
        })
    }
}

/// Priority descending, ties broken by (ruleSource, x, y) ascending.
fn sort_points(points: &mut [SelectedPoint]) {
    points.sort_by(|a, b| {
        b.priority
            .partial_cmp(&a.priority)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.rule_source.cmp(&b.rule_source))
            .then_with(|| a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| a.y.partial_cmp(&b.y).unwrap_or(std::cmp::Ordering::Equal))
    });
}
