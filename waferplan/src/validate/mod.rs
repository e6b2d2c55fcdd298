//! Geometric validation of a strategy against a parsed schematic.
//!
//! The strategy executes against a wafer map synthesized from the die
//! boundaries; each selected point is then mapped back into schematic
//! coordinates and checked against the boundaries themselves.

use arcstr::ArcStr;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wafergeom::Point;

use crate::budget::OpBudget;
use crate::error::Result;
use crate::exec::{ExecContext, ExecutionEngine};
use crate::schematic::{median, DieBoundary, SchematicData};
use crate::strategy::compile::CompiledStrategy;

pub mod index;

use index::BoundaryIndex;

/// How strictly conflicts are graded.
#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ValidationMode {
    Strict,
    #[default]
    Permissive,
}

#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ValidationStatus {
    Pass,
    Warning,
    Fail,
    #[default]
    NotValidated,
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ConflictType {
    OutOfBounds,
    Overlap,
    DuplicateSite,
    UnavailableDie,
    ClusterViolation,
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    /// Weight used in the alignment score.
    fn weight(&self) -> f64 {
        match self {
            Self::Error => 1.0,
            Self::Warning => 0.4,
            Self::Info => 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationConflict {
    pub conflict_type: ConflictType,
    pub strategy_point: Point,
    pub description: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_die_id: Option<ArcStr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

/// Append-only validation record, keyed by (schematic, strategy, date).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub id: Uuid,
    pub strategy_id: Uuid,
    pub schematic_id: Uuid,
    pub validation_status: ValidationStatus,
    pub alignment_score: f64,
    pub coverage_pct: f64,
    pub total_points: usize,
    pub valid_points: usize,
    pub conflicts: Vec<ValidationConflict>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
    pub validated_by: String,
    pub validation_date: DateTime<Utc>,
}

impl ValidationResult {
    pub fn has_errors(&self) -> bool {
        self.conflicts
            .iter()
            .any(|c| c.severity == Severity::Error)
    }
}

/// Default cluster limit: more points than this within one die width is a
/// cluster violation.
pub const MAX_CLUSTER_DENSITY: usize = 3;

pub struct Validator {
    engine: ExecutionEngine,
    max_cluster_density: usize,
}

impl Default for Validator {
    fn default() -> Self {
        Self {
            engine: ExecutionEngine::default(),
            max_cluster_density: MAX_CLUSTER_DENSITY,
        }
    }
}

impl Validator {
    pub fn new(engine: ExecutionEngine) -> Self {
        Self {
            engine,
            max_cluster_density: MAX_CLUSTER_DENSITY,
        }
    }

    pub fn validate(
        &self,
        schematic: &SchematicData,
        compiled: &CompiledStrategy,
        mode: ValidationMode,
        ctx: &ExecContext,
        validated_by: &str,
        budget: &OpBudget,
    ) -> Result<ValidationResult> {
        let mut result = ValidationResult {
            id: Uuid::new_v4(),
            strategy_id: compiled.definition_id,
            schematic_id: schematic.id,
            validation_status: ValidationStatus::NotValidated,
            alignment_score: 0.0,
            coverage_pct: 0.0,
            total_points: 0,
            valid_points: 0,
            conflicts: Vec::new(),
            warnings: Vec::new(),
            recommendations: Vec::new(),
            validated_by: validated_by.to_string(),
            validation_date: Utc::now(),
        };

        let Some(synthesis) = schematic.synthesize_wafer_map() else {
            result
                .warnings
                .push("schematic has no die boundaries to validate against".to_string());
            return Ok(result);
        };

        let mut ctx = ctx.clone();
        if ctx.wafer_size.is_none() {
            ctx.wafer_size = schematic.wafer_size.clone();
        }
        let simulation = self
            .engine
            .execute(compiled, &synthesis.wafer, &ctx, budget)?;
        result.warnings.extend(simulation.warnings.iter().cloned());

        let index = BoundaryIndex::new(&schematic.dies);
        let mut hit: Vec<bool> = vec![false; schematic.dies.len()];
        let mut mapped: Vec<Point> = Vec::with_capacity(simulation.selected_points.len());

        result.total_points = simulation.selected_points.len();
        for point in &simulation.selected_points {
            budget.check()?;
            let p = synthesis.grid_to_schematic(Point::new(point.x, point.y));
            mapped.push(p);

            let Some(slot) = index.find(p) else {
                result.conflicts.push(ValidationConflict {
                    conflict_type: ConflictType::OutOfBounds,
                    strategy_point: p,
                    description: format!(
                        "point ({:.3}, {:.3}) lies outside every die boundary",
                        p.x, p.y
                    ),
                    severity: escalate(Severity::Warning, mode),
                    affected_die_id: None,
                    recommendation: None,
                });
                continue;
            };
            let boundary: &DieBoundary = &schematic.dies[slot];
            result.valid_points += 1;

            if hit[slot] {
                result.conflicts.push(ValidationConflict {
                    conflict_type: ConflictType::DuplicateSite,
                    strategy_point: p,
                    description: format!(
                        "die {} is targeted by more than one selected point",
                        boundary.die_id
                    ),
                    severity: escalate(Severity::Warning, mode),
                    affected_die_id: Some(boundary.die_id.clone()),
                    recommendation: None,
                });
            }
            hit[slot] = true;

            if !boundary.available {
                result.conflicts.push(ValidationConflict {
                    conflict_type: ConflictType::UnavailableDie,
                    strategy_point: p,
                    description: format!("die {} is marked unavailable", boundary.die_id),
                    severity: Severity::Warning,
                    affected_die_id: Some(boundary.die_id.clone()),
                    recommendation: None,
                });
            }
        }

        self.check_clusters(&mapped, schematic, &mut result);

        // Alignment: 1 minus the severity-weighted conflict mass per point.
        result.alignment_score = if result.total_points == 0 {
            0.0
        } else {
            let penalty: f64 = result.conflicts.iter().map(|c| c.severity.weight()).sum();
            (1.0 - penalty / result.total_points as f64).clamp(0.0, 1.0)
        };

        let boundaries_hit = hit.iter().filter(|h| **h).count();
        result.coverage_pct = if schematic.dies.is_empty() {
            0.0
        } else {
            (boundaries_hit as f64 / schematic.dies.len() as f64 * 100.0).clamp(0.0, 100.0)
        };

        if result.coverage_pct < 50.0 {
            result.warnings.push(format!(
                "strategy covers only {:.1}% of die boundaries",
                result.coverage_pct
            ));
        }

        result.validation_status = if result.has_errors() {
            ValidationStatus::Fail
        } else if result.alignment_score >= 0.9 {
            ValidationStatus::Pass
        } else if result.alignment_score >= 0.5 {
            ValidationStatus::Warning
        } else {
            ValidationStatus::Fail
        };

        result.recommendations = recommendations(&result);
        Ok(result)
    }

    /// Flags neighborhoods holding more than `max_cluster_density` points
    /// within a radius of one median die width.
    fn check_clusters(
        &self,
        mapped: &[Point],
        schematic: &SchematicData,
        result: &mut ValidationResult,
    ) {
        let Some(radius) = median(schematic.dies.iter().map(|d| d.width())) else {
            return;
        };
        if radius <= 0.0 {
            return;
        }
        for (i, center) in mapped.iter().enumerate() {
            let neighbors = mapped
                .iter()
                .filter(|p| p.distance_to(*center) <= radius)
                .count();
            if neighbors > self.max_cluster_density {
                // One conflict per cluster: report only the first member.
                let already = result.conflicts.iter().any(|c| {
                    c.conflict_type == ConflictType::ClusterViolation
                        && c.strategy_point.distance_to(*center) <= radius
                });
                if !already {
                    result.conflicts.push(ValidationConflict {
                        conflict_type: ConflictType::ClusterViolation,
                        strategy_point: mapped[i],
                        description: format!(
                            "{neighbors} points cluster within a radius of {radius:.3}"
                        ),
                        severity: Severity::Info,
                        affected_die_id: None,
                        recommendation: None,
                    });
                }
            }
        }
    }
}

fn escalate(severity: Severity, mode: ValidationMode) -> Severity {
    match mode {
        ValidationMode::Strict => Severity::Error,
        ValidationMode::Permissive => severity,
    }
}

/// Deterministic recommendation table, keyed by the dominant conflict type.
fn recommendations(result: &ValidationResult) -> Vec<String> {
    let mut counts: [(ConflictType, usize); 4] = [
        (ConflictType::OutOfBounds, 0),
        (ConflictType::DuplicateSite, 0),
        (ConflictType::UnavailableDie, 0),
        (ConflictType::ClusterViolation, 0),
    ];
    for conflict in &result.conflicts {
        for entry in counts.iter_mut() {
            if entry.0 == conflict.conflict_type {
                entry.1 += 1;
            }
        }
    }

    let mut out = Vec::new();
    if let Some((dominant, _)) = counts
        .iter()
        .filter(|(_, n)| *n > 0)
        .max_by_key(|(_, n)| *n)
    {
        out.push(
            match dominant {
                ConflictType::OutOfBounds => "Adjust transformation offset or edge margin",
                ConflictType::DuplicateSite => {
                    "Reduce rule overlap or add a minimum spacing constraint"
                }
                ConflictType::UnavailableDie => {
                    "Mark the affected dies available or exclude them from the sampling rules"
                }
                ConflictType::ClusterViolation => {
                    "Spread sampling points or lower the cluster density"
                }
                ConflictType::Overlap => "Review overlapping sampling regions",
            }
            .to_string(),
        );
    }
    let error_count = result
        .conflicts
        .iter()
        .filter(|c| c.severity == Severity::Error)
        .count();
    if error_count > 0 {
        out.push(format!(
            "Fix {error_count} critical conflict(s) before deploying this strategy"
        ));
    }
    if result.conflicts.is_empty() && result.alignment_score < 0.9 {
        out.push("Review rule weights to improve alignment".to_string());
    }
    if result.coverage_pct < 50.0 {
        out.push("Increase sampling density to improve wafer coverage".to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use wafergeom::{Bounds, CoordinateSystem, TransformConfig};

    use super::*;
    use crate::plugins::{RuleRegistry, VendorRegistry};
    use crate::schematic::{FormatType, SchematicMetadata};
    use crate::strategy::compile::StrategyCompiler;
    use crate::strategy::{RuleConfig, StrategyDefinition};

    fn grid_schematic(n: i32) -> SchematicData {
        let mut dies = Vec::new();
        for y in 0..n {
            for x in 0..n {
                let x0 = x as f64 * 10.0;
                let y0 = y as f64 * 10.0;
                dies.push(DieBoundary::new(
                    format!("die_{:03}", y * n + x + 1),
                    Bounds::new(x0, y0, x0 + 8.0, y0 + 8.0),
                ));
            }
        }
        SchematicData::new(
            "grid.svg",
            FormatType::Svg,
            CoordinateSystem::SvgUnits,
            dies,
            SchematicMetadata::default(),
        )
    }

    fn compiled(rules: Vec<RuleConfig>, transform: Option<TransformConfig>) -> Arc<CompiledStrategy> {
        let mut builder = StrategyDefinition::builder();
        builder
            .name("validate-me")
            .process_step("litho")
            .tool_type("scanner")
            .author("eng")
            .rules(rules);
        if let Some(t) = transform {
            builder.transformations(t);
        }
        let def = builder.build().unwrap();
        StrategyCompiler::new(
            Arc::new(RuleRegistry::builtin()),
            Arc::new(VendorRegistry::builtin()),
        )
        .compile(&def)
        .unwrap()
    }

    fn validate(
        schematic: &SchematicData,
        strategy: &CompiledStrategy,
        mode: ValidationMode,
    ) -> ValidationResult {
        Validator::default()
            .validate(
                schematic,
                strategy,
                mode,
                &ExecContext::default(),
                "tester",
                &OpBudget::unlimited("validate"),
            )
            .unwrap()
    }

    #[test]
    fn clean_strategy_passes() {
        let schematic = grid_schematic(3);
        let strategy = compiled(
            vec![
                RuleConfig::new("fixedPoint", json!({ "points": [[0,0],[1,1],[2,2]] }), 0.4),
                RuleConfig::new("centerEdge", json!({ "edgeMargin": 5 }), 0.3),
                RuleConfig::new("uniformGrid", json!({ "gridSpacing": 10.0 }), 0.3),
            ],
            None,
        );
        let result = validate(&schematic, &strategy, ValidationMode::Permissive);
        assert!(result.conflicts.is_empty(), "{:?}", result.conflicts);
        assert!(result.alignment_score >= 0.8);
        assert!(result.coverage_pct >= 50.0);
        assert_eq!(result.validation_status, ValidationStatus::Pass);
        assert!(result.warnings.len() <= 2, "{:?}", result.warnings);
    }

    #[test]
    fn offset_transform_pushes_points_out_of_bounds() {
        let schematic = grid_schematic(3);
        let strategy = compiled(
            vec![RuleConfig::new(
                "fixedPoint",
                json!({ "points": [[0,0],[1,1],[2,2]] }),
                1.0,
            )],
            Some(TransformConfig {
                offset_x: 100.0,
                ..Default::default()
            }),
        );
        let result = validate(&schematic, &strategy, ValidationMode::Permissive);
        assert_eq!(result.total_points, 3);
        assert_eq!(result.valid_points, 0);
        assert!(result
            .conflicts
            .iter()
            .all(|c| c.conflict_type == ConflictType::OutOfBounds));
        assert!(result
            .recommendations
            .iter()
            .any(|r| r.contains("transformation offset")));
    }

    #[test]
    fn strict_mode_escalates_to_errors() {
        let schematic = grid_schematic(3);
        let strategy = compiled(
            vec![RuleConfig::new(
                "fixedPoint",
                json!({ "points": [[0, 0]] }),
                1.0,
            )],
            Some(TransformConfig {
                offset_x: 100.0,
                ..Default::default()
            }),
        );
        let permissive = validate(&schematic, &strategy, ValidationMode::Permissive);
        assert!(!permissive.has_errors());
        let strict = validate(&schematic, &strategy, ValidationMode::Strict);
        assert!(strict.has_errors());
        assert_eq!(strict.validation_status, ValidationStatus::Fail);
    }

    #[test]
    fn unavailable_dies_are_flagged() {
        let mut schematic = grid_schematic(3);
        schematic.dies[0].available = false;
        // Grid position (0, 0) maps onto the unavailable boundary.
        let strategy = compiled(
            vec![RuleConfig::new(
                "fixedPoint",
                json!({ "points": [[0, 0], [1, 1]] }),
                1.0,
            )],
            None,
        );
        let result = validate(&schematic, &strategy, ValidationMode::Permissive);
        assert!(result
            .conflicts
            .iter()
            .any(|c| c.conflict_type == ConflictType::UnavailableDie));
    }

    #[test]
    fn scores_stay_in_bounds() {
        let schematic = grid_schematic(2);
        let strategy = compiled(
            vec![RuleConfig::new(
                "fixedPoint",
                json!({ "points": [[0,0],[0,1],[1,0],[1,1]] }),
                1.0,
            )],
            Some(TransformConfig {
                offset_x: 1000.0,
                offset_y: 1000.0,
                ..Default::default()
            }),
        );
        for mode in [ValidationMode::Permissive, ValidationMode::Strict] {
            let result = validate(&schematic, &strategy, mode);
            assert!((0.0..=1.0).contains(&result.alignment_score));
            assert!((0.0..=100.0).contains(&result.coverage_pct));
        }
    }
}
