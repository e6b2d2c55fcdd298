//! Strategy definitions: the user-authored, versioned source of truth.
//!
//! A definition is declarative data. It only becomes executable after
//! [`compile`](crate::strategy::compile) resolves its rules against the
//! plugin registry and validates every parameter.

use chrono::{DateTime, Utc};
use derive_builder::Builder;
use indexmap::IndexMap;
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use wafergeom::TransformConfig;

use crate::exec::ExecContext;

pub mod compile;

/// Built-in strategy classifications.
#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum StrategyType {
    FixedPoint,
    CenterEdge,
    UniformGrid,
    RandomSampling,
    #[default]
    Custom,
}

/// Lifecycle states. Transition rules live in the repository layer.
#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum LifecycleState {
    #[default]
    Draft,
    Review,
    Approved,
    Active,
    Deprecated,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Draft => "draft",
            Self::Review => "review",
            Self::Approved => "approved",
            Self::Active => "active",
            Self::Deprecated => "deprecated",
        };
        write!(f, "{s}")
    }
}

/// Conditions gating a rule (or a whole strategy) at execution time.
///
/// An absent field means "don't care"; a rule fires iff every present
/// condition is satisfied by the execution context.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ConditionalLogic {
    pub wafer_size: Option<String>,
    pub product_type: Option<String>,
    pub process_layer: Option<String>,
    pub defect_density_threshold: Option<f64>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub custom_conditions: IndexMap<String, Value>,
}

impl ConditionalLogic {
    pub fn is_empty(&self) -> bool {
        self.wafer_size.is_none()
            && self.product_type.is_none()
            && self.process_layer.is_none()
            && self.defect_density_threshold.is_none()
            && self.custom_conditions.is_empty()
    }

    /// Evaluates the conditions against an execution context.
    pub fn matches(&self, ctx: &ExecContext) -> bool {
        if let Some(expected) = &self.wafer_size {
            if ctx.wafer_size.as_deref() != Some(expected.as_str()) {
                return false;
            }
        }
        if let Some(expected) = &self.product_type {
            if ctx.product_type.as_deref() != Some(expected.as_str()) {
                return false;
            }
        }
        if let Some(expected) = &self.process_layer {
            if ctx.process_layer.as_deref() != Some(expected.as_str()) {
                return false;
            }
        }
        if let Some(threshold) = self.defect_density_threshold {
            match ctx.defect_density {
                Some(density) if density >= threshold => {}
                _ => return false,
            }
        }
        for (key, expected) in &self.custom_conditions {
            if ctx.process_params.get(key) != Some(expected) {
                return false;
            }
        }
        true
    }
}

/// One rule within a strategy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuleConfig {
    /// Must resolve in the rule registry.
    pub rule_type: String,
    /// Free-form parameters; validated by the plugin at compile time.
    #[serde(default)]
    pub parameters: Value,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<ConditionalLogic>,
}

fn default_weight() -> f64 {
    1.0
}

fn default_enabled() -> bool {
    true
}

impl RuleConfig {
    pub fn new(rule_type: impl Into<String>, parameters: Value, weight: f64) -> Self {
        Self {
            rule_type: rule_type.into(),
            parameters,
            weight,
            enabled: true,
            conditions: None,
        }
    }
}

/// A versioned, user-authored sampling strategy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Builder)]
#[serde(rename_all = "camelCase")]
#[builder(setter(into))]
pub struct StrategyDefinition {
    #[builder(default = "Uuid::new_v4()")]
    pub id: Uuid,
    pub name: String,
    #[builder(default)]
    pub description: String,

    #[builder(default)]
    pub strategy_type: StrategyType,
    pub process_step: String,
    pub tool_type: String,

    #[builder(default)]
    pub rules: Vec<RuleConfig>,
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_conditions: Option<ConditionalLogic>,
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformations: Option<TransformConfig>,

    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_vendor: Option<String>,
    #[builder(default)]
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub vendor_specific_params: IndexMap<String, Value>,

    #[builder(default = "Version::new(1, 0, 0)")]
    pub version: Version,
    pub author: String,
    #[builder(default = "Utc::now()")]
    pub created_at: DateTime<Utc>,
    #[builder(default = "Utc::now()")]
    pub modified_at: DateTime<Utc>,
    #[builder(default)]
    pub lifecycle_state: LifecycleState,
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,

    #[builder(default = "default_schema_version()")]
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
}

fn default_schema_version() -> String {
    "1.0".to_string()
}

impl StrategyDefinition {
    pub fn builder() -> StrategyDefinitionBuilder {
        StrategyDefinitionBuilder::default()
    }

    /// Rules that are enabled, in declaration order.
    pub fn enabled_rules(&self) -> impl Iterator<Item = (usize, &RuleConfig)> {
        self.rules
            .iter()
            .enumerate()
            .filter(|(_, r)| r.enabled)
    }

    /// Structural checks that do not need the plugin registry. Returns
    /// every problem found.
    pub fn structural_issues(&self, require_rules: bool) -> Vec<compile::CompileIssue> {
        let mut issues = Vec::new();
        if self.name.trim().is_empty() {
            issues.push(compile::CompileIssue::field("name", "name is required"));
        }
        if self.process_step.trim().is_empty() {
            issues.push(compile::CompileIssue::field(
                "processStep",
                "process step is required",
            ));
        }
        if self.tool_type.trim().is_empty() {
            issues.push(compile::CompileIssue::field(
                "toolType",
                "tool type is required",
            ));
        }
        if require_rules && self.rules.is_empty() {
            issues.push(compile::CompileIssue::field(
                "rules",
                "at least one rule is required",
            ));
        }
        issues
    }
}
