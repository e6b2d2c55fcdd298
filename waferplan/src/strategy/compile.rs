//! Strategy compilation: resolving plugins and validating parameters.
//!
//! Compilation never fails fast; every problem is collected so a UI form
//! can surface all of them at once. Compiled strategies are immutable and
//! cached by (definition id, version).

use std::sync::Arc;

use arcstr::ArcStr;
use indexmap::IndexMap;
use parking_lot::Mutex;
use semver::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use wafergeom::TransformConfig;

use super::{ConditionalLogic, LifecycleState, StrategyDefinition, StrategyType};
use crate::plugins::{RuleParams, RuleRegistry, SamplingRule, VendorRegistry};

/// One problem found during compilation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CompileIssue {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

impl CompileIssue {
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rule_index: None,
            field: Some(field.into()),
            message: message.into(),
        }
    }

    pub fn rule(index: usize, field: Option<String>, message: impl Into<String>) -> Self {
        Self {
            rule_index: Some(index),
            field,
            message: message.into(),
        }
    }
}

/// Aggregated compilation failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("strategy failed to compile with {} issue(s): {}", .reasons.len(), summary(.reasons))]
pub struct CompileError {
    pub reasons: Vec<CompileIssue>,
}

fn summary(reasons: &[CompileIssue]) -> String {
    reasons
        .iter()
        .take(3)
        .map(|r| r.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// A resolved, validated rule ready to execute.
#[derive(Clone)]
#[derive(Debug)]
pub struct CompiledRule {
    pub name: ArcStr,
    pub plugin: Arc<dyn SamplingRule>,
    pub params: RuleParams,
    pub weight: f64,
    pub conditions: Option<ConditionalLogic>,
}

/// The immutable executable form of a strategy.
#[derive(Clone, Debug)]
pub struct CompiledStrategy {
    pub definition_id: Uuid,
    pub version: Version,
    pub name: ArcStr,
    pub strategy_type: StrategyType,
    pub lifecycle_state: LifecycleState,
    pub rules: Vec<CompiledRule>,
    pub global_conditions: Option<ConditionalLogic>,
    pub transformations: Option<TransformConfig>,
    pub target_vendor: Option<String>,
}

impl CompiledStrategy {
    /// Seed injected into seedless random rules, derived from the identity
    /// of the compiled strategy so repeated simulations agree.
    pub fn derived_seed(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.definition_id.hash(&mut hasher);
        self.version.to_string().hash(&mut hasher);
        hasher.finish()
    }
}

/// Compiles definitions against the plugin registries, caching results.
pub struct StrategyCompiler {
    rules: Arc<RuleRegistry>,
    vendors: Arc<VendorRegistry>,
    cache: Mutex<CompileCache>,
}

impl StrategyCompiler {
    pub fn new(rules: Arc<RuleRegistry>, vendors: Arc<VendorRegistry>) -> Self {
        Self::with_cache_size(rules, vendors, 256)
    }

    pub fn with_cache_size(
        rules: Arc<RuleRegistry>,
        vendors: Arc<VendorRegistry>,
        cache_entries: usize,
    ) -> Self {
        Self {
            rules,
            vendors,
            cache: Mutex::new(CompileCache::new(cache_entries)),
        }
    }

    /// Compiles a definition, returning every issue on failure.
    pub fn compile(
        &self,
        definition: &StrategyDefinition,
    ) -> Result<Arc<CompiledStrategy>, CompileError> {
        let key = (definition.id, definition.version.clone());
        if let Some(hit) = self.cache.lock().get(&key) {
            return Ok(hit);
        }

        let mut issues = definition.structural_issues(true);
        let mut compiled_rules = Vec::new();

        for (index, rule) in definition.rules.iter().enumerate() {
            if !rule.enabled {
                continue;
            }
            if rule.weight < 0.0 {
                issues.push(CompileIssue::rule(
                    index,
                    Some("weight".to_string()),
                    "weight must be non-negative",
                ));
            }
            let plugin = match self.rules.get(&rule.rule_type) {
                Ok(plugin) => plugin,
                Err(e) => {
                    issues.push(CompileIssue::rule(index, None, e.to_string()));
                    continue;
                }
            };
            match plugin.validate(&rule.parameters) {
                Ok(params) => compiled_rules.push(CompiledRule {
                    name: ArcStr::from(rule.rule_type.as_str()),
                    plugin: Arc::clone(plugin),
                    params,
                    weight: rule.weight,
                    conditions: rule.conditions.clone(),
                }),
                Err(param_issues) => {
                    for p in param_issues {
                        issues.push(CompileIssue::rule(index, p.field, p.message));
                    }
                }
            }
        }

        if let Some(t) = &definition.transformations {
            if !(-360.0..=360.0).contains(&t.rotation_angle_deg) {
                issues.push(CompileIssue::field(
                    "transformations.rotationAngleDeg",
                    "rotation must be within [-360, 360] degrees",
                ));
            }
            if !(t.scale_factor > 0.0) {
                issues.push(CompileIssue::field(
                    "transformations.scaleFactor",
                    "scale factor must be positive",
                ));
            }
        }

        let weight_sum: f64 = definition
            .enabled_rules()
            .map(|(_, r)| r.weight.max(0.0))
            .sum();
        if !definition.rules.is_empty() && weight_sum <= 0.0 {
            issues.push(CompileIssue::field(
                "rules",
                "enabled rule weights must sum to a positive value",
            ));
        }

        if let Some(vendor) = &definition.target_vendor {
            if let Err(e) = self.vendors.get(vendor) {
                issues.push(CompileIssue::field("targetVendor", e.to_string()));
            }
        }

        if !issues.is_empty() {
            return Err(CompileError { reasons: issues });
        }

        let compiled = Arc::new(CompiledStrategy {
            definition_id: definition.id,
            version: definition.version.clone(),
            name: ArcStr::from(definition.name.as_str()),
            strategy_type: definition.strategy_type,
            lifecycle_state: definition.lifecycle_state,
            rules: compiled_rules,
            global_conditions: definition.global_conditions.clone(),
            transformations: definition.transformations,
            target_vendor: definition.target_vendor.clone(),
        });
        self.cache.lock().put(key, Arc::clone(&compiled));
        Ok(compiled)
    }
}

/// Bounded LRU keyed by (definition id, version). Entries are immutable
/// `Arc`s, so hits are cheap clones.
struct CompileCache {
    capacity: usize,
    entries: IndexMap<(Uuid, Version), Arc<CompiledStrategy>>,
}

impl CompileCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: IndexMap::new(),
        }
    }

    fn get(&mut self, key: &(Uuid, Version)) -> Option<Arc<CompiledStrategy>> {
        let value = self.entries.shift_remove(key)?;
        // Re-insert at the back: most recently used.
        self.entries.insert(key.clone(), Arc::clone(&value));
        Some(value)
    }

    fn put(&mut self, key: (Uuid, Version), value: Arc<CompiledStrategy>) {
        self.entries.shift_remove(&key);
        if self.entries.len() >= self.capacity {
            self.entries.shift_remove_index(0);
        }
        self.entries.insert(key, value);
    }
}
