//! Plugin registries for sampling rules and vendor emitters.
//!
//! Registration happens at process bootstrap, before any requests are
//! served; afterwards the registries are read-only, so lookups need no
//! synchronization. There is no hot reloading.

use std::sync::Arc;

use arcstr::ArcStr;
use indexmap::IndexMap;
use thiserror::Error;

use crate::vendor::VendorEmitter;

pub mod rules;

pub use rules::{CostClass, CostEstimate, RuleParams, RuleSite, SamplingRule};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    #[error("unknown {kind} plugin: `{name}`")]
    Unknown { kind: &'static str, name: String },
}

impl PluginError {
    pub fn unknown_rule(name: impl Into<String>) -> Self {
        Self::Unknown {
            kind: "rule",
            name: name.into(),
        }
    }

    pub fn unknown_vendor(name: impl Into<String>) -> Self {
        Self::Unknown {
            kind: "vendor",
            name: name.into(),
        }
    }
}

/// A parameter-level validation issue reported by a rule plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamIssue {
    pub field: Option<String>,
    pub message: String,
}

impl ParamIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            message: message.into(),
        }
    }

    pub fn general(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
        }
    }
}

/// Name → factory map for sampling rules.
pub struct RuleRegistry {
    rules: IndexMap<ArcStr, Arc<dyn SamplingRule>>,
}

impl RuleRegistry {
    pub fn empty() -> Self {
        Self {
            rules: IndexMap::new(),
        }
    }

    /// A registry holding the built-in rules.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(rules::fixed_point::FixedPointRule));
        registry.register(Arc::new(rules::center_edge::CenterEdgeRule));
        registry.register(Arc::new(rules::uniform_grid::UniformGridRule));
        registry.register(Arc::new(rules::random::RandomSamplingRule));
        registry
    }

    pub fn register(&mut self, rule: Arc<dyn SamplingRule>) {
        self.rules.insert(ArcStr::from(rule.name()), rule);
    }

    pub fn get(&self, name: &str) -> Result<&Arc<dyn SamplingRule>, PluginError> {
        self.rules
            .get(name)
            .ok_or_else(|| PluginError::unknown_rule(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    /// Registered rule names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.rules.keys().map(|k| k.as_str()).collect()
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Name → factory map for vendor emitters.
pub struct VendorRegistry {
    vendors: IndexMap<ArcStr, Arc<dyn VendorEmitter>>,
}

impl VendorRegistry {
    pub fn empty() -> Self {
        Self {
            vendors: IndexMap::new(),
        }
    }

    /// A registry holding the built-in ASML and KLA emitters.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(crate::vendor::asml::AsmlEmitter));
        registry.register(Arc::new(crate::vendor::kla::KlaEmitter));
        registry
    }

    pub fn register(&mut self, vendor: Arc<dyn VendorEmitter>) {
        self.vendors.insert(ArcStr::from(vendor.name()), vendor);
    }

    pub fn get(&self, name: &str) -> Result<&Arc<dyn VendorEmitter>, PluginError> {
        self.vendors
            .get(name)
            .ok_or_else(|| PluginError::unknown_vendor(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vendors.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.vendors.keys().map(|k| k.as_str()).collect()
    }
}

impl Default for VendorRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_rules_are_listed_in_registration_order() {
        let registry = RuleRegistry::builtin();
        assert_eq!(
            registry.names(),
            vec!["fixedPoint", "centerEdge", "uniformGrid", "randomSampling"]
        );
    }

    #[test]
    fn unknown_lookups_fail_with_kind_and_name() {
        let registry = RuleRegistry::builtin();
        let err = registry.get("hotspotPriority").unwrap_err();
        assert_eq!(
            err,
            PluginError::Unknown {
                kind: "rule",
                name: "hotspotPriority".to_string()
            }
        );

        let vendors = VendorRegistry::builtin();
        assert!(vendors.get("asml").is_ok());
        assert!(vendors.get("kla").is_ok());
        assert!(vendors.get("nikon").is_err());
    }
}
