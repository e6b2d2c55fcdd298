//! Repositories and the strategy lifecycle.
//!
//! Domain types stay free of storage concerns; each aggregate has a
//! repository trait with in-memory and file-backed implementations.
//! Writes to a single strategy are serialized per id; readers see either
//! the pre-update or post-update version, never a partial one.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use semver::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::ErrorCode;
use crate::schematic::{FormatType, SchematicData};
use crate::strategy::{LifecycleState, StrategyDefinition, StrategyType};
use crate::validate::ValidationResult;

pub mod fs;
pub mod memory;

#[derive(Error, Debug)]
pub enum RepoError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("illegal lifecycle transition {from} -> {to}: {reason}")]
    LifecycleViolation {
        from: LifecycleState,
        to: LifecycleState,
        reason: String,
    },

    #[error("version conflict on {id}: expected {expected}, found {found}")]
    VersionConflict {
        id: Uuid,
        expected: Version,
        found: Version,
    },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl RepoError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::LifecycleViolation { .. } | Self::VersionConflict { .. } => {
                ErrorCode::LifecycleViolation
            }
            Self::Storage(_) | Self::Io(_) | Self::Serde(_) => ErrorCode::BusinessLogicError,
        }
    }
}

/// Filters for the strategy listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct StrategyFilter {
    pub author: Option<String>,
    pub strategy_type: Option<StrategyType>,
    pub process_step: Option<String>,
    pub lifecycle_state: Option<LifecycleState>,
}

impl StrategyFilter {
    pub fn matches(&self, def: &StrategyDefinition) -> bool {
        self.author.as_deref().map_or(true, |a| def.author == a)
            && self
                .strategy_type
                .map_or(true, |t| def.strategy_type == t)
            && self
                .process_step
                .as_deref()
                .map_or(true, |p| def.process_step == p)
            && self
                .lifecycle_state
                .map_or(true, |s| def.lifecycle_state == s)
    }
}

/// A schematic plus its mutable annotations. The parsed body is immutable
/// after ingestion; only tags and notes may change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredSchematic {
    pub data: SchematicData,
    pub created_by: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SchematicFilter {
    pub created_by: Option<String>,
    pub format_type: Option<FormatType>,
}

/// Strategy persistence: versions keyed by (id, version) plus a pointer to
/// the current version.
pub trait StrategyRepo: Send + Sync {
    /// Stores the definition under (id, version) and makes it current.
    fn save(&self, definition: StrategyDefinition) -> Result<(), RepoError>;

    /// Fetches the current version, or a specific one.
    fn get(&self, id: Uuid, version: Option<&Version>) -> Result<StrategyDefinition, RepoError>;

    /// All stored versions of a strategy, ascending.
    fn versions(&self, id: Uuid) -> Result<Vec<Version>, RepoError>;

    fn list(&self, filter: &StrategyFilter) -> Result<Vec<StrategyDefinition>, RepoError>;

    /// Removes the strategy and all of its versions.
    fn delete(&self, id: Uuid) -> Result<(), RepoError>;

    /// The currently active strategy for a (process step, tool type) pair.
    fn find_active(
        &self,
        process_step: &str,
        tool_type: &str,
    ) -> Result<Option<StrategyDefinition>, RepoError>;
}

pub trait SchematicRepo: Send + Sync {
    fn save(&self, schematic: StoredSchematic) -> Result<(), RepoError>;
    fn get(&self, id: Uuid) -> Result<StoredSchematic, RepoError>;
    fn list(&self, filter: &SchematicFilter) -> Result<Vec<StoredSchematic>, RepoError>;
    fn delete(&self, id: Uuid) -> Result<(), RepoError>;
    /// Updates the mutable annotations without touching the parsed body.
    fn annotate(
        &self,
        id: Uuid,
        tags: Vec<String>,
        notes: Option<String>,
    ) -> Result<(), RepoError>;
}

/// Validation results are append-only.
pub trait ValidationRepo: Send + Sync {
    fn save(&self, result: ValidationResult) -> Result<(), RepoError>;
    fn get(&self, id: Uuid) -> Result<ValidationResult, RepoError>;
    fn list_for_schematic(&self, schematic_id: Uuid) -> Result<Vec<ValidationResult>, RepoError>;
    fn list_for_strategy(&self, strategy_id: Uuid) -> Result<Vec<ValidationResult>, RepoError>;
}

/// Version bump granularity for strategy mutations.
#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum VersionBump {
    #[default]
    Patch,
    Minor,
    Major,
}

pub fn bump(version: &Version, kind: VersionBump) -> Version {
    match kind {
        VersionBump::Patch => Version::new(version.major, version.minor, version.patch + 1),
        VersionBump::Minor => Version::new(version.major, version.minor + 1, 0),
        VersionBump::Major => Version::new(version.major + 1, 0, 0),
    }
}

/// The single-step promotion path.
pub fn next_state(state: LifecycleState) -> Option<LifecycleState> {
    match state {
        LifecycleState::Draft => Some(LifecycleState::Review),
        LifecycleState::Review => Some(LifecycleState::Approved),
        LifecycleState::Approved => Some(LifecycleState::Active),
        LifecycleState::Active | LifecycleState::Deprecated => None,
    }
}

/// Checks a transition against the state machine, independent of the
/// promotion guards that need external context (compilation, simulations).
pub fn check_transition(
    from: LifecycleState,
    to: LifecycleState,
) -> Result<(), RepoError> {
    use LifecycleState::*;
    let allowed = matches!(
        (from, to),
        (Draft, Review)
            | (Review, Approved)
            | (Approved, Active)
            | (Review, Draft)
            | (Approved, Draft)
            | (Review, Deprecated)
            | (Approved, Deprecated)
            | (Active, Deprecated)
    );
    if allowed {
        Ok(())
    } else {
        Err(RepoError::LifecycleViolation {
            from,
            to,
            reason: "transition is not part of the lifecycle state machine".to_string(),
        })
    }
}

/// Per-aggregate mutexes. Cross-aggregate sections lock ids in ascending
/// order to stay deadlock-free.
#[derive(Default)]
pub struct KeyedLocks {
    inner: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: Uuid) -> Arc<Mutex<()>> {
        self.inner.lock().entry(id).or_default().clone()
    }

    /// Locks for a pair of ids, acquired in canonical (ascending) order.
    pub fn get_pair(&self, a: Uuid, b: Uuid) -> (Arc<Mutex<()>>, Arc<Mutex<()>>) {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        (self.get(first), self.get(second))
    }
}

/// An audit row recorded alongside lifecycle transitions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRecord {
    pub strategy_id: Uuid,
    pub version: Version,
    pub from: LifecycleState,
    pub to: LifecycleState,
    pub user: String,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_granularities() {
        let v = Version::new(1, 2, 3);
        assert_eq!(bump(&v, VersionBump::Patch), Version::new(1, 2, 4));
        assert_eq!(bump(&v, VersionBump::Minor), Version::new(1, 3, 0));
        assert_eq!(bump(&v, VersionBump::Major), Version::new(2, 0, 0));
    }

    #[test]
    fn promotion_path_is_linear() {
        use LifecycleState::*;
        assert_eq!(next_state(Draft), Some(Review));
        assert_eq!(next_state(Review), Some(Approved));
        assert_eq!(next_state(Approved), Some(Active));
        assert_eq!(next_state(Active), None);
        assert_eq!(next_state(Deprecated), None);
    }

    #[test]
    fn state_machine_edges() {
        use LifecycleState::*;
        // Forward edges and retractions are allowed.
        for (from, to) in [
            (Draft, Review),
            (Review, Approved),
            (Approved, Active),
            (Review, Draft),
            (Approved, Draft),
            (Active, Deprecated),
            (Review, Deprecated),
        ] {
            assert!(check_transition(from, to).is_ok(), "{from} -> {to}");
        }
        // Skips, reversals, and exits from terminal states are not.
        for (from, to) in [
            (Draft, Approved),
            (Draft, Active),
            (Active, Draft),
            (Deprecated, Draft),
            (Deprecated, Active),
            (Draft, Deprecated),
        ] {
            assert!(check_transition(from, to).is_err(), "{from} -> {to}");
        }
    }

    #[test]
    fn keyed_locks_hand_out_stable_mutexes() {
        let locks = KeyedLocks::new();
        let id = Uuid::new_v4();
        let a = locks.get(id);
        let b = locks.get(id);
        assert!(Arc::ptr_eq(&a, &b));
        let (first, second) = locks.get_pair(Uuid::new_v4(), id);
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
