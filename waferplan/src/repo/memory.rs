//! In-memory repositories. The default backend for tests and embedded use.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use semver::Version;
use uuid::Uuid;

use super::{
    RepoError, SchematicFilter, SchematicRepo, StoredSchematic, StrategyFilter, StrategyRepo,
    ValidationRepo,
};
use crate::strategy::{LifecycleState, StrategyDefinition};
use crate::validate::ValidationResult;

#[derive(Default)]
struct StrategyCell {
    versions: BTreeMap<Version, StrategyDefinition>,
    current: Option<Version>,
}

/// Strategy store backed by a process-local map.
#[derive(Default)]
pub struct MemoryStrategyRepo {
    cells: RwLock<HashMap<Uuid, StrategyCell>>,
}

impl MemoryStrategyRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StrategyRepo for MemoryStrategyRepo {
    fn save(&self, definition: StrategyDefinition) -> Result<(), RepoError> {
        let mut cells = self.cells.write();
        let cell = cells.entry(definition.id).or_default();
        cell.current = Some(definition.version.clone());
        cell.versions.insert(definition.version.clone(), definition);
        Ok(())
    }

    fn get(&self, id: Uuid, version: Option<&Version>) -> Result<StrategyDefinition, RepoError> {
        let cells = self.cells.read();
        let cell = cells
            .get(&id)
            .ok_or_else(|| RepoError::not_found("strategy", id))?;
        let version = match version {
            Some(v) => v,
            None => cell
                .current
                .as_ref()
                .ok_or_else(|| RepoError::not_found("strategy", id))?,
        };
        cell.versions
            .get(version)
            .cloned()
            .ok_or_else(|| RepoError::not_found("strategy version", format!("{id}@{version}")))
    }

    fn versions(&self, id: Uuid) -> Result<Vec<Version>, RepoError> {
        let cells = self.cells.read();
        let cell = cells
            .get(&id)
            .ok_or_else(|| RepoError::not_found("strategy", id))?;
        Ok(cell.versions.keys().cloned().collect())
    }

    fn list(&self, filter: &StrategyFilter) -> Result<Vec<StrategyDefinition>, RepoError> {
        let cells = self.cells.read();
        let mut out: Vec<StrategyDefinition> = cells
            .values()
            .filter_map(|cell| {
                let current = cell.current.as_ref()?;
                cell.versions.get(current)
            })
            .filter(|def| filter.matches(def))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    fn delete(&self, id: Uuid) -> Result<(), RepoError> {
        self.cells
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| RepoError::not_found("strategy", id))
    }

    fn find_active(
        &self,
        process_step: &str,
        tool_type: &str,
    ) -> Result<Option<StrategyDefinition>, RepoError> {
        let cells = self.cells.read();
        Ok(cells
            .values()
            .filter_map(|cell| {
                let current = cell.current.as_ref()?;
                cell.versions.get(current)
            })
            .find(|def| {
                def.lifecycle_state == LifecycleState::Active
                    && def.process_step == process_step
                    && def.tool_type == tool_type
            })
            .cloned())
    }
}

#[derive(Default)]
pub struct MemorySchematicRepo {
    items: RwLock<HashMap<Uuid, StoredSchematic>>,
}

impl MemorySchematicRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SchematicRepo for MemorySchematicRepo {
    fn save(&self, schematic: StoredSchematic) -> Result<(), RepoError> {
        self.items.write().insert(schematic.data.id, schematic);
        Ok(())
    }

    fn get(&self, id: Uuid) -> Result<StoredSchematic, RepoError> {
        self.items
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| RepoError::not_found("schematic", id))
    }

    fn list(&self, filter: &SchematicFilter) -> Result<Vec<StoredSchematic>, RepoError> {
        let items = self.items.read();
        let mut out: Vec<StoredSchematic> = items
            .values()
            .filter(|s| {
                filter
                    .created_by
                    .as_deref()
                    .map_or(true, |u| s.created_by == u)
                    && filter
                        .format_type
                        .map_or(true, |f| s.data.format_type == f)
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.data
                .upload_date
                .cmp(&a.data.upload_date)
                .then(a.data.id.cmp(&b.data.id))
        });
        Ok(out)
    }

    fn delete(&self, id: Uuid) -> Result<(), RepoError> {
        self.items
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| RepoError::not_found("schematic", id))
    }

    fn annotate(
        &self,
        id: Uuid,
        tags: Vec<String>,
        notes: Option<String>,
    ) -> Result<(), RepoError> {
        let mut items = self.items.write();
        let stored = items
            .get_mut(&id)
            .ok_or_else(|| RepoError::not_found("schematic", id))?;
        stored.tags = tags;
        stored.notes = notes;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryValidationRepo {
    items: RwLock<HashMap<Uuid, ValidationResult>>,
    by_schematic: RwLock<HashMap<Uuid, Vec<Uuid>>>,
    by_strategy: RwLock<HashMap<Uuid, Vec<Uuid>>>,
}

impl MemoryValidationRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ValidationRepo for MemoryValidationRepo {
    fn save(&self, result: ValidationResult) -> Result<(), RepoError> {
        // The store is written first; the indexes follow and are only
        // eventually consistent with it.
        let id = result.id;
        let schematic_id = result.schematic_id;
        let strategy_id = result.strategy_id;
        self.items.write().insert(id, result);
        self.by_schematic
            .write()
            .entry(schematic_id)
            .or_default()
            .push(id);
        self.by_strategy
            .write()
            .entry(strategy_id)
            .or_default()
            .push(id);
        Ok(())
    }

    fn get(&self, id: Uuid) -> Result<ValidationResult, RepoError> {
        self.items
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| RepoError::not_found("validation result", id))
    }

    fn list_for_schematic(&self, schematic_id: Uuid) -> Result<Vec<ValidationResult>, RepoError> {
        let ids = self
            .by_schematic
            .read()
            .get(&schematic_id)
            .cloned()
            .unwrap_or_default();
        let items = self.items.read();
        Ok(ids.iter().filter_map(|id| items.get(id)).cloned().collect())
    }

    fn list_for_strategy(&self, strategy_id: Uuid) -> Result<Vec<ValidationResult>, RepoError> {
        let ids = self
            .by_strategy
            .read()
            .get(&strategy_id)
            .cloned()
            .unwrap_or_default();
        let items = self.items.read();
        Ok(ids.iter().filter_map(|id| items.get(id)).cloned().collect())
    }
}
