//! File-backed repositories: JSON per aggregate, write-through over the
//! in-memory store.
//!
//! Writes land in a temporary file and are renamed into place, so a
//! successful write is visible after restart and a crash mid-write leaves
//! the previous content intact.

use std::fs;
use std::path::{Path, PathBuf};

use semver::Version;
use uuid::Uuid;

use super::memory::{MemorySchematicRepo, MemoryStrategyRepo, MemoryValidationRepo};
use super::{
    RepoError, SchematicFilter, SchematicRepo, StoredSchematic, StrategyFilter, StrategyRepo,
    ValidationRepo,
};
use crate::log::warn;
use crate::strategy::StrategyDefinition;
use crate::validate::ValidationResult;

pub struct FileStrategyRepo {
    root: PathBuf,
    cache: MemoryStrategyRepo,
}

impl FileStrategyRepo {
    /// Opens (or creates) the store under `root`, loading existing
    /// aggregates into memory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, RepoError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let repo = Self {
            cache: MemoryStrategyRepo::new(),
            root,
        };
        repo.load()?;
        Ok(repo)
    }

    fn load(&self) -> Result<(), RepoError> {
        for entry in fs::read_dir(&self.root)? {
            let dir = entry?.path();
            if !dir.is_dir() {
                continue;
            }
            let current = fs::read_to_string(dir.join("current")).ok();
            let mut definitions: Vec<StrategyDefinition> = Vec::new();
            for file in fs::read_dir(&dir)? {
                let path = file?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                match read_json::<StrategyDefinition>(&path) {
                    Ok(def) => definitions.push(def),
                    Err(e) => warn!("skipping unreadable strategy file {path:?}: {e}"),
                }
            }
            // Replay non-current versions first so the current pointer is
            // restored by the last save.
            let current_version = current.and_then(|v| Version::parse(v.trim()).ok());
            definitions.sort_by(|a, b| {
                let a_current = Some(&a.version) == current_version.as_ref();
                let b_current = Some(&b.version) == current_version.as_ref();
                a_current
                    .cmp(&b_current)
                    .then_with(|| a.version.cmp(&b.version))
            });
            for def in definitions {
                self.cache.save(def)?;
            }
        }
        Ok(())
    }

    fn strategy_dir(&self, id: Uuid) -> PathBuf {
        self.root.join(id.to_string())
    }
}

impl StrategyRepo for FileStrategyRepo {
    fn save(&self, definition: StrategyDefinition) -> Result<(), RepoError> {
        let dir = self.strategy_dir(definition.id);
        fs::create_dir_all(&dir)?;
        write_json(
            &dir.join(format!("{}.json", definition.version)),
            &definition,
        )?;
        write_atomic(
            &dir.join("current"),
            definition.version.to_string().as_bytes(),
        )?;
        self.cache.save(definition)
    }

    fn get(&self, id: Uuid, version: Option<&Version>) -> Result<StrategyDefinition, RepoError> {
        self.cache.get(id, version)
    }

    fn versions(&self, id: Uuid) -> Result<Vec<Version>, RepoError> {
        self.cache.versions(id)
    }

    fn list(&self, filter: &StrategyFilter) -> Result<Vec<StrategyDefinition>, RepoError> {
        self.cache.list(filter)
    }

    fn delete(&self, id: Uuid) -> Result<(), RepoError> {
        self.cache.delete(id)?;
        let dir = self.strategy_dir(id);
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    fn find_active(
        &self,
        process_step: &str,
        tool_type: &str,
    ) -> Result<Option<StrategyDefinition>, RepoError> {
        self.cache.find_active(process_step, tool_type)
    }
}

pub struct FileSchematicRepo {
    root: PathBuf,
    cache: MemorySchematicRepo,
}

impl FileSchematicRepo {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, RepoError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let repo = Self {
            cache: MemorySchematicRepo::new(),
            root,
        };
        for entry in fs::read_dir(&repo.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_json::<StoredSchematic>(&path) {
                Ok(stored) => repo.cache.save(stored)?,
                Err(e) => warn!("skipping unreadable schematic file {path:?}: {e}"),
            }
        }
        Ok(repo)
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }
}

impl SchematicRepo for FileSchematicRepo {
    fn save(&self, schematic: StoredSchematic) -> Result<(), RepoError> {
        write_json(&self.path_for(schematic.data.id), &schematic)?;
        self.cache.save(schematic)
    }

    fn get(&self, id: Uuid) -> Result<StoredSchematic, RepoError> {
        self.cache.get(id)
    }

    fn list(&self, filter: &SchematicFilter) -> Result<Vec<StoredSchematic>, RepoError> {
        self.cache.list(filter)
    }

    fn delete(&self, id: Uuid) -> Result<(), RepoError> {
        self.cache.delete(id)?;
        let path = self.path_for(id);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn annotate(
        &self,
        id: Uuid,
        tags: Vec<String>,
        notes: Option<String>,
    ) -> Result<(), RepoError> {
        self.cache.annotate(id, tags.clone(), notes.clone())?;
        let stored = self.cache.get(id)?;
        write_json(&self.path_for(id), &stored)
    }
}

pub struct FileValidationRepo {
    root: PathBuf,
    cache: MemoryValidationRepo,
}

impl FileValidationRepo {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, RepoError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let repo = Self {
            cache: MemoryValidationRepo::new(),
            root,
        };
        for entry in fs::read_dir(&repo.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_json::<ValidationResult>(&path) {
                Ok(result) => repo.cache.save(result)?,
                Err(e) => warn!("skipping unreadable validation file {path:?}: {e}"),
            }
        }
        Ok(repo)
    }
}

impl ValidationRepo for FileValidationRepo {
    fn save(&self, result: ValidationResult) -> Result<(), RepoError> {
        write_json(&self.root.join(format!("{}.json", result.id)), &result)?;
        self.cache.save(result)
    }

    fn get(&self, id: Uuid) -> Result<ValidationResult, RepoError> {
        self.cache.get(id)
    }

    fn list_for_schematic(&self, schematic_id: Uuid) -> Result<Vec<ValidationResult>, RepoError> {
        self.cache.list_for_schematic(schematic_id)
    }

    fn list_for_strategy(&self, strategy_id: Uuid) -> Result<Vec<ValidationResult>, RepoError> {
        self.cache.list_for_strategy(strategy_id)
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, RepoError> {
    let raw = fs::read(path)?;
    Ok(serde_json::from_slice(&raw)?)
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), RepoError> {
    write_atomic(path, &serde_json::to_vec_pretty(value)?)
}

/// Writes via a sibling temporary file and a rename.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), RepoError> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
