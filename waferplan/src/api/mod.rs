//! The RPC façade: one transport-agnostic method per operation.
//!
//! The façade validates request shapes and resource limits, then delegates
//! to the engine; it owns no sampling logic of its own. An HTTP layer (out
//! of scope here) binds these methods to routes and renders
//! [`ErrorEnvelope`](shapes::ErrorEnvelope)s with
//! [`ErrorCode::http_status`](crate::error::ErrorCode::http_status).

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use semver::Version;
use uuid::Uuid;

use crate::budget::OpBudget;
use crate::config::Config;
use crate::error::{EngineError, ErrorContext, ErrorSource, Result};
use crate::exec::{ExecContext, ExecutionEngine, SimulationResult};
use crate::parsers::{self, emit, ParseOptions};
use crate::plugins::{RuleRegistry, VendorRegistry};
use crate::repo::memory::{MemorySchematicRepo, MemoryStrategyRepo, MemoryValidationRepo};
use crate::repo::{
    bump, check_transition, next_state, KeyedLocks, RepoError, SchematicFilter, SchematicRepo,
    StoredSchematic, StrategyFilter, StrategyRepo, TransitionRecord, ValidationRepo,
};
use crate::schematic::FormatType;
use crate::strategy::compile::StrategyCompiler;
use crate::strategy::{LifecycleState, StrategyDefinition};
use crate::validate::{ValidationResult, Validator};
use crate::vendor::{EmitOutput, StrategyMeta};

pub mod shapes;

use shapes::{
    CreateStrategyRequest, DieBoundaryDto, ExportStrategyRequest, HealthStatus, SchematicDetail,
    SchematicSummary, SimulateRequest, StrategySummary, UpdateStrategyRequest,
    UploadSchematicRequest, ValidateRequest,
};

pub struct Facade {
    config: Config,
    rules: Arc<RuleRegistry>,
    vendors: Arc<VendorRegistry>,
    compiler: StrategyCompiler,
    engine: ExecutionEngine,
    validator: Validator,
    strategies: Arc<dyn StrategyRepo>,
    schematics: Arc<dyn SchematicRepo>,
    validations: Arc<dyn ValidationRepo>,
    locks: KeyedLocks,
    /// Strategies with a completed (error-free) simulation on record.
    simulated: RwLock<HashSet<Uuid>>,
    transitions: RwLock<Vec<TransitionRecord>>,
}

impl Facade {
    /// A façade over in-memory repositories.
    pub fn in_memory(config: Config) -> Self {
        Self::with_repos(
            config,
            Arc::new(MemoryStrategyRepo::new()),
            Arc::new(MemorySchematicRepo::new()),
            Arc::new(MemoryValidationRepo::new()),
        )
    }

    pub fn with_repos(
        config: Config,
        strategies: Arc<dyn StrategyRepo>,
        schematics: Arc<dyn SchematicRepo>,
        validations: Arc<dyn ValidationRepo>,
    ) -> Self {
        let rules = Arc::new(RuleRegistry::builtin());
        let vendors = Arc::new(VendorRegistry::builtin());
        let compiler = StrategyCompiler::with_cache_size(
            Arc::clone(&rules),
            Arc::clone(&vendors),
            config.compile_cache_entries,
        );
        let engine = ExecutionEngine::new(config.max_sites);
        Self {
            validator: Validator::new(ExecutionEngine::new(config.max_sites)),
            engine,
            compiler,
            rules,
            vendors,
            strategies,
            schematics,
            validations,
            locks: KeyedLocks::new(),
            simulated: RwLock::new(HashSet::new()),
            transitions: RwLock::new(Vec::new()),
            config,
        }
    }

    // --- Schematics -----------------------------------------------------

    pub fn upload_schematic(&self, request: UploadSchematicRequest) -> Result<SchematicDetail> {
        if request.bytes.len() as u64 > self.config.max_upload_bytes {
            return Err(ErrorSource::PayloadTooLarge {
                size: request.bytes.len() as u64,
                limit: self.config.max_upload_bytes,
            }
            .into());
        }
        if request.created_by.trim().is_empty() {
            return Err(ErrorSource::InvalidRequest("createdBy is required".to_string()).into());
        }

        let options = ParseOptions {
            target_cell: request.target_cell.clone(),
            target_layer: request.target_layer.clone(),
            coordinate_scale: request.coordinate_scale,
            die_size_filter: match (request.die_size_filter_min, request.die_size_filter_max) {
                (Some(min), Some(max)) => Some((min, max)),
                (Some(min), None) => Some((min, f64::INFINITY)),
                (None, Some(max)) => Some((0.0, max)),
                (None, None) => None,
            },
        };
        let budget = OpBudget::with_timeout("parse", self.config.timeouts.parse());
        let schematic = crate::error::with_err_context(
            parsers::parse(&request.filename, &request.bytes, &options, &budget),
            || ErrorContext::ParseSchematic {
                filename: request.filename.clone(),
            },
        )?;

        if schematic.die_count() > self.config.max_dies {
            return Err(ErrorSource::TooManyDies {
                count: schematic.die_count(),
                limit: self.config.max_dies,
            }
            .into());
        }

        let stored = StoredSchematic {
            data: schematic,
            created_by: request.created_by,
            tags: Vec::new(),
            notes: None,
        };
        let detail = SchematicDetail::from(&stored);
        self.schematics.save(stored)?;
        Ok(detail)
    }

    pub fn list_schematics(&self, filter: &SchematicFilter) -> Result<Vec<SchematicSummary>> {
        Ok(self
            .schematics
            .list(filter)?
            .iter()
            .map(SchematicSummary::from)
            .collect())
    }

    pub fn get_schematic(&self, id: Uuid) -> Result<SchematicDetail> {
        Ok(SchematicDetail::from(&self.schematics.get(id)?))
    }

    pub fn get_die_boundaries(&self, id: Uuid) -> Result<Vec<DieBoundaryDto>> {
        let stored = self.schematics.get(id)?;
        Ok(stored.data.dies.iter().map(DieBoundaryDto::from).collect())
    }

    pub fn delete_schematic(&self, id: Uuid) -> Result<()> {
        self.schematics.delete(id)?;
        Ok(())
    }

    pub fn annotate_schematic(
        &self,
        id: Uuid,
        tags: Vec<String>,
        notes: Option<String>,
    ) -> Result<()> {
        self.schematics.annotate(id, tags, notes)?;
        Ok(())
    }

    /// Re-emits a stored schematic as SVG or DXF.
    pub fn export_schematic(&self, id: Uuid, target: FormatType) -> Result<emit::Rendering> {
        let stored = self.schematics.get(id)?;
        emit::render(&stored.data, target).ok_or_else(|| {
            ErrorSource::InvalidRequest(format!(
                "schematic re-emission supports svg and dxf, not {target}"
            ))
            .into()
        })
    }

    // --- Strategies -----------------------------------------------------

    pub fn create_strategy(&self, request: CreateStrategyRequest) -> Result<StrategyDefinition> {
        if request.author.trim().is_empty() {
            return Err(ErrorSource::InvalidRequest("author is required".to_string()).into());
        }
        let mut builder = StrategyDefinition::builder();
        builder
            .name(request.name)
            .description(request.description)
            .strategy_type(request.strategy_type)
            .process_step(request.process_step)
            .tool_type(request.tool_type)
            .rules(request.rules)
            .vendor_specific_params(request.vendor_specific_params)
            .author(request.author);
        if let Some(c) = request.global_conditions {
            builder.global_conditions(c);
        }
        if let Some(t) = request.transformations {
            builder.transformations(t);
        }
        if let Some(v) = request.target_vendor {
            builder.target_vendor(v);
        }
        let definition = builder
            .build()
            .map_err(|e| ErrorSource::InvalidRequest(e.to_string()))?;

        // Drafts may be created without rules, but the identity fields are
        // required up front.
        let issues = definition.structural_issues(false);
        if !issues.is_empty() {
            return Err(ErrorSource::InvalidRequest(
                issues
                    .iter()
                    .map(|i| i.message.as_str())
                    .collect::<Vec<_>>()
                    .join("; "),
            )
            .into());
        }

        self.strategies.save(definition.clone())?;
        Ok(definition)
    }

    pub fn update_strategy(
        &self,
        id: Uuid,
        request: UpdateStrategyRequest,
    ) -> Result<StrategyDefinition> {
        let lock = self.locks.get(id);
        let _guard = lock.lock();

        let mut def = self.strategies.get(id, None)?;
        let was_approved_or_later = matches!(
            def.lifecycle_state,
            LifecycleState::Approved | LifecycleState::Active | LifecycleState::Deprecated
        );

        if let Some(name) = request.name {
            def.name = name;
        }
        if let Some(description) = request.description {
            def.description = description;
        }
        if let Some(rules) = request.rules {
            def.rules = rules;
        }
        if let Some(conditions) = request.global_conditions {
            def.global_conditions = Some(conditions);
        }
        if let Some(transformations) = request.transformations {
            def.transformations = Some(transformations);
        }
        if let Some(vendor) = request.target_vendor {
            def.target_vendor = Some(vendor);
        }
        if let Some(params) = request.vendor_specific_params {
            def.vendor_specific_params = params;
        }
        def.modified_at = Utc::now();

        if was_approved_or_later {
            // Mutating an approved-or-later strategy forks a new draft.
            def.version = bump(&def.version, request.version_bump.unwrap_or_default());
            def.lifecycle_state = LifecycleState::Draft;
            def.reviewed_by = None;
            self.simulated.write().remove(&id);
        }

        self.strategies.save(def.clone())?;
        Ok(def)
    }

    pub fn list_strategies(&self, filter: &StrategyFilter) -> Result<Vec<StrategySummary>> {
        Ok(self
            .strategies
            .list(filter)?
            .iter()
            .map(StrategySummary::from)
            .collect())
    }

    pub fn get_strategy(&self, id: Uuid, version: Option<&Version>) -> Result<StrategyDefinition> {
        Ok(self.strategies.get(id, version)?)
    }

    pub fn delete_strategy(&self, id: Uuid) -> Result<()> {
        let lock = self.locks.get(id);
        let _guard = lock.lock();
        self.strategies.delete(id)?;
        self.simulated.write().remove(&id);
        Ok(())
    }

    pub fn clone_strategy(
        &self,
        id: Uuid,
        new_name: &str,
        author: &str,
    ) -> Result<StrategyDefinition> {
        if new_name.trim().is_empty() || author.trim().is_empty() {
            return Err(
                ErrorSource::InvalidRequest("newName and author are required".to_string()).into(),
            );
        }
        let source = self.strategies.get(id, None)?;
        let mut cloned = source.clone();
        cloned.id = Uuid::new_v4();
        cloned.name = new_name.to_string();
        cloned.description = format!("Cloned from {}", source.name);
        cloned.author = author.to_string();
        cloned.version = Version::new(1, 0, 0);
        cloned.lifecycle_state = LifecycleState::Draft;
        cloned.reviewed_by = None;
        cloned.created_at = Utc::now();
        cloned.modified_at = cloned.created_at;
        self.strategies.save(cloned.clone())?;
        Ok(cloned)
    }

    /// Advances a strategy one step along the lifecycle, enforcing the
    /// per-transition guards.
    pub fn promote_strategy(&self, id: Uuid, user: &str) -> Result<StrategyDefinition> {
        // Peek at the current state to decide the lock shape; activation
        // spans two aggregates and takes its locks in canonical order.
        let peek = self.strategies.get(id, None)?;
        let from = peek.lifecycle_state;
        let to = next_state(from).ok_or_else(|| {
            EngineError::new(RepoError::LifecycleViolation {
                from,
                to: from,
                reason: "state has no further promotion".to_string(),
            })
        })?;
        check_transition(from, to).map_err(EngineError::new)?;

        if to == LifecycleState::Active {
            return self.promote_to_active(id, user);
        }

        let lock = self.locks.get(id);
        let _guard = lock.lock();
        let mut def = self.strategies.get(id, None)?;
        if def.lifecycle_state != from {
            return Err(EngineError::new(RepoError::LifecycleViolation {
                from,
                to,
                reason: "state changed concurrently".to_string(),
            }));
        }

        match to {
            LifecycleState::Review => {
                if def.rules.is_empty() {
                    return Err(EngineError::new(RepoError::LifecycleViolation {
                        from,
                        to,
                        reason: "strategy has no rules".to_string(),
                    }));
                }
                // Must compile cleanly before review.
                self.compiler.compile(&def)?;
            }
            LifecycleState::Approved => {
                if !self.simulated.read().contains(&id) {
                    return Err(EngineError::new(RepoError::LifecycleViolation {
                        from,
                        to,
                        reason: "no error-free simulation on record for this strategy".to_string(),
                    }));
                }
                def.reviewed_by = Some(user.to_string());
            }
            _ => {}
        }

        def.lifecycle_state = to;
        def.modified_at = Utc::now();
        self.strategies.save(def.clone())?;
        self.record_transition(&def, from, to, user);
        Ok(def)
    }

    /// Activation auto-deprecates the prior active strategy for the same
    /// (process step, tool type). Both aggregate locks are taken in
    /// canonical (ascending id) order.
    fn promote_to_active(&self, id: Uuid, user: &str) -> Result<StrategyDefinition> {
        let def = self.strategies.get(id, None)?;
        let prior = self
            .strategies
            .find_active(&def.process_step, &def.tool_type)?
            .filter(|p| p.id != id);

        let locks = match &prior {
            Some(p) => {
                let (first, second) = self.locks.get_pair(id, p.id);
                vec![first, second]
            }
            None => vec![self.locks.get(id)],
        };
        let _guards: Vec<_> = locks.iter().map(|l| l.lock()).collect();

        let mut def = self.strategies.get(id, None)?;
        if def.lifecycle_state != LifecycleState::Approved {
            return Err(EngineError::new(RepoError::LifecycleViolation {
                from: def.lifecycle_state,
                to: LifecycleState::Active,
                reason: "only approved strategies can be activated".to_string(),
            }));
        }

        if let Some(prior) = prior {
            // Re-read under the lock; the pointer may have moved.
            let mut prior = self.strategies.get(prior.id, None)?;
            if prior.lifecycle_state == LifecycleState::Active {
                let prior_from = prior.lifecycle_state;
                prior.lifecycle_state = LifecycleState::Deprecated;
                prior.modified_at = Utc::now();
                self.strategies.save(prior.clone())?;
                self.record_transition(&prior, prior_from, LifecycleState::Deprecated, user);
            }
        }

        let from = LifecycleState::Approved;
        def.lifecycle_state = LifecycleState::Active;
        def.modified_at = Utc::now();
        self.strategies.save(def.clone())?;
        self.record_transition(&def, from, LifecycleState::Active, user);
        Ok(def)
    }

    /// Retracts a strategy under review (or approved) back to draft,
    /// clearing the reviewer.
    pub fn retract_strategy(&self, id: Uuid, user: &str) -> Result<StrategyDefinition> {
        let lock = self.locks.get(id);
        let _guard = lock.lock();
        let mut def = self.strategies.get(id, None)?;
        let from = def.lifecycle_state;
        check_transition(from, LifecycleState::Draft).map_err(EngineError::new)?;
        def.lifecycle_state = LifecycleState::Draft;
        def.reviewed_by = None;
        def.modified_at = Utc::now();
        self.strategies.save(def.clone())?;
        self.record_transition(&def, from, LifecycleState::Draft, user);
        Ok(def)
    }

    /// Marks a non-draft strategy deprecated. Terminal.
    pub fn deprecate_strategy(&self, id: Uuid, user: &str) -> Result<StrategyDefinition> {
        let lock = self.locks.get(id);
        let _guard = lock.lock();
        let mut def = self.strategies.get(id, None)?;
        let from = def.lifecycle_state;
        check_transition(from, LifecycleState::Deprecated).map_err(EngineError::new)?;
        def.lifecycle_state = LifecycleState::Deprecated;
        def.modified_at = Utc::now();
        self.strategies.save(def.clone())?;
        self.record_transition(&def, from, LifecycleState::Deprecated, user);
        Ok(def)
    }

    /// Lifecycle audit rows recorded by this process.
    pub fn transition_log(&self) -> Vec<TransitionRecord> {
        self.transitions.read().clone()
    }

    fn record_transition(
        &self,
        def: &StrategyDefinition,
        from: LifecycleState,
        to: LifecycleState,
        user: &str,
    ) {
        self.transitions.write().push(TransitionRecord {
            strategy_id: def.id,
            version: def.version.clone(),
            from,
            to,
            user: user.to_string(),
            at: Utc::now(),
        });
    }

    // --- Simulation, validation, export ---------------------------------

    pub fn simulate(&self, id: Uuid, request: SimulateRequest) -> Result<SimulationResult> {
        let def = self.strategies.get(id, request.version.as_ref())?;
        let compiled = crate::error::with_err_context(self.compiler.compile(&def), || {
            ErrorContext::CompileStrategy { id: id.to_string() }
        })?;
        let ctx = ExecContext {
            process_params: request.process_params,
            tool_constraints: request.tool_constraints,
            wafer_size: request
                .wafer_size
                .or_else(|| request.wafer_map.wafer_size().map(str::to_string)),
            product_type: request
                .product_type
                .or_else(|| request.wafer_map.product_type().map(str::to_string)),
            process_layer: request.process_layer,
            defect_density: request.defect_density,
            fallback_seed: 0,
        };
        let budget = OpBudget::with_timeout("simulate", self.config.timeouts.simulate());
        let result = crate::error::with_err_context(
            self.engine
                .execute(&compiled, &request.wafer_map, &ctx, &budget),
            || ErrorContext::Simulate { id: id.to_string() },
        )?;
        self.simulated.write().insert(id);
        Ok(result)
    }

    pub fn validate(&self, schematic_id: Uuid, request: ValidateRequest) -> Result<ValidationResult> {
        let stored = self.schematics.get(schematic_id)?;
        let def = self.strategies.get(request.strategy_id, None)?;
        let compiled = self.compiler.compile(&def)?;
        let budget = OpBudget::with_timeout("validate", self.config.timeouts.validate());
        let validated_by = request.validated_by.as_deref().unwrap_or(&def.author);
        let result = crate::error::with_err_context(
            self.validator.validate(
                &stored.data,
                &compiled,
                request.validation_mode,
                &ExecContext::default(),
                validated_by,
                &budget,
            ),
            || ErrorContext::Validate {
                strategy: request.strategy_id.to_string(),
                schematic: schematic_id.to_string(),
            },
        )?;
        self.validations.save(result.clone())?;
        Ok(result)
    }

    pub fn get_validation(&self, id: Uuid) -> Result<ValidationResult> {
        Ok(self.validations.get(id)?)
    }

    pub fn list_validations_for_schematic(&self, id: Uuid) -> Result<Vec<ValidationResult>> {
        Ok(self.validations.list_for_schematic(id)?)
    }

    pub fn export_strategy(
        &self,
        id: Uuid,
        request: ExportStrategyRequest,
    ) -> Result<EmitOutput> {
        let def = self.strategies.get(id, None)?;
        let vendor_name = request
            .vendor
            .clone()
            .or_else(|| def.target_vendor.clone())
            .ok_or_else(|| {
                ErrorSource::InvalidRequest(
                    "no vendor given and the strategy has no target vendor".to_string(),
                )
            })?;
        let vendor = Arc::clone(self.vendors.get(&vendor_name)?);

        let compiled = self.compiler.compile(&def)?;
        let ctx = ExecContext {
            process_params: request.process_params,
            tool_constraints: request.tool_constraints,
            wafer_size: request.wafer_map.wafer_size().map(str::to_string),
            product_type: request.wafer_map.product_type().map(str::to_string),
            ..Default::default()
        };
        let budget = OpBudget::with_timeout("simulate", self.config.timeouts.simulate());
        let result = self
            .engine
            .execute(&compiled, &request.wafer_map, &ctx, &budget)?;

        let validation = match request.validation_id {
            Some(vid) => Some(self.validations.get(vid)?),
            None => None,
        };
        let meta = StrategyMeta {
            strategy_id: def.id,
            strategy_name: def.name.clone(),
            version: def.version.clone(),
            wafer_size: ctx.wafer_size.clone(),
            product_type: ctx.product_type.clone(),
            process_layer: ctx.process_layer.clone(),
            vendor_specific_params: def.vendor_specific_params.clone(),
        };
        crate::error::with_err_context(
            vendor.emit(&result, &meta, validation.as_ref()),
            || ErrorContext::Export {
                vendor: vendor_name.clone(),
            },
        )
    }

    // --- Discovery ------------------------------------------------------

    pub fn supported_formats(&self) -> Vec<&'static str> {
        FormatType::all().iter().map(|f| f.as_str()).collect()
    }

    pub fn rule_types(&self) -> Vec<String> {
        self.rules.names().iter().map(|s| s.to_string()).collect()
    }

    pub fn vendor_names(&self) -> Vec<String> {
        self.vendors.names().iter().map(|s| s.to_string()).collect()
    }

    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}
