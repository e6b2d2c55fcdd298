//! Wire shapes for the RPC surface. All JSON is camelCase except the
//! error envelope, whose field names are part of the published contract.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use wafergeom::{Bounds, CoordinateSystem, TransformConfig};

use crate::error::{EngineError, ErrorCode, ErrorSource};
use crate::exec::ToolConstraints;
use crate::repo::{StoredSchematic, VersionBump};
use crate::schematic::{DieBoundary, FormatType, SchematicStatistics};
use crate::strategy::compile::CompileIssue;
use crate::strategy::{ConditionalLogic, RuleConfig, StrategyDefinition, StrategyType};
use crate::validate::ValidationMode;
use crate::wafer::WaferMap;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSchematicRequest {
    pub filename: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub created_by: String,
    #[serde(default)]
    pub coordinate_scale: Option<f64>,
    #[serde(default)]
    pub target_layer: Option<String>,
    #[serde(default)]
    pub target_cell: Option<String>,
    #[serde(default)]
    pub die_size_filter_min: Option<f64>,
    #[serde(default)]
    pub die_size_filter_max: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SchematicSummary {
    pub id: Uuid,
    pub filename: String,
    pub format_type: FormatType,
    pub upload_date: DateTime<Utc>,
    pub die_count: usize,
    pub available_die_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wafer_size: Option<String>,
    pub created_by: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl From<&StoredSchematic> for SchematicSummary {
    fn from(stored: &StoredSchematic) -> Self {
        Self {
            id: stored.data.id,
            filename: stored.data.filename.clone(),
            format_type: stored.data.format_type,
            upload_date: stored.data.upload_date,
            die_count: stored.data.die_count(),
            available_die_count: stored.data.available_die_count(),
            wafer_size: stored.data.wafer_size.clone(),
            created_by: stored.created_by.clone(),
            tags: stored.tags.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SchematicDetail {
    #[serde(flatten)]
    pub summary: SchematicSummary,
    pub coordinate_system: CoordinateSystem,
    pub statistics: SchematicStatistics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl From<&StoredSchematic> for SchematicDetail {
    fn from(stored: &StoredSchematic) -> Self {
        Self {
            summary: SchematicSummary::from(stored),
            coordinate_system: stored.data.coordinate_system,
            statistics: stored.data.statistics(),
            notes: stored.notes.clone(),
        }
    }
}

/// A die boundary with its derived measurements flattened for clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DieBoundaryDto {
    pub die_id: String,
    pub bounds: Bounds,
    pub center_x: f64,
    pub center_y: f64,
    pub width: f64,
    pub height: f64,
    pub area: f64,
    pub available: bool,
}

impl From<&DieBoundary> for DieBoundaryDto {
    fn from(b: &DieBoundary) -> Self {
        let center = b.center();
        Self {
            die_id: b.die_id.to_string(),
            bounds: b.bounds,
            center_x: center.x,
            center_y: center.y,
            width: b.width(),
            height: b.height(),
            area: b.area(),
            available: b.available,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStrategyRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub strategy_type: StrategyType,
    pub process_step: String,
    pub tool_type: String,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    #[serde(default)]
    pub global_conditions: Option<ConditionalLogic>,
    #[serde(default)]
    pub transformations: Option<TransformConfig>,
    #[serde(default)]
    pub target_vendor: Option<String>,
    #[serde(default)]
    pub vendor_specific_params: IndexMap<String, Value>,
    pub author: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateStrategyRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub rules: Option<Vec<RuleConfig>>,
    pub global_conditions: Option<ConditionalLogic>,
    pub transformations: Option<TransformConfig>,
    pub target_vendor: Option<String>,
    pub vendor_specific_params: Option<IndexMap<String, Value>>,
    /// Granularity used when the update forks a new version.
    pub version_bump: Option<VersionBump>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StrategySummary {
    pub id: Uuid,
    pub name: String,
    pub strategy_type: StrategyType,
    pub process_step: String,
    pub tool_type: String,
    pub version: Version,
    pub lifecycle_state: crate::strategy::LifecycleState,
    pub author: String,
    pub modified_at: DateTime<Utc>,
    pub rule_count: usize,
}

impl From<&StrategyDefinition> for StrategySummary {
    fn from(def: &StrategyDefinition) -> Self {
        Self {
            id: def.id,
            name: def.name.clone(),
            strategy_type: def.strategy_type,
            process_step: def.process_step.clone(),
            tool_type: def.tool_type.clone(),
            version: def.version.clone(),
            lifecycle_state: def.lifecycle_state,
            author: def.author.clone(),
            modified_at: def.modified_at,
            rule_count: def.rules.len(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateRequest {
    pub wafer_map: WaferMap,
    #[serde(default)]
    pub process_params: IndexMap<String, Value>,
    #[serde(default)]
    pub tool_constraints: ToolConstraints,
    #[serde(default)]
    pub wafer_size: Option<String>,
    #[serde(default)]
    pub product_type: Option<String>,
    #[serde(default)]
    pub process_layer: Option<String>,
    #[serde(default)]
    pub defect_density: Option<f64>,
    /// Simulate a specific stored version instead of the current one.
    #[serde(default)]
    pub version: Option<Version>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateRequest {
    pub strategy_id: Uuid,
    #[serde(default)]
    pub validation_mode: ValidationMode,
    #[serde(default)]
    pub validated_by: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportStrategyRequest {
    pub wafer_map: WaferMap,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub tool_constraints: ToolConstraints,
    #[serde(default)]
    pub process_params: IndexMap<String, Value>,
    /// Embed the score of a stored validation result.
    #[serde(default)]
    pub validation_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: &'static str,
}

/// The error envelope returned by every failed operation.
///
/// Field names (`request_id`, `validation_errors`) follow the published
/// wire contract rather than the camelCase convention.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub details: serde_json::Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_errors: Option<Vec<CompileIssue>>,
}

impl ErrorEnvelope {
    pub fn new(err: &EngineError, request_id: impl Into<String>) -> Self {
        let mut details = serde_json::Map::new();
        let mut validation_errors = None;
        match err.source() {
            ErrorSource::Compile(compile) => {
                validation_errors = Some(compile.reasons.clone());
            }
            ErrorSource::PayloadTooLarge { size, limit } => {
                details.insert("size".to_string(), (*size).into());
                details.insert("limit".to_string(), (*limit).into());
            }
            ErrorSource::TooManyDies { count, limit } => {
                details.insert("count".to_string(), (*count).into());
                details.insert("limit".to_string(), (*limit).into());
            }
            _ => {}
        }
        Self {
            error: ErrorBody {
                code: err.code(),
                message: err.source().to_string(),
                details,
                validation_errors,
            },
            request_id: request_id.into(),
            timestamp: Utc::now(),
        }
    }

    /// The HTTP status an edge binding should answer with.
    pub fn http_status(&self) -> u16 {
        self.error.code.http_status()
    }
}
