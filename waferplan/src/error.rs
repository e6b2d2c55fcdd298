use std::fmt::{Debug, Display};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::budget::BudgetExceeded;
use crate::parsers::ParseError;
use crate::plugins::PluginError;
use crate::repo::RepoError;
use crate::strategy::compile::CompileError;

pub type Result<T> = std::result::Result<T, EngineError>;

/// The crate-wide error type: a source plus the stack of operations that
/// were in progress when it occurred.
pub struct EngineError {
    pub(crate) source: ErrorSource,
    pub(crate) context: Vec<ErrorContext>,
}

impl EngineError {
    pub fn new(source: impl Into<ErrorSource>) -> Self {
        Self {
            source: source.into(),
            context: Vec::new(),
        }
    }

    pub fn from_context(source: impl Into<ErrorSource>, ctx: impl Into<ErrorContext>) -> Self {
        Self {
            source: source.into(),
            context: vec![ctx.into()],
        }
    }

    pub fn with_context(mut self, ctx: impl Into<ErrorContext>) -> Self {
        self.context.push(ctx.into());
        self
    }

    pub fn source(&self) -> &ErrorSource {
        &self.source
    }

    #[inline]
    pub fn into_inner(self) -> ErrorSource {
        self.source
    }

    /// The wire-level error code for this error.
    #[inline]
    pub fn code(&self) -> ErrorCode {
        self.source.code()
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Error:\n{}", self.source)?;
        if !self.context.is_empty() {
            writeln!(f, "\nError occurred:")?;
            for item in self.context.iter() {
                writeln!(f, "\twhile {}", item)?;
            }
        }
        Ok(())
    }
}

impl Debug for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.source)?;
        if !self.context.is_empty() {
            writeln!(f, "\nError occurred:")?;
            for (i, item) in self.context.iter().enumerate() {
                writeln!(f, "\t{}: {:?}", i, item)?;
            }
        }
        Ok(())
    }
}

impl<T> From<T> for EngineError
where
    T: Into<ErrorSource>,
{
    fn from(value: T) -> Self {
        Self {
            source: value.into(),
            context: Vec::new(),
        }
    }
}

/// Attaches context to the error branch of `result`.
#[inline]
pub fn with_err_context<T, E, C>(result: std::result::Result<T, E>, ctx: C) -> Result<T>
where
    C: FnOnce() -> ErrorContext,
    E: Into<EngineError>,
{
    result.map_err(|err| err.into().with_context(ctx()))
}

/// An operation that was in progress when an error occurred.
#[derive(Debug, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub enum ErrorContext {
    ParseSchematic { filename: String },
    CompileStrategy { id: String },
    Simulate { id: String },
    Validate { strategy: String, schematic: String },
    Export { vendor: String },
    ReadFile(PathBuf),
}

impl Display for ErrorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use ErrorContext::*;
        match self {
            ParseSchematic { filename } => write!(f, "parsing schematic {filename}"),
            CompileStrategy { id } => write!(f, "compiling strategy {id}"),
            Simulate { id } => write!(f, "simulating strategy {id}"),
            Validate {
                strategy,
                schematic,
            } => write!(f, "validating strategy {strategy} against schematic {schematic}"),
            Export { vendor } => write!(f, "exporting for vendor {vendor}"),
            ReadFile(path) => write!(f, "reading file {path:?}"),
        }
    }
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ErrorSource {
    #[error("request validation failed: {0}")]
    InvalidRequest(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("error parsing schematic: {0}")]
    Parse(#[from] ParseError),

    #[error("error compiling strategy: {0}")]
    Compile(#[from] CompileError),

    #[error("plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("repository error: {0}")]
    Repo(#[from] RepoError),

    #[error("{0}")]
    Budget(#[from] BudgetExceeded),

    #[error("upload of {size} bytes exceeds the {limit}-byte limit")]
    PayloadTooLarge { size: u64, limit: u64 },

    #[error("schematic has {count} dies, exceeding the limit of {limit}")]
    TooManyDies { count: usize, limit: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("error parsing TOML: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("error encoding JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ErrorSource {
    /// Maps the source onto the wire-level code enum.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidRequest(_) => ErrorCode::ValidationError,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::Parse(_) => ErrorCode::ParserError,
            Self::Compile(_) => ErrorCode::CompileError,
            Self::Plugin(_) => ErrorCode::UnknownPlugin,
            Self::Repo(e) => e.code(),
            Self::Budget(BudgetExceeded::Cancelled) => ErrorCode::Cancelled,
            Self::Budget(BudgetExceeded::Timeout { .. }) => ErrorCode::Timeout,
            Self::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            Self::TooManyDies { .. } => ErrorCode::TooManyDies,
            Self::Io(_) | Self::TomlParsing(_) | Self::Json(_) | Self::Internal(_) => {
                ErrorCode::BusinessLogicError
            }
        }
    }
}

/// Wire-level error codes, translated to HTTP once at the edge.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    ValidationError,
    NotFound,
    BusinessLogicError,
    FileUploadError,
    ParserError,
    LifecycleViolation,
    CompileError,
    Timeout,
    Cancelled,
    PayloadTooLarge,
    TooManyDies,
    UnknownPlugin,
    NoEligibleRules,
    EmptyWafer,
    ToolConstraintInfeasible,
}

impl ErrorCode {
    /// HTTP status the façade maps this code to.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::ValidationError | Self::FileUploadError | Self::ParserError => 400,
            Self::NotFound => 404,
            Self::LifecycleViolation => 409,
            Self::PayloadTooLarge | Self::TooManyDies => 413,
            Self::CompileError
            | Self::UnknownPlugin
            | Self::NoEligibleRules
            | Self::EmptyWafer
            | Self::ToolConstraintInfeasible => 422,
            Self::Cancelled => 499,
            Self::BusinessLogicError => 500,
            Self::Timeout => 504,
        }
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ValidationError => "validationError",
            Self::NotFound => "notFound",
            Self::BusinessLogicError => "businessLogicError",
            Self::FileUploadError => "fileUploadError",
            Self::ParserError => "parserError",
            Self::LifecycleViolation => "lifecycleViolation",
            Self::CompileError => "compileError",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::PayloadTooLarge => "payloadTooLarge",
            Self::TooManyDies => "tooManyDies",
            Self::UnknownPlugin => "unknownPlugin",
            Self::NoEligibleRules => "noEligibleRules",
            Self::EmptyWafer => "emptyWafer",
            Self::ToolConstraintInfeasible => "toolConstraintInfeasible",
        };
        write!(f, "{s}")
    }
}
