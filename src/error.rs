//! # Error Types
//!
//! Every fallible engine operation returns [`Result<T>`], whose error side is
//! [`TilerError`]. Request validation has its own [`ValidationError`] type so
//! that a single request can report every offending field at once through
//! [`ValidationErrors`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A single malformed or out-of-range request parameter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("parameter {axis}_start/{axis}_end should not be included: the dataset has no {axis} axis")]
    InvalidAxisUsage { axis: String },

    #[error("{field} ({value}) out of range [0, {size})")]
    IndexOutOfRange {
        field: String,
        value: i64,
        size: usize,
    },

    #[error("{axis}_start ({start}) should be less than or equal to {axis}_end ({end})")]
    InvalidRange { axis: String, start: usize, end: usize },

    #[error("{field} ({value}) must be greater than zero")]
    InvalidLimit { field: String, value: usize },

    #[error("variable '{variable}' does not reference both longitude and latitude")]
    MissingSpatialAxes { variable: String },

    #[error("variable '{variable}' has no {axis} axis")]
    MissingAxis { variable: String, axis: String },

    #[error("{axis} {value} is outside the grid span [{min}, {max}]")]
    PointOutOfRange {
        axis: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{field}: {message}")]
    InvalidParameter { field: String, message: String },
}

impl ValidationError {
    /// Name of the request field the error refers to.
    pub fn field(&self) -> String {
        match self {
            ValidationError::InvalidAxisUsage { axis } => format!("{}_start", axis),
            ValidationError::IndexOutOfRange { field, .. } => field.clone(),
            ValidationError::InvalidRange { axis, .. } => format!("{}_start", axis),
            ValidationError::InvalidLimit { field, .. } => field.clone(),
            ValidationError::MissingSpatialAxes { .. } => "channel".to_string(),
            ValidationError::MissingAxis { axis, .. } => axis.clone(),
            ValidationError::PointOutOfRange { axis, .. } => axis.clone(),
            ValidationError::InvalidParameter { field, .. } => field.clone(),
        }
    }
}

/// All validation failures found in one request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl ValidationErrors {
    pub fn new() -> Self {
        ValidationErrors(Vec::new())
    }

    pub fn push(&mut self, error: ValidationError) {
        self.0.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter()
    }

    /// Converts the collection into `Err` when at least one error was recorded.
    pub fn into_result(self) -> std::result::Result<(), ValidationErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.0.iter().map(|e| e.to_string()).collect();
        write!(f, "{}", messages.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

impl From<ValidationError> for ValidationErrors {
    fn from(error: ValidationError) -> Self {
        ValidationErrors(vec![error])
    }
}

/// Errors raised by the extraction and tiling engine.
#[derive(Error, Debug)]
pub enum TilerError {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("unrecognized dimension '{0}'")]
    UnrecognizedDimension(String),

    #[error("variable '{0}' not found")]
    VariableNotFound(String),

    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("variable '{variable}' has no {axis} axis but a selector was supplied for it")]
    AxisMissingForSelector { variable: String, axis: String },

    #[error("variable '{variable}' uses dimension '{dimension}' of length {len}, which maps to no canonical axis")]
    UnsupportedDimension {
        variable: String,
        dimension: String,
        len: usize,
    },

    #[error("selector {start}..={end} exceeds dimension '{dimension}' of length {len}")]
    SelectorOutOfBounds {
        dimension: String,
        start: usize,
        end: usize,
        len: usize,
    },

    #[error("extracted slice of variable '{0}' is empty")]
    EmptySlice(String),

    #[error("projection failed: {0}")]
    Projection(String),

    #[error("failed to write {path}: {message}")]
    DiskWrite { path: PathBuf, message: String },

    #[error("cache I/O error on {path}: {source}")]
    CacheIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("data source error: {0}")]
    Source(String),

    #[error("NetCDF error: {0}")]
    NetCdf(#[from] netcdf::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, TilerError>;

/// Coarse error classes reported in manifests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Extraction,
    Projection,
    DiskWrite,
    CacheIo,
    Source,
    Config,
}

impl TilerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TilerError::Validation(_) => ErrorKind::Validation,
            TilerError::UnrecognizedDimension(_)
            | TilerError::VariableNotFound(_)
            | TilerError::FileNotFound(_) => ErrorKind::NotFound,
            TilerError::AxisMissingForSelector { .. }
            | TilerError::UnsupportedDimension { .. }
            | TilerError::SelectorOutOfBounds { .. }
            | TilerError::EmptySlice(_) => ErrorKind::Extraction,
            TilerError::Projection(_) => ErrorKind::Projection,
            TilerError::DiskWrite { .. } => ErrorKind::DiskWrite,
            TilerError::CacheIo { .. } => ErrorKind::CacheIo,
            TilerError::Source(_) | TilerError::NetCdf(_) | TilerError::Io(_) => ErrorKind::Source,
            TilerError::Config(_) => ErrorKind::Config,
        }
    }

    /// Disk write failures stop a whole batch; everything else is per tile.
    pub fn is_fatal_for_batch(&self) -> bool {
        matches!(self, TilerError::DiskWrite { .. })
    }
}

impl From<ValidationError> for TilerError {
    fn from(error: ValidationError) -> Self {
        TilerError::Validation(ValidationErrors::from(error))
    }
}
