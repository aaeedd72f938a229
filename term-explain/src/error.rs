//! Error types for the explanation engine.
//!
//! All fallible operations in this crate return [`ExplainError`]. Input
//! validation errors (`Encoding`, `InvalidCountColumn`, `InvalidOutlierColumn`,
//! `ColumnNotFound`, `InvalidConfiguration`) abort a run before any candidate
//! is generated. `MetricUndefined` and `SearchTimeout` are raised inside the
//! search and recovered by the summarizer into an observable report status.

use thiserror::Error;

/// The main error type for explanation search.
#[derive(Error, Debug)]
pub enum ExplainError {
    /// Attribute columns are malformed or misaligned.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// The named count column is missing or holds values that are not usable weights.
    #[error("Invalid count column '{column}': {message}")]
    InvalidCountColumn {
        /// Name of the offending column
        column: String,
        /// Detailed error message
        message: String,
    },

    /// The named outlier column is missing or holds values that are not usable counts.
    #[error("Invalid outlier column '{column}': {message}")]
    InvalidOutlierColumn {
        /// Name of the offending column
        column: String,
        /// Detailed error message
        message: String,
    },

    /// A quality metric cannot be evaluated on this dataset (e.g. zero outliers).
    #[error("Metric '{metric}' is undefined: {message}")]
    MetricUndefined {
        /// Name of the metric
        metric: String,
        /// Why the metric is undefined
        message: String,
    },

    /// The search was cancelled or ran past its deadline.
    #[error("Search timed out after completing order {completed_order}")]
    SearchTimeout {
        /// Highest order whose aggregation and filtering finished
        completed_order: usize,
    },

    /// A required column is not present in the table.
    #[error("Column '{column}' not found in dataset")]
    ColumnNotFound { column: String },

    /// Summarizer configuration is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Error from Arrow operations.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Error from DataFusion operations.
    #[error("DataFusion error: {0}")]
    DataFusion(#[from] datafusion::error::DataFusionError),

    /// Error from serialization/deserialization operations.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic internal error for unexpected conditions.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A type alias for `Result<T, ExplainError>`.
pub type Result<T> = std::result::Result<T, ExplainError>;

impl ExplainError {
    /// Creates an encoding error with the given message.
    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::Encoding(msg.into())
    }

    /// Creates an invalid count column error.
    pub fn invalid_count_column(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidCountColumn {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid outlier column error.
    pub fn invalid_outlier_column(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidOutlierColumn {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Creates a metric undefined error.
    pub fn metric_undefined(metric: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MetricUndefined {
            metric: metric.into(),
            message: message.into(),
        }
    }

    /// Creates a column not found error.
    pub fn column_not_found(column: impl Into<String>) -> Self {
        Self::ColumnNotFound {
            column: column.into(),
        }
    }

    /// Creates an invalid configuration error with the given message.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns true for errors the summarizer recovers into a report status.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::MetricUndefined { .. } | Self::SearchTimeout { .. }
        )
    }
}

/// Converts serde_json errors to ExplainError.
impl From<serde_json::Error> for ExplainError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::fmt::Error> for ExplainError {
    fn from(err: std::fmt::Error) -> Self {
        Self::Serialization(format!("failed to render report: {err}"))
    }
}
