//! Per-row aggregate columns consumed by the candidate search.
//!
//! A summarization strategy declares a list of [`AggregateSpec`]s. The
//! [`AggregateBuilder`] turns them into one `f64` vector per aggregate,
//! parallel with the table's rows. Row `i` contributes
//! `columns[k][i]` to aggregate `k` of every candidate that matches it.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{ExplainError, Result};
use crate::sources::DataTable;

/// How per-row values of an aggregate are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregationOp {
    /// Sum of the row values.
    Sum,
    /// Minimum of the row values.
    Min,
    /// Maximum of the row values.
    Max,
}

impl AggregationOp {
    /// The identity element: the value of an aggregate over zero rows.
    pub fn identity(self) -> f64 {
        match self {
            AggregationOp::Sum => 0.0,
            AggregationOp::Min => f64::INFINITY,
            AggregationOp::Max => f64::NEG_INFINITY,
        }
    }

    /// Combines an accumulated value with a row value.
    #[inline]
    pub fn combine(self, acc: f64, value: f64) -> f64 {
        match self {
            AggregationOp::Sum => acc + value,
            AggregationOp::Min => acc.min(value),
            AggregationOp::Max => acc.max(value),
        }
    }
}

/// Where an aggregate's per-row values come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AggregateSource {
    /// Every row contributes the same value.
    Constant(f64),
    /// A numeric count (weight) column; must be complete.
    CountColumn(String),
    /// A boolean label or numeric outlier-count column; must be complete.
    OutlierColumn(String),
}

/// Declaration of one aggregate column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSpec {
    /// Display name, e.g. "Count".
    pub name: String,
    /// Combination op.
    pub op: AggregationOp,
    /// Source of the per-row values.
    pub source: AggregateSource,
}

impl AggregateSpec {
    /// Creates a new aggregate declaration.
    pub fn new(name: impl Into<String>, op: AggregationOp, source: AggregateSource) -> Self {
        Self {
            name: name.into(),
            op,
            source,
        }
    }

    /// The count aggregate: a named count column, or 1.0 per row.
    pub fn count(name: impl Into<String>, count_column: Option<&str>) -> Self {
        let source = match count_column {
            Some(column) => AggregateSource::CountColumn(column.to_string()),
            None => AggregateSource::Constant(1.0),
        };
        Self::new(name, AggregationOp::Sum, source)
    }
}

/// Per-row aggregate values, one vector per declared aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateColumns {
    specs: Vec<AggregateSpec>,
    columns: Vec<Vec<f64>>,
    num_rows: usize,
}

impl AggregateColumns {
    /// Creates aggregate columns from raw vectors.
    ///
    /// # Errors
    ///
    /// Returns [`ExplainError::InvalidConfiguration`] if the number of specs
    /// and vectors differ or if the vectors have different lengths.
    pub fn new(specs: Vec<AggregateSpec>, columns: Vec<Vec<f64>>) -> Result<Self> {
        if specs.len() != columns.len() {
            return Err(ExplainError::invalid_config(format!(
                "{} aggregate specs but {} aggregate columns",
                specs.len(),
                columns.len()
            )));
        }
        let num_rows = columns.first().map(Vec::len).unwrap_or(0);
        if columns.iter().any(|c| c.len() != num_rows) {
            return Err(ExplainError::invalid_config(
                "aggregate columns have different lengths",
            ));
        }
        Ok(Self {
            specs,
            columns,
            num_rows,
        })
    }

    /// Number of rows.
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Aggregate names, in declaration order.
    pub fn names(&self) -> Vec<&str> {
        self.specs.iter().map(|s| s.name.as_str()).collect()
    }

    /// Aggregation ops, in declaration order.
    pub fn ops(&self) -> Vec<AggregationOp> {
        self.specs.iter().map(|s| s.op).collect()
    }

    /// The per-row vector of aggregate `index`.
    pub fn column(&self, index: usize) -> &[f64] {
        &self.columns[index]
    }

    /// All per-row vectors.
    pub fn columns(&self) -> &[Vec<f64>] {
        &self.columns
    }

    /// Aggregates of a set of rows, one value per aggregate.
    pub fn aggregate_rows<I>(&self, rows: I) -> Vec<f64>
    where
        I: IntoIterator<Item = usize>,
    {
        let mut acc: Vec<f64> = self.specs.iter().map(|s| s.op.identity()).collect();
        for row in rows {
            for (k, spec) in self.specs.iter().enumerate() {
                acc[k] = spec.op.combine(acc[k], self.columns[k][row]);
            }
        }
        acc
    }

    /// Aggregates over every row of the table.
    pub fn global(&self) -> Vec<f64> {
        self.aggregate_rows(0..self.num_rows)
    }
}

/// Builds per-row aggregate vectors from a table.
#[derive(Debug, Clone, Default)]
pub struct AggregateBuilder {
    specs: Vec<AggregateSpec>,
}

impl AggregateBuilder {
    /// Creates a builder for the given aggregate declarations.
    pub fn new(specs: Vec<AggregateSpec>) -> Self {
        Self { specs }
    }

    /// Adds an aggregate declaration.
    pub fn with_aggregate(mut self, spec: AggregateSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Produces one vector per aggregate, each of length `table.num_rows()`.
    ///
    /// # Errors
    ///
    /// - [`ExplainError::InvalidCountColumn`] if a count column is missing,
    ///   not numeric, or contains nulls.
    /// - [`ExplainError::InvalidOutlierColumn`] for the same conditions on an
    ///   outlier column.
    #[instrument(skip_all, fields(aggregates = self.specs.len(), rows = table.num_rows()))]
    pub fn build(&self, table: &dyn DataTable) -> Result<AggregateColumns> {
        let num_rows = table.num_rows();
        let columns = self
            .specs
            .iter()
            .map(|spec| match &spec.source {
                AggregateSource::Constant(value) => Ok(vec![*value; num_rows]),
                AggregateSource::CountColumn(name) => {
                    complete_column(table, name, |c, m| {
                        ExplainError::invalid_count_column(c, m)
                    })
                }
                AggregateSource::OutlierColumn(name) => {
                    complete_column(table, name, |c, m| {
                        ExplainError::invalid_outlier_column(c, m)
                    })
                }
            })
            .collect::<Result<Vec<_>>>()?;

        debug!("Built aggregate columns");
        AggregateColumns::new(self.specs.clone(), columns)
    }
}

/// Reads a numeric column whose values must all be present, finite and
/// non-negative.
fn complete_column(
    table: &dyn DataTable,
    name: &str,
    invalid: fn(String, String) -> ExplainError,
) -> Result<Vec<f64>> {
    let values = table
        .numeric_column(name)
        .map_err(|e| invalid(name.to_string(), e.to_string()))?;
    let nulls = values.iter().filter(|v| v.is_none()).count();
    if nulls > 0 {
        return Err(invalid(
            name.to_string(),
            format!("contains {nulls} null values"),
        ));
    }
    let values: Vec<f64> = values.into_iter().flatten().collect();
    if let Some((row, value)) = values
        .iter()
        .enumerate()
        .find(|(_, v)| !v.is_finite() || **v < 0.0)
    {
        return Err(invalid(
            name.to_string(),
            format!("contains {value} at row {row}; values must be finite and non-negative"),
        ));
    }
    Ok(values)
}
