//! Tabular input for explanation search.
//!
//! The engine only needs read access to a table: its row count, attribute
//! columns as strings, and count/outlier columns as numbers. [`DataTable`]
//! captures exactly that and is implemented for Arrow [`RecordBatch`]es.
//! Tables registered with a DataFusion [`SessionContext`] can be collected
//! into a single batch with [`load_table`] or [`load_query`].

use arrow::array::{Array, Float64Array, StringArray};
use arrow::compute::{cast, concat_batches};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use datafusion::prelude::SessionContext;
use tracing::{debug, instrument};

use crate::error::{ExplainError, Result};

/// Read-only view of a table consumed by the summarizer.
pub trait DataTable: Send + Sync {
    /// Number of rows in the table.
    fn num_rows(&self) -> usize;

    /// Names of all columns.
    fn column_names(&self) -> Vec<String>;

    /// Returns the named column rendered as strings, `None` for nulls.
    fn string_column(&self, name: &str) -> Result<Vec<Option<String>>>;

    /// Returns the named numeric or boolean column as `f64`, `None` for nulls.
    fn numeric_column(&self, name: &str) -> Result<Vec<Option<f64>>>;
}

impl DataTable for RecordBatch {
    fn num_rows(&self) -> usize {
        RecordBatch::num_rows(self)
    }

    fn column_names(&self) -> Vec<String> {
        self.schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    fn string_column(&self, name: &str) -> Result<Vec<Option<String>>> {
        let column = self
            .column_by_name(name)
            .ok_or_else(|| ExplainError::column_not_found(name))?;
        let strings = cast(column, &DataType::Utf8)?;
        let strings = strings
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| ExplainError::internal("Utf8 cast did not produce a StringArray"))?;
        Ok(strings.iter().map(|v| v.map(str::to_string)).collect())
    }

    fn numeric_column(&self, name: &str) -> Result<Vec<Option<f64>>> {
        let column = self
            .column_by_name(name)
            .ok_or_else(|| ExplainError::column_not_found(name))?;
        let data_type = column.data_type();
        if !(data_type.is_numeric() || *data_type == DataType::Boolean) {
            return Err(ExplainError::invalid_config(format!(
                "expected a numeric or boolean column, found {data_type}"
            )));
        }
        let values = cast(column, &DataType::Float64)?;
        let values = values
            .as_any()
            .downcast_ref::<Float64Array>()
            .ok_or_else(|| ExplainError::internal("Float64 cast did not produce a Float64Array"))?;
        Ok(values.iter().collect())
    }
}

/// Collects a registered table into a single record batch.
///
/// # Examples
///
/// ```rust,no_run
/// use datafusion::prelude::*;
/// use term_explain::sources::load_table;
///
/// # async fn example() -> term_explain::error::Result<()> {
/// let ctx = SessionContext::new();
/// ctx.register_csv("events", "events.csv", CsvReadOptions::new()).await?;
/// let batch = load_table(&ctx, "events").await?;
/// println!("{} rows", batch.num_rows());
/// # Ok(())
/// # }
/// ```
#[instrument(skip(ctx))]
pub async fn load_table(ctx: &SessionContext, table_name: &str) -> Result<RecordBatch> {
    let df = ctx.table(table_name).await?;
    collect_single_batch(df).await
}

/// Runs a SQL query and collects its result into a single record batch.
///
/// Useful for deriving an outlier label column upstream, e.g.
/// `SELECT *, latency_ms > 500 AS is_outlier FROM requests`.
#[instrument(skip(ctx))]
pub async fn load_query(ctx: &SessionContext, sql: &str) -> Result<RecordBatch> {
    let df = ctx.sql(sql).await?;
    collect_single_batch(df).await
}

async fn collect_single_batch(df: datafusion::dataframe::DataFrame) -> Result<RecordBatch> {
    let schema = df.schema().inner().clone();
    let batches = df.collect().await?;
    let batch = concat_batches(&schema, &batches)?;
    debug!(
        rows = batch.num_rows(),
        partitions = batches.len(),
        "Collected table"
    );
    Ok(batch)
}
