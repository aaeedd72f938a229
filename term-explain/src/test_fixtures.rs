//! Common test fixtures for summarization scenarios.
//!
//! Available to unit tests and, through the `test-utils` feature, to
//! integration tests and benchmarks.

use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use datafusion::datasource::MemTable;
use datafusion::prelude::SessionContext;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::Result;

/// Six rows whose outliers are exactly `region=EU AND device=mobile`.
///
/// Columns: `region`, `device` (Utf8), `is_outlier` (Boolean), `requests`
/// (Int64, all ones).
pub fn region_device_batch() -> RecordBatch {
    region_device_batch_with_labels(&[true, true, true, false, false, false])
}

/// The region/device table with caller-supplied outlier labels.
pub fn region_device_batch_with_labels(labels: &[bool; 6]) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("region", DataType::Utf8, true),
        Field::new("device", DataType::Utf8, true),
        Field::new("is_outlier", DataType::Boolean, false),
        Field::new("requests", DataType::Int64, true),
    ]));
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from(vec!["EU", "EU", "EU", "EU", "US", "US"])),
            Arc::new(StringArray::from(vec![
                "mobile", "mobile", "mobile", "desktop", "mobile", "desktop",
            ])),
            Arc::new(BooleanArray::from(labels.to_vec())),
            Arc::new(Int64Array::from(vec![1; 6])),
        ],
    )
    .expect("fixture schema matches its columns")
}

/// Registers [`region_device_batch`] as table `incidents`.
pub async fn create_context_with_incidents() -> Result<SessionContext> {
    let ctx = SessionContext::new();
    let batch = region_device_batch();
    let table = MemTable::try_new(batch.schema(), vec![vec![batch]])?;
    ctx.register_table("incidents", Arc::new(table))?;
    Ok(ctx)
}

/// Parameters of a seeded synthetic dataset.
///
/// Attribute `attr_i` takes values `v0..v{cardinality}` uniformly. Rows
/// carrying `attr_0=v0 AND attr_1=v0` are outliers with probability
/// `planted_rate`; every other row with probability `background_rate`.
#[derive(Debug, Clone)]
pub struct SyntheticDataset {
    /// Number of rows.
    pub num_rows: usize,
    /// Number of attribute columns, at least two.
    pub num_attributes: usize,
    /// Distinct values per attribute.
    pub cardinality: usize,
    /// Outlier probability inside the planted combination.
    pub planted_rate: f64,
    /// Outlier probability elsewhere.
    pub background_rate: f64,
    /// Fraction of attribute values replaced by nulls.
    pub null_rate: f64,
    /// RNG seed.
    pub seed: u64,
}

impl Default for SyntheticDataset {
    fn default() -> Self {
        Self {
            num_rows: 10_000,
            num_attributes: 4,
            cardinality: 5,
            planted_rate: 0.9,
            background_rate: 0.02,
            null_rate: 0.0,
            seed: 42,
        }
    }
}

impl SyntheticDataset {
    /// Attribute column names.
    pub fn attribute_names(&self) -> Vec<String> {
        (0..self.num_attributes).map(|i| format!("attr_{i}")).collect()
    }

    /// Generates the batch: the attribute columns, then `is_outlier`
    /// (Boolean) and `weight` (Float64, 1.0 to 3.0).
    pub fn generate(&self) -> RecordBatch {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let cardinality = self.cardinality.max(1);

        let mut values: Vec<Vec<Option<String>>> =
            vec![Vec::with_capacity(self.num_rows); self.num_attributes];
        let mut outliers = Vec::with_capacity(self.num_rows);
        let mut weights = Vec::with_capacity(self.num_rows);

        for _ in 0..self.num_rows {
            let mut planted = true;
            for (i, column) in values.iter_mut().enumerate() {
                let value = rng.random_range(0..cardinality);
                if i < 2 && value != 0 {
                    planted = false;
                }
                if self.null_rate > 0.0 && rng.random_bool(self.null_rate.min(1.0)) {
                    if i < 2 {
                        planted = false;
                    }
                    column.push(None);
                } else {
                    column.push(Some(format!("v{value}")));
                }
            }
            let rate = if planted && self.num_attributes >= 2 {
                self.planted_rate
            } else {
                self.background_rate
            };
            outliers.push(rng.random_bool(rate.clamp(0.0, 1.0)));
            weights.push(rng.random_range(1..=3) as f64);
        }

        let mut fields: Vec<Field> = self
            .attribute_names()
            .into_iter()
            .map(|name| Field::new(name, DataType::Utf8, true))
            .collect();
        fields.push(Field::new("is_outlier", DataType::Boolean, false));
        fields.push(Field::new("weight", DataType::Float64, false));

        let mut columns: Vec<ArrayRef> = values
            .into_iter()
            .map(|column| Arc::new(StringArray::from(column)) as ArrayRef)
            .collect();
        columns.push(Arc::new(BooleanArray::from(outliers)));
        columns.push(Arc::new(Float64Array::from(weights)));

        RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
            .expect("synthetic schema matches its columns")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_device_batch() {
        let batch = region_device_batch();
        assert_eq!(batch.num_rows(), 6);
        assert_eq!(batch.num_columns(), 4);
    }

    #[test]
    fn test_synthetic_is_deterministic() {
        let dataset = SyntheticDataset {
            num_rows: 500,
            null_rate: 0.1,
            ..SyntheticDataset::default()
        };
        let a = dataset.generate();
        let b = dataset.generate();
        assert_eq!(a, b);
        assert_eq!(a.num_rows(), 500);
        assert_eq!(a.num_columns(), 6);
    }

    #[tokio::test]
    async fn test_context_with_incidents() {
        let ctx = create_context_with_incidents().await.unwrap();
        let df = ctx.sql("SELECT COUNT(*) FROM incidents").await.unwrap();
        let batches = df.collect().await.unwrap();
        assert_eq!(batches[0].num_rows(), 1);
    }
}
