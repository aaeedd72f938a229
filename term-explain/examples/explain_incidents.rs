//! Explains which request attributes concentrate slow requests.
//!
//! Run with `cargo run --example explain_incidents`.

use std::sync::Arc;

use arrow::array::{Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use datafusion::datasource::MemTable;
use datafusion::prelude::*;
use term_explain::formatters::{FormatterConfig, HumanFormatter, ReportFormatter};
use term_explain::logging::setup::{init_logging, LoggingConfig};
use term_explain::prelude::*;
use term_explain::sources::load_query;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    init_logging(LoggingConfig::default())?;

    let schema = Arc::new(Schema::new(vec![
        Field::new("region", DataType::Utf8, false),
        Field::new("device", DataType::Utf8, false),
        Field::new("app_version", DataType::Utf8, false),
        Field::new("latency_ms", DataType::Int64, false),
    ]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(StringArray::from(vec![
                "EU", "EU", "EU", "EU", "US", "US", "US", "APAC", "APAC", "EU",
            ])),
            Arc::new(StringArray::from(vec![
                "mobile", "mobile", "mobile", "desktop", "mobile", "desktop", "desktop", "mobile",
                "desktop", "mobile",
            ])),
            Arc::new(StringArray::from(vec![
                "2.1", "2.1", "2.0", "2.1", "2.1", "2.0", "2.1", "2.0", "2.0", "2.1",
            ])),
            Arc::new(Int64Array::from(vec![
                900, 850, 120, 80, 110, 95, 70, 130, 60, 990,
            ])),
        ],
    )?;

    let ctx = SessionContext::new();
    ctx.register_table("requests", Arc::new(MemTable::try_new(schema, vec![vec![batch]])?))?;
    let labeled = load_query(
        &ctx,
        "SELECT region, device, app_version, latency_ms > 500 AS is_slow FROM requests",
    )
    .await?;

    let summarizer = Summarizer::builder()
        .strategy(SummaryStrategy::RiskRatio)
        .attributes(["region", "device", "app_version"])
        .outlier_column("is_slow")
        .min_support(0.5)
        .min_risk_ratio(2.0)
        .build()?;
    let report = summarizer.summarize(&labeled)?;

    let formatter = HumanFormatter::with_config(FormatterConfig::detailed());
    println!("{}", formatter.format(&report)?);
    Ok(())
}
