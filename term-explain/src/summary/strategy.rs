//! Summarization strategies and the [`Summarizer`] entry point.
//!
//! A [`SummaryStrategy`] is a pure declaration: which aggregates to build,
//! which quality metrics to score with and at which thresholds, and which
//! metric ranks the output. The [`Summarizer`] runs one shared pipeline for
//! every strategy:
//!
//! ```text
//! table -> AttributeEncoder -> AggregateBuilder -> MetricSet::initialize
//!       -> CandidateLattice::search -> select_candidates -> ExplanationReport
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use term_explain::summary::{DedupPolicy, Summarizer, SummaryStrategy};
//! # use arrow::record_batch::RecordBatch;
//!
//! # fn example(batch: &RecordBatch) -> term_explain::error::Result<()> {
//! let summarizer = Summarizer::builder()
//!     .strategy(SummaryStrategy::RiskRatio)
//!     .attributes(["region", "device"])
//!     .outlier_column("is_outlier")
//!     .min_support(0.2)
//!     .min_risk_ratio(2.0)
//!     .dedup_policy(DedupPolicy::Minimal)
//!     .build()?;
//!
//! let report = summarizer.summarize(batch)?;
//! for explanation in &report.explanations {
//!     println!("{explanation}: {:?}", explanation.metrics);
//! }
//! # Ok(())
//! # }
//! ```

use std::time::{Duration, Instant};

use arrow::compute::concat_batches;
use arrow::record_batch::RecordBatch;
use chrono::Utc;
use datafusion::prelude::SessionContext;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::aggregates::{
    AggregateBuilder, AggregateColumns, AggregateSource, AggregateSpec, AggregationOp,
};
use super::encoder::{AttributeColumn, AttributeEncoder};
use super::explanation::{
    select_candidates, DedupPolicy, Explanation, ExplanationReport, SearchStatus,
};
use super::index::MembershipStrategy;
use super::lattice::{CancellationFlag, CandidateLattice, LatticeConfig};
use super::metrics::{MetricSet, RiskRatioMetric, SupportMetric};
use crate::error::{ExplainError, Result};
use crate::logging::{truncate_field, LogConfig};
use crate::{log_search_op, perf_debug};
use crate::sources::{load_table, DataTable};

/// Name of the count aggregate.
pub const COUNT_AGGREGATE: &str = "Count";

/// Name of the outlier-count aggregate.
pub const OUTLIER_COUNT_AGGREGATE: &str = "Outlier Count";

/// The closed set of summarization strategies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SummaryStrategy {
    /// Scores by support only.
    ///
    /// Without an outlier column every input row is an outlier and the only
    /// aggregate is `Count`. With one, aggregates are `Outlier Count` and
    /// `Count`.
    #[default]
    Support,
    /// Scores by support (prunes) and risk ratio (ranks). Requires an
    /// outlier column.
    RiskRatio,
}

impl SummaryStrategy {
    /// Aggregates to compute, outlier count first.
    pub fn aggregate_specs(&self, config: &SummarizerConfig) -> Result<Vec<AggregateSpec>> {
        let count = AggregateSpec::count(COUNT_AGGREGATE, config.count_column.as_deref());
        match (self, &config.outlier_column) {
            (SummaryStrategy::Support, None) => Ok(vec![count]),
            (_, Some(outlier_column)) => Ok(vec![
                AggregateSpec::new(
                    OUTLIER_COUNT_AGGREGATE,
                    AggregationOp::Sum,
                    AggregateSource::OutlierColumn(outlier_column.clone()),
                ),
                count,
            ]),
            (SummaryStrategy::RiskRatio, None) => Err(ExplainError::invalid_config(
                "the risk ratio strategy requires an outlier column",
            )),
        }
    }

    /// Quality metrics with their thresholds.
    ///
    /// Aggregate 0 always holds outlier counts; the total count, when
    /// present, is aggregate 1.
    pub fn quality_metrics(&self, config: &SummarizerConfig, full_num_outliers: f64) -> MetricSet {
        let support = MetricSet::new().with_metric(
            Box::new(SupportMetric::with_total(0, full_num_outliers)),
            config.min_support,
        );
        match self {
            SummaryStrategy::Support => support,
            SummaryStrategy::RiskRatio => {
                support.with_metric(Box::new(RiskRatioMetric::new(0, 1)), config.min_risk_ratio)
            }
        }
    }

    /// Metric used to rank and deduplicate explanations.
    pub fn ranking_metric(&self) -> &'static str {
        match self {
            SummaryStrategy::Support => "support",
            SummaryStrategy::RiskRatio => "risk_ratio",
        }
    }

    /// Number of outliers in the whole dataset: the sum of aggregate 0.
    pub fn number_of_outliers(&self, aggregates: &AggregateColumns) -> f64 {
        aggregates.column(0).iter().sum()
    }
}

/// Configuration bundle of one summarization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    /// Categorical attribute columns to search.
    pub attributes: Vec<String>,
    /// Strategy deciding aggregates and metrics.
    pub strategy: SummaryStrategy,
    /// Optional count (weight) column; defaults to 1.0 per row.
    pub count_column: Option<String>,
    /// Optional boolean or numeric outlier column.
    pub outlier_column: Option<String>,
    /// Minimum fraction of outliers an explanation must cover.
    pub min_support: f64,
    /// Minimum risk ratio (risk ratio strategy only).
    pub min_risk_ratio: f64,
    /// Highest number of predicates per explanation.
    pub max_order: usize,
    /// Which overlapping explanations to report.
    pub dedup_policy: DedupPolicy,
    /// Overrides the strategy's ranking metric.
    pub ranking_metric: Option<String>,
    /// Row-set representation used by the search.
    pub membership: MembershipStrategy,
    /// Stop searching after this many milliseconds.
    pub timeout_ms: Option<u64>,
    /// Cap on the number of reported explanations.
    pub max_explanations: Option<usize>,
    /// Worker threads; `None` uses the global pool.
    pub num_threads: Option<usize>,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            attributes: Vec::new(),
            strategy: SummaryStrategy::Support,
            count_column: None,
            outlier_column: None,
            min_support: 0.1,
            min_risk_ratio: 3.0,
            max_order: 3,
            dedup_policy: DedupPolicy::default(),
            ranking_metric: None,
            membership: MembershipStrategy::Auto,
            timeout_ms: None,
            max_explanations: None,
            num_threads: None,
        }
    }
}

impl SummarizerConfig {
    /// Parses a configuration from JSON; missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serializes the configuration as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks the configuration before any data is touched.
    pub fn validate(&self) -> Result<()> {
        if self.attributes.is_empty() {
            return Err(ExplainError::invalid_config(
                "at least one attribute column is required",
            ));
        }
        let mut seen = std::collections::HashSet::new();
        if let Some(dup) = self.attributes.iter().find(|a| !seen.insert(a.as_str())) {
            return Err(ExplainError::invalid_config(format!(
                "attribute '{dup}' is listed more than once"
            )));
        }
        if !(0.0..=1.0).contains(&self.min_support) {
            return Err(ExplainError::invalid_config(format!(
                "min_support must be within [0, 1], got {}",
                self.min_support
            )));
        }
        if !self.min_risk_ratio.is_finite() || self.min_risk_ratio < 0.0 {
            return Err(ExplainError::invalid_config(format!(
                "min_risk_ratio must be finite and non-negative, got {}",
                self.min_risk_ratio
            )));
        }
        if self.max_order == 0 {
            return Err(ExplainError::invalid_config("max_order must be at least 1"));
        }
        if self.num_threads == Some(0) {
            return Err(ExplainError::invalid_config("num_threads must be at least 1"));
        }
        self.strategy.aggregate_specs(self)?;
        let metrics = self.strategy.quality_metrics(self, 0.0);
        let ranking = self.ranking_metric_name();
        if metrics.index_of(ranking).is_none() {
            return Err(ExplainError::invalid_config(format!(
                "ranking metric '{ranking}' is not one of {:?}",
                metrics.names()
            )));
        }
        Ok(())
    }

    /// The metric explanations are ranked by.
    pub fn ranking_metric_name(&self) -> &str {
        self.ranking_metric
            .as_deref()
            .unwrap_or_else(|| self.strategy.ranking_metric())
    }
}

/// Builder for [`Summarizer`].
#[derive(Debug, Clone, Default)]
pub struct SummarizerBuilder {
    config: SummarizerConfig,
    log_config: LogConfig,
    cancellation: Option<CancellationFlag>,
}

impl SummarizerBuilder {
    /// Sets the strategy.
    pub fn strategy(mut self, strategy: SummaryStrategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    /// Sets the attribute columns to search.
    pub fn attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the count column.
    pub fn count_column(mut self, column: impl Into<String>) -> Self {
        self.config.count_column = Some(column.into());
        self
    }

    /// Sets the outlier column.
    pub fn outlier_column(mut self, column: impl Into<String>) -> Self {
        self.config.outlier_column = Some(column.into());
        self
    }

    /// Sets the minimum support.
    pub fn min_support(mut self, min_support: f64) -> Self {
        self.config.min_support = min_support;
        self
    }

    /// Sets the minimum risk ratio.
    pub fn min_risk_ratio(mut self, min_risk_ratio: f64) -> Self {
        self.config.min_risk_ratio = min_risk_ratio;
        self
    }

    /// Sets the maximum explanation order.
    pub fn max_order(mut self, max_order: usize) -> Self {
        self.config.max_order = max_order;
        self
    }

    /// Sets the dedup policy.
    pub fn dedup_policy(mut self, policy: DedupPolicy) -> Self {
        self.config.dedup_policy = policy;
        self
    }

    /// Overrides the ranking metric.
    pub fn ranking_metric(mut self, metric: impl Into<String>) -> Self {
        self.config.ranking_metric = Some(metric.into());
        self
    }

    /// Sets the row-set representation.
    pub fn membership(mut self, membership: MembershipStrategy) -> Self {
        self.config.membership = membership;
        self
    }

    /// Sets a search timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Caps the number of reported explanations.
    pub fn max_explanations(mut self, max: usize) -> Self {
        self.config.max_explanations = Some(max);
        self
    }

    /// Runs on a dedicated pool with this many threads.
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.config.num_threads = Some(threads);
        self
    }

    /// Sets the logging behavior.
    pub fn log_config(mut self, log_config: LogConfig) -> Self {
        self.log_config = log_config;
        self
    }

    /// Lets the caller cancel running searches.
    pub fn cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancellation = Some(flag);
        self
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: SummarizerConfig) -> Self {
        self.config = config;
        self
    }

    /// Validates the configuration and builds the summarizer.
    pub fn build(self) -> Result<Summarizer> {
        self.config.validate()?;
        Ok(Summarizer {
            config: self.config,
            log_config: self.log_config,
            cancellation: self.cancellation,
        })
    }
}

/// Explains which attribute combinations concentrate the outliers of a table.
#[derive(Debug, Clone)]
pub struct Summarizer {
    config: SummarizerConfig,
    log_config: LogConfig,
    cancellation: Option<CancellationFlag>,
}

impl Summarizer {
    /// Creates a builder.
    pub fn builder() -> SummarizerBuilder {
        SummarizerBuilder::default()
    }

    /// Creates a summarizer from a configuration.
    pub fn new(config: SummarizerConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    /// The validated configuration.
    pub fn config(&self) -> &SummarizerConfig {
        &self.config
    }

    /// Returns a copy observing the given cancellation flag.
    pub fn with_cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancellation = Some(flag);
        self
    }

    /// Summarizes a table.
    ///
    /// # Errors
    ///
    /// Input problems (missing or misaligned attribute columns, invalid count
    /// or outlier columns) abort the run. A dataset without outliers yields an
    /// empty report with [`SearchStatus::NoOutliers`]; a timeout yields a
    /// partial report with [`SearchStatus::TimedOut`].
    pub fn summarize(&self, table: &dyn DataTable) -> Result<ExplanationReport> {
        match self.config.num_threads {
            Some(threads) => {
                if threads > num_cpus::get() {
                    warn!(
                        threads,
                        cpus = num_cpus::get(),
                        "More worker threads requested than available CPUs"
                    );
                }
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|e| ExplainError::internal(format!("failed to build thread pool: {e}")))?;
                pool.install(|| self.run(table))
            }
            None => self.run(table),
        }
    }

    /// Summarizes record batches sharing one schema.
    pub fn summarize_batches(&self, batches: &[RecordBatch]) -> Result<ExplanationReport> {
        let first = batches
            .first()
            .ok_or_else(|| ExplainError::invalid_config("no record batches to summarize"))?;
        let batch = concat_batches(&first.schema(), batches)?;
        self.summarize(&batch)
    }

    /// Collects a table registered with DataFusion and summarizes it on a
    /// blocking worker thread.
    pub async fn summarize_table(
        &self,
        ctx: &SessionContext,
        table_name: &str,
    ) -> Result<ExplanationReport> {
        let batch = load_table(ctx, table_name).await?;
        let summarizer = self.clone();
        tokio::task::spawn_blocking(move || summarizer.summarize(&batch))
            .await
            .map_err(|e| ExplainError::internal(format!("summarization task failed: {e}")))?
    }

    #[instrument(skip_all, fields(strategy = ?self.config.strategy, rows = table.num_rows()))]
    fn run(&self, table: &dyn DataTable) -> Result<ExplanationReport> {
        let started_at = Utc::now();
        let deadline = self
            .config
            .timeout_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));
        let strategy = self.config.strategy;

        let columns = self
            .config
            .attributes
            .iter()
            .map(|name| {
                Ok(AttributeColumn::new(
                    name.clone(),
                    table.string_column(name)?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        let mut encoder = AttributeEncoder::new();
        let matrix = encoder.encode_attributes(&columns)?;
        drop(columns);

        let aggregates =
            AggregateBuilder::new(strategy.aggregate_specs(&self.config)?).build(table)?;
        let global = aggregates.global();
        let total_outliers = strategy.number_of_outliers(&aggregates);
        log_search_op!(
            self.log_config,
            rows = matrix.num_rows(),
            codes = encoder.num_codes(),
            total_outliers,
            "Prepared encoded input"
        );

        let aggregate_names: Vec<String> =
            aggregates.names().iter().map(|n| n.to_string()).collect();
        let mut metrics = strategy.quality_metrics(&self.config, total_outliers);
        let metric_names: Vec<String> = metrics.names().iter().map(|n| n.to_string()).collect();
        let ranking_metric = self.config.ranking_metric_name().to_string();
        let ranking_index = metrics.index_of(&ranking_metric).ok_or_else(|| {
            ExplainError::invalid_config(format!("unknown ranking metric '{ranking_metric}'"))
        })?;

        let mut report = ExplanationReport {
            explanations: Vec::new(),
            total_outliers,
            global_aggregates: aggregate_names
                .iter()
                .cloned()
                .zip(global.iter().copied())
                .collect(),
            num_rows: matrix.num_rows(),
            attributes: encoder.column_names().to_vec(),
            aggregate_names: aggregate_names.clone(),
            metric_names: metric_names.clone(),
            ranking_metric,
            dedup_policy: self.config.dedup_policy,
            levels: Vec::new(),
            truncated: 0,
            status: SearchStatus::Complete,
            started_at,
            finished_at: started_at,
        };

        match metrics.initialize(&global) {
            Ok(()) => {}
            Err(err @ ExplainError::MetricUndefined { .. }) => {
                warn!(error = %err, "No explanations possible");
                report.status = SearchStatus::NoOutliers {
                    reason: err.to_string(),
                };
                report.finished_at = Utc::now();
                return Ok(report);
            }
            Err(err) => return Err(err),
        }

        let code_columns = encoder.code_columns();
        let lattice = CandidateLattice::new(
            &matrix,
            &aggregates,
            &metrics,
            &code_columns,
            LatticeConfig {
                max_order: self.config.max_order,
                membership: self.config.membership,
                deadline,
                cancellation: self.cancellation.clone(),
                log_config: self.log_config.clone(),
            },
        )?;
        let outcome = lattice.search();
        if let Some(completed_order) = outcome.interrupted_after {
            report.status = SearchStatus::TimedOut { completed_order };
        }
        report.levels = outcome.levels;

        let mut selected =
            select_candidates(outcome.candidates, self.config.dedup_policy, ranking_index);
        if let Some(max) = self.config.max_explanations {
            report.truncated = selected.len().saturating_sub(max);
            selected.truncate(max);
        }
        report.explanations = selected
            .iter()
            .map(|c| Explanation::from_candidate(c, &encoder, &aggregate_names, &metric_names))
            .collect::<Result<Vec<_>>>()?;
        report.finished_at = Utc::now();

        if self.log_config.log_metrics {
            for explanation in &report.explanations {
                perf_debug!(
                    self.log_config,
                    explanation = %truncate_field(&explanation.to_string(), self.log_config.max_field_length),
                    metrics = ?explanation.metrics,
                    "Reported explanation"
                );
            }
        }

        info!(
            explanations = report.explanations.len(),
            truncated = report.truncated,
            total_outliers = report.total_outliers,
            complete = report.is_complete(),
            "Summarization finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::region_device_batch;

    #[test]
    fn test_support_strategy_declarations() {
        let config = SummarizerConfig::default();
        let specs = SummaryStrategy::Support.aggregate_specs(&config).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, COUNT_AGGREGATE);
        assert_eq!(specs[0].source, AggregateSource::Constant(1.0));

        let config = SummarizerConfig {
            outlier_column: Some("is_outlier".into()),
            count_column: Some("weight".into()),
            ..SummarizerConfig::default()
        };
        let specs = SummaryStrategy::Support.aggregate_specs(&config).unwrap();
        assert_eq!(specs[0].name, OUTLIER_COUNT_AGGREGATE);
        assert_eq!(
            specs[1].source,
            AggregateSource::CountColumn("weight".to_string())
        );

        let metrics = SummaryStrategy::RiskRatio.quality_metrics(&config, 3.0);
        assert_eq!(metrics.names(), vec!["support", "risk_ratio"]);
        assert_eq!(metrics.thresholds(), vec![0.1, 3.0]);
        assert!(metrics.is_monotonic(0));
        assert!(!metrics.is_monotonic(1));
    }

    #[test]
    fn test_config_validation() {
        let valid = SummarizerConfig {
            attributes: vec!["a".into()],
            ..SummarizerConfig::default()
        };
        assert!(valid.validate().is_ok());

        let cases = vec![
            SummarizerConfig::default(),
            SummarizerConfig {
                attributes: vec!["a".into(), "a".into()],
                ..valid.clone()
            },
            SummarizerConfig {
                min_support: 1.5,
                ..valid.clone()
            },
            SummarizerConfig {
                min_risk_ratio: f64::NAN,
                ..valid.clone()
            },
            SummarizerConfig {
                max_order: 0,
                ..valid.clone()
            },
            SummarizerConfig {
                strategy: SummaryStrategy::RiskRatio,
                ..valid.clone()
            },
            SummarizerConfig {
                ranking_metric: Some("risk_ratio".into()),
                ..valid.clone()
            },
            SummarizerConfig {
                num_threads: Some(0),
                ..valid.clone()
            },
        ];
        for config in cases {
            let err = config.validate().unwrap_err();
            assert!(matches!(err, ExplainError::InvalidConfiguration(_)), "{config:?}");
        }
    }

    #[test]
    fn test_config_json_defaults() {
        let config = SummarizerConfig::from_json(
            r#"{"attributes": ["region"], "strategy": "RiskRatio", "outlier_column": "o"}"#,
        )
        .unwrap();
        assert_eq!(config.strategy, SummaryStrategy::RiskRatio);
        assert_eq!(config.max_order, 3);
        assert_eq!(config.dedup_policy, DedupPolicy::Minimal);
        assert_eq!(config.ranking_metric_name(), "risk_ratio");

        let round_trip = SummarizerConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(round_trip, config);
    }

    #[test]
    fn test_summarize_support_with_labels() {
        let summarizer = Summarizer::builder()
            .attributes(["region", "device"])
            .outlier_column("is_outlier")
            .min_support(0.5)
            .dedup_policy(DedupPolicy::ReportAll)
            .build()
            .unwrap();
        let report = summarizer.summarize(&region_device_batch()).unwrap();

        assert_eq!(report.status, SearchStatus::Complete);
        assert_eq!(report.total_outliers, 3.0);
        assert_eq!(report.num_rows, 6);
        assert_eq!(report.global_aggregates[COUNT_AGGREGATE], 6.0);
        assert_eq!(report.len(), 3);
        assert_eq!(report.explanations[0].to_string(), "region=EU");
        assert_eq!(report.explanations[1].to_string(), "device=mobile");
        assert_eq!(
            report.explanations[2].to_string(),
            "region=EU AND device=mobile"
        );
    }

    #[test]
    fn test_dedicated_pool_and_truncation() {
        let summarizer = Summarizer::builder()
            .attributes(["region", "device"])
            .outlier_column("is_outlier")
            .min_support(0.5)
            .dedup_policy(DedupPolicy::ReportAll)
            .num_threads(2)
            .max_explanations(2)
            .build()
            .unwrap();
        let report = summarizer.summarize(&region_device_batch()).unwrap();
        assert_eq!(report.len(), 2);
        assert_eq!(report.truncated, 1);
    }

    #[test]
    fn test_missing_attribute_column_aborts() {
        let summarizer = Summarizer::builder()
            .attributes(["region", "browser"])
            .build()
            .unwrap();
        let err = summarizer.summarize(&region_device_batch()).unwrap_err();
        assert!(matches!(err, ExplainError::ColumnNotFound { .. }));
    }

    #[test]
    fn test_summarize_batches_requires_input() {
        let summarizer = Summarizer::builder().attributes(["region"]).build().unwrap();
        assert!(summarizer.summarize_batches(&[]).is_err());

        let batch = region_device_batch();
        let report = summarizer
            .summarize_batches(&[batch.clone(), batch])
            .unwrap();
        assert_eq!(report.num_rows, 12);
    }
}
