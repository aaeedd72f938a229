//! Quality metrics used to score and prune candidate explanations.
//!
//! A [`QualityMetric`] maps a candidate's aggregate vector to a score. Metrics
//! that can only stay equal or shrink when predicates are added declare
//! themselves monotonic; only those are allowed to prune the search. Other
//! metrics are evaluated for reporting and ranking.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::error::{ExplainError, Result};

/// Epsilon value for floating point threshold comparisons.
const EPSILON: f64 = 1e-10;

/// A scoring function over a candidate's aggregate vector.
///
/// Metrics capture global totals once in [`initialize`](Self::initialize)
/// and are read-only afterwards, so a single instance can score candidates
/// from many threads.
pub trait QualityMetric: Send + Sync + Debug {
    /// Name used as the key in reported metric maps.
    fn name(&self) -> &str;

    /// Captures totals computed over the whole dataset.
    ///
    /// # Errors
    ///
    /// Returns [`ExplainError::MetricUndefined`] when the metric cannot be
    /// evaluated on this dataset, e.g. when there are no outliers.
    fn initialize(&mut self, global_aggregates: &[f64]) -> Result<()>;

    /// Scores a candidate's aggregate vector.
    fn value(&self, aggregates: &[f64]) -> f64;

    /// Whether the score can only stay equal or decrease as predicates are added.
    fn is_monotonic(&self) -> bool;

    /// Threshold test.
    fn passes(&self, score: f64, threshold: f64) -> bool {
        score + EPSILON >= threshold
    }
}

fn aggregate_at(aggregates: &[f64], index: usize, metric: &str) -> Result<f64> {
    aggregates.get(index).copied().ok_or_else(|| {
        ExplainError::invalid_config(format!(
            "{metric} reads aggregate {index} but only {} are configured",
            aggregates.len()
        ))
    })
}

/// Fraction of all outliers captured by a candidate.
///
/// Monotonic: adding a predicate can only shrink the matching rows.
#[derive(Debug, Clone)]
pub struct SupportMetric {
    outlier_index: usize,
    global_outliers: f64,
}

impl SupportMetric {
    /// Creates a support metric reading outlier counts from aggregate `outlier_index`.
    pub fn new(outlier_index: usize) -> Self {
        Self {
            outlier_index,
            global_outliers: 0.0,
        }
    }

    /// Creates a support metric with an already known outlier total.
    pub fn with_total(outlier_index: usize, global_outliers: f64) -> Self {
        Self {
            outlier_index,
            global_outliers,
        }
    }
}

impl QualityMetric for SupportMetric {
    fn name(&self) -> &str {
        "support"
    }

    fn initialize(&mut self, global_aggregates: &[f64]) -> Result<()> {
        let outliers = aggregate_at(global_aggregates, self.outlier_index, self.name())?;
        if outliers <= 0.0 {
            return Err(ExplainError::metric_undefined(
                self.name(),
                "the dataset contains no outliers",
            ));
        }
        self.global_outliers = outliers;
        Ok(())
    }

    fn value(&self, aggregates: &[f64]) -> f64 {
        if self.global_outliers <= 0.0 {
            return 0.0;
        }
        aggregates[self.outlier_index] / self.global_outliers
    }

    fn is_monotonic(&self) -> bool {
        true
    }
}

/// Outlier rate inside a candidate relative to the dataset's outlier rate.
///
/// Not monotonic: refining a candidate can raise or lower its outlier rate.
#[derive(Debug, Clone)]
pub struct RiskRatioMetric {
    outlier_index: usize,
    total_index: usize,
    global_rate: f64,
}

impl RiskRatioMetric {
    /// Creates a risk ratio metric over the given outlier and total aggregates.
    pub fn new(outlier_index: usize, total_index: usize) -> Self {
        Self {
            outlier_index,
            total_index,
            global_rate: 0.0,
        }
    }
}

impl QualityMetric for RiskRatioMetric {
    fn name(&self) -> &str {
        "risk_ratio"
    }

    fn initialize(&mut self, global_aggregates: &[f64]) -> Result<()> {
        let outliers = aggregate_at(global_aggregates, self.outlier_index, self.name())?;
        let total = aggregate_at(global_aggregates, self.total_index, self.name())?;
        if outliers <= 0.0 || total <= 0.0 {
            return Err(ExplainError::metric_undefined(
                self.name(),
                format!("global outlier rate is undefined ({outliers} outliers of {total})"),
            ));
        }
        self.global_rate = outliers / total;
        Ok(())
    }

    fn value(&self, aggregates: &[f64]) -> f64 {
        let total = aggregates[self.total_index];
        if total <= 0.0 || self.global_rate <= 0.0 {
            return 0.0;
        }
        (aggregates[self.outlier_index] / total) / self.global_rate
    }

    fn is_monotonic(&self) -> bool {
        false
    }
}

/// What the search does with a candidate after scoring it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricAction {
    /// Every threshold passes: report it and keep refining.
    Keep,
    /// Only non-monotonic thresholds fail: refine it, do not report it.
    Next,
    /// A monotonic threshold fails: neither it nor any superset can pass.
    Prune,
}

impl MetricAction {
    /// Whether the candidate takes part in the next order's join.
    pub fn survives(self) -> bool {
        !matches!(self, MetricAction::Prune)
    }

    /// Whether the candidate may appear in the output.
    pub fn is_reportable(self) -> bool {
        matches!(self, MetricAction::Keep)
    }
}

/// The metrics of a run paired with their thresholds.
#[derive(Debug, Default)]
pub struct MetricSet {
    metrics: Vec<(Box<dyn QualityMetric>, f64)>,
}

impl MetricSet {
    /// Creates an empty metric set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a metric with its threshold.
    pub fn with_metric(mut self, metric: Box<dyn QualityMetric>, threshold: f64) -> Self {
        self.metrics.push((metric, threshold));
        self
    }

    /// Initializes every metric with the dataset totals.
    pub fn initialize(&mut self, global_aggregates: &[f64]) -> Result<()> {
        for (metric, _) in &mut self.metrics {
            metric.initialize(global_aggregates)?;
        }
        Ok(())
    }

    /// Number of metrics.
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// Returns true if there are no metrics.
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Metric names in declaration order.
    pub fn names(&self) -> Vec<&str> {
        self.metrics.iter().map(|(m, _)| m.name()).collect()
    }

    /// Position of a metric by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.metrics.iter().position(|(m, _)| m.name() == name)
    }

    /// Thresholds in declaration order.
    pub fn thresholds(&self) -> Vec<f64> {
        self.metrics.iter().map(|(_, t)| *t).collect()
    }

    /// Whether the metric at `index` may prune.
    pub fn is_monotonic(&self, index: usize) -> bool {
        self.metrics[index].0.is_monotonic()
    }

    /// Scores an aggregate vector with every metric and decides its action.
    pub fn evaluate(&self, aggregates: &[f64]) -> (Vec<f64>, MetricAction) {
        let mut scores = Vec::with_capacity(self.metrics.len());
        let mut action = MetricAction::Keep;
        for (metric, threshold) in &self.metrics {
            let score = metric.value(aggregates);
            scores.push(score);
            if !metric.passes(score, *threshold) {
                if metric.is_monotonic() {
                    action = MetricAction::Prune;
                } else if action == MetricAction::Keep {
                    action = MetricAction::Next;
                }
            }
        }
        (scores, action)
    }
}
