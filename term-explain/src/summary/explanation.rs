//! Explanations returned to the caller, plus deduplication and ranking.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::encoder::{AttributeEncoder, Code};
use super::lattice::{Candidate, LevelStats};
use crate::error::{ExplainError, Result};

/// Which of several overlapping passing explanations are reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DedupPolicy {
    /// Report every explanation that passes all thresholds.
    ReportAll,
    /// Drop an explanation when a strict subset of it passes with an equal
    /// or better ranking score.
    #[default]
    Minimal,
    /// Drop an explanation when a strict superset of it passes with an equal
    /// or better ranking score.
    Maximal,
}

impl fmt::Display for DedupPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DedupPolicy::ReportAll => write!(f, "report-all"),
            DedupPolicy::Minimal => write!(f, "minimal"),
            DedupPolicy::Maximal => write!(f, "maximal"),
        }
    }
}

/// Applies the dedup policy and sorts the remaining candidates.
///
/// Ranking: score of metric `ranking_index` descending, then fewer
/// predicates first, then ascending codes.
pub fn select_candidates(
    candidates: Vec<Candidate>,
    policy: DedupPolicy,
    ranking_index: usize,
) -> Vec<Candidate> {
    let score = |c: &Candidate| c.scores.get(ranking_index).copied().unwrap_or(0.0);

    let keep: Vec<bool> = candidates
        .iter()
        .map(|candidate| match policy {
            DedupPolicy::ReportAll => true,
            DedupPolicy::Minimal => !candidates.iter().any(|other| {
                other.is_strict_subset_of(candidate) && score(other) >= score(candidate)
            }),
            DedupPolicy::Maximal => !candidates.iter().any(|other| {
                candidate.is_strict_subset_of(other) && score(other) >= score(candidate)
            }),
        })
        .collect();

    let mut selected: Vec<Candidate> = candidates
        .into_iter()
        .zip(keep)
        .filter_map(|(candidate, keep)| keep.then_some(candidate))
        .collect();

    selected.sort_by(|a, b| {
        score(b)
            .total_cmp(&score(a))
            .then_with(|| a.order().cmp(&b.order()))
            .then_with(|| a.codes.cmp(&b.codes))
    });
    selected
}

/// One `attribute = value` predicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttributePredicate {
    /// Attribute (column) name.
    pub column: String,
    /// Attribute value.
    pub value: String,
}

impl fmt::Display for AttributePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.column, self.value)
    }
}

/// A conjunction of predicates associated with the outliers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    /// Predicates in column order.
    pub predicates: Vec<AttributePredicate>,
    /// Aggregate values over the matching rows, by aggregate name.
    pub aggregates: BTreeMap<String, f64>,
    /// Metric scores, by metric name.
    pub metrics: BTreeMap<String, f64>,
    /// Encoded form of the predicates.
    pub codes: Vec<Code>,
}

impl Explanation {
    /// Decodes a scored candidate.
    pub fn from_candidate(
        candidate: &Candidate,
        encoder: &AttributeEncoder,
        aggregate_names: &[String],
        metric_names: &[String],
    ) -> Result<Self> {
        let mut predicates = candidate
            .codes
            .iter()
            .map(|code| {
                let column = encoder
                    .column_of(*code)
                    .ok_or_else(|| ExplainError::internal(format!("unknown code {code}")))?;
                let (name, value) = encoder
                    .decode(*code)
                    .ok_or_else(|| ExplainError::internal(format!("unknown code {code}")))?;
                Ok((
                    column,
                    AttributePredicate {
                        column: name.to_string(),
                        value: value.to_string(),
                    },
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        predicates.sort_by_key(|(column, _)| *column);

        Ok(Self {
            predicates: predicates.into_iter().map(|(_, p)| p).collect(),
            aggregates: aggregate_names
                .iter()
                .cloned()
                .zip(candidate.aggregates.iter().copied())
                .collect(),
            metrics: metric_names
                .iter()
                .cloned()
                .zip(candidate.scores.iter().copied())
                .collect(),
            codes: candidate.codes.clone(),
        })
    }

    /// Number of predicates.
    pub fn order(&self) -> usize {
        self.predicates.len()
    }

    /// Score of the named metric.
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    /// Value of the named aggregate.
    pub fn aggregate(&self, name: &str) -> Option<f64> {
        self.aggregates.get(name).copied()
    }

    /// Value of the named attribute, if it is part of this explanation.
    pub fn value_of(&self, column: &str) -> Option<&str> {
        self.predicates
            .iter()
            .find(|p| p.column == column)
            .map(|p| p.value.as_str())
    }
}

impl fmt::Display for Explanation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let predicates: Vec<String> = self.predicates.iter().map(ToString::to_string).collect();
        write!(f, "{}", predicates.join(" AND "))
    }
}

/// How a summarization run ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum SearchStatus {
    /// The search ran to completion.
    Complete,
    /// No explanations are possible; the reason says why.
    NoOutliers { reason: String },
    /// Cancellation or timeout stopped the search after `completed_order`.
    TimedOut { completed_order: usize },
}

/// The result of a summarization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationReport {
    /// Ranked explanations.
    pub explanations: Vec<Explanation>,
    /// Sum of the outlier-count aggregate over the whole dataset.
    pub total_outliers: f64,
    /// Every aggregate over the whole dataset.
    pub global_aggregates: BTreeMap<String, f64>,
    /// Number of rows summarized.
    pub num_rows: usize,
    /// Attribute columns searched, in input order.
    pub attributes: Vec<String>,
    /// Aggregate names, in declaration order.
    pub aggregate_names: Vec<String>,
    /// Metric names, in declaration order.
    pub metric_names: Vec<String>,
    /// Metric used for ranking and deduplication.
    pub ranking_metric: String,
    /// Dedup policy applied.
    pub dedup_policy: DedupPolicy,
    /// Per-order search counters.
    pub levels: Vec<LevelStats>,
    /// Explanations dropped by the `max_explanations` cap.
    pub truncated: usize,
    /// How the run ended.
    pub status: SearchStatus,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
}

impl ExplanationReport {
    /// Whether the search ran to completion.
    pub fn is_complete(&self) -> bool {
        !matches!(self.status, SearchStatus::TimedOut { .. })
    }

    /// Returns true if no explanation was found.
    pub fn is_empty(&self) -> bool {
        self.explanations.is_empty()
    }

    /// Number of explanations.
    pub fn len(&self) -> usize {
        self.explanations.len()
    }

    /// Run duration in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    /// Finds the explanation made of exactly these predicates.
    pub fn find(&self, predicates: &[(&str, &str)]) -> Option<&Explanation> {
        self.explanations.iter().find(|e| {
            e.order() == predicates.len()
                && predicates
                    .iter()
                    .all(|(column, value)| e.value_of(column) == Some(*value))
        })
    }

    /// Renders the explanations as an Arrow table.
    ///
    /// One nullable Utf8 column per attribute (null when the attribute is not
    /// part of the explanation), then one Float64 column per metric and per
    /// aggregate.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let mut fields = Vec::new();
        let mut arrays: Vec<ArrayRef> = Vec::new();

        for attribute in &self.attributes {
            fields.push(Field::new(attribute, DataType::Utf8, true));
            let values: Vec<Option<&str>> = self
                .explanations
                .iter()
                .map(|e| e.value_of(attribute))
                .collect();
            arrays.push(Arc::new(StringArray::from(values)));
        }
        for metric in &self.metric_names {
            fields.push(Field::new(metric, DataType::Float64, true));
            let values: Vec<Option<f64>> =
                self.explanations.iter().map(|e| e.metric(metric)).collect();
            arrays.push(Arc::new(Float64Array::from(values)));
        }
        for aggregate in &self.aggregate_names {
            fields.push(Field::new(aggregate, DataType::Float64, true));
            let values: Vec<Option<f64>> = self
                .explanations
                .iter()
                .map(|e| e.aggregate(aggregate))
                .collect();
            arrays.push(Arc::new(Float64Array::from(values)));
        }

        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
    }
}
