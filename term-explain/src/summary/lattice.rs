//! Level-wise (Apriori-style) search over attribute-value combinations.
//!
//! The search walks orders `k = 1, 2, ..., max_order`:
//!
//! 1. **Aggregate**: every candidate of the current order gets the aggregate
//!    vector of the rows matching all of its codes. Row sets come from the
//!    [`MembershipIndex`]; an order-`k+1` candidate intersects its parent's
//!    rows with one more code.
//! 2. **Score & filter**: the [`MetricSet`] decides a [`MetricAction`].
//!    Candidates failing a monotonic threshold are pruned; candidates passing
//!    every threshold are reported.
//! 3. **Join**: surviving candidates sharing a `k-1` prefix are paired when
//!    their last codes come from different columns, and a child is kept only
//!    if every one of its order-`k` subsets survived.
//!
//! Aggregation within a level runs in parallel; the level is a barrier
//! before the join. Cancellation is checked at every level boundary.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::aggregates::AggregateColumns;
use super::encoder::{Code, EncodedMatrix};
use super::index::{MembershipIndex, MembershipStrategy, RowSet};
use super::metrics::{MetricAction, MetricSet};
use crate::error::{ExplainError, Result};
use crate::logging::LogConfig;
use crate::{log_candidate, log_search_op};

/// Shared flag a caller can set to stop a running search.
///
/// The search checks the flag between orders and returns the explanations
/// found so far, marked incomplete.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    /// Creates an unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A scored conjunction of attribute-value codes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Ascending codes, at most one per column.
    pub codes: Vec<Code>,
    /// Aggregate values over the matching rows, in aggregate order.
    pub aggregates: Vec<f64>,
    /// Metric scores, in metric order.
    pub scores: Vec<f64>,
    /// Outcome of the threshold tests.
    pub action: MetricAction,
}

impl Candidate {
    /// Number of predicates.
    pub fn order(&self) -> usize {
        self.codes.len()
    }

    /// Whether this candidate's codes are a strict subset of `other`'s.
    pub fn is_strict_subset_of(&self, other: &Candidate) -> bool {
        self.codes.len() < other.codes.len() && is_sorted_subset(&self.codes, &other.codes)
    }
}

fn is_sorted_subset(small: &[Code], large: &[Code]) -> bool {
    let mut large = large.iter();
    small
        .iter()
        .all(|code| large.by_ref().any(|candidate| candidate == code))
}

/// Counters for one order of the search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelStats {
    /// Order of the level.
    pub order: usize,
    /// Candidates aggregated at this order.
    pub generated: usize,
    /// Candidates passing every monotonic threshold.
    pub survivors: usize,
    /// Candidates passing every threshold.
    pub reportable: usize,
    /// Wall-clock time spent on the level.
    pub elapsed_ms: u64,
}

/// Limits and knobs of one search.
#[derive(Debug, Clone)]
pub struct LatticeConfig {
    /// Highest order to explore.
    pub max_order: usize,
    /// Row-set representation.
    pub membership: MembershipStrategy,
    /// Stop once this instant has passed.
    pub deadline: Option<Instant>,
    /// Stop once this flag is set.
    pub cancellation: Option<CancellationFlag>,
    /// Logging behavior.
    pub log_config: LogConfig,
}

impl Default for LatticeConfig {
    fn default() -> Self {
        Self {
            max_order: 3,
            membership: MembershipStrategy::Auto,
            deadline: None,
            cancellation: None,
            log_config: LogConfig::default(),
        }
    }
}

/// Result of a search.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// Reportable candidates of every completed order, in search order.
    pub candidates: Vec<Candidate>,
    /// Per-order counters.
    pub levels: Vec<LevelStats>,
    /// Set when cancellation stopped the search after this many orders.
    pub interrupted_after: Option<usize>,
}

impl SearchOutcome {
    /// Whether the search ran to a natural end.
    pub fn is_complete(&self) -> bool {
        self.interrupted_after.is_none()
    }
}

/// A candidate waiting to be aggregated.
struct Pending {
    codes: Vec<Code>,
    parent: Option<usize>,
}

/// A candidate that passed every monotonic threshold, with its rows.
struct Survivor {
    codes: Vec<Code>,
    rows: RowSet,
}

/// The level-wise search engine.
///
/// Borrowed inputs are read-only for the duration of [`search`](Self::search).
#[derive(Debug)]
pub struct CandidateLattice<'a> {
    matrix: &'a EncodedMatrix,
    aggregates: &'a AggregateColumns,
    metrics: &'a MetricSet,
    code_columns: &'a [usize],
    config: LatticeConfig,
}

impl<'a> CandidateLattice<'a> {
    /// Creates a search over an encoded matrix.
    ///
    /// `code_columns[c]` must give the column of code `c`, and `metrics` must
    /// already be initialized with the dataset totals.
    pub fn new(
        matrix: &'a EncodedMatrix,
        aggregates: &'a AggregateColumns,
        metrics: &'a MetricSet,
        code_columns: &'a [usize],
        config: LatticeConfig,
    ) -> Result<Self> {
        if matrix.num_rows() != aggregates.num_rows() {
            return Err(ExplainError::encoding(format!(
                "encoded matrix has {} rows but aggregates have {}",
                matrix.num_rows(),
                aggregates.num_rows()
            )));
        }
        if matrix.code_space() > code_columns.len() {
            return Err(ExplainError::internal(
                "code column table does not cover every code",
            ));
        }
        if config.max_order == 0 {
            return Err(ExplainError::invalid_config("max_order must be at least 1"));
        }
        Ok(Self {
            matrix,
            aggregates,
            metrics,
            code_columns,
            config,
        })
    }

    /// Runs the search.
    pub fn search(&self) -> SearchOutcome {
        self.search_with(|_| {})
    }

    /// Runs the search, calling `on_level` after every completed order.
    #[instrument(skip_all, fields(rows = self.matrix.num_rows(), max_order = self.config.max_order))]
    fn search_with(&self, mut on_level: impl FnMut(&LevelStats)) -> SearchOutcome {
        let index = MembershipIndex::build(self.matrix, self.code_columns.len(), self.config.membership);

        let mut pending: Vec<Pending> = (0..index.code_space() as Code)
            .filter(|code| !index.rows_of(*code).is_empty())
            .map(|code| Pending {
                codes: vec![code],
                parent: None,
            })
            .collect();
        let mut previous: Vec<Survivor> = Vec::new();
        let mut outcome = SearchOutcome {
            candidates: Vec::new(),
            levels: Vec::new(),
            interrupted_after: None,
        };

        for order in 1..=self.config.max_order {
            if pending.is_empty() {
                break;
            }
            if let Err(err) = self.check_interrupt(order - 1) {
                warn!(error = %err, "Stopping search early");
                if let ExplainError::SearchTimeout { completed_order } = err {
                    outcome.interrupted_after = Some(completed_order);
                }
                break;
            }

            let started = Instant::now();
            let generated = pending.len();
            let evaluated = self.evaluate_level(&index, &previous, pending);

            let mut survivors = Vec::new();
            let mut reportable = 0;
            for (candidate, rows) in evaluated {
                log_candidate!(
                    self.config.log_config,
                    codes = ?candidate.codes,
                    scores = ?candidate.scores,
                    action = ?candidate.action,
                    "Scored candidate"
                );
                if candidate.action.survives() {
                    survivors.push(Survivor {
                        codes: candidate.codes.clone(),
                        rows,
                    });
                }
                if candidate.action.is_reportable() {
                    reportable += 1;
                    outcome.candidates.push(candidate);
                }
            }

            let stats = LevelStats {
                order,
                generated,
                survivors: survivors.len(),
                reportable,
                elapsed_ms: started.elapsed().as_millis() as u64,
            };
            log_search_op!(
                self.config.log_config,
                order = stats.order,
                generated = stats.generated,
                survivors = stats.survivors,
                reportable = stats.reportable,
                elapsed_ms = stats.elapsed_ms,
                "Completed search level"
            );
            on_level(&stats);
            outcome.levels.push(stats);

            if order == self.config.max_order {
                break;
            }
            pending = self.join(&survivors);
            previous = survivors;
        }

        info!(
            explanations = outcome.candidates.len(),
            levels = outcome.levels.len(),
            complete = outcome.is_complete(),
            "Search finished"
        );
        outcome
    }

    fn check_interrupt(&self, completed_order: usize) -> Result<()> {
        let cancelled = self
            .config
            .cancellation
            .as_ref()
            .is_some_and(CancellationFlag::is_cancelled);
        let expired = self
            .config
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline);
        if cancelled || expired {
            Err(ExplainError::SearchTimeout { completed_order })
        } else {
            Ok(())
        }
    }

    /// Aggregates and scores one level in parallel, preserving input order.
    fn evaluate_level(
        &self,
        index: &MembershipIndex,
        previous: &[Survivor],
        pending: Vec<Pending>,
    ) -> Vec<(Candidate, RowSet)> {
        pending
            .into_par_iter()
            .map(|Pending { codes, parent }| {
                let last = *codes.last().unwrap_or(&0);
                let rows = match parent {
                    Some(parent) => previous[parent].rows.intersect(index.rows_of(last)),
                    None => index.rows_of(last).clone(),
                };
                let aggregates = self.aggregate(&rows);
                // A combination no row carries explains nothing.
                let (scores, action) = if rows.is_empty() {
                    (vec![0.0; self.metrics.len()], MetricAction::Prune)
                } else {
                    self.metrics.evaluate(&aggregates)
                };
                (
                    Candidate {
                        codes,
                        aggregates,
                        scores,
                        action,
                    },
                    rows,
                )
            })
            .collect()
    }

    fn aggregate(&self, rows: &RowSet) -> Vec<f64> {
        let ops = self.aggregates.ops();
        let columns = self.aggregates.columns();
        let mut acc: Vec<f64> = ops.iter().map(|op| op.identity()).collect();
        rows.for_each_row(|row| {
            for (k, op) in ops.iter().enumerate() {
                acc[k] = op.combine(acc[k], columns[k][row]);
            }
        });
        acc
    }

    /// Builds the next order from sorted survivors sharing a prefix.
    fn join(&self, survivors: &[Survivor]) -> Vec<Pending> {
        let known: HashSet<&[Code]> = survivors.iter().map(|s| s.codes.as_slice()).collect();
        let mut next = Vec::new();

        let mut group_start = 0;
        while group_start < survivors.len() {
            let prefix_len = survivors[group_start].codes.len() - 1;
            let prefix = &survivors[group_start].codes[..prefix_len];
            let group_end = survivors[group_start..]
                .iter()
                .position(|s| &s.codes[..prefix_len] != prefix)
                .map_or(survivors.len(), |offset| group_start + offset);

            for i in group_start..group_end {
                let a = survivors[i].codes[prefix_len];
                for j in (i + 1)..group_end {
                    let b = survivors[j].codes[prefix_len];
                    if self.code_columns[a as usize] == self.code_columns[b as usize] {
                        continue;
                    }
                    let mut codes = survivors[i].codes.clone();
                    codes.push(b);
                    if self.all_subsets_survived(&codes, &known) {
                        next.push(Pending {
                            codes,
                            parent: Some(i),
                        });
                    }
                }
            }
            group_start = group_end;
        }

        debug!(candidates = next.len(), "Joined next level");
        next
    }

    /// Checks the subsets obtained by dropping one prefix code; the two
    /// subsets dropping either of the last codes are the join parents.
    fn all_subsets_survived(&self, codes: &[Code], known: &HashSet<&[Code]>) -> bool {
        let mut subset = Vec::with_capacity(codes.len() - 1);
        (0..codes.len().saturating_sub(2)).all(|skip| {
            subset.clear();
            subset.extend(
                codes
                    .iter()
                    .enumerate()
                    .filter(|(idx, _)| *idx != skip)
                    .map(|(_, code)| *code),
            );
            known.contains(subset.as_slice())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summary::aggregates::{AggregateSpec, AggregationOp, AggregateSource};
    use crate::summary::encoder::{AttributeColumn, AttributeEncoder};
    use crate::summary::metrics::{RiskRatioMetric, SupportMetric};
    use std::time::Duration;

    struct Fixture {
        encoder: AttributeEncoder,
        matrix: EncodedMatrix,
        aggregates: AggregateColumns,
        code_columns: Vec<usize>,
    }

    /// Outliers are exactly the rows with region=EU and device=mobile.
    fn fixture() -> Fixture {
        let region = vec!["EU", "EU", "EU", "EU", "US", "US"];
        let device = vec!["mobile", "mobile", "mobile", "desktop", "mobile", "desktop"];
        let outlier = vec![1.0, 1.0, 1.0, 0.0, 0.0, 0.0];
        let mut encoder = AttributeEncoder::new();
        let matrix = encoder
            .encode_attributes(&[
                AttributeColumn::new("region", region.into_iter().map(Some).collect()),
                AttributeColumn::new("device", device.into_iter().map(Some).collect()),
            ])
            .unwrap();
        let aggregates = AggregateColumns::new(
            vec![
                AggregateSpec::new(
                    "Outlier Count",
                    AggregationOp::Sum,
                    AggregateSource::OutlierColumn("outlier".into()),
                ),
                AggregateSpec::count("Count", None),
            ],
            vec![outlier, vec![1.0; 6]],
        )
        .unwrap();
        let code_columns = encoder.code_columns();
        Fixture {
            encoder,
            matrix,
            aggregates,
            code_columns,
        }
    }

    fn support_metrics(fixture: &Fixture, min_support: f64) -> MetricSet {
        let mut metrics =
            MetricSet::new().with_metric(Box::new(SupportMetric::new(0)), min_support);
        metrics.initialize(&fixture.aggregates.global()).unwrap();
        metrics
    }

    fn codes(fixture: &Fixture, pairs: &[(&str, &str)]) -> Vec<Code> {
        let mut codes: Vec<Code> = pairs
            .iter()
            .map(|(c, v)| fixture.encoder.code_of(c, v).unwrap())
            .collect();
        codes.sort_unstable();
        codes
    }

    #[test]
    fn test_support_search_finds_all_orders() {
        let f = fixture();
        let metrics = support_metrics(&f, 0.5);
        let lattice = CandidateLattice::new(
            &f.matrix,
            &f.aggregates,
            &metrics,
            &f.code_columns,
            LatticeConfig::default(),
        )
        .unwrap();
        let outcome = lattice.search();

        assert!(outcome.is_complete());
        let found: Vec<Vec<Code>> = outcome.candidates.iter().map(|c| c.codes.clone()).collect();
        assert_eq!(
            found,
            vec![
                codes(&f, &[("region", "EU")]),
                codes(&f, &[("device", "mobile")]),
                codes(&f, &[("region", "EU"), ("device", "mobile")]),
            ]
        );
        let pair = &outcome.candidates[2];
        assert_eq!(pair.aggregates, vec![3.0, 3.0]);
        assert_eq!(pair.scores, vec![1.0]);

        assert_eq!(outcome.levels.len(), 2);
        assert_eq!(outcome.levels[0].generated, 4);
        assert_eq!(outcome.levels[0].survivors, 2);
        assert_eq!(outcome.levels[1].generated, 1);
    }

    #[test]
    fn test_non_monotonic_metric_gates_reporting_not_survival() {
        let f = fixture();
        let mut metrics = MetricSet::new()
            .with_metric(Box::new(SupportMetric::new(0)), 0.5)
            .with_metric(Box::new(RiskRatioMetric::new(0, 1)), 1.9);
        metrics.initialize(&f.aggregates.global()).unwrap();
        let outcome = CandidateLattice::new(
            &f.matrix,
            &f.aggregates,
            &metrics,
            &f.code_columns,
            LatticeConfig::default(),
        )
        .unwrap()
        .search();

        // EU: 3/4 outliers vs 3/6 globally => 1.5; mobile: 3/4 => 1.5; pair: 1.0/0.5 => 2.0
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(
            outcome.candidates[0].codes,
            codes(&f, &[("region", "EU"), ("device", "mobile")])
        );
        assert_eq!(outcome.levels[0].survivors, 2);
        assert_eq!(outcome.levels[0].reportable, 0);
    }

    #[test]
    fn test_max_order_limits_search() {
        let f = fixture();
        let metrics = support_metrics(&f, 0.5);
        let config = LatticeConfig {
            max_order: 1,
            ..LatticeConfig::default()
        };
        let outcome = CandidateLattice::new(&f.matrix, &f.aggregates, &metrics, &f.code_columns, config)
            .unwrap()
            .search();
        assert_eq!(outcome.levels.len(), 1);
        assert!(outcome.candidates.iter().all(|c| c.order() == 1));
    }

    #[test]
    fn test_same_column_codes_never_join() {
        let f = fixture();
        let metrics = support_metrics(&f, 0.0);
        let outcome = CandidateLattice::new(
            &f.matrix,
            &f.aggregates,
            &metrics,
            &f.code_columns,
            LatticeConfig::default(),
        )
        .unwrap()
        .search();
        for candidate in &outcome.candidates {
            let mut columns: Vec<usize> =
                candidate.codes.iter().map(|c| f.code_columns[*c as usize]).collect();
            columns.dedup();
            assert_eq!(columns.len(), candidate.codes.len());
        }
        // Every region pairs with every device; no region+region or device+device pairs.
        assert_eq!(outcome.levels[1].generated, 4);
    }

    #[test]
    fn test_cancellation_returns_partial_results() {
        let f = fixture();
        let metrics = support_metrics(&f, 0.5);
        let flag = CancellationFlag::new();
        flag.cancel();
        let config = LatticeConfig {
            cancellation: Some(flag),
            ..LatticeConfig::default()
        };
        let outcome = CandidateLattice::new(&f.matrix, &f.aggregates, &metrics, &f.code_columns, config)
            .unwrap()
            .search();
        assert_eq!(outcome.interrupted_after, Some(0));
        assert!(outcome.candidates.is_empty());
        assert!(!outcome.is_complete());
    }

    #[test]
    fn test_cancellation_after_first_order_keeps_its_explanations() {
        let f = fixture();
        let metrics = support_metrics(&f, 0.5);
        let flag = CancellationFlag::new();
        let config = LatticeConfig {
            cancellation: Some(flag.clone()),
            ..LatticeConfig::default()
        };
        let lattice =
            CandidateLattice::new(&f.matrix, &f.aggregates, &metrics, &f.code_columns, config)
                .unwrap();

        let mut completed = Vec::new();
        let outcome = lattice.search_with(|stats| {
            completed.push(stats.order);
            flag.cancel();
        });

        assert_eq!(completed, vec![1]);
        assert_eq!(outcome.interrupted_after, Some(1));
        assert_eq!(outcome.levels.len(), 1);
        let found: Vec<Vec<Code>> = outcome.candidates.iter().map(|c| c.codes.clone()).collect();
        assert_eq!(
            found,
            vec![
                codes(&f, &[("region", "EU")]),
                codes(&f, &[("device", "mobile")]),
            ]
        );
        assert!(outcome.candidates.iter().all(|c| c.scores == vec![1.0]));
    }

    #[test]
    fn test_expired_deadline_interrupts() {
        let f = fixture();
        let metrics = support_metrics(&f, 0.5);
        let config = LatticeConfig {
            deadline: Instant::now().checked_sub(Duration::from_millis(1)),
            ..LatticeConfig::default()
        };
        let outcome = CandidateLattice::new(&f.matrix, &f.aggregates, &metrics, &f.code_columns, config)
            .unwrap()
            .search();
        assert!(!outcome.is_complete());
    }

    #[test]
    fn test_membership_strategies_agree() {
        let f = fixture();
        let metrics = support_metrics(&f, 0.0);
        let run = |membership| {
            let config = LatticeConfig {
                membership,
                ..LatticeConfig::default()
            };
            CandidateLattice::new(&f.matrix, &f.aggregates, &metrics, &f.code_columns, config)
                .unwrap()
                .search()
                .candidates
        };
        assert_eq!(run(MembershipStrategy::Postings), run(MembershipStrategy::Bitmap));
    }

    #[test]
    fn test_mismatched_inputs_rejected() {
        let f = fixture();
        let metrics = support_metrics(&f, 0.5);
        let short = AggregateColumns::new(
            vec![AggregateSpec::count("Count", None)],
            vec![vec![1.0; 2]],
        )
        .unwrap();
        let err = CandidateLattice::new(
            &f.matrix,
            &short,
            &metrics,
            &f.code_columns,
            LatticeConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ExplainError::Encoding(_)));
    }

    #[test]
    fn test_subset_check() {
        let a = Candidate {
            codes: vec![1, 4],
            aggregates: vec![],
            scores: vec![],
            action: MetricAction::Keep,
        };
        let b = Candidate {
            codes: vec![1, 3, 4],
            ..a.clone()
        };
        assert!(a.is_strict_subset_of(&b));
        assert!(!b.is_strict_subset_of(&a));
        assert!(!a.is_strict_subset_of(&a));
    }
}
