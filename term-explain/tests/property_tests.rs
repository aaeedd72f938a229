//! Property-based tests for the explanation search.
//!
//! Small random tables are summarized and checked against a brute-force
//! enumeration of every predicate combination:
//! - every reported explanation is correct (aggregates and support recomputed
//!   from the raw rows)
//! - with `ReportAll`, the search finds every combination passing the support
//!   threshold, so pruning never loses an answer
//! - support never grows when a predicate is added
//! - dedup policies only ever remove explanations dominated by a reported
//!   subset or superset
//! - results are deterministic across runs and thread counts

use arrow::array::{ArrayRef, BooleanArray, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use term_explain::prelude::*;
use term_explain::summary::MembershipStrategy;

const ATTRIBUTES: [&str; 3] = ["a", "b", "c"];
const EPSILON: f64 = 1e-10;

type Row = ([Option<u8>; 3], bool);
type PredicateSet = Vec<(String, String)>;

fn rows_strategy() -> impl Strategy<Value = Vec<Row>> {
    let value = || prop::option::weighted(0.9, 0u8..3);
    prop::collection::vec(([value(), value(), value()], any::<bool>()), 1..40)
}

fn to_batch(rows: &[Row]) -> RecordBatch {
    let mut fields: Vec<Field> = ATTRIBUTES
        .iter()
        .map(|name| Field::new(*name, DataType::Utf8, true))
        .collect();
    fields.push(Field::new("is_outlier", DataType::Boolean, false));

    let mut columns: Vec<ArrayRef> = (0..ATTRIBUTES.len())
        .map(|i| {
            let values: Vec<Option<String>> = rows
                .iter()
                .map(|(values, _)| values[i].map(|v| format!("v{v}")))
                .collect();
            Arc::new(StringArray::from(values)) as ArrayRef
        })
        .collect();
    columns.push(Arc::new(BooleanArray::from(
        rows.iter().map(|(_, outlier)| *outlier).collect::<Vec<_>>(),
    )));
    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).unwrap()
}

fn summarize(rows: &[Row], min_support: f64, policy: DedupPolicy) -> ExplanationReport {
    Summarizer::builder()
        .attributes(ATTRIBUTES)
        .outlier_column("is_outlier")
        .min_support(min_support)
        .dedup_policy(policy)
        .build()
        .unwrap()
        .summarize(&to_batch(rows))
        .unwrap()
}

fn predicates_of(explanation: &Explanation) -> PredicateSet {
    let mut predicates: PredicateSet = explanation
        .predicates
        .iter()
        .map(|p| (p.column.clone(), p.value.clone()))
        .collect();
    predicates.sort();
    predicates
}

fn matches(values: &[Option<u8>; 3], predicates: &PredicateSet) -> bool {
    predicates.iter().all(|(column, value)| {
        let i = ATTRIBUTES.iter().position(|a| a == column).unwrap();
        values[i].map(|v| format!("v{v}")).as_deref() == Some(value.as_str())
    })
}

/// (outliers, rows) matched by a predicate set.
fn brute_force_counts(rows: &[Row], predicates: &PredicateSet) -> (f64, f64) {
    rows.iter()
        .filter(|(values, _)| matches(values, predicates))
        .fold((0.0, 0.0), |(o, t), (_, outlier)| {
            (o + if *outlier { 1.0 } else { 0.0 }, t + 1.0)
        })
}

/// Every combination over distinct columns whose support passes.
fn brute_force_passing(rows: &[Row], min_support: f64) -> BTreeSet<PredicateSet> {
    let total_outliers = rows.iter().filter(|(_, o)| *o).count() as f64;
    let mut passing = BTreeSet::new();
    for mask in 1u8..8 {
        let columns: Vec<usize> = (0..3).filter(|i| mask & (1 << i) != 0).collect();
        let mut combos: Vec<PredicateSet> = vec![Vec::new()];
        for &column in &columns {
            let values: BTreeSet<u8> = rows.iter().filter_map(|(v, _)| v[column]).collect();
            combos = combos
                .into_iter()
                .flat_map(|combo| {
                    values.iter().map(move |v| {
                        let mut next = combo.clone();
                        next.push((ATTRIBUTES[column].to_string(), format!("v{v}")));
                        next
                    })
                })
                .collect();
        }
        for mut combo in combos {
            combo.sort();
            let (outliers, _) = brute_force_counts(rows, &combo);
            if outliers / total_outliers + EPSILON >= min_support {
                passing.insert(combo);
            }
        }
    }
    passing
}

fn is_strict_subset(a: &PredicateSet, b: &PredicateSet) -> bool {
    a.len() < b.len() && a.iter().all(|p| b.contains(p))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_reported_explanations_are_correct(
        rows in rows_strategy(),
        min_support in 0.05f64..0.8,
    ) {
        let total_outliers = rows.iter().filter(|(_, o)| *o).count() as f64;
        prop_assume!(total_outliers > 0.0);

        let report = summarize(&rows, min_support, DedupPolicy::ReportAll);
        prop_assert_eq!(report.total_outliers, total_outliers);
        for explanation in &report.explanations {
            let predicates = predicates_of(explanation);
            let (outliers, count) = brute_force_counts(&rows, &predicates);
            prop_assert_eq!(explanation.aggregate("Outlier Count"), Some(outliers));
            prop_assert_eq!(explanation.aggregate("Count"), Some(count));

            let support = explanation.metric("support").unwrap();
            prop_assert!((support - outliers / total_outliers).abs() < 1e-12);
            prop_assert!(support + EPSILON >= min_support);
        }
    }

    #[test]
    fn prop_search_finds_every_passing_combination(
        rows in rows_strategy(),
        min_support in 0.05f64..0.8,
    ) {
        prop_assume!(rows.iter().any(|(_, o)| *o));

        let report = summarize(&rows, min_support, DedupPolicy::ReportAll);
        let found: BTreeSet<PredicateSet> = report.explanations.iter().map(predicates_of).collect();
        prop_assert_eq!(found.len(), report.len());
        prop_assert_eq!(found, brute_force_passing(&rows, min_support));
    }

    #[test]
    fn prop_support_never_grows_with_predicates(
        rows in rows_strategy(),
        min_support in 0.05f64..0.8,
    ) {
        prop_assume!(rows.iter().any(|(_, o)| *o));

        let report = summarize(&rows, min_support, DedupPolicy::ReportAll);
        for child in &report.explanations {
            for parent in &report.explanations {
                if is_strict_subset(&predicates_of(parent), &predicates_of(child)) {
                    prop_assert!(child.metric("support") <= parent.metric("support"));
                }
            }
        }
        for pair in report.levels.windows(2) {
            prop_assert!(pair[1].order == pair[0].order + 1);
            prop_assert!(pair[0].reportable <= pair[0].survivors);
        }
    }

    #[test]
    fn prop_dedup_only_removes_dominated_explanations(
        rows in rows_strategy(),
        min_support in 0.05f64..0.8,
    ) {
        prop_assume!(rows.iter().any(|(_, o)| *o));

        let all = summarize(&rows, min_support, DedupPolicy::ReportAll);
        let score = |p: &PredicateSet| {
            all.explanations
                .iter()
                .find(|e| predicates_of(e) == *p)
                .and_then(|e| e.metric("support"))
                .unwrap()
        };
        let all_sets: Vec<PredicateSet> = all.explanations.iter().map(predicates_of).collect();

        for (policy, dominated) in [
            (DedupPolicy::Minimal, true),
            (DedupPolicy::Maximal, false),
        ] {
            let kept: BTreeSet<PredicateSet> = summarize(&rows, min_support, policy)
                .explanations
                .iter()
                .map(predicates_of)
                .collect();
            for candidate in &all_sets {
                let is_dominated = all_sets.iter().any(|other| {
                    let related = if dominated {
                        is_strict_subset(other, candidate)
                    } else {
                        is_strict_subset(candidate, other)
                    };
                    related && score(other) >= score(candidate)
                });
                prop_assert_eq!(kept.contains(candidate), !is_dominated);
            }
        }
    }

    #[test]
    fn prop_results_are_deterministic(
        rows in rows_strategy(),
        min_support in 0.05f64..0.8,
    ) {
        prop_assume!(rows.iter().any(|(_, o)| *o));

        let batch = to_batch(&rows);
        let run = |threads: usize, membership: MembershipStrategy| {
            Summarizer::builder()
                .attributes(ATTRIBUTES)
                .outlier_column("is_outlier")
                .min_support(min_support)
                .dedup_policy(DedupPolicy::ReportAll)
                .num_threads(threads)
                .membership(membership)
                .build()
                .unwrap()
                .summarize(&batch)
                .unwrap()
                .explanations
        };
        let baseline = run(1, MembershipStrategy::Postings);
        prop_assert_eq!(&baseline, &run(4, MembershipStrategy::Postings));
        prop_assert_eq!(&baseline, &run(4, MembershipStrategy::Bitmap));
    }
}
