//! The explanation engine.
//!
//! - [`encoder`]: categorical values to dense integer codes
//! - [`aggregates`]: per-row aggregate columns and their combination
//! - [`metrics`]: quality metrics and threshold actions
//! - [`index`]: code to row-set membership index
//! - [`lattice`]: level-wise Apriori candidate search
//! - [`explanation`]: ranking, deduplication and the final report
//! - [`strategy`]: summarization strategies and the [`Summarizer`] entry point

pub mod aggregates;
pub mod encoder;
pub mod explanation;
pub mod index;
pub mod lattice;
pub mod metrics;
pub mod strategy;

pub use aggregates::{AggregateBuilder, AggregateColumns, AggregateSource, AggregateSpec, AggregationOp};
pub use encoder::{AttributeColumn, AttributeEncoder, Code, EncodedMatrix, EncodedRow};
pub use explanation::{
    select_candidates, AttributePredicate, DedupPolicy, Explanation, ExplanationReport,
    SearchStatus,
};
pub use index::{MembershipIndex, MembershipStrategy, RowSet};
pub use lattice::{
    CancellationFlag, Candidate, CandidateLattice, LatticeConfig, LevelStats, SearchOutcome,
};
pub use metrics::{MetricAction, MetricSet, QualityMetric, RiskRatioMetric, SupportMetric};
pub use strategy::{
    Summarizer, SummarizerBuilder, SummarizerConfig, SummaryStrategy, COUNT_AGGREGATE,
    OUTLIER_COUNT_AGGREGATE,
};
