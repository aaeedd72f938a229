//! # term-explain - Outlier Explanation for Rust
//!
//! term-explain explains *why* a dataset contains an unusually large share of
//! outlier rows. It searches combinations of attribute-value predicates
//! (`region=EU AND device=mobile`) that concentrate the outliers and ranks
//! them by quality metrics such as support and risk ratio. Input comes from
//! Arrow record batches or any table registered with DataFusion.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use term_explain::prelude::*;
//! use datafusion::prelude::*;
//!
//! # async fn example() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let ctx = SessionContext::new();
//! // ... register a table with a boolean `is_outlier` column ...
//!
//! let summarizer = Summarizer::builder()
//!     .strategy(SummaryStrategy::RiskRatio)
//!     .attributes(["region", "device", "os_version"])
//!     .outlier_column("is_outlier")
//!     .min_support(0.1)
//!     .min_risk_ratio(3.0)
//!     .build()?;
//!
//! let report = summarizer.summarize_table(&ctx, "requests").await?;
//! for explanation in &report.explanations {
//!     println!(
//!         "{explanation}: risk ratio {:.2}",
//!         explanation.metric("risk_ratio").unwrap_or_default()
//!     );
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## How It Works
//!
//! 1. **Encoding**: every distinct `(column, value)` pair becomes a dense
//!    integer code; rows become sorted code sets.
//! 2. **Aggregation**: per-row aggregates (outlier count, count) are summed
//!    over the rows each candidate matches.
//! 3. **Search**: candidates grow one predicate per level, Apriori style.
//!    Monotonic metrics such as support prune a candidate together with all
//!    of its supersets; other metrics only decide what is reported.
//! 4. **Selection**: passing candidates are ranked and deduplicated per the
//!    configured [`DedupPolicy`](summary::DedupPolicy).
//!
//! ## Architecture
//!
//! - **`summary`**: the explanation engine and the [`Summarizer`](summary::Summarizer)
//! - **`sources`**: the [`DataTable`](sources::DataTable) abstraction and DataFusion loaders
//! - **`formatters`**: JSON, human-readable and Markdown report rendering
//! - **`logging`**: performance-aware logging configuration

pub mod error;
pub mod formatters;
pub mod logging;
pub mod prelude;
pub mod sources;
pub mod summary;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_fixtures;
