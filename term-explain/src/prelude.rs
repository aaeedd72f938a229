//! Prelude for commonly used types and traits in term-explain.

pub use crate::error::{ExplainError, Result};
pub use crate::formatters::{FormatterConfig, ReportFormatter};
pub use crate::logging::LogConfig;
pub use crate::sources::DataTable;
pub use crate::summary::{
    CancellationFlag, DedupPolicy, Explanation, ExplanationReport, MembershipStrategy,
    SearchStatus, Summarizer, SummarizerConfig, SummaryStrategy,
};
