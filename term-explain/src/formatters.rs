//! Report formatting for summarization results.
//!
//! This module provides formatters that render an [`ExplanationReport`] as
//! JSON, human-readable text, or Markdown.
//!
//! # Examples
//!
//! ```rust,no_run
//! use term_explain::formatters::{HumanFormatter, ReportFormatter};
//! # use term_explain::summary::ExplanationReport;
//! # fn example(report: &ExplanationReport) -> term_explain::error::Result<()> {
//! let output = HumanFormatter::new().format(report)?;
//! println!("{output}");
//! # Ok(())
//! # }
//! ```

use std::fmt::Write;

use crate::error::Result;
use crate::summary::{Explanation, ExplanationReport, SearchStatus};

/// Configuration options for formatting reports.
#[derive(Debug, Clone)]
pub struct FormatterConfig {
    /// Include metric scores of each explanation
    pub include_metrics: bool,
    /// Include aggregate values of each explanation
    pub include_aggregates: bool,
    /// Include per-order search counters
    pub include_levels: bool,
    /// Maximum number of explanations to display (-1 for all)
    pub max_explanations: i32,
    /// Whether to use colorized output (for human formatter)
    pub use_colors: bool,
    /// Whether to include timestamps in output
    pub include_timestamps: bool,
}

impl Default for FormatterConfig {
    fn default() -> Self {
        Self {
            include_metrics: true,
            include_aggregates: true,
            include_levels: false,
            max_explanations: -1,
            use_colors: true,
            include_timestamps: true,
        }
    }
}

impl FormatterConfig {
    /// Creates a minimal configuration showing only predicates and metrics.
    pub fn minimal() -> Self {
        Self {
            include_metrics: true,
            include_aggregates: false,
            include_levels: false,
            max_explanations: 10,
            use_colors: false,
            include_timestamps: false,
        }
    }

    /// Creates a detailed configuration showing everything.
    pub fn detailed() -> Self {
        Self {
            include_metrics: true,
            include_aggregates: true,
            include_levels: true,
            max_explanations: -1,
            use_colors: true,
            include_timestamps: true,
        }
    }

    /// Creates a configuration suitable for CI/CD environments.
    pub fn ci() -> Self {
        Self {
            include_metrics: true,
            include_aggregates: true,
            include_levels: false,
            max_explanations: 50,
            use_colors: false,
            include_timestamps: true,
        }
    }

    /// Sets whether to include metric scores.
    pub fn with_metrics(mut self, include: bool) -> Self {
        self.include_metrics = include;
        self
    }

    /// Sets whether to include per-order search counters.
    pub fn with_levels(mut self, include: bool) -> Self {
        self.include_levels = include;
        self
    }

    /// Sets the maximum number of explanations to display.
    pub fn with_max_explanations(mut self, max: i32) -> Self {
        self.max_explanations = max;
        self
    }

    /// Sets whether to use colorized output.
    pub fn with_colors(mut self, use_colors: bool) -> Self {
        self.use_colors = use_colors;
        self
    }

    fn visible<'a>(&self, report: &'a ExplanationReport) -> &'a [Explanation] {
        if self.max_explanations < 0 {
            &report.explanations
        } else {
            let max = self.max_explanations as usize;
            &report.explanations[..max.min(report.explanations.len())]
        }
    }
}

/// Trait for rendering reports into different output formats.
///
/// # Examples
///
/// ```rust
/// use term_explain::formatters::ReportFormatter;
/// use term_explain::summary::ExplanationReport;
///
/// struct CountFormatter;
///
/// impl ReportFormatter for CountFormatter {
///     fn format(&self, report: &ExplanationReport) -> term_explain::error::Result<String> {
///         Ok(format!("{} explanations", report.len()))
///     }
/// }
/// ```
pub trait ReportFormatter {
    /// Formats a report into a string representation.
    fn format(&self, report: &ExplanationReport) -> Result<String>;

    /// Formats a report with custom configuration.
    fn format_with_config(
        &self,
        report: &ExplanationReport,
        _config: &FormatterConfig,
    ) -> Result<String> {
        self.format(report)
    }
}

/// Formats reports as structured JSON.
#[derive(Debug, Clone)]
pub struct JsonFormatter {
    config: FormatterConfig,
    pretty: bool,
}

impl JsonFormatter {
    /// Creates a new JSON formatter with default configuration.
    pub fn new() -> Self {
        Self {
            config: FormatterConfig::default(),
            pretty: true,
        }
    }

    /// Creates a new JSON formatter with the specified configuration.
    pub fn with_config(config: FormatterConfig) -> Self {
        Self {
            config,
            pretty: true,
        }
    }

    /// Sets whether to use pretty-printed JSON.
    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }
}

impl Default for JsonFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportFormatter for JsonFormatter {
    fn format(&self, report: &ExplanationReport) -> Result<String> {
        self.format_with_config(report, &self.config)
    }

    fn format_with_config(
        &self,
        report: &ExplanationReport,
        config: &FormatterConfig,
    ) -> Result<String> {
        let filtered = filter_report(report, config);
        let json = if self.pretty {
            serde_json::to_string_pretty(&filtered)?
        } else {
            serde_json::to_string(&filtered)?
        };
        Ok(json)
    }
}

/// Formats reports for console output.
#[derive(Debug, Clone)]
pub struct HumanFormatter {
    config: FormatterConfig,
}

impl HumanFormatter {
    /// Creates a new human formatter with default configuration.
    pub fn new() -> Self {
        Self {
            config: FormatterConfig::default(),
        }
    }

    /// Creates a new human formatter with the specified configuration.
    pub fn with_config(config: FormatterConfig) -> Self {
        Self { config }
    }
}

impl Default for HumanFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportFormatter for HumanFormatter {
    fn format(&self, report: &ExplanationReport) -> Result<String> {
        self.format_with_config(report, &self.config)
    }

    fn format_with_config(
        &self,
        report: &ExplanationReport,
        config: &FormatterConfig,
    ) -> Result<String> {
        let mut output = String::new();
        let paint = |text: &str, color: &str| {
            if config.use_colors {
                format!("\x1b[{color}m{text}\x1b[0m")
            } else {
                text.to_string()
            }
        };

        writeln!(output)?;
        match &report.status {
            SearchStatus::Complete => {
                writeln!(output, "🔎 {}", paint("Summary complete", "32"))?
            }
            SearchStatus::NoOutliers { reason } => {
                writeln!(output, "ℹ️  {}: {reason}", paint("No explanations", "34"))?
            }
            SearchStatus::TimedOut { completed_order } => writeln!(
                output,
                "⏱️  {} after order {completed_order}",
                paint("Search interrupted", "33")
            )?,
        }

        writeln!(output)?;
        writeln!(output, "Attributes: {}", report.attributes.join(", "))?;
        writeln!(
            output,
            "Outliers: {} of {} rows",
            report.total_outliers, report.num_rows
        )?;
        writeln!(
            output,
            "Ranked by: {} ({} dedup)",
            report.ranking_metric, report.dedup_policy
        )?;
        if config.include_timestamps {
            writeln!(output, "Started: {}", report.started_at.to_rfc3339())?;
            writeln!(output, "Duration: {}ms", report.duration_ms())?;
        }

        if config.include_levels && !report.levels.is_empty() {
            writeln!(output)?;
            writeln!(output, "📊 Search Levels:")?;
            for level in &report.levels {
                writeln!(
                    output,
                    "   Order {}: {} generated, {} survived, {} reportable ({}ms)",
                    level.order,
                    level.generated,
                    level.survivors,
                    level.reportable,
                    level.elapsed_ms
                )?;
            }
        }

        let visible = config.visible(report);
        if !visible.is_empty() {
            writeln!(output)?;
            writeln!(output, "💡 Explanations:")?;
            for (i, explanation) in visible.iter().enumerate() {
                writeln!(output)?;
                writeln!(output, "   #{}: {}", i + 1, paint(&explanation.to_string(), "1"))?;
                if config.include_metrics {
                    for (name, value) in &explanation.metrics {
                        writeln!(output, "      {name}: {value:.3}")?;
                    }
                }
                if config.include_aggregates {
                    for (name, value) in &explanation.aggregates {
                        writeln!(output, "      {name}: {value}")?;
                    }
                }
            }
        }

        let hidden = report.explanations.len() - visible.len() + report.truncated;
        if hidden > 0 {
            writeln!(output)?;
            writeln!(output, "   ... and {hidden} more explanations")?;
        }

        writeln!(output)?;
        Ok(output)
    }
}

/// Formats reports as Markdown suitable for documentation.
#[derive(Debug, Clone)]
pub struct MarkdownFormatter {
    config: FormatterConfig,
    heading_level: u8,
}

impl MarkdownFormatter {
    /// Creates a new Markdown formatter with default configuration.
    pub fn new() -> Self {
        Self {
            config: FormatterConfig::default(),
            heading_level: 2,
        }
    }

    /// Creates a new Markdown formatter with the specified configuration.
    pub fn with_config(config: FormatterConfig) -> Self {
        Self {
            config,
            heading_level: 2,
        }
    }

    /// Sets the base heading level for the output.
    pub fn with_heading_level(mut self, level: u8) -> Self {
        self.heading_level = level.clamp(1, 6);
        self
    }
}

impl Default for MarkdownFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportFormatter for MarkdownFormatter {
    fn format(&self, report: &ExplanationReport) -> Result<String> {
        self.format_with_config(report, &self.config)
    }

    fn format_with_config(
        &self,
        report: &ExplanationReport,
        config: &FormatterConfig,
    ) -> Result<String> {
        let mut output = String::new();
        let h = "#".repeat(self.heading_level as usize);

        writeln!(output, "{h} Outlier Explanations")?;
        writeln!(output)?;
        writeln!(output, "**Attributes:** {}", report.attributes.join(", "))?;
        writeln!(
            output,
            "**Outliers:** {} of {} rows",
            report.total_outliers, report.num_rows
        )?;
        match &report.status {
            SearchStatus::Complete => {}
            SearchStatus::NoOutliers { reason } => writeln!(output, "**Status:** {reason}")?,
            SearchStatus::TimedOut { completed_order } => writeln!(
                output,
                "**Status:** interrupted after order {completed_order}"
            )?,
        }
        if config.include_timestamps {
            writeln!(output, "**Started:** {}", report.started_at.to_rfc3339())?;
        }

        let visible = config.visible(report);
        if !visible.is_empty() {
            let mut header = vec!["#".to_string(), "Explanation".to_string()];
            if config.include_metrics {
                header.extend(report.metric_names.iter().cloned());
            }
            if config.include_aggregates {
                header.extend(report.aggregate_names.iter().cloned());
            }

            writeln!(output)?;
            writeln!(output, "| {} |", header.join(" | "))?;
            writeln!(output, "|{}", "---|".repeat(header.len()))?;
            for (i, explanation) in visible.iter().enumerate() {
                let mut cells = vec![(i + 1).to_string(), format!("`{explanation}`")];
                if config.include_metrics {
                    cells.extend(report.metric_names.iter().map(|m| {
                        explanation
                            .metric(m)
                            .map(|v| format!("{v:.3}"))
                            .unwrap_or_default()
                    }));
                }
                if config.include_aggregates {
                    cells.extend(report.aggregate_names.iter().map(|a| {
                        explanation
                            .aggregate(a)
                            .map(|v| v.to_string())
                            .unwrap_or_default()
                    }));
                }
                writeln!(output, "| {} |", cells.join(" | "))?;
            }
        }

        if config.include_levels && !report.levels.is_empty() {
            writeln!(output)?;
            writeln!(output, "{h}# Search Levels")?;
            writeln!(output)?;
            writeln!(output, "| Order | Generated | Survivors | Reportable | Time |")?;
            writeln!(output, "|---|---|---|---|---|")?;
            for level in &report.levels {
                writeln!(
                    output,
                    "| {} | {} | {} | {} | {}ms |",
                    level.order, level.generated, level.survivors, level.reportable, level.elapsed_ms
                )?;
            }
        }

        let hidden = report.explanations.len() - visible.len() + report.truncated;
        if hidden > 0 {
            writeln!(output)?;
            writeln!(
                output,
                "> **Note:** {hidden} additional explanations not shown in this report."
            )?;
        }

        Ok(output)
    }
}

/// Helper function to filter a report based on configuration.
fn filter_report(report: &ExplanationReport, config: &FormatterConfig) -> ExplanationReport {
    let mut filtered = report.clone();
    let visible = config.visible(report).len();
    filtered.truncated += filtered.explanations.len() - visible;
    filtered.explanations.truncate(visible);

    for explanation in &mut filtered.explanations {
        if !config.include_metrics {
            explanation.metrics.clear();
        }
        if !config.include_aggregates {
            explanation.aggregates.clear();
        }
    }
    if !config.include_levels {
        filtered.levels.clear();
    }
    filtered
}
