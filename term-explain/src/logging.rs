//! Logging utilities and configuration for term-explain.
//!
//! The candidate search can score millions of combinations, so per-candidate
//! logging is opt-in and gated by [`LogConfig`] before any field is formatted.

use tracing::Level;

/// Logging configuration for the summarization pipeline.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base log level for term-explain components
    pub base_level: Level,
    /// Whether to log every scored candidate
    pub log_candidate_details: bool,
    /// Whether to log search level and pipeline stage summaries
    pub log_search_operations: bool,
    /// Whether to include metric values of reported explanations
    pub log_metrics: bool,
    /// Maximum length for logged field values (to prevent huge logs)
    pub max_field_length: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            base_level: Level::INFO,
            log_candidate_details: false,
            log_search_operations: true,
            log_metrics: true,
            max_field_length: 256,
        }
    }
}

impl LogConfig {
    /// Creates a verbose configuration suitable for debugging.
    pub fn verbose() -> Self {
        Self {
            base_level: Level::DEBUG,
            log_candidate_details: true,
            log_search_operations: true,
            log_metrics: true,
            max_field_length: 1024,
        }
    }

    /// Creates a minimal configuration for production with lowest overhead.
    pub fn production() -> Self {
        Self {
            base_level: Level::WARN,
            log_candidate_details: false,
            log_search_operations: false,
            log_metrics: false,
            max_field_length: 128,
        }
    }

    /// Creates a balanced configuration suitable for most use cases.
    pub fn balanced() -> Self {
        Self::default()
    }
}

/// Macro for performance-sensitive debug logging.
///
/// This macro only evaluates its arguments if debug logging is enabled,
/// avoiding the overhead of formatting when logs won't be emitted.
#[macro_export]
macro_rules! perf_debug {
    ($config:expr, $($arg:tt)*) => {
        if $config.base_level <= tracing::Level::DEBUG {
            tracing::debug!($($arg)*);
        }
    };
}

/// Macro for conditional per-candidate logging.
#[macro_export]
macro_rules! log_candidate {
    ($config:expr, $($arg:tt)*) => {
        if $config.log_candidate_details {
            tracing::trace!($($arg)*);
        }
    };
}

/// Macro for conditional search operation logging.
#[macro_export]
macro_rules! log_search_op {
    ($config:expr, $($arg:tt)*) => {
        if $config.log_search_operations {
            tracing::info!($($arg)*);
        }
    };
}

/// Truncates a string to the maximum field length if needed.
pub fn truncate_field(value: &str, max_length: usize) -> String {
    if value.len() <= max_length {
        return value.to_string();
    }
    let mut end = max_length;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...(truncated)", &value[..end])
}

/// Utilities for setting up structured logging.
pub mod setup {
    use tracing::Level;

    /// Configuration for the tracing subscriber.
    #[derive(Debug, Clone)]
    pub struct LoggingConfig {
        /// Log level for the application
        pub level: Level,
        /// Log level for term-explain components specifically
        pub explain_level: Level,
        /// Whether to use JSON output format
        pub json_format: bool,
        /// Environment filter override
        pub env_filter: Option<String>,
    }

    impl Default for LoggingConfig {
        fn default() -> Self {
            Self {
                level: Level::INFO,
                explain_level: Level::DEBUG,
                json_format: false,
                env_filter: None,
            }
        }
    }

    impl LoggingConfig {
        /// Creates a configuration for production use.
        pub fn production() -> Self {
            Self {
                level: Level::WARN,
                explain_level: Level::INFO,
                json_format: true,
                env_filter: None,
            }
        }

        /// Creates a configuration for development use.
        pub fn development() -> Self {
            Self {
                level: Level::DEBUG,
                explain_level: Level::TRACE,
                json_format: false,
                env_filter: None,
            }
        }

        /// Sets the log level for the application.
        pub fn with_level(mut self, level: Level) -> Self {
            self.level = level;
            self
        }

        /// Sets the log level for term-explain components.
        pub fn with_explain_level(mut self, level: Level) -> Self {
            self.explain_level = level;
            self
        }

        /// Sets whether to use JSON output format.
        pub fn with_json_format(mut self, enabled: bool) -> Self {
            self.json_format = enabled;
            self
        }

        /// Sets a custom environment filter.
        pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
            self.env_filter = Some(filter.into());
            self
        }

        /// Builds the environment filter string.
        pub fn env_filter(&self) -> String {
            if let Some(ref filter) = self.env_filter {
                filter.clone()
            } else {
                format!(
                    "{},term_explain={}",
                    self.level.as_str().to_lowercase(),
                    self.explain_level.as_str().to_lowercase()
                )
            }
        }
    }

    /// Initializes the global tracing subscriber.
    ///
    /// `RUST_LOG` takes precedence over the configured filter.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use term_explain::logging::setup::{LoggingConfig, init_logging};
    ///
    /// let config = LoggingConfig::development().with_json_format(true);
    /// init_logging(config).unwrap();
    /// ```
    pub fn init_logging(config: LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.env_filter()));

        let fmt_layer = if config.json_format {
            tracing_subscriber::fmt::layer().json().boxed()
        } else {
            tracing_subscriber::fmt::layer().boxed()
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;

        Ok(())
    }
}
