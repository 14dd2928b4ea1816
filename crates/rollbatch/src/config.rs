//! Configuration for the rolling batch scheduler.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::SchedulerError;

/// Default upper bound on the number of sessions sharing one batch.
pub const DEFAULT_MAX_ROLLING_BATCH_SIZE: usize = 32;

/// Default deadline handed to every backend call.
pub const DEFAULT_PREDICT_TIMEOUT: Duration = Duration::from_secs(120);

/// Output serialization requested for streamed responses.
///
/// Only the declared content type depends on this; batching is unaffected.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// One JSON document per response.
    #[default]
    Json,
    /// Newline-delimited JSON documents.
    JsonLines,
    /// A formatter the scheduler does not know about; no content type is declared.
    Custom(String),
}

impl OutputFormat {
    /// Parses the `output_formatter` property. A missing value means [`OutputFormat::Json`].
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            None | Some("json") => OutputFormat::Json,
            Some("jsonlines") => OutputFormat::JsonLines,
            Some(other) => OutputFormat::Custom(other.to_string()),
        }
    }

    /// Content type attached to every response stream.
    pub fn content_type(&self) -> Option<&'static str> {
        match self {
            OutputFormat::Json => Some("application/json"),
            OutputFormat::JsonLines => Some("application/jsonlines"),
            OutputFormat::Custom(_) => None,
        }
    }
}

/// Configuration for [`RollingBatchScheduler`](crate::rolling::RollingBatchScheduler).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollingBatchConfig {
    /// Maximum number of sessions in the active set, and therefore in one batch.
    pub max_rolling_batch_size: usize,

    /// Deadline for a single backend call.
    pub backend_timeout: Duration,

    /// Output serialization for response streams.
    pub output_formatter: OutputFormat,
}

impl Default for RollingBatchConfig {
    fn default() -> Self {
        Self {
            max_rolling_batch_size: DEFAULT_MAX_ROLLING_BATCH_SIZE,
            backend_timeout: DEFAULT_PREDICT_TIMEOUT,
            output_formatter: OutputFormat::Json,
        }
    }
}

impl RollingBatchConfig {
    pub fn with_max_rolling_batch_size(mut self, size: usize) -> Self {
        self.max_rolling_batch_size = size;
        self
    }

    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }

    pub fn with_output_formatter(mut self, format: OutputFormat) -> Self {
        self.output_formatter = format;
        self
    }

    /// Builds a configuration from model properties.
    ///
    /// Recognised keys are `max_rolling_batch_size`, `predict_timeout` (seconds)
    /// and `output_formatter`. Unparseable numbers are reported rather than ignored.
    pub fn from_properties(properties: &HashMap<String, String>) -> Result<Self, SchedulerError> {
        let mut config = Self::default();

        if let Some(val) = properties.get("max_rolling_batch_size") {
            config.max_rolling_batch_size = parse_number(val, "max_rolling_batch_size")?;
        }
        if let Some(val) = properties.get("predict_timeout") {
            config.backend_timeout = Duration::from_secs(parse_number(val, "predict_timeout")?);
        }
        config.output_formatter =
            OutputFormat::parse(properties.get("output_formatter").map(String::as_str));

        config.validate()?;
        Ok(config)
    }

    /// Builds a configuration from `ROLLBATCH_*` environment variables,
    /// falling back to defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("ROLLBATCH_MAX_BATCH_SIZE") {
            if let Ok(n) = val.parse() {
                config.max_rolling_batch_size = n;
            }
        }

        if let Ok(val) = std::env::var("ROLLBATCH_PREDICT_TIMEOUT_SECS") {
            if let Ok(n) = val.parse() {
                config.backend_timeout = Duration::from_secs(n);
            }
        }

        if let Ok(val) = std::env::var("ROLLBATCH_OUTPUT_FORMATTER") {
            config.output_formatter = OutputFormat::parse(Some(&val));
        }

        config
    }

    /// Rejects configurations the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.max_rolling_batch_size == 0 {
            return Err(SchedulerError::Config(
                "max_rolling_batch_size must be at least 1".to_string(),
            ));
        }
        if self.backend_timeout.is_zero() {
            return Err(SchedulerError::Config(
                "backend timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_number<N: std::str::FromStr>(value: &str, key: &str) -> Result<N, SchedulerError> {
    value
        .trim()
        .parse()
        .map_err(|_| SchedulerError::Config(format!("{key} is not a number: {value}")))
}
