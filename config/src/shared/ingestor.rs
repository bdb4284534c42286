use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::Config;
use crate::shared::{DispatcherConfig, ValidationError};

/// Complete configuration of the ingestor service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct IngestorConfig {
    /// Stream and shutdown settings of the dispatcher.
    pub dispatcher: DispatcherConfig,
    /// Where inbound envelopes are read from.
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Prometheus exporter settings, no exporter is started when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsConfig>,
}

impl IngestorConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.dispatcher.validate()?;

        if let Some(metrics) = &self.metrics {
            metrics.validate()?;
        }

        Ok(())
    }
}

impl Config for IngestorConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}

/// Source of JSON-lines envelopes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct InputConfig {
    /// File to read envelopes from, standard input when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of human readable ones.
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MetricsConfig {
    /// Port of the `/metrics` HTTP listener.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl MetricsConfig {
    pub const DEFAULT_PORT: u16 = 9000;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "metrics.port".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_port() -> u16 {
    MetricsConfig::DEFAULT_PORT
}
