use config::load_config;
use config::shared::IngestorConfig;

use crate::error::{IngestorError, IngestorResult};

/// Loads the ingestor configuration and validates it.
pub fn load_ingestor_config() -> IngestorResult<IngestorConfig> {
    let config = load_config::<IngestorConfig>().map_err(IngestorError::config)?;
    config.validate().map_err(IngestorError::config)?;

    Ok(config)
}
