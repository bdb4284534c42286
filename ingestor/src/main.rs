//! Ingestor service binary.
//!
//! Reads header and payload envelopes from a JSON-lines source and dispatches them to bounded
//! per-kind streams. Header messages initialize transaction metadata, payload messages are
//! uploaded as blobs and mapped back to their transaction.

use std::process::ExitCode;

use ::config::shared::IngestorConfig;
use telemetry::metrics::init_metrics;
use telemetry::tracing::init_tracing;
use tracing::{error, info};

use crate::config::load_ingestor_config;
use crate::core::start_ingestor_with_config;
use crate::error::{IngestorError, IngestorResult};

mod config;
mod consumer;
mod core;
mod error;
mod handlers;
mod model;
mod stores;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprint!("{}", err.render_report());
            ExitCode::FAILURE
        }
    }
}

/// Loads configuration, initializes telemetry and runs the service on a multi-threaded
/// runtime.
fn run() -> IngestorResult<()> {
    let ingestor_config = load_ingestor_config()?;

    init_tracing(env!("CARGO_BIN_NAME"), ingestor_config.logging.json)
        .map_err(IngestorError::config)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(ingestor_config))?;

    Ok(())
}

async fn async_main(ingestor_config: IngestorConfig) -> IngestorResult<()> {
    match &ingestor_config.metrics {
        Some(metrics) => {
            init_metrics(metrics.port, env!("CARGO_BIN_NAME")).map_err(IngestorError::config)?;
            info!(port = metrics.port, "serving prometheus metrics");
        }
        None => info!("metrics exporter not configured, skipping initialization"),
    }

    if let Err(err) = start_ingestor_with_config(ingestor_config).await {
        error!("{err:#}");
        return Err(err.into());
    }

    Ok(())
}
