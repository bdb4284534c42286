use anyhow::Context;
use config::shared::{DispatcherConfig, IngestorConfig, StreamConfig};
use dispatch::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use dispatch::dispatcher::{Dispatcher, StreamRegistration};
use dispatch::transport::{ConsumerSummary, run_consumer};
use dispatch::types::MessageKind;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::consumer::JsonLinesConsumer;
use crate::handlers::{HeaderHandler, PayloadHandler};
use crate::stores::{MemoryBlobStore, MemoryMetadataStore};

/// Runs the ingestor until its input is exhausted or a shutdown signal arrives, then drains
/// every stream.
pub async fn start_ingestor_with_config(config: IngestorConfig) -> anyhow::Result<()> {
    info!("starting ingestor service");

    log_config(&config);

    let metadata = MemoryMetadataStore::new();
    let blobs = MemoryBlobStore::new();

    let summary = ingest(config, metadata.clone(), blobs.clone()).await?;
    info!(
        acked = summary.acked,
        requeued = summary.requeued,
        dropped = summary.dropped,
        transactions = metadata.transaction_count().await,
        blobs = blobs.blob_count().await,
        "ingestor service completed"
    );

    Ok(())
}

async fn ingest(
    config: IngestorConfig,
    metadata: MemoryMetadataStore,
    blobs: MemoryBlobStore,
) -> anyhow::Result<ConsumerSummary> {
    let consumer = JsonLinesConsumer::open(&config.input).await?;

    let registrations = config
        .dispatcher
        .streams
        .iter()
        .cloned()
        .map(|stream| register_stream(stream, &metadata, &blobs))
        .collect();
    let dispatcher =
        Dispatcher::configure(registrations).context("failed to configure the dispatcher")?;

    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let signal_handle = spawn_shutdown_trigger(wait_for_signal(), shutdown_tx);

    let consumed = run_consumer(consumer, &dispatcher, shutdown_rx).await;

    // The listener is not needed anymore once the consumer stopped, whatever the reason.
    signal_handle.abort();

    match dispatcher
        .shutdown(config.dispatcher.shutdown_timeout())
        .await
    {
        Ok(()) => info!("all streams drained"),
        Err(err) => warn!(error = %err, "shutdown finished with undrained streams"),
    }

    for stats in dispatcher.stats() {
        info!(
            kind = %stats.kind,
            state = %stats.state,
            submitted = stats.submitted,
            rejected = stats.rejected,
            succeeded = stats.succeeded,
            failed_transient = stats.failed_transient,
            failed_permanent = stats.failed_permanent,
            panicked = stats.panicked,
            "stream summary"
        );
    }

    consumed.context("consumer failed")
}

fn register_stream(
    stream: StreamConfig,
    metadata: &MemoryMetadataStore,
    blobs: &MemoryBlobStore,
) -> StreamRegistration {
    match stream.kind {
        MessageKind::Header => {
            StreamRegistration::new(stream, HeaderHandler::new(metadata.clone()))
        }
        MessageKind::Payload => StreamRegistration::new(
            stream,
            PayloadHandler::new(blobs.clone(), metadata.clone()),
        ),
    }
}

/// Triggers shutdown once `signal` resolves, in practice on SIGINT or SIGTERM.
fn spawn_shutdown_trigger<F>(signal: F, shutdown_tx: ShutdownTx) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        signal.await;
        if let Err(err) = shutdown_tx.shutdown() {
            warn!(error = ?err, "failed to send shutdown signal");
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            warn!(error = %err, "failed to register sigterm handler, listening for ctrl+c only");
            wait_for_ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = wait_for_ctrl_c() => {}
        _ = sigterm.recv() => {
            info!("sigterm received, shutting down ingestor");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("sigint (ctrl+c) received, shutting down ingestor"),
        Err(err) => {
            warn!(error = %err, "failed to listen for ctrl+c");
            std::future::pending::<()>().await;
        }
    }
}

fn log_config(config: &IngestorConfig) {
    log_dispatcher_config(&config.dispatcher);
    debug!(
        input = ?config.input.path,
        json_logs = config.logging.json,
        metrics_port = config.metrics.as_ref().map(|metrics| metrics.port),
        "ingestor config"
    );
}

fn log_dispatcher_config(config: &DispatcherConfig) {
    debug!(
        shutdown_timeout_ms = config.shutdown_timeout_ms,
        streams = config.streams.len(),
        "dispatcher config"
    );
    for stream in &config.streams {
        debug!(
            kind = %stream.kind,
            capacity = stream.capacity,
            parallelism = stream.parallelism,
            backpressure = %stream.backpressure,
            "stream config"
        );
    }
}
