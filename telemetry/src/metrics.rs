use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::trace;

/// Interval between two upkeep runs of the in-process recorder.
const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

// The global recorder can only be installed once per process, so the handle is cached and
// handed out again on later calls. Tests in the same binary rely on this.
static PROMETHEUS_HANDLE: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

/// Installs the global recorder without an HTTP listener and returns a handle for rendering.
///
/// Must be called from within a tokio runtime, the first call spawns the upkeep task.
pub fn init_metrics_handle() -> Result<PrometheusHandle, BuildError> {
    let mut cached = PROMETHEUS_HANDLE
        .lock()
        .unwrap_or_else(PoisonError::into_inner);

    if let Some(handle) = &*cached {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    *cached = Some(handle.clone());

    let upkeep_handle = handle.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(UPKEEP_INTERVAL).await;
            trace!("running metrics upkeep");
            upkeep_handle.run_upkeep();
        }
    });

    Ok(handle)
}

/// Installs the global recorder and serves `/metrics` on `[::]:{port}`.
///
/// `service` is attached to every series as the `service` label.
pub fn init_metrics(port: u16, service: &str) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_listen_address(port))
        .add_global_label("service", service)
        .install()
}

fn metrics_listen_address(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port)
}
