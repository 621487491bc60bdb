//! Metrics sidecar: exposes how much of the kernel's local port range is held
//! by TCP connections, broken down by remote endpoint and connection state.
//!
//! Every scrape re-reads the host state: host name, the configured local port
//! range and the TCP connection tables. Failed reads degrade to defaults so a
//! scrape always succeeds.

pub mod api;
pub mod classify;
pub mod config;
pub mod error;
pub mod exposition;
pub mod fsutil;
pub mod inspector;

/// Runs the metrics sidecar until the server stops.
///
/// # Errors
///
/// Possible errors include:
/// - An invalid `METRICS_SIDECAR_PORT` value.
/// - Failure to bind the listen address (e.g. port already in use).
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::Config::from_env()?;
    let inspector = inspector::Inspector::default();
    log::debug!("Reading host state from {}", inspector.proc_root().display());

    let addr = config.listen_addr();
    log::info!("Metrics server start on {addr}");
    api::APIServer::new(inspector).listen(addr).await?;

    Ok(())
}
