/// Entry point for the metrics sidecar.
///
/// Starts an HTTP server exposing local port usage of the current network
/// namespace in the Prometheus text format on `/metrics`.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the listen socket
/// cannot be bound.
///
/// # Examples
///
/// ```bash
/// METRICS_SIDECAR_PORT=9100 RUST_LOG=debug cargo run
/// ```
#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    metrics_sidecar::run().await
}
