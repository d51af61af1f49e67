/// Installs a `tracing` subscriber for tests and tools using the harness.
///
/// - **Filtering**: from `RUST_LOG` (e.g. `RUST_LOG=stream_fixture=debug`),
///   `warn` when unset.
/// - **Format**: compact, spans inline (`start{stream=test-orders-1a2b3c4d}: Stream active`),
///   no module paths.
///
/// Safe to call from every test: only the first call installs anything.
///
/// # Example
///
/// ```ignore
/// #[tokio::test]
/// async fn my_test() {
///     stream_fixture::init_tracing();
///     tracing::info!("Test started");
/// }
/// ```
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .with_test_writer()
        .try_init();
}
