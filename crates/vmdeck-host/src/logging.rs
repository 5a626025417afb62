//! Process-wide `tracing` subscriber.

use tracing_subscriber::EnvFilter;

/// Installs the fmt subscriber, writing to stderr so command output on
/// stdout stays machine-readable.
///
/// The filter comes from `RUST_LOG`; when that is absent or invalid,
/// `default_level` (for example `"info"` or `"vmdeck_host=debug"`) is used,
/// and `"info"` if that does not parse either.
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    // A subscriber installed earlier (tests, embedding) stays in place.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
