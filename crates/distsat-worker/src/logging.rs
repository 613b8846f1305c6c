use tracing_subscriber::EnvFilter;

/// Install the process-wide `tracing` subscriber, with `directives` taken
/// from `--log` (falling back to `RUST_LOG` via `EnvFilter`'s own lookup if
/// the string fails to parse on its own).
pub fn init(directives: &str) {
    let filter = EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
