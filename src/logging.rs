use std::io;
use tracing_subscriber::EnvFilter;

/// Initializes the process-wide subscriber. The executor logs to stderr so
/// that stdout stays a clean result pipe between the per-region child and
/// its parent.
pub fn init(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);

    if json {
        let _ = builder.json().try_init();
    } else {
        let _ = builder.try_init();
    }
}
