//! Tracing subscriber setup

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "chat_gateway=info,tower_http=info";

/// Install the global subscriber
///
/// `RUST_LOG` overrides the default filter. Output goes to stderr, as JSON
/// when `json` is set.
pub fn init(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    // A subscriber may already be installed by an embedding host
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = result {
        tracing::debug!(error = %e, "tracing subscriber already installed");
    }
}
