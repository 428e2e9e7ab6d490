// Logger initialization

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter when `RUST_LOG` is not set
pub const DEFAULT_FILTER: &str = "docstream=info";

/// Install the global tracing subscriber. `verbose` raises the crate to debug.
pub fn init_logger(verbose: bool) {
    let fallback = if verbose { "docstream=debug" } else { DEFAULT_FILTER };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
