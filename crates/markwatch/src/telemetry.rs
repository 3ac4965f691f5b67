//! Logging setup.
//!
//! Library code logs through the `log` facade and opens `tracing` spans around
//! long-running work. `init_tracing` installs a subscriber that renders both.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Installs the global tracing subscriber and bridges `log` records into it.
///
/// `filter` is used when `RUST_LOG` is not set. Returns `false` if a global
/// subscriber or logger was already installed.
pub fn init_tracing(filter: Option<&str>, json: bool) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter.unwrap_or(DEFAULT_LOG_FILTER)));

    // try_init also installs the `log` bridge.
    let registry = Registry::default().with(env_filter);
    let installed = if json {
        registry.with(fmt::layer().json()).try_init().is_ok()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init().is_ok()
    };

    if installed {
        log::debug!("Tracing initialized (json: {})", json);
    }
    installed
}
