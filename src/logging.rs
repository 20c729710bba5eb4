//! Console logging for binaries and tests built on this crate.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs a global fmt subscriber. `RUST_LOG` takes precedence over
/// `default_filter` when it is set.
///
/// ```no_run
/// pipework::logging::init_logging("pipework=debug").unwrap();
/// ```
///
/// # Errors
/// When `default_filter` does not parse or a global subscriber has already
/// been installed.
pub fn init_logging(default_filter: &str) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter)?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_thread_names(true).with_target(false))
        .try_init()?;

    Ok(())
}
