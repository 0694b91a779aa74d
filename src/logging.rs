//! Default subscriber for binaries and tests.

use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Installs a subscriber that prints events above the task progress bars.
/// `RUST_LOG` takes precedence over `filter`.
pub fn init(filter: &str) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(filter)?,
    };
    let indicatif = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(indicatif.get_stderr_writer()))
        .with(indicatif)
        .try_init()?;

    Ok(())
}
