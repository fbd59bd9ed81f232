//! Console logging for the pilot.
//!
//! Events are only emitted with the `tracing` feature; without it the
//! subscriber is still installed so dependencies that log through `tracing`
//! are visible. `RUST_LOG` overrides the default level.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_telemetry(verbose: bool) -> anyhow::Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_writer(std::io::stderr),
        )
        .try_init()?;
    Ok(())
}
