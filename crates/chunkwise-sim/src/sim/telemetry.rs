//! Console logging for the simulation.
//!
//! Filtering follows `RUST_LOG` and defaults to `info`. Use
//! `RUST_LOG=chunkwise=debug` to see unmatched chunks, cancellations and
//! request completions from the library.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_tracing() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false),
        )
        .try_init()?;
    Ok(())
}
