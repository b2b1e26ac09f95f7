//! ==============================================================================
//! logging.rs - tracing subscriber bootstrap
//! ==============================================================================
//!
//! purpose:
//!     installs the global `tracing` subscriber once at startup.
//!     `RUST_LOG` wins when set; otherwise `logging.level` from station.toml.
//!
//! relationships:
//!     - used by: main.rs (right after the config is loaded)
//!
//! ==============================================================================

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` overrides `level` when set.
pub fn init(level: &str) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()?;

    Ok(())
}
