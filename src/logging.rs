//! Logging initialization.
//!
//! The runtime logs structured records through `tracing`. Initialization is
//! opt-in and idempotent; an embedding program that already installed a
//! subscriber keeps it. `RUST_LOG` takes priority over the configured level.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LogLevel;

/// Installs a formatting subscriber honoring the configured level.
///
/// Priority: `RUST_LOG` env var > the `logging` configuration field.
/// Does nothing when the level is `Off` or a global subscriber is already
/// installed.
pub fn init(level: LogLevel) {
    let Some(directive) = level.as_filter() else {
        return;
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tasklets={directive}")));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init();
}
