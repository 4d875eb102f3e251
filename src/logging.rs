//! Logging setup.

use crate::config::LogPreset;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_DIRECTIVES: &str = "clusterpulse=info,tower_http=info";

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the default filter. `Prod` writes one JSON object
/// per event, `Dev` writes human readable lines.
pub fn init(preset: LogPreset) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));
    let registry = tracing_subscriber::registry().with(filter);

    match preset {
        LogPreset::Dev => registry.with(fmt::layer()).try_init()?,
        LogPreset::Prod => registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init()?,
    }

    Ok(())
}
