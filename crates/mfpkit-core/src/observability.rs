//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingSettings;

/// Initialize tracing for the process.
///
/// `RUST_LOG` wins over `settings.filter`. Safe to call multiple times
/// (subsequent calls are no-ops).
pub fn init_tracing(settings: &LoggingSettings) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let _ = if settings.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_is_harmless() {
        let settings = LoggingSettings {
            filter: "not a [valid filter".to_string(),
            json: false,
        };
        init_tracing(&settings);
        init_tracing(&LoggingSettings::default());
    }
}
