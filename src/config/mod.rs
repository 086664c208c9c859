//! Layered client configuration.
//!
//! Sources, lowest precedence first: built-in defaults, the optional
//! `config/default` file, then `TOPICMUX_<SECTION>__<KEY>` environment
//! variables (a `.env` file is loaded into the environment first).

mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{LoggingSettings, Settings, TransportSettings};

const ENV_PREFIX: &str = "TOPICMUX";

/// Loads the configuration from `config/default` and the environment.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from("config/default")
}

/// Loads the configuration using `path` (without extension) as the file source
/// and merges it with default values.
pub fn load_config_from(path: &str) -> Result<Settings, ConfigError> {
    let _ = dotenvy::dotenv();

    let builder = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    // Merge with defaults
    let default = Settings::default();
    let transport = partial.transport;
    let logging = partial.logging;

    Ok(Settings {
        transport: TransportSettings {
            url: transport
                .as_ref()
                .and_then(|t| t.url.clone())
                .unwrap_or(default.transport.url),
            vhost: transport
                .as_ref()
                .and_then(|t| t.vhost.clone())
                .or(default.transport.vhost),
            reconnect_delay_ms: transport
                .as_ref()
                .and_then(|t| t.reconnect_delay_ms)
                .unwrap_or(default.transport.reconnect_delay_ms),
            heartbeat_outgoing_ms: transport
                .as_ref()
                .and_then(|t| t.heartbeat_outgoing_ms)
                .unwrap_or(default.transport.heartbeat_outgoing_ms),
            heartbeat_incoming_ms: transport
                .as_ref()
                .and_then(|t| t.heartbeat_incoming_ms)
                .unwrap_or(default.transport.heartbeat_incoming_ms),
        },
        logging: LoggingSettings {
            level: logging
                .as_ref()
                .and_then(|l| l.level.clone())
                .unwrap_or(default.logging.level),
        },
    })
}
