use serde::Deserialize;

/// Top-level configuration settings for the client.
///
/// Includes settings for the broker transport and for logging.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub transport: TransportSettings,
    pub logging: LoggingSettings,
}

/// Configuration settings for the broker transport.
///
/// Intervals are in milliseconds; `0` disables the corresponding behavior.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TransportSettings {
    pub url: String,
    /// Value of the STOMP `host` header. Falls back to the host of `url`.
    pub vhost: Option<String>,
    pub reconnect_delay_ms: u64,
    pub heartbeat_outgoing_ms: u64,
    pub heartbeat_incoming_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub transport: Option<PartialTransportSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialTransportSettings {
    pub url: Option<String>,
    pub vhost: Option<String>,
    pub reconnect_delay_ms: Option<u64>,
    pub heartbeat_outgoing_ms: Option<u64>,
    pub heartbeat_incoming_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

/// Provides default values for `Settings`.
impl Default for Settings {
    fn default() -> Self {
        Self {
            transport: TransportSettings {
                url: "ws://127.0.0.1:8080/ws".to_string(),
                vhost: None,
                reconnect_delay_ms: 5000,
                heartbeat_outgoing_ms: 4000,
                heartbeat_incoming_ms: 4000,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl TransportSettings {
    /// `None` when automatic reconnect after a dropped connection is disabled.
    pub fn reconnect_delay(&self) -> Option<std::time::Duration> {
        (self.reconnect_delay_ms > 0)
            .then(|| std::time::Duration::from_millis(self.reconnect_delay_ms))
    }
}
