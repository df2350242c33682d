use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Includes settings for the listeners, the broker engine, and logging.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub log: LogSettings,
}

/// Configuration settings for the listeners.
///
/// `port` is the WebSocket listener; `status_port` serves the read-only
/// HTTP state snapshot.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub status_port: u16,
}

/// Configuration settings for the broker engine.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    /// Buffer size used when `add` auto-creates a queue.
    pub default_buffer_size: usize,
    /// Whether `add` to an undeclared queue creates it implicitly.
    pub auto_create_queues: bool,
    /// Directory of the embedded message store.
    pub data_dir: String,
}

/// Logging configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub log: Option<PartialLogSettings>,
}

/// Partial server settings.
#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub status_port: Option<u16>,
}

/// Partial broker settings.
#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub default_buffer_size: Option<usize>,
    pub auto_create_queues: Option<bool>,
    pub data_dir: Option<String>,
}

/// Partial logging settings.
#[derive(Debug, Deserialize)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

/// Provides default values for `Settings`.
///
/// The listener ports match the reference deployment: WebSocket on 4444,
/// HTTP status on 4000.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 4444,
                status_port: 4000,
            },
            broker: BrokerSettings {
                default_buffer_size: 64,
                auto_create_queues: true,
                data_dir: "relaymq_db".to_string(),
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}
