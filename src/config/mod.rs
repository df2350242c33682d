mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{BrokerSettings, LogSettings, ServerSettings, Settings};

/// Loads the configuration from the default file and environment variables
/// Merges the configuration with default values
/// Returns a `Settings` struct containing the server, broker, and log configurations
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(Environment::default().separator("_"));

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    // Merge with defaults
    let default = Settings::default();

    Ok(Settings {
        server: ServerSettings {
            host: partial
                .server
                .as_ref()
                .and_then(|s| s.host.clone())
                .unwrap_or(default.server.host),
            port: partial
                .server
                .as_ref()
                .and_then(|s| s.port)
                .unwrap_or(default.server.port),
            status_port: partial
                .server
                .as_ref()
                .and_then(|s| s.status_port)
                .unwrap_or(default.server.status_port),
        },
        broker: BrokerSettings {
            default_buffer_size: partial
                .broker
                .as_ref()
                .and_then(|b| b.default_buffer_size)
                .unwrap_or(default.broker.default_buffer_size),
            auto_create_queues: partial
                .broker
                .as_ref()
                .and_then(|b| b.auto_create_queues)
                .unwrap_or(default.broker.auto_create_queues),
            data_dir: partial
                .broker
                .as_ref()
                .and_then(|b| b.data_dir.clone())
                .unwrap_or(default.broker.data_dir),
        },
        log: LogSettings {
            level: partial
                .log
                .as_ref()
                .and_then(|l| l.level.clone())
                .unwrap_or(default.log.level),
        },
    })
}
