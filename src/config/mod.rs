//! Configuration loading.
//!
//! Values come from an optional `config/default` file, then from
//! `POPSTELLAR__<SECTION>__<KEY>` environment variables, and fall back to
//! `Settings::default()` for anything left unset.

mod settings;

use config::{Config, ConfigError, Environment, File};

pub use settings::{
    HubSettings, PartialHubSettings, PartialPersistenceSettings, PartialServerSettings,
    PartialSettings, PersistenceSettings, ServerSettings, Settings,
};

pub const ENV_PREFIX: &str = "POPSTELLAR";

/// Loads the configuration from the default file and environment variables
/// and merges it with default values.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from("config/default")
}

pub fn load_config_from(file: &str) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name(file).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("server.peers")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge(Settings::default()))
}
