mod settings;

use std::path::Path;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{ClientSettings, LoggingSettings, Settings};

/// Environment variables are read as `COMET_<SECTION>__<KEY>`,
/// e.g. `COMET_CLIENT__ENDPOINT`.
pub const ENV_PREFIX: &str = "COMET";

/// Loads the configuration from `.env`, the default file and environment
/// variables, merged over the default values.
pub fn load_config() -> Result<Settings, ConfigError> {
    // a missing .env is fine
    let _ = dotenvy::dotenv();
    load_config_from("config/default")
}

/// Same as [`load_config`] but reads the optional file at `path`
/// (extension resolved by the `config` crate) and skips `.env`.
pub fn load_config_from(path: impl AsRef<Path>) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::from(path.as_ref()).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge_over(Settings::default()))
}

#[cfg(test)]
mod tests;
