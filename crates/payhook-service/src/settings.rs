//! # Configuration Loading
//!
//! Sources are applied in order, later ones overriding earlier ones:
//!
//! 1. `/etc/payhook/service.yaml`
//! 2. `./config/service.yaml`
//! 3. The file named by `PAYHOOK_CONFIG_FILE`, which must exist when set
//! 4. Environment variables prefixed `PAYHOOK__` with `__` between levels,
//!    e.g. `PAYHOOK__SERVER__PORT=9090` or
//!    `PAYHOOK__SECURITY__SHARED_SECRET=...`
//!
//! Every field carries a serde default, so missing files are fine. A
//! malformed file or a value of the wrong type is an error.

use config::{builder::DefaultState, Config, ConfigBuilder, Environment, File, FileFormat};
use payhook_api::ServiceConfig;
use thiserror::Error;

/// Environment variable naming an explicit configuration file
pub const CONFIG_FILE_ENV: &str = "PAYHOOK_CONFIG_FILE";

/// Prefix for configuration environment variables
pub const ENV_PREFIX: &str = "PAYHOOK";

/// Why the service configuration could not be produced
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to read configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Configuration is invalid: {0}")]
    Invalid(#[from] payhook_api::ConfigError),
}

/// File sources in precedence order
pub fn file_sources(explicit_path: Option<&str>) -> ConfigBuilder<DefaultState> {
    let builder = Config::builder()
        .add_source(
            File::with_name("/etc/payhook/service")
                .required(false)
                .format(FileFormat::Yaml),
        )
        .add_source(
            File::with_name("config/service")
                .required(false)
                .format(FileFormat::Yaml),
        );

    match explicit_path.filter(|p| !p.is_empty()) {
        Some(path) => builder.add_source(File::with_name(path).required(true).format(FileFormat::Yaml)),
        None => builder,
    }
}

/// Layer environment overrides on `builder`, then deserialize and validate
pub fn resolve(builder: ConfigBuilder<DefaultState>) -> Result<ServiceConfig, SettingsError> {
    let config = builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("security.allowed_ips"),
        )
        .build()?;

    let service_config: ServiceConfig = config.try_deserialize()?;
    service_config.validate()?;
    Ok(service_config)
}

/// Load the service configuration from every source
pub fn load() -> Result<ServiceConfig, SettingsError> {
    let explicit = std::env::var(CONFIG_FILE_ENV).ok();
    resolve(file_sources(explicit.as_deref()))
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
