use crate::error::AppError;
use config::{Config as Cfg, File};
use serde::Deserialize;
use serde::de::DeserializeOwned;

/// Settings shared by every binary in the workspace.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// OTLP collector endpoint. Span export is disabled when unset.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            log_level: default_log_level(),
            otlp_endpoint: None,
        }
    }
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load() -> Result<Self, AppError> {
        load_layered("configuration", &[])
    }
}

/// Load `T` from an optional `<file_stem>.{toml,yaml,json}` file overlaid by
/// `APP__`-prefixed environment variables (`APP__SMTP__HOST` -> `smtp.host`).
///
/// Keys named in `list_keys` are split on commas when they come from the
/// environment.
pub fn load_layered<T: DeserializeOwned>(
    file_stem: &str,
    list_keys: &[&str],
) -> Result<T, AppError> {
    dotenvy::dotenv().ok();

    let mut environment = config::Environment::with_prefix("APP")
        .prefix_separator("__")
        .separator("__")
        .list_separator(",")
        .try_parsing(true);
    for key in list_keys {
        environment = environment.with_list_parse_key(key);
    }

    let config = Cfg::builder()
        .add_source(File::with_name(file_stem).required(false))
        .add_source(environment)
        .build()?;

    Ok(config.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.log_level, "info");
        assert!(config.otlp_endpoint.is_none());
    }

    #[test]
    fn test_missing_file_falls_back_to_serde_defaults() {
        let config: Config =
            load_layered("definitely-not-a-config-file", &[]).expect("defaults should load");
        assert!(config.port > 0);
    }
}
