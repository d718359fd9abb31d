//! Tool configuration
//!
//! Layered with figment: built-in defaults, then an optional TOML file, then
//! `MATRIXON_STATERES_*` environment variables. Engine settings live in the
//! `[state_res]` table; as environment variables they may be given flat
//! (`MATRIXON_STATERES_CACHE_CAPACITY=64`).

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    value::Uncased,
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use matrixon_core::{config::StateResConfig, MatrixonError, Result};

pub const ENV_PREFIX: &str = "MATRIXON_STATERES_";

static STATE_RES_KEYS: [&str; 4] = [
    "cache_capacity",
    "fetch_batch_size",
    "max_auth_depth",
    "default_room_version",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `EnvFilter` directive, e.g. `info` or `matrixon_rooms=debug`
    pub log: Option<String>,
    pub state_res: StateResConfig,
}

impl Config {
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).map(|k| {
            let key: Uncased = k.into();
            if STATE_RES_KEYS.iter().any(|field| k.as_str().eq_ignore_ascii_case(field)) {
                return Uncased::from(format!("state_res.{}", k.as_str()));
            }
            key
        }))
    }

    /// Loads and validates the configuration
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            if !path.exists() {
                return Err(MatrixonError::Config(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
        }

        let config: Config = Self::figment(path)
            .extract()
            .map_err(|e| MatrixonError::Config(e.to_string()))?;
        config.state_res.validate()?;
        debug!(?config, "Configuration loaded");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use test_log::test;

    fn toml_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_without_file() {
        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .extract()
            .unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.state_res.cache_capacity, 1024);
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let file = toml_file(
            r#"
            log = "debug"

            [state_res]
            cache_capacity = 32
            default_room_version = "9"
            "#,
        );
        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(file.path()))
            .extract()
            .unwrap();

        assert_eq!(config.log.as_deref(), Some("debug"));
        assert_eq!(config.state_res.cache_capacity, 32);
        assert_eq!(config.state_res.default_room_version, "9");
        assert_eq!(config.state_res.fetch_batch_size, 100);
    }

    #[test]
    fn test_invalid_values_are_refused() {
        let file = toml_file("[state_res]\nfetch_batch_size = 0\n");
        let err = Config::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, MatrixonError::InvalidConfig(_)));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/matrixon-stateres.toml"))).unwrap_err();
        assert!(matches!(err, MatrixonError::Config(_)));
    }
}
