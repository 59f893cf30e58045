//! # Safepool Configuration
//!
//! Layered configuration for the pool, its telemetry and the workload
//! simulator.
//!
//! ## Layers
//! 1. Built-in defaults
//! 2. `config/safepool.yaml`
//! 3. `config/<SAFEPOOL_ENV>.yaml` (`production` when unset)
//! 4. `SAFEPOOL_*` environment variables, `__` separating nested keys
//!
//! The merged result is checked with `validator` before it is returned.

#![warn(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

mod error;
mod pool;
mod simulator;
mod telemetry;
mod validation;

pub use error::ConfigError;
pub use pool::PoolConfig;
pub use simulator::SimulatorConfig;
pub use telemetry::TelemetryConfig;

const BASE_FILE: &str = "config/safepool.yaml";
const ENV_PREFIX: &str = "SAFEPOOL_";

/// Top-level configuration container.
#[derive(Debug, Serialize, Deserialize, Validate, Default, Clone, PartialEq)]
pub struct SafepoolConfig {
    /// Arena geometry.
    #[serde(default)]
    #[validate(nested)]
    pub pool: PoolConfig,

    #[serde(default)]
    #[validate(nested)]
    pub telemetry: TelemetryConfig,

    /// Workload driver parameters.
    #[serde(default)]
    #[validate(nested)]
    pub simulator: SimulatorConfig,
}

impl SafepoolConfig {
    /// Loads defaults, the optional YAML layers and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(SafepoolConfig::default()));

        if Path::new(BASE_FILE).exists() {
            figment = figment.merge(Yaml::file(BASE_FILE));
        }

        let env = std::env::var("SAFEPOOL_ENV").unwrap_or_else(|_| "production".into());
        let env_file = format!("config/{}.yaml", env);
        if Path::new(&env_file).exists() {
            figment = figment.merge(Yaml::file(env_file));
        }

        Self::finish(figment)
    }

    /// Loads one YAML file over the defaults, then the environment.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let figment =
            Figment::from(Serialized::defaults(SafepoolConfig::default())).merge(Yaml::file(path));
        Self::finish(figment)
    }

    fn finish(figment: Figment) -> Result<Self, ConfigError> {
        figment
            .merge(Env::prefixed(ENV_PREFIX).ignore(&["ENV"]).split("__"))
            .extract()
            .map_err(ConfigError::from)
            .and_then(|config: Self| {
                config.validate()?;
                Ok(config)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn to_figment(err: ConfigError) -> figment::Error {
        figment::Error::from(err.to_string())
    }

    #[test]
    fn full_config_validation() {
        let config = SafepoolConfig::default();
        config.validate().expect("default config should validate");
        assert_eq!(config.pool.pool_size, 16 * 1024 * 1024);
        assert_eq!(config.pool.granularity, 8);
    }

    #[test]
    fn environment_override() {
        Jail::expect_with(|jail| {
            jail.set_env("SAFEPOOL_POOL__GRANULARITY", "64");
            jail.set_env("SAFEPOOL_SIMULATOR__SEED", "7");
            let config = SafepoolConfig::load().map_err(to_figment)?;
            assert_eq!(config.pool.granularity, 64);
            assert_eq!(config.simulator.seed, 7);
            Ok(())
        });
    }

    #[test]
    fn yaml_layers_merge_in_order() {
        Jail::expect_with(|jail| {
            std::fs::create_dir("config").map_err(|e| e.to_string())?;
            jail.create_file(
                "config/safepool.yaml",
                "pool:\n  pool_size: 4096\ntelemetry:\n  log_level: debug\n",
            )?;
            jail.create_file("config/staging.yaml", "pool:\n  pool_size: 8KiB\n")?;
            jail.set_env("SAFEPOOL_ENV", "staging");

            let config = SafepoolConfig::load().map_err(to_figment)?;
            assert_eq!(config.pool.pool_size, 8192);
            assert_eq!(config.pool.granularity, 8);
            assert_eq!(config.telemetry.log_level, "debug");
            Ok(())
        });
    }

    #[test]
    fn load_from_missing_path() {
        let err = SafepoolConfig::load_from_path("does/not/exist.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn load_from_path_rejects_invalid_granularity() {
        Jail::expect_with(|jail| {
            jail.create_file("pool.yaml", "pool:\n  granularity: 8192\n")?;
            let err = SafepoolConfig::load_from_path("pool.yaml").unwrap_err();
            assert!(matches!(err, ConfigError::Validation(_)));
            assert!(err.to_string().contains("granularity"));
            Ok(())
        });
    }

    #[test]
    fn load_from_path_rejects_unknown_log_level() {
        Jail::expect_with(|jail| {
            jail.create_file("telemetry.yaml", "telemetry:\n  log_level: loud\n")?;
            let err = SafepoolConfig::load_from_path("telemetry.yaml").unwrap_err();
            assert!(matches!(err, ConfigError::Validation(_)));
            Ok(())
        });
    }
}
