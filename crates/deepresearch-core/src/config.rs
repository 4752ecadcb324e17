use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::{require_env, HdrpError};

const DEFAULT_CONFIG_PATH: &str = "config.toml";
const CONFIG_PATH_ENV: &str = "HDRP_CONFIG";

/// Top-level configuration structure (see `SPEC_FULL.md` ยง6, ยง10).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub nli: NliConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            search: SearchConfig::default(),
            nli: NliConfig::default(),
            executor: ExecutorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Resolve the configured search provider's secret value, if one is
    /// required by the provider (the `simulated` provider needs none).
    pub fn search_api_key(&self) -> Result<Option<crate::SecretValue>, HdrpError> {
        match &self.search.api_key_env {
            Some(var) => Ok(Some(require_env(var)?)),
            None => Ok(None),
        }
    }
}

/// Helper to load configuration with best-practice guard rails.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a provided path or discoverable defaults.
    ///
    /// Resolution order:
    /// 1. Explicit `path` argument.
    /// 2. `HDRP_CONFIG` environment variable.
    /// 3. `config.toml` in the current working directory.
    ///
    /// A missing default file is not an error: the documented defaults
    /// apply. A missing *explicit* path or a malformed file is.
    pub fn load(path: Option<PathBuf>) -> Result<Config, HdrpError> {
        let explicit = path.is_some();
        let candidate = resolve_path(path)?;

        let raw = match fs::read_to_string(&candidate) {
            Ok(raw) => raw,
            Err(err) if !explicit && err.kind() == std::io::ErrorKind::NotFound => {
                let config = Config::default();
                Self::validate(&config)?;
                return Ok(config);
            }
            Err(err) => return Err(HdrpError::config_io(candidate, err)),
        };

        let config: Config = toml::from_str(&raw)
            .map_err(|err| HdrpError::InvalidConfiguration(err.to_string()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn validate(config: &Config) -> Result<(), HdrpError> {
        if let Some(var) = &config.search.api_key_env {
            if var.trim().is_empty() {
                return Err(HdrpError::InvalidConfiguration(
                    "search.api_key_env must reference an environment variable".into(),
                ));
            }
            require_env(var)?;
        }

        if config.executor.worker_pool_size == 0 {
            return Err(HdrpError::InvalidConfiguration(
                "executor.worker_pool_size must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}

fn resolve_path(path: Option<PathBuf>) -> Result<PathBuf, HdrpError> {
    if let Some(path) = path {
        return Ok(path);
    }

    if let Ok(from_env) = env::var(CONFIG_PATH_ENV) {
        if !from_env.trim().is_empty() {
            return Ok(PathBuf::from(from_env));
        }
    }

    Ok(Path::new(DEFAULT_CONFIG_PATH).to_path_buf())
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "SearchConfig::default_provider")]
    pub provider: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "SearchConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl SearchConfig {
    fn default_provider() -> String {
        "simulated".to_string()
    }

    const fn default_timeout_secs() -> u64 {
        30
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: Self::default_provider(),
            api_key_env: None,
            endpoint: None,
            timeout_secs: Self::default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NliConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "NliConfig::default_timeout_secs")]
    pub timeout_secs: f64,
    #[serde(default = "NliConfig::default_variant")]
    pub variant_default: String,
    #[serde(default = "NliConfig::default_tau_ground")]
    pub tau_ground: f32,
    #[serde(default = "NliConfig::default_kappa_contra")]
    pub kappa_contra: f32,
    #[serde(default = "NliConfig::default_tau_relevance")]
    pub tau_relevance: f32,
    #[serde(default = "NliConfig::default_cache_capacity")]
    pub cache_capacity: usize,
}

impl NliConfig {
    const fn default_timeout_secs() -> f64 {
        10.0
    }

    fn default_variant() -> String {
        "default".to_string()
    }

    const fn default_tau_ground() -> f32 {
        0.65
    }

    const fn default_kappa_contra() -> f32 {
        0.35
    }

    const fn default_tau_relevance() -> f32 {
        0.45
    }

    const fn default_cache_capacity() -> usize {
        10_000
    }
}

impl Default for NliConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: Self::default_timeout_secs(),
            variant_default: Self::default_variant(),
            tau_ground: Self::default_tau_ground(),
            kappa_contra: Self::default_kappa_contra(),
            tau_relevance: Self::default_tau_relevance(),
            cache_capacity: Self::default_cache_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "ExecutorConfig::default_worker_pool_size")]
    pub worker_pool_size: usize,
    #[serde(default = "ExecutorConfig::default_run_deadline_secs")]
    pub run_deadline_secs: u64,
    #[serde(default = "ExecutorConfig::default_top_k_results")]
    pub top_k_results: usize,
}

impl ExecutorConfig {
    const fn default_worker_pool_size() -> usize {
        4
    }

    const fn default_run_deadline_secs() -> u64 {
        300
    }

    const fn default_top_k_results() -> usize {
        5
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: Self::default_worker_pool_size(),
            run_deadline_secs: Self::default_run_deadline_secs(),
            top_k_results: Self::default_top_k_results(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
    #[serde(default = "LoggingConfig::default_retention_days")]
    pub retention_days: i64,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }

    const fn default_retention_days() -> i64 {
        90
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            retention_days: Self::default_retention_days(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_passes_validation() {
        let config = Config::default();
        assert_eq!(config.search.provider, "simulated");
        assert_eq!(config.executor.worker_pool_size, 4);
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn missing_default_file_yields_defaults() {
        unsafe {
            std::env::remove_var(CONFIG_PATH_ENV);
        }
        let dir = tempfile::tempdir().unwrap();
        let original = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();
        let loaded = ConfigLoader::load(None);
        std::env::set_current_dir(original).unwrap();
        assert!(loaded.is_ok());
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let err = ConfigLoader::load(Some(PathBuf::from("/nonexistent/hdrp-config.toml")));
        assert!(err.is_err());
    }

    #[test]
    fn zero_worker_pool_size_rejected() {
        let mut config = Config::default();
        config.executor.worker_pool_size = 0;
        assert!(ConfigLoader::validate(&config).is_err());
    }
}
