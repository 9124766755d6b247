use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::catalog::DEFAULT_ENDPOINT;
use crate::downloader::{DEFAULT_CONCURRENCY, IntegrityPolicy};
use crate::error::PdcError;
use crate::fetcher::DEFAULT_TIMEOUT;

pub const CONFIG_FILE_NAME: &str = "kira-pdc.json";
pub const DEFAULT_LIMIT: usize = 1000;
pub const DEFAULT_OUTPUT_DIR: &str = "pdc_downloads";
pub const DEFAULT_CATALOG_CSV: &str = "all_files_sorted.csv";
pub const DEFAULT_DOWNLOAD_LOG: &str = "smallest_files.csv";

/// On-disk configuration. Every field is optional; CLI flags use the same
/// shape and take precedence via [`Config::merge`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub accept_dua: Option<bool>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub output_dir: Option<String>,
    #[serde(default)]
    pub catalog_csv: Option<String>,
    #[serde(default)]
    pub download_log: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub integrity: Option<IntegrityPolicy>,
}

impl Config {
    /// Values set in `overrides` win.
    pub fn merge(self, overrides: Config) -> Config {
        Config {
            schema_version: overrides.schema_version.or(self.schema_version),
            endpoint: overrides.endpoint.or(self.endpoint),
            accept_dua: overrides.accept_dua.or(self.accept_dua),
            concurrency: overrides.concurrency.or(self.concurrency),
            limit: overrides.limit.or(self.limit),
            output_dir: overrides.output_dir.or(self.output_dir),
            catalog_csv: overrides.catalog_csv.or(self.catalog_csv),
            download_log: overrides.download_log.or(self.download_log),
            timeout_secs: overrides.timeout_secs.or(self.timeout_secs),
            integrity: overrides.integrity.or(self.integrity),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub endpoint: String,
    pub accept_dua: bool,
    pub concurrency: usize,
    pub limit: usize,
    pub output_dir: Utf8PathBuf,
    pub catalog_csv: Utf8PathBuf,
    pub download_log: Utf8PathBuf,
    pub timeout: Duration,
    pub integrity: IntegrityPolicy,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            accept_dua: true,
            concurrency: DEFAULT_CONCURRENCY,
            limit: DEFAULT_LIMIT,
            output_dir: Utf8PathBuf::from(DEFAULT_OUTPUT_DIR),
            catalog_csv: Utf8PathBuf::from(DEFAULT_CATALOG_CSV),
            download_log: Utf8PathBuf::from(DEFAULT_DOWNLOAD_LOG),
            timeout: DEFAULT_TIMEOUT,
            integrity: IntegrityPolicy::default(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path` if given (it must exist), otherwise the first of
    /// `./kira-pdc.json` and `<config dir>/kira-pdc/config.json` that exists.
    /// With no file at all the defaults apply.
    pub fn load(path: Option<&str>) -> Result<Config, PdcError> {
        let config_path = match path {
            Some(path) => Some(PathBuf::from(path)),
            None => Self::discover(),
        };
        let Some(config_path) = config_path else {
            return Ok(Config::default());
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| PdcError::ConfigRead(config_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| PdcError::ConfigParse(err.to_string()))
    }

    pub fn resolve(path: Option<&str>, overrides: Config) -> Result<ResolvedConfig, PdcError> {
        let config = Self::load(path)?.merge(overrides);
        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, PdcError> {
        let defaults = ResolvedConfig::default();

        let concurrency = config.concurrency.unwrap_or(defaults.concurrency);
        if concurrency == 0 {
            return Err(PdcError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        let timeout_secs = config
            .timeout_secs
            .unwrap_or(defaults.timeout.as_secs());
        if timeout_secs == 0 {
            return Err(PdcError::InvalidConfig(
                "timeout_secs must be at least 1".to_string(),
            ));
        }

        Ok(ResolvedConfig {
            schema_version: config.schema_version.unwrap_or(defaults.schema_version),
            endpoint: config.endpoint.unwrap_or(defaults.endpoint),
            accept_dua: config.accept_dua.unwrap_or(defaults.accept_dua),
            concurrency,
            limit: config.limit.unwrap_or(defaults.limit),
            output_dir: non_empty_path("output_dir", config.output_dir, defaults.output_dir)?,
            catalog_csv: non_empty_path("catalog_csv", config.catalog_csv, defaults.catalog_csv)?,
            download_log: non_empty_path(
                "download_log",
                config.download_log,
                defaults.download_log,
            )?,
            timeout: Duration::from_secs(timeout_secs),
            integrity: config.integrity.unwrap_or(defaults.integrity),
        })
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }
        BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("kira-pdc").join("config.json"))
            .filter(|path| path.exists())
    }
}

fn non_empty_path(
    field: &str,
    value: Option<String>,
    default: Utf8PathBuf,
) -> Result<Utf8PathBuf, PdcError> {
    match value {
        Some(value) if value.trim().is_empty() => Err(PdcError::InvalidConfig(format!(
            "{field} must not be empty"
        ))),
        Some(value) => Ok(Utf8PathBuf::from(value)),
        None => Ok(default),
    }
}
