//! Application configuration.
//!
//! Built in three layers: built-in defaults, an optional TOML file, then
//! environment overrides. The resulting value is passed explicitly to every
//! collaborator; nothing reads the environment after loading.

use ashare_core::data::RetryPolicy;
use ashare_core::dates::{normalize_date, parse_date};
use ashare_core::{Adjust, Dataset};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

fn invalid(key: &str, value: impl Into<String>, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.into(),
        reason: reason.to_string(),
    }
}

/// Largest accepted `request_sleep` and `retry_backoff`, in seconds.
pub const MAX_DELAY_SECS: f64 = 3600.0;

/// A provider backend the CLI knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// AKShare functions served by an AkTools gateway. Serves every dataset.
    AkTools,
    /// EastMoney quote history. Serves daily prices only.
    EastMoney,
}

impl Backend {
    /// Resolve a source name. `akshare` and `aktools` both name the gateway.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "akshare" | "aktools" => Some(Backend::AkTools),
            "eastmoney" => Some(Backend::EastMoney),
            _ => None,
        }
    }

    pub fn serves_everything(self) -> bool {
        matches!(self, Backend::AkTools)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Root of all stored data: `{data_dir}/parquet/...` and `{data_dir}/meta.db`.
    pub data_dir: PathBuf,
    pub default_start_date: String,
    pub default_end_date: String,
    /// Backend for instruments, calendar and statements (`akshare`/`aktools`).
    pub data_source: String,
    /// Backend for daily prices; falls back to `data_source` when unset.
    pub price_source: Option<String>,
    pub aktools_url: String,
    pub eastmoney_url: String,
    /// Seconds to sleep after every provider call.
    pub request_sleep: f64,
    /// Total attempts per provider call.
    pub max_retries: u32,
    /// Seconds before the first retry; doubles afterwards.
    pub retry_backoff: f64,
    pub request_timeout: u64,
    /// Price adjustments fetched for `price_daily`.
    pub price_adjusts: Vec<Adjust>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            default_start_date: "20210210".into(),
            default_end_date: "20260210".into(),
            data_source: "akshare".into(),
            price_source: None,
            aktools_url: "http://127.0.0.1:8080".into(),
            eastmoney_url: "https://push2his.eastmoney.com".into(),
            request_sleep: 0.3,
            max_retries: 3,
            retry_backoff: 1.5,
            request_timeout: 30,
            price_adjusts: vec![Adjust::None, Adjust::Qfq],
        }
    }
}

impl AppConfig {
    /// Load from a TOML file; missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Defaults, then `file` if given, then the process environment.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (the environment in production).
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = lookup("DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("DEFAULT_START_DATE") {
            self.default_start_date = v;
        }
        if let Some(v) = lookup("DEFAULT_END_DATE") {
            self.default_end_date = v;
        }
        if let Some(v) = lookup("DATA_SOURCE") {
            self.data_source = v.trim().to_lowercase();
        }
        if let Some(v) = lookup("PRICE_SOURCE") {
            self.price_source = Some(v.trim().to_lowercase());
        }
        if let Some(v) = lookup("AKTOOLS_URL") {
            self.aktools_url = v;
        }
        if let Some(v) = lookup("EASTMONEY_URL") {
            self.eastmoney_url = v;
        }
        if let Some(v) = lookup("REQUEST_SLEEP") {
            self.request_sleep = env_parse("REQUEST_SLEEP", &v)?;
        }
        if let Some(v) = lookup("MAX_RETRIES") {
            self.max_retries = env_parse("MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("RETRY_BACKOFF") {
            self.retry_backoff = env_parse("RETRY_BACKOFF", &v)?;
        }
        if let Some(v) = lookup("REQUEST_TIMEOUT") {
            self.request_timeout = env_parse("REQUEST_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("PRICE_ADJUSTS") {
            self.price_adjusts = v
                .split(',')
                .map(|s| s.parse::<Adjust>().map_err(|e| invalid("PRICE_ADJUSTS", &v, &e)))
                .collect::<Result<_, _>>()?;
        }
        Ok(())
    }

    /// Reject values that would only fail later, mid-run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("default_start_date", &self.default_start_date),
            ("default_end_date", &self.default_end_date),
        ] {
            if parse_date(value).is_none() {
                return Err(invalid(key, value.as_str(), "expected YYYYMMDD"));
            }
        }
        self.data_backend()?;
        self.price_backend()?;
        for (key, value) in [
            ("request_sleep", self.request_sleep),
            ("retry_backoff", self.retry_backoff),
        ] {
            if !(value.is_finite() && (0.0..=MAX_DELAY_SECS).contains(&value)) {
                return Err(invalid(
                    key,
                    value.to_string(),
                    "must be between 0 and 3600 seconds",
                ));
            }
        }
        if self.price_adjusts.is_empty() {
            return Err(invalid("price_adjusts", "", "at least one adjustment required"));
        }
        Ok(())
    }

    /// Backend for instruments, calendar and statements.
    pub fn data_backend(&self) -> Result<Backend, ConfigError> {
        match Backend::from_name(&self.data_source) {
            Some(backend) if backend.serves_everything() => Ok(backend),
            _ => Err(invalid(
                "data_source",
                self.data_source.as_str(),
                "supported: akshare, aktools",
            )),
        }
    }

    /// Name of the price backend after falling back to `data_source`.
    pub fn price_source(&self) -> &str {
        self.price_source.as_deref().unwrap_or(&self.data_source)
    }

    /// Backend for daily prices.
    pub fn price_backend(&self) -> Result<Backend, ConfigError> {
        Backend::from_name(self.price_source()).ok_or_else(|| {
            invalid(
                "price_source",
                self.price_source(),
                "supported: akshare, aktools, eastmoney",
            )
        })
    }

    pub fn default_start(&self) -> String {
        normalize_date(&self.default_start_date)
    }

    pub fn default_end(&self) -> String {
        normalize_date(&self.default_end_date)
    }

    pub fn parquet_dir(&self) -> PathBuf {
        self.data_dir.join("parquet")
    }

    pub fn dataset_dir(&self, dataset: Dataset) -> PathBuf {
        self.parquet_dir().join(dataset.id())
    }

    pub fn meta_db_path(&self) -> PathBuf {
        self.data_dir.join("meta.db")
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_secs_f64(self.request_sleep)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_secs_f64(self.retry_backoff))
    }

    /// Create the data directory and one directory per dataset.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dataset in Dataset::ALL {
            std::fs::create_dir_all(self.dataset_dir(dataset))?;
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(key, value, "not a number"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.default_start(), "20210210");
        assert_eq!(config.meta_db_path(), PathBuf::from("data/meta.db"));
        assert_eq!(
            config.dataset_dir(Dataset::FinaIndicator),
            PathBuf::from("data/parquet/fina_indicator")
        );
    }

    #[test]
    fn toml_overrides_only_given_keys() {
        let config = AppConfig::from_toml(
            r#"
            data_dir = "/srv/ashare"
            request_sleep = 0.0
            price_adjusts = ["qfq"]
            "#,
        )
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/ashare"));
        assert_eq!(config.price_adjusts, vec![Adjust::Qfq]);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = AppConfig::default();
        config
            .apply_env(lookup(&[
                ("DATA_DIR", "/tmp/lake"),
                ("REQUEST_SLEEP", "0.05"),
                ("MAX_RETRIES", "5"),
                ("PRICE_ADJUSTS", "none,hfq"),
                ("DATA_SOURCE", "AKTOOLS"),
            ]))
            .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/lake"));
        assert_eq!(config.request_delay(), Duration::from_millis(50));
        assert_eq!(config.retry_policy().max_attempts, 5);
        assert_eq!(config.price_adjusts, vec![Adjust::None, Adjust::Hfq]);
        config.validate().unwrap();
    }

    #[test]
    fn unparsable_env_value_is_an_error() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env(lookup(&[("MAX_RETRIES", "three")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == "MAX_RETRIES"));
    }

    #[test]
    fn price_source_falls_back_to_data_source() {
        let mut config = AppConfig::default();
        assert_eq!(config.price_source(), "akshare");
        assert_eq!(config.price_backend().unwrap(), Backend::AkTools);

        config
            .apply_env(lookup(&[
                ("DATA_SOURCE", "aktools"),
                ("PRICE_SOURCE", " EastMoney "),
            ]))
            .unwrap();
        config.validate().unwrap();
        assert_eq!(config.data_backend().unwrap(), Backend::AkTools);
        assert_eq!(config.price_backend().unwrap(), Backend::EastMoney);
    }

    #[test]
    fn price_only_backend_cannot_serve_everything() {
        let mut config = AppConfig::default();
        config.data_source = "eastmoney".into();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == "data_source"));

        let mut config = AppConfig::default();
        config.price_source = Some("adata".into());
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == "price_source"));
    }

    #[test]
    fn oversized_delays_are_rejected() {
        for (key, value) in [("REQUEST_SLEEP", "1e20"), ("RETRY_BACKOFF", "3601")] {
            let mut config = AppConfig::default();
            config.apply_env(lookup(&[(key, value)])).unwrap();
            let err = config.validate().unwrap_err();
            assert!(
                matches!(&err, ConfigError::InvalidValue { key: k, .. } if k.eq_ignore_ascii_case(key)),
                "{key}: {err}"
            );
        }

        let mut config = AppConfig::default();
        config.request_sleep = -0.5;
        assert!(config.validate().is_err());
        config.request_sleep = MAX_DELAY_SECS;
        config.validate().unwrap();
    }

    #[test]
    fn validation_rejects_unknown_source_and_bad_dates() {
        let mut config = AppConfig::default();
        config.data_source = "tushare".into();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.default_start_date = "2021-13-40".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn ensure_dirs_creates_every_dataset_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            data_dir: dir.path().to_path_buf(),
            ..AppConfig::default()
        };
        config.ensure_dirs().unwrap();
        for dataset in Dataset::ALL {
            assert!(config.dataset_dir(dataset).is_dir());
        }
    }
}
