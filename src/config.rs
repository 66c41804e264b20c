//! Layered configuration.
//!
//! Priority, lowest first: built-in defaults, `<data_dir>/config.toml`, environment
//! (including a `.env` file), explicit overrides from the command line.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::AppError;

pub const DEFAULT_API_URL: &str = "http://localhost:18001";
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

pub const ENV_API_URL: &str = "EVALBENCH_API_URL";
pub const ENV_TIMEOUT_SECS: &str = "EVALBENCH_TIMEOUT_SECS";
pub const ENV_DATA_DIR: &str = "EVALBENCH_DATA_DIR";

const CONFIG_FILE: &str = "config.toml";

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Base URL of the evaluation backend.
    pub api_url: Url,
    /// Upper bound on one `/tests/run` round trip.
    pub request_timeout: Duration,
    /// Database, logs, crash reports and the optional config file live here.
    pub data_dir: PathBuf,
}

/// Values supplied explicitly by the caller (CLI flags). `None` falls through.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub api_url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    api_url: Option<String>,
    timeout_secs: Option<u64>,
}

impl AppConfig {
    /// Resolve configuration from overrides, the process environment and `.env`.
    pub fn load(overrides: &ConfigOverrides) -> Result<Self, AppError> {
        Self::load_with(overrides, |key| {
            dotenvy::var(key)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        })
    }

    /// Same as [`load`](Self::load) with an explicit environment lookup.
    pub fn load_with(
        overrides: &ConfigOverrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, AppError> {
        let data_dir = overrides
            .data_dir
            .clone()
            .or_else(|| env(ENV_DATA_DIR).map(PathBuf::from))
            .unwrap_or_else(default_data_dir);

        let file = read_file_config(&data_dir)?;

        let api_url = overrides
            .api_url
            .clone()
            .or_else(|| env(ENV_API_URL))
            .or(file.api_url)
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let timeout_secs = match overrides.timeout_secs {
            Some(secs) => secs,
            None => match env(ENV_TIMEOUT_SECS) {
                Some(raw) => raw.parse::<u64>().map_err(|_| {
                    AppError::Config(format!("{ENV_TIMEOUT_SECS} must be a whole number of seconds, got '{raw}'"))
                })?,
                None => file.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            },
        };

        Ok(Self {
            api_url: parse_api_url(&api_url)?,
            request_timeout: parse_timeout(timeout_secs)?,
            data_dir,
        })
    }
}

/// Platform data directory, e.g. `~/.local/share/evalbench` on Linux.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("evalbench")
}

fn read_file_config(data_dir: &Path) -> Result<FileConfig, AppError> {
    let path = data_dir.join(CONFIG_FILE);
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let text = std::fs::read_to_string(&path)?;
    let cfg = toml::from_str(&text)
        .map_err(|e| AppError::Config(format!("{}: {e}", path.display())))?;
    tracing::debug!(path = %path.display(), "Loaded config file");
    Ok(cfg)
}

fn parse_api_url(raw: &str) -> Result<Url, AppError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| AppError::Config(format!("invalid backend URL '{raw}': {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(AppError::Config(format!(
            "backend URL must be http or https, got '{other}'"
        ))),
    }
}

fn parse_timeout(secs: u64) -> Result<Duration, AppError> {
    if secs == 0 {
        return Err(AppError::Config("request timeout must be at least 1 second".into()));
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn isolated(dir: &Path) -> ConfigOverrides {
        ConfigOverrides {
            data_dir: Some(dir.to_path_buf()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AppConfig::load_with(&isolated(dir.path()), env_of(&[])).unwrap();
        assert_eq!(cfg.api_url.as_str(), "http://localhost:18001/");
        assert_eq!(cfg.request_timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(cfg.data_dir, dir.path());
    }

    #[test]
    fn test_precedence() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "api_url = \"http://file:1\"\ntimeout_secs = 10\n",
        )
        .unwrap();

        let cfg = AppConfig::load_with(&isolated(dir.path()), env_of(&[])).unwrap();
        assert_eq!(cfg.api_url.as_str(), "http://file:1/");
        assert_eq!(cfg.request_timeout, Duration::from_secs(10));

        let env = env_of(&[(ENV_API_URL, "http://env:2"), (ENV_TIMEOUT_SECS, "20")]);
        let cfg = AppConfig::load_with(&isolated(dir.path()), env).unwrap();
        assert_eq!(cfg.api_url.as_str(), "http://env:2/");
        assert_eq!(cfg.request_timeout, Duration::from_secs(20));

        let overrides = ConfigOverrides {
            api_url: Some("https://flag:3".into()),
            timeout_secs: Some(30),
            data_dir: Some(dir.path().to_path_buf()),
        };
        let env = env_of(&[(ENV_API_URL, "http://env:2"), (ENV_TIMEOUT_SECS, "20")]);
        let cfg = AppConfig::load_with(&overrides, env).unwrap();
        assert_eq!(cfg.api_url.as_str(), "https://flag:3/");
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_data_dir_from_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_string_lossy().to_string();
        let cfg = AppConfig::load_with(&ConfigOverrides::default(), env_of(&[(ENV_DATA_DIR, path.as_str())]))
            .unwrap();
        assert_eq!(cfg.data_dir, dir.path());
    }

    #[test]
    fn test_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        for env in [
            env_of(&[(ENV_API_URL, "not a url")]),
            env_of(&[(ENV_API_URL, "ftp://host")]),
            env_of(&[(ENV_TIMEOUT_SECS, "soon")]),
            env_of(&[(ENV_TIMEOUT_SECS, "0")]),
        ] {
            let err = AppConfig::load_with(&isolated(dir.path()), env).unwrap_err();
            assert!(matches!(err, AppError::Config(_)), "{err}");
        }

        std::fs::write(dir.path().join(CONFIG_FILE), "api_url = [").unwrap();
        assert!(AppConfig::load_with(&isolated(dir.path()), env_of(&[])).is_err());
    }
}
