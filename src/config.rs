use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Environment variable that overrides `api_key` from the config file
pub const API_KEY_ENV: &str = "PINALBUM_API_KEY";

/// Largest page the search service will return
pub const MAX_PER_PAGE: u32 = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Key sent with every search request
    pub api_key: String,
    /// REST endpoint of the photo search service
    pub api_url: String,
    /// Base address images are downloaded from
    pub photo_url: String,
    /// Search radius around a pin, in kilometers
    pub radius_km: u32,
    /// Photos requested per page
    pub per_page: u32,
    /// Preferred image size variant (`q` = 150px square)
    pub size_variant: String,
    /// Image downloads allowed to run at once for one page
    pub concurrency: usize,
    pub request_timeout_secs: u64,
    /// Upper bound for downloading one page of images; unbounded when absent
    pub page_budget_secs: Option<u64>,
    /// YAML file holding pins, cursors and photo records
    pub data_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_url: "https://api.flickr.com/services/rest/".to_string(),
            photo_url: "https://live.staticflickr.com".to_string(),
            radius_km: 1,
            per_page: 30,
            size_variant: "q".to_string(),
            concurrency: 8,
            request_timeout_secs: 30,
            page_budget_secs: Some(60),
            data_file: "data/pinalbum.yaml".to_string(),
        }
    }
}

impl Config {
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;

        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let yaml = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&yaml)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;

        let config = config.with_env_overrides();
        config
            .validate()
            .with_context(|| format!("Invalid config in {}", path.display()))?;
        Ok(config)
    }

    /// Checks the values a request would otherwise trip over later
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("api_url", &self.api_url), ("photo_url", &self.photo_url)] {
            let url = Url::parse(value).with_context(|| format!("{name} '{value}' is not a URL"))?;
            if !matches!(url.scheme(), "http" | "https") {
                anyhow::bail!("{name} '{value}' must use http or https");
            }
        }
        if self.per_page == 0 || self.per_page > MAX_PER_PAGE {
            anyhow::bail!("per_page must be between 1 and {MAX_PER_PAGE}, got {}", self.per_page);
        }
        if self.size_variant.trim().is_empty() {
            anyhow::bail!("size_variant must not be empty");
        }
        Ok(())
    }

    pub fn get_config_path(config_arg: &Option<PathBuf>) -> PathBuf {
        config_arg
            .clone()
            .unwrap_or_else(|| PathBuf::from("pinalbum.yaml"))
    }

    /// Applies `PINALBUM_API_KEY` when it is set and non-empty
    pub fn with_env_overrides(self) -> Self {
        self.with_api_key_override(std::env::var(API_KEY_ENV).ok())
    }

    fn with_api_key_override(mut self, key: Option<String>) -> Self {
        if let Some(key) = key.filter(|k| !k.trim().is_empty()) {
            self.api_key = key;
        }
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn page_budget(&self) -> Option<Duration> {
        self.page_budget_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.api_url, "https://api.flickr.com/services/rest/");
        assert_eq!(config.photo_url, "https://live.staticflickr.com");
        assert_eq!(config.radius_km, 1);
        assert_eq!(config.per_page, 30);
        assert_eq!(config.data_file, "data/pinalbum.yaml");
        assert_eq!(config.page_budget(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_save_and_load_config() -> Result<()> {
        let temp_dir = tempdir()?;
        let config_path = temp_dir.path().join("nested/pinalbum.yaml");

        let config = Config {
            api_key: "abc123".to_string(),
            per_page: 15,
            ..Config::default()
        };
        config.save_to_file(&config_path)?;

        let loaded_config = Config::load_from_file(&config_path)?;

        assert_eq!(config.api_url, loaded_config.api_url);
        assert_eq!(config.per_page, loaded_config.per_page);
        assert_eq!(config.data_file, loaded_config.data_file);
        assert_eq!(config.page_budget_secs, loaded_config.page_budget_secs);

        Ok(())
    }

    #[test]
    fn test_partial_config_uses_defaults() -> Result<()> {
        let config: Config = serde_yaml::from_str("per_page: 15\nradius_km: 5\n")?;

        assert_eq!(config.per_page, 15);
        assert_eq!(config.radius_km, 5);
        assert_eq!(config.size_variant, "q");
        assert_eq!(config.concurrency, 8);

        Ok(())
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(Config::default().validate().is_ok());

        let config = Config {
            api_url: "not a url".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            photo_url: "ftp://photos.example.com".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            per_page: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_rejects_invalid_config() -> Result<()> {
        let temp_dir = tempdir()?;
        let config_path = temp_dir.path().join("pinalbum.yaml");
        fs::write(&config_path, "per_page: 1000\n")?;

        let err = Config::load_from_file(&config_path).unwrap_err();
        assert!(format!("{err:#}").contains("per_page"));

        Ok(())
    }

    #[test]
    fn test_api_key_override() {
        let config = Config::default().with_api_key_override(Some("from-env".to_string()));
        assert_eq!(config.api_key, "from-env");

        let config = Config {
            api_key: "from-file".to_string(),
            ..Config::default()
        }
        .with_api_key_override(Some("  ".to_string()));
        assert_eq!(config.api_key, "from-file");
    }
}
