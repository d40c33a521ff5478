use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::AppResult;
use crate::error::AppError;

/// Endpoints and transport settings for the two upstream sources.
///
/// Built once per run and handed to the adapters; nothing here is global.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Base URL of the Elasticsearch cluster holding the embeddings.
    pub store_url: String,
    /// Index that stores one document per embedding.
    pub index: String,
    /// Number of hits requested per search page.
    pub page_size: usize,
    /// Base URL of the document API (the `/messages` collection lives under it).
    pub api_url: String,
    /// Bearer token for the document API.
    pub api_token: Option<String>,
    /// Per-request timeout, written as a humantime string such as `30s`.
    #[serde(with = "humantime_duration")]
    pub timeout: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            store_url: "http://localhost:9200".to_string(),
            index: "vector_embeddings".to_string(),
            page_size: 1000,
            api_url: "http://localhost:8080/api/v2".to_string(),
            api_token: None,
            timeout: Duration::from_secs(30),
        }
    }
}

impl SourceConfig {
    /// Load configuration from `path`, or from the default location if present.
    ///
    /// An explicit path must exist. The default file is optional and falls back to
    /// [`SourceConfig::default`].
    #[tracing::instrument(name = "Loading configuration", level = "debug")]
    pub async fn load(path: Option<&Path>) -> AppResult<Self> {
        let config = match path {
            Some(path) => Self::from_file(path).await?,
            None => {
                let default_path = vecscope_dirs::default_config_file()?;
                if tokio::fs::try_exists(&default_path).await? {
                    Self::from_file(&default_path).await?
                } else {
                    trace!("No config file at {}", default_path.display());
                    Self::default()
                }
            }
        };
        config.validate()?;
        Ok(config)
    }

    async fn from_file(path: &Path) -> AppResult<Self> {
        debug!("Reading configuration from {}", path.display());
        let raw = tokio::fs::read(path).await?;
        Self::from_json(&raw)
    }

    fn from_json(raw: &[u8]) -> AppResult<Self> {
        let de = &mut serde_json::Deserializer::from_slice(raw);
        serde_path_to_error::deserialize(de).map_err(|e| AppError::InvalidParameter {
            name: "config",
            message: format!("{} at {}", e.inner(), e.path()),
        })
    }

    pub fn validate(&self) -> AppResult<()> {
        for (name, url) in [("store_url", &self.store_url), ("api_url", &self.api_url)] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(AppError::InvalidParameter {
                    name,
                    message: format!("{url} is not an http(s) URL"),
                });
            }
        }
        if self.page_size == 0 {
            return Err(AppError::InvalidParameter {
                name: "page_size",
                message: "must be at least 1".to_string(),
            });
        }
        if self.index.trim().is_empty() {
            return Err(AppError::InvalidParameter {
                name: "index",
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Opens a point in time over the configured index.
    pub fn pit_url(&self) -> String {
        format!("{}/{}/_pit", self.store_url.trim_end_matches('/'), self.index)
    }

    /// Searches that carry a point in time go to the cluster root, and so does
    /// closing one.
    pub fn pit_search_url(&self) -> String {
        format!("{}/_search", self.store_url.trim_end_matches('/'))
    }

    pub fn pit_close_url(&self) -> String {
        format!("{}/_pit", self.store_url.trim_end_matches('/'))
    }

    pub fn messages_url(&self) -> String {
        format!("{}/messages", self.api_url.trim_end_matches('/'))
    }

    /// HTTP client shared by both adapters of a run.
    pub fn http_client(&self) -> AppResult<reqwest::Client> {
        Ok(reqwest::ClientBuilder::new()
            .user_agent(format!("vecscope/{}", env!("CARGO_PKG_VERSION")))
            .timeout(self.timeout)
            .build()?)
    }
}

/// Serde helpers for `std::time::Duration` as humantime strings (`30s`, `2m`).
mod humantime_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config =
            SourceConfig::from_json(br#"{"store_url": "http://es:9200", "timeout": "2m"}"#)
                .unwrap();
        assert_eq!(config.store_url, "http://es:9200");
        assert_eq!(config.timeout, Duration::from_secs(120));
        assert_eq!(config.index, "vector_embeddings");
        assert_eq!(config.page_size, 1000);
    }

    #[test]
    fn bad_field_reports_its_path() {
        let err = SourceConfig::from_json(br#"{"page_size": "many"}"#).unwrap_err();
        assert!(err.to_string().contains("page_size"), "{err}");
    }

    #[test]
    fn urls_are_joined_without_double_slashes() {
        let config = SourceConfig {
            store_url: "http://es:9200/".into(),
            api_url: "http://api:8080/api/v2/".into(),
            ..Default::default()
        };
        assert_eq!(config.pit_url(), "http://es:9200/vector_embeddings/_pit");
        assert_eq!(config.pit_search_url(), "http://es:9200/_search");
        assert_eq!(config.pit_close_url(), "http://es:9200/_pit");
        assert_eq!(config.messages_url(), "http://api:8080/api/v2/messages");
    }

    #[test]
    fn validation_rejects_zero_page_size_and_bad_scheme() {
        let config = SourceConfig {
            page_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SourceConfig {
            api_url: "ftp://api".into(),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("api_url"));
    }

    #[tokio::test]
    async fn explicit_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, br#"{"api_token": "secret", "page_size": 50}"#).unwrap();

        let config = SourceConfig::load(Some(&path)).await.unwrap();
        assert_eq!(config.api_token.as_deref(), Some("secret"));
        assert_eq!(config.page_size, 50);
    }

    #[tokio::test]
    async fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        assert!(SourceConfig::load(Some(&path)).await.is_err());
    }
}
