use std::fs;
use std::path::{Path, PathBuf};

use directories::BaseDirs;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::domain::ResourceKind;
use crate::error::CrucibleError;
use crate::parsers::frontmatter::FrontmatterStyle;

pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub graph_explorer_url: Option<String>,
    #[serde(default)]
    pub current_project: Option<String>,
    #[serde(default)]
    pub web_host: Option<String>,
    #[serde(default)]
    pub frontmatter_parser: Option<FrontmatterStyle>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Config {
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), CrucibleError> {
        let value = value.trim();
        let text = (!value.is_empty()).then(|| value.to_string());
        match key {
            "api_url" => self.api_url = text,
            "api_key" => self.api_key = text,
            "graph_explorer_url" => self.graph_explorer_url = text,
            "current_project" => self.current_project = text,
            "web_host" => self.web_host = text,
            "frontmatter_parser" => {
                self.frontmatter_parser = text
                    .map(|value| value.parse())
                    .transpose()
                    .map_err(|_| CrucibleError::ConfigKey(format!("{key}={value}")))?;
            }
            "timeout_secs" => {
                self.timeout_secs = text
                    .map(|value| value.parse::<u64>())
                    .transpose()
                    .map_err(|_| CrucibleError::ConfigKey(format!("{key}={value}")))?;
            }
            _ => return Err(CrucibleError::ConfigKey(key.to_string())),
        }
        Ok(())
    }
}

/// Settings after defaults and environment overrides are applied.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub graph_explorer_url: Option<String>,
    pub current_project: Option<String>,
    pub web_host: Option<String>,
    pub frontmatter_parser: FrontmatterStyle,
    pub timeout_secs: u64,
}

impl ResolvedConfig {
    pub fn require_api_key(&self) -> Result<&str, CrucibleError> {
        self.api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or(CrucibleError::MissingApiKey)
    }

    /// Graph explorer page for a project, or for one record within it.
    pub fn explorer_url(
        &self,
        project: &str,
        target: Option<(ResourceKind, &str)>,
    ) -> Result<String, CrucibleError> {
        let base = self
            .graph_explorer_url
            .as_deref()
            .ok_or_else(|| CrucibleError::ConfigKey("graph_explorer_url is not set".to_string()))?;
        Ok(match target {
            Some((ResourceKind::Dataset, mfid)) => format!("{base}/{project}/dataset/{mfid}"),
            Some((ResourceKind::Sample, mfid)) => format!("{base}/{project}/sample-graph/{mfid}"),
            None => format!("{base}/{project}"),
        })
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn default_path() -> Result<PathBuf, CrucibleError> {
        if let Ok(path) = std::env::var("CRUCIBLE_CONFIG") {
            if !path.trim().is_empty() {
                return Ok(PathBuf::from(path));
            }
        }
        BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("crucible").join("config.json"))
            .ok_or_else(|| {
                CrucibleError::Filesystem("unable to resolve config directory".to_string())
            })
    }

    pub fn load(path: &Path) -> Result<Config, CrucibleError> {
        let content =
            fs::read_to_string(path).map_err(|_| CrucibleError::ConfigRead(path.to_path_buf()))?;
        serde_json::from_str(&content).map_err(|err| CrucibleError::ConfigParse(err.to_string()))
    }

    /// Loads the file if present; a missing file is only an error when the
    /// environment does not provide an API URL either.
    pub fn resolve(path: Option<&Path>) -> Result<ResolvedConfig, CrucibleError> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path()?,
        };

        let config = if config_path.exists() {
            Self::load(&config_path)?
        } else if path.is_some() || env_value("CRUCIBLE_API_URL").is_none() {
            return Err(CrucibleError::MissingConfig(config_path));
        } else {
            Config::default()
        };

        Self::resolve_config(config)
    }

    /// Like [`ConfigLoader::resolve`], but `None` when no archive is
    /// configured at all. For commands that never contact the archive.
    pub fn resolve_if_present(path: Option<&Path>) -> Result<Option<ResolvedConfig>, CrucibleError> {
        match Self::resolve(path) {
            Ok(config) => Ok(Some(config)),
            Err(CrucibleError::MissingConfig(missing)) => {
                tracing::debug!("no config at {}", missing.display());
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, CrucibleError> {
        let api_url = env_value("CRUCIBLE_API_URL")
            .or(config.api_url)
            .ok_or_else(|| CrucibleError::ConfigKey("api_url is not set".to_string()))?;
        let api_key = env_value("CRUCIBLE_API_KEY").or(config.api_key);

        let graph_explorer_url = config
            .graph_explorer_url
            .map(|url| url.trim_end_matches('/').to_string());
        let web_host = config.web_host.or_else(|| {
            graph_explorer_url
                .as_deref()
                .and_then(|url| Url::parse(url).ok())
                .and_then(|url| url.host_str().map(str::to_string))
        });

        Ok(ResolvedConfig {
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            graph_explorer_url,
            current_project: config.current_project,
            web_host,
            frontmatter_parser: config.frontmatter_parser.unwrap_or_default(),
            timeout_secs: config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
        })
    }

    pub fn save(path: &Path, config: &Config) -> Result<(), CrucibleError> {
        let parent = path
            .parent()
            .ok_or_else(|| CrucibleError::Filesystem("invalid config path".to_string()))?;
        fs::create_dir_all(parent).map_err(|err| CrucibleError::Filesystem(err.to_string()))?;
        let content = serde_json::to_vec_pretty(config)
            .map_err(|err| CrucibleError::ConfigParse(err.to_string()))?;
        let temp = tempfile::Builder::new()
            .prefix("crucible-config")
            .tempfile_in(parent)
            .map_err(|err| CrucibleError::Filesystem(err.to_string()))?;
        fs::write(temp.path(), &content)
            .map_err(|err| CrucibleError::Filesystem(err.to_string()))?;
        temp.persist(path)
            .map_err(|err| CrucibleError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
