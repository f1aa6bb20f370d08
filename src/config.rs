use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::errors::ConfigError;
use crate::typeahead::{MAX_CANDIDATES, MIN_PREFIX_LEN};

pub const APP_NAME: &str = "slashsnip";
pub const CONFIG_FILE_NAME: &str = "config.yaml";
pub const STORE_FILE_NAME: &str = "store.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Defaults to `<config dir>/slashsnip/store.json`.
    pub store_path: Option<PathBuf>,
    pub library_path: Option<PathBuf>,
    /// Used when `RUST_LOG` is unset.
    pub log_filter: String,
    pub typeahead: TypeaheadConfig,
    pub assistant: AssistantConfig,
    pub remote: RemoteConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            library_path: None,
            log_filter: "info".to_string(),
            typeahead: TypeaheadConfig::default(),
            assistant: AssistantConfig::default(),
            remote: RemoteConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeaheadConfig {
    pub max_candidates: usize,
    pub min_prefix_len: usize,
}

impl Default for TypeaheadConfig {
    fn default() -> Self {
        Self { max_candidates: MAX_CANDIDATES, min_prefix_len: MIN_PREFIX_LEN }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub trigger_word: String,
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
    pub max_attachments: usize,
    /// Store keys whose values are sent along as request context.
    pub context_keys: Vec<String>,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            trigger_word: "maf".to_string(),
            endpoint: None,
            timeout_secs: 30,
            max_attachments: 12,
            context_keys: vec!["context:challenge".to_string(), "context:site".to_string()],
        }
    }
}

impl AssistantConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// JSON snippet source pulled by `slashsnip sync`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Used when neither the command line nor the store names a URL.
    pub url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self { url: None, timeout_secs: 30 }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl AppConfig {
    pub fn store_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.store_path {
            Some(path) => Ok(path.clone()),
            None => Ok(config_dir()?.join(STORE_FILE_NAME)),
        }
    }
}

pub fn config_dir() -> Result<PathBuf, ConfigError> {
    let base = dirs::config_dir().ok_or(ConfigError::ConfigDirectoryNotFound)?;
    Ok(base.join(APP_NAME))
}

/// Location of the config file, written with defaults on first use.
pub fn get_config_path() -> Result<PathBuf, ConfigError> {
    let dir = config_dir()?;
    let file = dir.join(CONFIG_FILE_NAME);
    if file.exists() {
        return Ok(file);
    }

    fs::create_dir_all(&dir).map_err(|source| ConfigError::CreateConfigDir { source })?;
    create_default_config(&file)?;
    info!("Created default configuration at {}", file.display());
    Ok(file)
}

pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
    fs::write(path, DEFAULT_CONFIG).map_err(|source| ConfigError::WriteDefaultConfig { source })
}

pub fn load_config() -> Result<AppConfig, ConfigError> {
    let path = get_config_path()?;
    load_config_from(&path)
}

pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::ReadConfig {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse_config(&raw)?;
    debug!("Loaded configuration from {}", path.display());
    Ok(config)
}

pub fn parse_config(raw: &str) -> Result<AppConfig, ConfigError> {
    if raw.trim().is_empty() {
        return Ok(AppConfig::default());
    }
    Ok(serde_yaml::from_str(raw)?)
}

const DEFAULT_CONFIG: &str = r#"# slashsnip configuration
# every key is optional; anything left out uses the built-in default

# where snippets and remembered dialog values live
# store_path: /path/to/store.json

# snippet library read by `slashsnip import` and `slashsnip watch`
# library_path: /path/to/snippets.snip

# overridden by RUST_LOG
log_filter: info

typeahead:
  max_candidates: 7
  min_prefix_len: 2

assistant:
  # typing this word after a message opens the assistant panel; blank disables it
  trigger_word: maf
  # endpoint: https://example.com/analyze
  timeout_secs: 30
  max_attachments: 12
  context_keys:
    - "context:challenge"
    - "context:site"

remote:
  # JSON snippet source pulled by `slashsnip sync`
  # url: https://script.google.com/macros/s/<id>/exec
  timeout_secs: 30
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_file_matches_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        create_default_config(&path).unwrap();
        assert_eq!(load_config_from(&path).unwrap(), AppConfig::default());
    }

    #[test]
    fn test_partial_config_keeps_other_defaults() {
        let config = parse_config("typeahead:\n  max_candidates: 3\nassistant:\n  endpoint: http://localhost:9/x\n").unwrap();
        assert_eq!(config.typeahead.max_candidates, 3);
        assert_eq!(config.typeahead.min_prefix_len, 2);
        assert_eq!(config.assistant.endpoint.as_deref(), Some("http://localhost:9/x"));
        assert_eq!(config.assistant.trigger_word, "maf");
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn test_blank_trigger_word_is_kept_as_written() {
        let config = parse_config("assistant:\n  trigger_word: \"\"\n").unwrap();
        assert_eq!(config.assistant.trigger_word, "");
        assert!(crate::caret::CaretAnchorResolver::trigger(&config.assistant.trigger_word).is_none());
    }

    #[test]
    fn test_remote_section() {
        let config = parse_config("remote:\n  url: https://x/exec\n  timeout_secs: 0\n").unwrap();
        assert_eq!(config.remote.url.as_deref(), Some("https://x/exec"));
        assert_eq!(config.remote.timeout(), Duration::from_secs(1));
        assert_eq!(AppConfig::default().remote.url, None);
    }

    #[test]
    fn test_empty_config_is_default() {
        assert_eq!(parse_config("  \n").unwrap(), AppConfig::default());
    }

    #[test]
    fn test_bad_yaml_is_a_parse_error() {
        assert!(matches!(parse_config("typeahead: [1, 2"), Err(ConfigError::Parse(_))));
        assert!(matches!(
            parse_config("typeahead:\n  max_candidates: many\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        match load_config_from(&missing) {
            Err(ConfigError::ReadConfig { path, .. }) => assert_eq!(path, missing),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_explicit_store_path_wins() {
        let config = AppConfig { store_path: Some(PathBuf::from("/tmp/s.json")), ..Default::default() };
        assert_eq!(config.store_path().unwrap(), PathBuf::from("/tmp/s.json"));
        assert_eq!(config.assistant.timeout(), Duration::from_secs(30));
    }
}
