//! Configuration management for Castwatch

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};
use crate::types::{Destination, SourceBinding};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub state: StateConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    pub feed: Option<FeedConfig>,
    pub daemon: Option<DaemonConfig>,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    pub path: String,
}

impl StateConfig {
    /// Expand `~` in the watermark file path
    pub fn expand_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }
}

/// Dispatch engine tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchConfig {
    #[serde(default = "default_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub delivery_timeout_secs: u64,
    #[serde(default = "default_max_concurrent_sources")]
    pub max_concurrent_sources: usize,
    /// When an older accepted item is delivered, move the watermark to the
    /// newest fetched item instead, since everything newer was rejected.
    #[serde(default)]
    pub advance_past_rejected: bool,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent_sources() -> usize {
    4
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_timeout_secs(),
            delivery_timeout_secs: default_timeout_secs(),
            max_concurrent_sources: default_max_concurrent_sources(),
            advance_past_rejected: false,
        }
    }
}

impl DispatchConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }
}

/// Rules for the built-in item classifier
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassifierConfig {
    pub min_duration_secs: Option<u64>,
    #[serde(default)]
    pub exclude_live: bool,
    #[serde(default)]
    pub exclude_tags: Vec<String>,
    #[serde(default)]
    pub exclude_title_keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Directory holding one `<source>.json` item list per source
    pub dir: String,
}

impl FeedConfig {
    pub fn expand_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.dir).to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Seconds between poll cycles
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    /// Link template for rendered notifications, `{id}` is replaced by the item id
    pub url_template: Option<String>,
}

fn default_poll_interval() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub name: Option<String>,
    #[serde(default)]
    pub destinations: Vec<Destination>,
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load and validate configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            state: StateConfig {
                path: "~/.local/share/castwatch/watermarks.json".to_string(),
            },
            dispatch: DispatchConfig::default(),
            classifier: ClassifierConfig::default(),
            feed: Some(FeedConfig {
                dir: "~/.local/share/castwatch/feeds".to_string(),
            }),
            daemon: Some(DaemonConfig {
                poll_interval: default_poll_interval(),
                url_template: None,
            }),
            sources: Vec::new(),
        }
    }

    /// Reject configurations the dispatch engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.state.path.trim().is_empty() {
            return Err(ConfigError::MissingField("state.path".to_string()).into());
        }
        if self.dispatch.fetch_timeout_secs == 0 {
            return Err(invalid("dispatch.fetch_timeout_secs", "must be greater than zero"));
        }
        if self.dispatch.delivery_timeout_secs == 0 {
            return Err(invalid("dispatch.delivery_timeout_secs", "must be greater than zero"));
        }
        if self.dispatch.max_concurrent_sources == 0 {
            return Err(invalid("dispatch.max_concurrent_sources", "must be greater than zero"));
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.id.trim().is_empty() {
                return Err(invalid("sources.id", "source id cannot be empty"));
            }
            if !seen.insert(source.id.as_str()) {
                return Err(invalid(
                    "sources.id",
                    &format!("duplicate source '{}'", source.id),
                ));
            }
            if source.destinations.is_empty() {
                return Err(invalid(
                    "sources.destinations",
                    &format!("source '{}' has no destinations", source.id),
                ));
            }
            let mut keys = HashSet::new();
            for dest in &source.destinations {
                if dest.platform.trim().is_empty() {
                    return Err(invalid(
                        "sources.destinations.platform",
                        &format!("source '{}' has a destination without platform", source.id),
                    ));
                }
                // The watermark key joins platform and handle with ':'
                if dest.platform.contains(':') {
                    return Err(invalid(
                        "sources.destinations.platform",
                        &format!(
                            "source '{}' has platform '{}' containing ':'",
                            source.id, dest.platform
                        ),
                    ));
                }
                if !keys.insert(dest.key()) {
                    return Err(invalid(
                        "sources.destinations",
                        &format!("source '{}' lists '{}' twice", source.id, dest.key()),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Source bindings in configuration order
    pub fn bindings(&self) -> Vec<SourceBinding> {
        self.sources
            .iter()
            .map(|s| SourceBinding::new(s.id.clone(), s.destinations.clone()))
            .collect()
    }

    /// Distinct platform names referenced by any destination
    pub fn platforms(&self) -> Vec<String> {
        let mut platforms: Vec<String> = self
            .sources
            .iter()
            .flat_map(|s| s.destinations.iter().map(|d| d.platform.clone()))
            .collect();
        platforms.sort();
        platforms.dedup();
        platforms
    }
}

fn invalid(field: &str, reason: &str) -> crate::error::CastwatchError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CASTWATCH_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("castwatch").join("config.toml"))
}
