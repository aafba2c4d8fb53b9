//! Configuration loading and validation.

use crate::GroupId;
use crate::error::{ConfigError, Result};
use arc_swap::ArcSwap;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Chime configuration, deserialized from TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory path.
    pub data_dir: PathBuf,

    /// OpenAI-compatible provider settings.
    pub llm: LlmConfig,

    /// Proactive engine tunables.
    pub proactive: ProactiveConfig,

    /// Per-group profiles keyed by group id.
    pub groups: HashMap<String, GroupProfile>,

    /// Persona template overrides keyed by preference key.
    pub personas: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            llm: LlmConfig::default(),
            proactive: ProactiveConfig::default(),
            groups: HashMap::new(),
            personas: HashMap::new(),
        }
    }
}

/// LLM provider configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible endpoint.
    pub base_url: String,

    /// Model name sent with every completion request.
    pub model: String,

    /// Bearer token. Empty works for local endpoints.
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4o-mini".into(),
            api_key: None,
        }
    }
}

/// Proactive engine tunables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProactiveConfig {
    /// Debounce window for per-group analysis triggers.
    pub debounce_ms: u64,

    /// Threads idle longer than this are retired at the next cycle.
    pub idle_timeout_secs: i64,

    /// Recent-history window supplied to analysis.
    pub history_limit: usize,

    /// Maximum knowledge chunks requested per reply.
    pub knowledge_limit: usize,

    /// Context compression thresholds.
    pub compression: CompressionConfig,
}

impl Default for ProactiveConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 8_000,
            idle_timeout_secs: 1_800,
            history_limit: 30,
            knowledge_limit: 5,
            compression: CompressionConfig::default(),
        }
    }
}

/// Context compression thresholds.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Message-count ceiling above which a thread is compressed.
    pub ceiling: usize,

    /// Number of earliest messages summarized per pass.
    pub segment: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            ceiling: 30,
            segment: 10,
        }
    }
}

/// Per-group behavior profile.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GroupProfile {
    /// Persona/config selector used to render prompts for this group.
    pub preference_key: String,

    /// Whether the bot may join conversations uninvited.
    pub proactive: bool,
}

impl Default for GroupProfile {
    fn default() -> Self {
        Self {
            preference_key: "default".into(),
            proactive: true,
        }
    }
}

/// Immutable snapshot of per-group profiles.
#[derive(Debug, Default)]
pub struct GroupRegistry {
    profiles: HashMap<GroupId, GroupProfile>,
}

impl GroupRegistry {
    pub fn from_profiles(profiles: HashMap<String, GroupProfile>) -> Self {
        Self {
            profiles: profiles
                .into_iter()
                .map(|(id, profile)| (Arc::from(id.as_str()), profile))
                .collect(),
        }
    }

    pub fn get(&self, group_id: &str) -> Option<&GroupProfile> {
        self.profiles.get(group_id)
    }

    pub fn is_proactive(&self, group_id: &str) -> bool {
        self.get(group_id).map(|p| p.proactive).unwrap_or(false)
    }
}

/// Shared runtime configuration. The group registry swaps atomically, so
/// profiles can be replaced without restarting the engine.
pub struct RuntimeConfig {
    pub proactive: ProactiveConfig,
    pub groups: ArcSwap<GroupRegistry>,
}

impl RuntimeConfig {
    pub fn new(config: &Config) -> Arc<Self> {
        Arc::new(Self {
            proactive: config.proactive.clone(),
            groups: ArcSwap::from_pointee(GroupRegistry::from_profiles(config.groups.clone())),
        })
    }

    /// Replace the group registry for all running components.
    pub fn replace_groups(&self, registry: GroupRegistry) {
        self.groups.store(Arc::new(registry));
    }
}

impl Config {
    /// Load configuration from `CHIME_CONFIG` or `./chime.toml`, falling
    /// back to defaults when no file exists.
    pub fn load() -> Result<Self> {
        let path = std::env::var("CHIME_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./chime.toml"));
        if path.exists() {
            Self::load_from_path(&path)
        } else {
            let mut config = Self::default();
            config.apply_env();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load from a specific config file path.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Load {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Pull the API key from the environment when the file leaves it unset.
    fn apply_env(&mut self) {
        if self.llm.api_key.is_none() {
            self.llm.api_key = std::env::var("CHIME_API_KEY")
                .or_else(|_| std::env::var("OPENAI_API_KEY"))
                .ok();
        }
    }

    fn validate(&self) -> Result<()> {
        if self.proactive.debounce_ms == 0 {
            return Err(ConfigError::Invalid("proactive.debounce_ms must be positive".into()).into());
        }
        if self.proactive.compression.segment == 0 {
            return Err(
                ConfigError::Invalid("proactive.compression.segment must be positive".into()).into(),
            );
        }
        if self.proactive.compression.ceiling < 2 {
            return Err(ConfigError::Invalid(
                "proactive.compression.ceiling must leave room for a summary".into(),
            )
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn parses_full_config() {
        let raw = indoc! {r#"
            data_dir = "/tmp/chime"

            [llm]
            base_url = "http://localhost:11434/v1"
            model = "qwen2.5"

            [proactive]
            debounce_ms = 5000
            idle_timeout_secs = 900

            [proactive.compression]
            ceiling = 40
            segment = 15

            [groups.123456]
            preference_key = "casual"

            [groups.777]
            proactive = false
        "#};

        let config: Config = toml::from_str(raw).expect("config parses");
        assert_eq!(config.llm.model, "qwen2.5");
        assert_eq!(config.proactive.debounce_ms, 5_000);
        assert_eq!(config.proactive.compression.ceiling, 40);
        // Unset fields fall back to defaults.
        assert_eq!(config.proactive.history_limit, 30);
        assert_eq!(config.groups["123456"].preference_key, "casual");
        assert!(config.groups["123456"].proactive);
        assert!(!config.groups["777"].proactive);
    }

    #[test]
    fn registry_reports_unknown_groups_as_not_proactive() {
        let registry = GroupRegistry::from_profiles(HashMap::from([(
            "g1".to_string(),
            GroupProfile::default(),
        )]));
        assert!(registry.is_proactive("g1"));
        assert!(!registry.is_proactive("g2"));
    }

    #[test]
    fn rejects_zero_segment() {
        let mut config = Config::default();
        config.proactive.compression.segment = 0;
        assert!(config.validate().is_err());
    }
}
