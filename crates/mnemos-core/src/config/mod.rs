//! Configuration system for mnemos.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::agent::AgentConfig;
use crate::compaction::CompactionConfig;
use crate::error::{MnemosError, MnemosResult};
use crate::gate::GateConfig;
use crate::retrieval::RetrievalConfig;
use crate::traits::{EmbedderConfig, EmbedderProvider, LlmConfig};

/// Reasoning-engine backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    OpenAI,
    Anthropic,
}

impl FromStr for LlmProvider {
    type Err = MnemosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(LlmProvider::OpenAI),
            "anthropic" => Ok(LlmProvider::Anthropic),
            other => Err(MnemosError::UnsupportedProvider {
                provider: other.to_string(),
            }),
        }
    }
}

/// Provider configuration with type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProviderConfig {
    pub provider: LlmProvider,
    #[serde(flatten)]
    pub config: LlmConfig,
}

impl Default for LlmProviderConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::OpenAI,
            config: LlmConfig {
                model: "gpt-4.1-mini".to_string(),
                ..Default::default()
            },
        }
    }
}

/// Embedder provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EmbedderProviderConfig {
    pub provider: EmbedderProvider,
    #[serde(flatten)]
    pub config: EmbedderConfig,
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub llm: LlmProviderConfig,
    /// Optional separate model for compaction extraction; falls back to `llm`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_llm: Option<LlmProviderConfig>,
    pub embedder: EmbedderProviderConfig,
    /// SQLite database holding turns, patterns and locks.
    pub database_path: PathBuf,
    pub gate: GateConfig,
    pub retrieval: RetrievalConfig,
    pub compaction: CompactionConfig,
    pub agent: AgentConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mnemos_dir = dirs::home_dir()
            .map(|h| h.join(".mnemos"))
            .unwrap_or_else(|| PathBuf::from(".mnemos"));

        Self {
            llm: LlmProviderConfig::default(),
            extraction_llm: None,
            embedder: EmbedderProviderConfig::default(),
            database_path: mnemos_dir.join("mnemos.db"),
            gate: GateConfig::default(),
            retrieval: RetrievalConfig::default(),
            compaction: CompactionConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a file (TOML, JSON, or YAML).
    pub fn from_file(path: impl AsRef<Path>) -> MnemosResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let ext = path.as_ref().extension().and_then(|e| e.to_str());

        let config: Self = match ext {
            Some("toml") => {
                toml::from_str(&content).map_err(|e| MnemosError::Configuration(e.to_string()))?
            }
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| MnemosError::Configuration(e.to_string()))?,
            Some("yaml" | "yml") => serde_yaml::from_str(&content)
                .map_err(|e| MnemosError::Configuration(e.to_string()))?,
            _ => {
                return Err(MnemosError::Configuration(
                    "Unsupported config file format. Use .toml, .json, or .yaml".to_string(),
                ))
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables over the defaults.
    pub fn from_env() -> MnemosResult<Self> {
        Self::default().with_env_overrides()
    }

    /// Apply `MNEMOS_*` and provider key variables on top of `self`.
    pub fn with_env_overrides(mut self) -> MnemosResult<Self> {
        if let Ok(provider) = std::env::var("MNEMOS_LLM_PROVIDER") {
            self.llm.provider = provider.parse()?;
        }
        if let Ok(model) = std::env::var("MNEMOS_LLM_MODEL") {
            self.llm.config.model = model;
        }
        if let Ok(url) = std::env::var("MNEMOS_LLM_BASE_URL") {
            self.llm.config.base_url = Some(url);
        }
        let llm_key_var = match self.llm.provider {
            LlmProvider::OpenAI => "OPENAI_API_KEY",
            LlmProvider::Anthropic => "ANTHROPIC_API_KEY",
        };
        if self.llm.config.api_key.is_none() {
            self.llm.config.api_key = std::env::var(llm_key_var).ok();
        }

        if let Ok(model) = std::env::var("MNEMOS_EMBEDDER_MODEL") {
            self.embedder.config.model = model;
        }
        if self.embedder.config.api_key.is_none() {
            self.embedder.config.api_key = std::env::var("OPENAI_API_KEY").ok();
        }

        if let Ok(path) = std::env::var("MNEMOS_DB_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(v) = env_parse("MNEMOS_MAX_TOOL_CALLS")? {
            self.agent.max_tool_calls = v;
        }
        if let Some(v) = env_parse("MNEMOS_AGENT_TIMEOUT_SECS")? {
            self.agent.timeout_secs = v;
        }
        if let Some(v) = env_parse("MNEMOS_COMPACTION_TOKEN_BUDGET")? {
            self.compaction.token_budget = v;
        }
        if let Some(v) = env_parse("MNEMOS_COMPACTION_INTERVAL_SECS")? {
            self.compaction.interval_secs = v;
        }
        if let Some(v) = env_parse("MNEMOS_PATTERN_TOKEN_BUDGET")? {
            self.retrieval.pattern_token_budget = v;
        }

        self.validate()?;
        Ok(self)
    }

    /// Reject out-of-range values in every section.
    pub fn validate(&self) -> MnemosResult<()> {
        let sections: [(&str, Result<(), &'static str>); 5] = [
            ("embedder", self.embedder.config.validate()),
            ("gate", self.gate.validate()),
            ("retrieval", self.retrieval.validate()),
            ("compaction", self.compaction.validate()),
            ("agent", self.agent.validate()),
        ];
        for (section, result) in sections {
            if let Err(message) = result {
                return Err(MnemosError::out_of_range(section, message));
            }
        }
        Ok(())
    }

    /// Configuration used for compaction extraction calls.
    pub fn extraction_llm(&self) -> &LlmProviderConfig {
        self.extraction_llm.as_ref().unwrap_or(&self.llm)
    }

    /// Build configuration using builder pattern.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }
}

fn env_parse<T: FromStr>(name: &str) -> MnemosResult<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| {
                MnemosError::Configuration(format!("{} has an invalid value: {}", name, raw))
            }),
        Err(_) => Ok(None),
    }
}

/// Builder for EngineConfig.
#[derive(Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn llm(mut self, config: LlmProviderConfig) -> Self {
        self.config.llm = config;
        self
    }

    pub fn extraction_llm(mut self, config: LlmProviderConfig) -> Self {
        self.config.extraction_llm = Some(config);
        self
    }

    pub fn embedder(mut self, config: EmbedderProviderConfig) -> Self {
        self.config.embedder = config;
        self
    }

    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.database_path = path.into();
        self
    }

    pub fn gate(mut self, config: GateConfig) -> Self {
        self.config.gate = config;
        self
    }

    pub fn retrieval(mut self, config: RetrievalConfig) -> Self {
        self.config.retrieval = config;
        self
    }

    pub fn compaction(mut self, config: CompactionConfig) -> Self {
        self.config.compaction = config;
        self
    }

    pub fn agent(mut self, config: AgentConfig) -> Self {
        self.config.agent = config;
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> MnemosResult<EngineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
