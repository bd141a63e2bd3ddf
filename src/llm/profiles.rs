//! Provider profiles and the static provider registry

use crate::neo4j::models::PrivacyLevel;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::error::{RegistryError, RoutingError};
use super::router::select_provider;

/// Kind of work sent to a language model
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Tagging,
    Connection,
    Insight,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tagging => write!(f, "tagging"),
            Self::Connection => write!(f, "connection"),
            Self::Insight => write!(f, "insight"),
        }
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tagging" => Ok(Self::Tagging),
            "connection" | "connection_discovery" => Ok(Self::Connection),
            "insight" | "insight_generation" => Ok(Self::Insight),
            _ => Err(format!("Unknown task kind: {}", s)),
        }
    }
}

/// Wire protocol spoken by a provider
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Ollama,
    OpenaiCompatible,
    Anthropic,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ollama => write!(f, "ollama"),
            Self::OpenaiCompatible => write!(f, "openai_compatible"),
            Self::Anthropic => write!(f, "anthropic"),
        }
    }
}

fn default_max_retries() -> u32 {
    2
}

fn default_timeout_ms() -> u64 {
    60_000
}

/// Static description of an LLM provider, loaded from configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderProfile {
    pub name: String,
    #[serde(default)]
    pub is_local: bool,
    #[serde(default)]
    pub capability_tags: BTreeSet<TaskKind>,
    #[serde(default)]
    pub cost_per_1k_tokens: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    pub kind: ProviderKind,
    pub model: String,
    #[serde(default)]
    pub base_url: String,
    /// Name of the environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl ProviderProfile {
    /// `<provider>/<model>`, recorded as an edge's `discovered_by`
    pub fn identifier(&self) -> String {
        format!("{}/{}", self.name, self.model)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn supports(&self, task: TaskKind) -> bool {
        self.capability_tags.contains(&task)
    }

    /// Estimated cost of `tokens` tokens
    pub fn cost_for(&self, tokens: u64) -> f64 {
        tokens as f64 / 1000.0 * self.cost_per_1k_tokens
    }
}

/// Immutable table of provider profiles plus per-task defaults
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    profiles: Vec<ProviderProfile>,
    defaults: HashMap<TaskKind, String>,
}

impl ProviderRegistry {
    /// Profiles are keyed by name everywhere downstream, so names must be unique
    pub fn new(
        profiles: Vec<ProviderProfile>,
        defaults: HashMap<TaskKind, String>,
    ) -> Result<Self, RegistryError> {
        let mut names = BTreeSet::new();
        for profile in &profiles {
            if !names.insert(profile.name.as_str()) {
                return Err(RegistryError::DuplicateProvider(profile.name.clone()));
            }
        }
        Ok(Self { profiles, defaults })
    }

    pub fn profiles(&self) -> &[ProviderProfile] {
        &self.profiles
    }

    pub fn get(&self, name: &str) -> Option<&ProviderProfile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    pub fn default_for(&self, task: TaskKind) -> Option<&str> {
        self.defaults.get(&task).map(String::as_str)
    }

    /// Resolve a `<provider>/<model>` identifier back to its profile.
    /// Both parts must match; model names may themselves contain '/'.
    pub fn resolve_identifier(&self, discovered_by: &str) -> Option<&ProviderProfile> {
        self.profiles
            .iter()
            .find(|p| p.identifier() == discovered_by)
    }

    /// Route a task at a privacy level using this registry's profiles and defaults
    pub fn select(
        &self,
        task: TaskKind,
        level: PrivacyLevel,
    ) -> Result<&ProviderProfile, RoutingError> {
        select_provider(task, level, &self.profiles, self.default_for(task))
    }
}

/// Built-in profiles: a local Ollama model for everything plus remote Anthropic
/// models (haiku for tagging, sonnet for connections and insights).
pub fn default_profiles() -> (Vec<ProviderProfile>, HashMap<TaskKind, String>) {
    let profiles = vec![
        ProviderProfile {
            name: "ollama".to_string(),
            is_local: true,
            capability_tags: [TaskKind::Tagging, TaskKind::Connection, TaskKind::Insight]
                .into_iter()
                .collect(),
            cost_per_1k_tokens: 0.0,
            max_retries: 2,
            timeout_ms: 120_000,
            kind: ProviderKind::Ollama,
            model: "llama3.1:8b".to_string(),
            base_url: "http://localhost:11434".to_string(),
            api_key_env: None,
        },
        ProviderProfile {
            name: "anthropic-haiku".to_string(),
            is_local: false,
            capability_tags: [TaskKind::Tagging].into_iter().collect(),
            cost_per_1k_tokens: 0.001,
            max_retries: 3,
            timeout_ms: 30_000,
            kind: ProviderKind::Anthropic,
            model: "claude-3-5-haiku-latest".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            api_key_env: Some("ANTHROPIC_API_KEY".to_string()),
        },
        ProviderProfile {
            name: "anthropic-sonnet".to_string(),
            is_local: false,
            capability_tags: [TaskKind::Connection, TaskKind::Insight]
                .into_iter()
                .collect(),
            cost_per_1k_tokens: 0.009,
            max_retries: 3,
            timeout_ms: 60_000,
            kind: ProviderKind::Anthropic,
            model: "claude-sonnet-4-5".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            api_key_env: Some("ANTHROPIC_API_KEY".to_string()),
        },
    ];
    let defaults = [
        (TaskKind::Tagging, "anthropic-haiku".to_string()),
        (TaskKind::Connection, "anthropic-sonnet".to_string()),
        (TaskKind::Insight, "anthropic-sonnet".to_string()),
    ]
    .into_iter()
    .collect();
    (profiles, defaults)
}
