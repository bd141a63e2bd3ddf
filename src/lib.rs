//! Graph Discovery
//!
//! Connection discovery and privacy-aware LLM orchestration for a personal
//! knowledge graph:
//! - Neo4j graph store for nodes, discovered edges and insight digests
//! - Privacy classification that keeps sensitive content on local models
//! - Budgeted discovery runs that propose typed, scored edges between nodes
//! - Periodic insight digests, LLM tag suggestions and a cost ledger

pub mod api;
pub mod discovery;
pub mod ingest;
pub mod insights;
pub mod jobs;
pub mod ledger;
pub mod llm;
pub mod neo4j;
pub mod privacy;
pub mod tagging;

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use discovery::{Budget, CandidateConfig, DiscoveryConfig};
use jobs::{DiscoveryDebouncer, DiscoveryRunner, DiscoveryService, ScheduleConfig, Scheduler};
use ledger::CostLedger;
use llm::{BackoffPolicy, Invoker, ProviderProfile, ProviderRegistry, TaskKind};
use neo4j::GraphStore;
use privacy::{PrivacyClassifier, DEFAULT_SENSITIVE_TAGS};

// ============================================================================
// YAML config structs (deserialization targets)
// ============================================================================

/// Top-level YAML configuration file structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: ServerYamlConfig,
    pub neo4j: Neo4jYamlConfig,
    pub privacy: PrivacyYamlConfig,
    pub llm: LlmYamlConfig,
    pub discovery: DiscoveryYamlConfig,
    pub ledger: LedgerYamlConfig,
}

/// Server configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerYamlConfig {
    pub port: u16,
}

impl Default for ServerYamlConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

/// Neo4j configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Neo4jYamlConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
}

impl Default for Neo4jYamlConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".into(),
            user: "neo4j".into(),
            password: "graph-discovery".into(),
        }
    }
}

/// Privacy configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PrivacyYamlConfig {
    pub sensitive_tags: Vec<String>,
}

impl Default for PrivacyYamlConfig {
    fn default() -> Self {
        Self {
            sensitive_tags: DEFAULT_SENSITIVE_TAGS.iter().map(|t| t.to_string()).collect(),
        }
    }
}

/// LLM configuration section. An empty provider list means the built-in
/// profiles (local Ollama plus remote Anthropic models).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmYamlConfig {
    pub providers: Vec<ProviderProfile>,
    /// Preferred provider per task
    pub defaults: HashMap<TaskKind, String>,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for LlmYamlConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            defaults: HashMap::new(),
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
        }
    }
}

/// Discovery configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoveryYamlConfig {
    pub concurrency: usize,
    pub max_candidates: usize,
    pub top_k: usize,
    pub acceptance_threshold: f64,
    pub cooldown_hours: i64,
    /// Periodic discovery interval
    pub interval_secs: u64,
    /// Quiet period before an ingestion-triggered run
    pub debounce_ms: u64,
    pub budget: Budget,
}

impl Default for DiscoveryYamlConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_candidates: 50,
            top_k: 10,
            acceptance_threshold: 0.5,
            cooldown_hours: 24,
            interval_secs: 3600,
            debounce_ms: 5000,
            budget: Budget::default(),
        }
    }
}

/// Cost ledger configuration section
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LedgerYamlConfig {
    /// JSON-lines file; in-memory only when unset
    pub path: Option<String>,
}

// ============================================================================
// Runtime config (what the application actually uses)
// ============================================================================

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    pub server_port: u16,
    pub sensitive_tags: Vec<String>,
    pub providers: Vec<ProviderProfile>,
    pub task_defaults: HashMap<TaskKind, String>,
    pub backoff: BackoffPolicy,
    pub discovery: DiscoveryConfig,
    pub schedule: ScheduleConfig,
    pub debounce_ms: u64,
    pub budget: Budget,
    pub ledger_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables only.
    /// Equivalent to from_yaml_and_env(None).
    pub fn from_env() -> Result<Self> {
        Self::from_yaml_and_env(None)
    }

    /// Load configuration from an optional YAML file, then override with env vars.
    ///
    /// Priority: env var > YAML > default
    ///
    /// If `yaml_path` is None, tries "config.yaml" in CWD. If the file doesn't
    /// exist, falls back to pure env var / defaults.
    pub fn from_yaml_and_env(yaml_path: Option<&Path>) -> Result<Self> {
        let yaml = Self::load_yaml(yaml_path);
        Self::resolve(yaml, |key| std::env::var(key).ok())
    }

    /// Build the runtime config from parsed YAML and an environment lookup
    pub fn resolve(yaml: YamlConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let server_port = match env("SERVER_PORT") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("Invalid SERVER_PORT: {}", raw))?,
            None => yaml.server.port,
        };
        let concurrency = match env("DISCOVERY_CONCURRENCY") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("Invalid DISCOVERY_CONCURRENCY: {}", raw))?,
            None => yaml.discovery.concurrency,
        };
        let sensitive_tags = match env("SENSITIVE_TAGS") {
            Some(raw) => raw
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            None => yaml.privacy.sensitive_tags,
        };

        let (providers, task_defaults) = if yaml.llm.providers.is_empty() {
            let (profiles, defaults) = llm::profiles::default_profiles();
            let mut merged = defaults;
            merged.extend(yaml.llm.defaults);
            (profiles, merged)
        } else {
            (yaml.llm.providers, yaml.llm.defaults)
        };
        let mut names = HashSet::new();
        for profile in &providers {
            if !names.insert(profile.name.as_str()) {
                anyhow::bail!("Provider '{}' is configured more than once", profile.name);
            }
        }
        for (task, name) in &task_defaults {
            if !providers.iter().any(|p| &p.name == name) {
                anyhow::bail!("Default provider '{}' for task '{}' is not configured", name, task);
            }
        }

        let d = &yaml.discovery;
        if !(0.0..=1.0).contains(&d.acceptance_threshold) {
            anyhow::bail!(
                "discovery.acceptance_threshold must be within 0.0..=1.0, got {}",
                d.acceptance_threshold
            );
        }

        Ok(Self {
            neo4j_uri: env("NEO4J_URI").unwrap_or(yaml.neo4j.uri),
            neo4j_user: env("NEO4J_USER").unwrap_or(yaml.neo4j.user),
            neo4j_password: env("NEO4J_PASSWORD").unwrap_or(yaml.neo4j.password),
            server_port,
            sensitive_tags,
            providers,
            task_defaults,
            backoff: BackoffPolicy {
                base_delay: Duration::from_millis(yaml.llm.backoff_base_ms),
                max_delay: Duration::from_millis(yaml.llm.backoff_max_ms),
            },
            discovery: DiscoveryConfig {
                concurrency,
                max_candidates: d.max_candidates,
                acceptance_threshold: d.acceptance_threshold,
                candidates: CandidateConfig {
                    top_k: d.top_k,
                    cooldown: chrono::Duration::hours(d.cooldown_hours),
                },
            },
            schedule: ScheduleConfig {
                discovery_interval: Duration::from_secs(d.interval_secs.max(1)),
                ..ScheduleConfig::default()
            },
            debounce_ms: d.debounce_ms,
            budget: d.budget,
            ledger_path: env("LEDGER_PATH")
                .or(yaml.ledger.path)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
        })
    }

    /// Try to load and parse a YAML config file. Returns defaults on any failure.
    fn load_yaml(yaml_path: Option<&Path>) -> YamlConfig {
        let default_path = Path::new("config.yaml");
        let path = yaml_path.unwrap_or(default_path);

        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    YamlConfig::default()
                }
            },
            Err(_) => {
                tracing::debug!(
                    "No config file at {}, using env vars / defaults",
                    path.display()
                );
                YamlConfig::default()
            }
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn GraphStore>,
    pub service: DiscoveryService,
    pub ledger: Arc<CostLedger>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Create application state with all services initialized.
    ///
    /// `in_memory` swaps Neo4j for the in-process graph store.
    pub async fn new(config: Config, in_memory: bool) -> Result<Self> {
        let store: Arc<dyn GraphStore> = if in_memory {
            tracing::warn!("Using in-memory graph store; nothing will be persisted");
            Arc::new(neo4j::MockGraphStore::new())
        } else {
            Arc::new(
                neo4j::Neo4jClient::new(
                    &config.neo4j_uri,
                    &config.neo4j_user,
                    &config.neo4j_password,
                )
                .await?,
            )
        };

        let ledger = Arc::new(match &config.ledger_path {
            Some(path) => CostLedger::open(path).await?,
            None => CostLedger::new(),
        });

        let registry = Arc::new(ProviderRegistry::new(
            config.providers.clone(),
            config.task_defaults.clone(),
        )?);
        let invoker = Arc::new(Invoker::from_registry(
            &registry,
            ledger.clone(),
            config.backoff,
        )?);
        let classifier = Arc::new(PrivacyClassifier::new(&config.sensitive_tags));

        let service = DiscoveryService::new(
            store.clone(),
            registry,
            invoker,
            classifier,
            config.discovery,
            config.budget,
        );
        let runner: Arc<dyn DiscoveryRunner> = Arc::new(service.clone());
        let debouncer = Arc::new(DiscoveryDebouncer::new(
            runner,
            config.debounce_ms,
            config.budget,
        ));
        let service = service.with_debouncer(debouncer);

        Ok(Self {
            store,
            service,
            ledger,
            config: Arc::new(config),
        })
    }
}

/// Serve the HTTP API with the scheduler running until ctrl-c
pub async fn start_server(config: Config, in_memory: bool) -> Result<()> {
    let port = config.server_port;
    let state = AppState::new(config, in_memory).await?;

    let cancel = CancellationToken::new();
    let scheduler = Scheduler::new(
        state.service.clone(),
        state.config.schedule,
        state.config.budget,
    )
    .spawn(cancel.clone());

    let app = api::create_router(Arc::new(api::ServerState {
        service: state.service.clone(),
    }));
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutting down");
            shutdown.cancel();
        })
        .await
        .context("Server error")?;

    cancel.cancel();
    if let Err(e) = scheduler.await {
        tracing::warn!("Scheduler task ended abnormally: {}", e);
    }
    let flushed = state.ledger.flush().await?;
    tracing::info!("Flushed {} invocation records", flushed);
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod config_tests {
    use super::*;
    use std::io::Write;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_yaml_config_loading() {
        let yaml = r#"
server:
  port: 9090

neo4j:
  uri: bolt://db:7687
  user: admin
  password: secret

privacy:
  sensitive_tags: [therapy, salary]

llm:
  providers:
    - name: local
      is_local: true
      kind: ollama
      model: qwen2.5:7b
      base_url: http://gpu-box:11434
      capability_tags: [tagging, connection, insight]
    - name: remote
      kind: openai_compatible
      model: gpt-4o-mini
      base_url: https://api.openai.com
      api_key_env: OPENAI_API_KEY
      cost_per_1k_tokens: 0.0006
      capability_tags: [connection]
  defaults:
    connection: remote

discovery:
  concurrency: 2
  acceptance_threshold: 0.7
  budget:
    max_invocations: 20
    max_cost: 0.25
    max_duration: 120
"#;

        let yaml: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        let config = Config::resolve(yaml, no_env).unwrap();
        assert_eq!(config.server_port, 9090);
        assert_eq!(config.neo4j_uri, "bolt://db:7687");
        assert_eq!(config.sensitive_tags, vec!["therapy", "salary"]);
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[1].max_retries, 2);
        assert_eq!(
            config.task_defaults.get(&TaskKind::Connection).map(String::as_str),
            Some("remote")
        );
        assert_eq!(config.discovery.concurrency, 2);
        assert_eq!(config.discovery.acceptance_threshold, 0.7);
        assert_eq!(config.discovery.max_candidates, 50);
        assert_eq!(config.budget.max_invocations, 20);
        assert_eq!(config.budget.max_duration, Some(Duration::from_secs(120)));
        assert!(config.ledger_path.is_none());
    }

    #[test]
    fn test_yaml_defaults() {
        let config = Config::resolve(YamlConfig::default(), no_env).unwrap();
        assert_eq!(config.server_port, 8080);
        assert_eq!(config.neo4j_uri, "bolt://localhost:7687");
        assert_eq!(config.discovery, DiscoveryConfig::default());
        assert_eq!(config.budget, Budget::default());
        assert!(config.providers.iter().any(|p| p.is_local));
        assert_eq!(
            config.task_defaults.get(&TaskKind::Tagging).map(String::as_str),
            Some("anthropic-haiku")
        );
        assert!(config.sensitive_tags.contains(&"therapy".to_string()));
    }

    #[test]
    fn test_env_overrides_yaml() {
        let env: HashMap<&str, &str> = [
            ("NEO4J_URI", "bolt://env:7687"),
            ("SERVER_PORT", "7000"),
            ("SENSITIVE_TAGS", "health, legal ,"),
            ("LEDGER_PATH", "/var/lib/ledger.jsonl"),
            ("DISCOVERY_CONCURRENCY", "8"),
        ]
        .into_iter()
        .collect();
        let config = Config::resolve(YamlConfig::default(), |k| {
            env.get(k).map(|v| v.to_string())
        })
        .unwrap();
        assert_eq!(config.neo4j_uri, "bolt://env:7687");
        assert_eq!(config.server_port, 7000);
        assert_eq!(config.sensitive_tags, vec!["health", "legal"]);
        assert_eq!(
            config.ledger_path,
            Some(PathBuf::from("/var/lib/ledger.jsonl"))
        );
        assert_eq!(config.discovery.concurrency, 8);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = Config::resolve(YamlConfig::default(), |k| {
            (k == "SERVER_PORT").then(|| "not-a-port".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("SERVER_PORT"));

        let yaml: YamlConfig =
            serde_yaml::from_str("llm:\n  defaults:\n    insight: missing\n").unwrap();
        assert!(Config::resolve(yaml, no_env).is_err());

        let yaml: YamlConfig =
            serde_yaml::from_str("discovery:\n  acceptance_threshold: 1.5\n").unwrap();
        assert!(Config::resolve(yaml, no_env).is_err());
    }

    #[test]
    fn test_duplicate_provider_names_are_rejected() {
        let yaml = r#"
llm:
  providers:
    - name: x
      is_local: true
      kind: ollama
      model: m
      capability_tags: [connection]
    - name: x
      kind: openai_compatible
      model: m
      capability_tags: [connection]
"#;
        let yaml: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        let err = Config::resolve(yaml, no_env).unwrap_err();
        assert!(err.to_string().contains("'x'"));
    }

    #[test]
    fn test_load_yaml_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "server:\n  port: 6100\nledger:\n  path: /tmp/costs.jsonl").unwrap();

        let yaml = Config::load_yaml(Some(file.path()));
        assert_eq!(yaml.server.port, 6100);
        assert_eq!(yaml.ledger.path.as_deref(), Some("/tmp/costs.jsonl"));

        let missing = Config::load_yaml(Some(Path::new("/nonexistent/config.yaml")));
        assert_eq!(missing.server.port, 8080);
    }

    #[tokio::test]
    async fn test_in_memory_app_state() {
        let config = Config::resolve(YamlConfig::default(), no_env).unwrap();
        let state = AppState::new(config, true).await.unwrap();
        assert!(state.store.health_check().await.unwrap());
        assert!(state.ledger.is_empty().await);
    }
}
