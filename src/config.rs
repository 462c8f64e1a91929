//! Configuration types for chandler-gateway.
//!
//! Config is loaded once at startup from a TOML file and validated before the
//! server opens its port. Every field has a default, so an empty file (or no
//! file at all) yields a working gateway pointed at the public upstream.
//!
//! # Example
//! ```toml
//! [gateway]
//! listen_addr = "0.0.0.0:8080"
//!
//! [upstream]
//! base_url = "https://api.chandler.bet"
//!
//! [upstream.chat]
//! max_retries = 1
//!
//! [conversations]
//! selection = "random"
//! page_size = 10
//! ```

use std::{collections::HashSet, net::SocketAddr, path::Path, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Env var naming the config file.
pub const CONFIG_ENV: &str = "CHANDLER_CONFIG";
/// Used when [`CONFIG_ENV`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/chandler-gateway/config.toml";

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub conversations: ConversationConfig,

    /// Static list served by `GET /v1/models`.
    #[serde(default = "defaults::models")]
    pub models: Vec<ModelEntry>,
}

impl Config {
    /// Load and validate the config file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let mut config: Self = toml::from_str(&content).context("parsing config TOML")?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config from the environment.
    ///
    /// An explicit `CHANDLER_CONFIG` must point at a readable file. Without it,
    /// the default path is tried and built-in defaults are used if it is absent.
    pub fn from_env() -> anyhow::Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) => {
                let path = Path::new(&path);
                Self::load(path)
                    .with_context(|| format!("failed to load config from {}", path.display()))
            }
            Err(_) => {
                let path = Path::new(DEFAULT_CONFIG_PATH);
                if path.exists() {
                    return Self::load(path)
                        .with_context(|| format!("failed to load config from {}", path.display()));
                }
                tracing::info!(path = DEFAULT_CONFIG_PATH, "no config file found, using defaults");
                let mut config = Self {
                    models: defaults::models(),
                    ..Self::default()
                };
                config.apply_env_overrides();
                config.validate()?;
                Ok(config)
            }
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Some(url) = std::env::var("CHANDLER_UPSTREAM_URL").ok().filter(|v| !v.is_empty()) {
            self.upstream.base_url = url;
        }
        if let Some(addr) = std::env::var("CHANDLER_LISTEN").ok().filter(|v| !v.is_empty()) {
            self.gateway.listen_addr = addr;
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        self.gateway.socket_addr()?;

        let base = self.upstream.base_url.as_str();
        anyhow::ensure!(
            base.starts_with("http://") || base.starts_with("https://"),
            "upstream base_url `{base}` must start with http:// or https://"
        );

        anyhow::ensure!(
            (1..=100).contains(&self.conversations.page_size),
            "conversations.page_size must be between 1 and 100, got {}",
            self.conversations.page_size
        );

        let mut seen = HashSet::new();
        for model in &self.models {
            anyhow::ensure!(!model.id.trim().is_empty(), "[[models]] entry with empty id");
            anyhow::ensure!(seen.insert(model.id.as_str()), "duplicate model id `{}`", model.id);
        }

        Ok(())
    }
}

/// Listener settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Address the client API binds to (default: `0.0.0.0:8080`).
    #[serde(default = "defaults::listen_addr")]
    pub listen_addr: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self { listen_addr: defaults::listen_addr() }
    }
}

impl GatewayConfig {
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listen_addr
            .parse()
            .with_context(|| format!("invalid gateway.listen_addr `{}`", self.listen_addr))
    }
}

/// Where and how to reach the upstream conversation API.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Scheme + host of the upstream; `/api/...` paths are appended.
    #[serde(default = "defaults::base_url")]
    pub base_url: String,

    /// Value sent as `web_url` in conversation and chat calls.
    /// Defaults to `base_url`.
    #[serde(default)]
    pub web_url: Option<String>,

    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Timeout for the non-streaming JSON calls, in milliseconds.
    #[serde(default = "defaults::timeout_ms")]
    pub timeout_ms: u64,

    /// Longest silence tolerated between two lines of a chat stream.
    #[serde(default = "defaults::stream_idle_timeout_ms")]
    pub stream_idle_timeout_ms: u64,

    #[serde(default)]
    pub chat: ChatKnobs,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::base_url(),
            web_url: None,
            user_agent: defaults::user_agent(),
            timeout_ms: defaults::timeout_ms(),
            stream_idle_timeout_ms: defaults::stream_idle_timeout_ms(),
            chat: ChatKnobs::default(),
        }
    }
}

impl UpstreamConfig {
    pub fn web_url(&self) -> &str {
        self.web_url.as_deref().unwrap_or(&self.base_url)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_idle_timeout_ms)
    }
}

/// Retry and timeout knobs forwarded on every chat turn.
///
/// The upstream honours these itself; the gateway never retries a turn.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct ChatKnobs {
    #[serde(default = "defaults::global_timeout")]
    pub global_timeout: i64,
    #[serde(default = "defaults::max_retries")]
    pub max_retries: i64,
    #[serde(default = "defaults::request_timeout")]
    pub request_timeout: i64,
}

impl Default for ChatKnobs {
    fn default() -> Self {
        Self {
            global_timeout: defaults::global_timeout(),
            max_retries: defaults::max_retries(),
            request_timeout: defaults::request_timeout(),
        }
    }
}

/// How an existing conversation is chosen to carry the next turn.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConversationSelection {
    /// Pick uniformly among the first page of conversations for the model.
    #[default]
    Random,
    /// Always continue the first conversation the upstream lists.
    Latest,
    /// Never continue; every request starts a new conversation.
    New,
}

impl std::fmt::Display for ConversationSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Random => "random",
            Self::Latest => "latest",
            Self::New => "new",
        })
    }
}

/// Conversation resolution settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConversationConfig {
    #[serde(default)]
    pub selection: ConversationSelection,

    /// Size of the conversation page requested from the upstream (default: 10).
    #[serde(default = "defaults::page_size")]
    pub page_size: i64,

    /// Deadline for the whole resolution step, in milliseconds.
    #[serde(default = "defaults::resolve_timeout_ms")]
    pub resolve_timeout_ms: u64,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            selection: ConversationSelection::default(),
            page_size: defaults::page_size(),
            resolve_timeout_ms: defaults::resolve_timeout_ms(),
        }
    }
}

impl ConversationConfig {
    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }
}

/// One entry of the static model list.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ModelEntry {
    pub id: String,
    #[serde(default = "defaults::owned_by")]
    pub owned_by: String,
    #[serde(default = "defaults::created")]
    pub created: i64,
}

mod defaults {
    use super::ModelEntry;

    pub fn listen_addr() -> String { "0.0.0.0:8080".into() }
    pub fn base_url() -> String { "https://api.chandler.bet".into() }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
         Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0"
            .into()
    }
    pub fn timeout_ms() -> u64 { 30_000 }
    pub fn stream_idle_timeout_ms() -> u64 { 120_000 }
    pub fn global_timeout() -> i64 { 100 }
    pub fn max_retries() -> i64 { 1 }
    pub fn request_timeout() -> i64 { 30 }
    pub fn page_size() -> i64 { 10 }
    pub fn resolve_timeout_ms() -> u64 { 30_000 }
    pub fn owned_by() -> String { "ChandlerAi".into() }
    pub fn created() -> i64 { 1_692_901_427 }

    pub fn models() -> Vec<ModelEntry> {
        ["gpt-3.5", "llama3-70b", "llama3-8b", "grok"]
            .into_iter()
            .map(|id| ModelEntry { id: id.into(), owned_by: owned_by(), created: created() })
            .collect()
    }
}
