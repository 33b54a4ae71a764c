//! Service configuration types for Stratagem.
//!
//! `ServiceConfig` represents the top-level `config.toml` that controls
//! the HTTP listener, upstream endpoints, rate limiting, and cache
//! lifetimes.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the Stratagem service.
///
/// Loaded from `~/.stratagem/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub authz: AuthzConfig,
    pub orchestrator: OrchestratorConfig,
    pub rate_limit: RateLimitConfig,
    pub cache: CacheConfig,
    /// Override for the SQLite database file. Defaults to
    /// `<data dir>/stratagem.db` when unset.
    pub database_path: Option<String>,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8320
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Authorization RPC endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthzConfig {
    #[serde(default = "default_authz_url")]
    pub base_url: String,
    #[serde(default = "default_authz_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_authz_url() -> String {
    "http://127.0.0.1:8330".to_string()
}

fn default_authz_timeout_ms() -> u64 {
    3_000
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            base_url: default_authz_url(),
            timeout_ms: default_authz_timeout_ms(),
        }
    }
}

/// Agent orchestrator endpoint settings.
///
/// Only the connect timeout is bounded; a turn stream may legitimately
/// run for minutes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_orchestrator_url")]
    pub base_url: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_orchestrator_url() -> String {
    "http://127.0.0.1:8340".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            base_url: default_orchestrator_url(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

/// Per-user stream admission limits.
///
/// Disabled by default; deployments in front of a shared orchestrator
/// turn it on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_max_requests() -> u32 {
    60
}

fn default_window_secs() -> u64 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
        }
    }
}

/// Lifetimes for the per-session context caches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Ontology context entries go stale after this many seconds.
    #[serde(default = "default_ontology_ttl_secs")]
    pub ontology_ttl_secs: u64,
    /// The loader's own short-lived cross-session cache.
    #[serde(default = "default_loader_ttl_secs")]
    pub loader_ttl_secs: u64,
}

fn default_ontology_ttl_secs() -> u64 {
    300
}

fn default_loader_ttl_secs() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ontology_ttl_secs: default_ontology_ttl_secs(),
            loader_ttl_secs: default_loader_ttl_secs(),
        }
    }
}
