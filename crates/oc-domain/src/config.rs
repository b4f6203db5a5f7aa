//! Orchestrator configuration: server, storage, scheduler, bus, and auth
//! settings, loaded from TOML with `serde` defaults and validated before
//! the gateway binds a socket.

use std::fmt;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default)]
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: d_port(), host: d_host(), cors: CorsConfig::default() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Origins allowed for CORS. `["*"]` is permissive and flagged by
    /// `validate()` as a warning.
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self { allowed_origins: d_cors_origins() }
    }
}

fn d_port() -> u16 {
    8089
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_cors_origins() -> Vec<String> {
    vec!["http://localhost:*".into(), "http://127.0.0.1:*".into()]
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Storage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where the event log lives. `:memory:` selects the in-process store;
/// anything else is a directory path for the file-backed store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "d_db_path")]
    pub db_path: String,
    /// How often the file-backed store flushes its index to disk, absent
    /// a finality event forcing an immediate flush.
    #[serde(default = "d_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { db_path: d_db_path(), flush_interval_ms: d_flush_interval_ms() }
    }
}

impl StorageConfig {
    pub fn is_memory(&self) -> bool {
        self.db_path == ":memory:"
    }
}

fn d_db_path() -> String {
    ":memory:".into()
}
fn d_flush_interval_ms() -> u64 {
    5_000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scheduler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerPolicyKind {
    /// Strict round-robin alternation among non-user agents.
    Default,
    /// Agents race to claim the next turn; first claim wins.
    Competition,
}

impl Default for SchedulerPolicyKind {
    fn default() -> Self {
        SchedulerPolicyKind::Default
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub policy: SchedulerPolicyKind,
    #[serde(default = "d_claim_ttl_ms")]
    pub claim_ttl_ms: u64,
    #[serde(default = "d_max_retries")]
    pub max_retries: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            policy: SchedulerPolicyKind::default(),
            claim_ttl_ms: d_claim_ttl_ms(),
            max_retries: d_max_retries(),
        }
    }
}

fn d_claim_ttl_ms() -> u64 {
    10_000
}
fn d_max_retries() -> u32 {
    3
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Per-subscriber bounded queue depth; a slow subscriber exceeding this
    /// is dropped and must resubscribe with `sinceSeq`.
    #[serde(default = "d_queue_depth")]
    pub subscriber_queue_depth: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { subscriber_queue_depth: d_queue_depth() }
    }
}

fn d_queue_depth() -> usize {
    1024
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Auth
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Environment variable holding the bearer token required for write
    /// methods. If unset, write methods are rejected with `Unauthorized`.
    #[serde(default = "d_token_env")]
    pub token_env: String,
    /// Allow `subscribe`/`getConversation`/`getAllConversations`/
    /// `createConversation` without a bearer token.
    #[serde(default = "d_allow_anonymous_reads")]
    pub allow_anonymous_reads: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { token_env: d_token_env(), allow_anonymous_reads: d_allow_anonymous_reads() }
    }
}

fn d_token_env() -> String {
    "OC_API_TOKEN".into()
}
fn d_allow_anonymous_reads() -> bool {
    true
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.server.port == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }

        if self.server.host.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }

        if self.storage.db_path.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "storage.db_path".into(),
                message: "db_path must not be empty (use \":memory:\" for in-process storage)".into(),
            });
        }

        if self.scheduler.claim_ttl_ms == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "scheduler.claim_ttl_ms".into(),
                message: "claim_ttl_ms must be greater than 0".into(),
            });
        }

        if self.bus.subscriber_queue_depth == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "bus.subscriber_queue_depth".into(),
                message: "subscriber_queue_depth must be greater than 0".into(),
            });
        }

        if self.server.cors.allowed_origins.len() == 1 && self.server.cors.allowed_origins[0] == "*" {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "server.cors.allowed_origins".into(),
                message: "wildcard \"*\" allows all origins (not recommended for production)".into(),
            });
        }

        if self.auth.token_env.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "auth.token_env".into(),
                message: "no token_env configured — write methods will always be unauthorized".into(),
            });
        }

        issues
    }

    pub fn has_errors(issues: &[ConfigIssue]) -> bool {
        issues.iter().any(|i| i.severity == ConfigSeverity::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_errors() {
        let issues = Config::default().validate();
        assert!(!Config::has_errors(&issues), "unexpected errors: {issues:?}");
    }

    #[test]
    fn zero_port_is_error() {
        let mut cfg = Config::default();
        cfg.server.port = 0;
        let issues = cfg.validate();
        assert!(issues.iter().any(|i| i.field == "server.port" && i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn empty_db_path_is_error() {
        let mut cfg = Config::default();
        cfg.storage.db_path = String::new();
        let issues = cfg.validate();
        assert!(issues.iter().any(|i| i.field == "storage.db_path"));
    }

    #[test]
    fn cors_wildcard_is_warning_not_error() {
        let mut cfg = Config::default();
        cfg.server.cors.allowed_origins = vec!["*".into()];
        let issues = cfg.validate();
        let issue = issues.iter().find(|i| i.field == "server.cors.allowed_origins").unwrap();
        assert_eq!(issue.severity, ConfigSeverity::Warning);
        assert!(!Config::has_errors(&issues));
    }

    #[test]
    fn storage_is_memory_detection() {
        assert!(StorageConfig::default().is_memory());
        let file_backed = StorageConfig { db_path: "/var/lib/oc/data".into(), ..StorageConfig::default() };
        assert!(!file_backed.is_memory());
    }

    #[test]
    fn issue_display_format() {
        let err = ConfigIssue {
            severity: ConfigSeverity::Error,
            field: "server.port".into(),
            message: "port must be greater than 0".into(),
        };
        assert_eq!(format!("{err}"), "[ERROR] server.port: port must be greater than 0");
    }
}
