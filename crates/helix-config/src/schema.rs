//! Root configuration schema for the control plane.

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HelixConfig {
    pub workers: WorkersConfig,
    pub sandbox: SandboxConfig,
    pub llm: LlmConfig,
    pub vision: VisionConfig,
    pub confirm: ConfirmConfig,
    pub consensus: ConsensusConfig,
}

/// Worker pool / SSH dialing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    /// Path to the known-hosts file backing the host-key store.
    pub known_hosts_path: String,
    /// Reject unknown hosts once the store is non-empty.
    pub strict_host_checking: bool,
    /// SSH dial timeout, seconds.
    pub dial_timeout_secs: u64,
    /// Health-check interval, seconds.
    pub health_check_interval_secs: u64,
    /// Health-check per-dial timeout, seconds.
    pub health_check_timeout_secs: u64,
    /// Per-worker sandbox cache TTL, seconds.
    pub sandbox_cache_ttl_secs: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            known_hosts_path: ".helix/known_hosts".to_string(),
            strict_host_checking: true,
            dial_timeout_secs: 30,
            health_check_interval_secs: 30,
            health_check_timeout_secs: 5,
            sandbox_cache_ttl_secs: 3600,
        }
    }
}

/// Sandbox lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Seconds a sandbox may sit idle before the eviction loop reclaims it.
    pub ttl_secs: u64,
    /// Maximum processes per sandbox.
    pub max_processes: u32,
    /// Per-command execution timeout, seconds (`ulimit -t`).
    pub command_timeout_secs: u64,
    /// Maximum output file size, in 512-byte blocks (`ulimit -f`'s own
    /// unit — passed straight through, not converted from megabytes).
    pub file_size_limit_blocks: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 24 * 3600,
            max_processes: 100,
            command_timeout_secs: 300,
            file_size_limit_blocks: 100,
        }
    }
}

/// LLM router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Per-request LLM call timeout, seconds.
    pub request_timeout_secs: u64,
    /// Time-to-first-token timeout for streaming requests, seconds.
    pub stream_first_token_timeout_secs: u64,
    /// Maximum retry attempts for retryable error kinds.
    pub max_retry_attempts: u32,
    /// Initial backoff delay, milliseconds.
    pub initial_backoff_ms: u64,
    /// Backoff growth factor.
    pub backoff_factor: f64,
    /// Backoff cap, milliseconds.
    pub max_backoff_ms: u64,
    /// Number of latency samples kept in the sliding window per model.
    pub latency_window_size: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 60,
            stream_first_token_timeout_secs: 120,
            max_retry_attempts: 3,
            initial_backoff_ms: 500,
            backoff_factor: 2.0,
            max_backoff_ms: 20_000,
            latency_window_size: 256,
        }
    }
}

/// Vision switch manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    /// Default switch mode: "once", "session", or "persist".
    pub default_mode: String,
    /// Preferred vision models, in priority order.
    pub preferred_models: Vec<String>,
    /// Fallback vision model used if no preferred model is available.
    pub fallback_model: Option<String>,
    /// Detection methods to enable: "attachment", "data_uri", "url", "magic_bytes".
    pub detection_methods: Vec<String>,
    /// Maximum switch events retained in the bounded history.
    pub history_capacity: usize,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            default_mode: "session".to_string(),
            preferred_models: Vec::new(),
            fallback_model: None,
            detection_methods: vec![
                "attachment".to_string(),
                "data_uri".to_string(),
                "url".to_string(),
            ],
            history_capacity: 64,
        }
    }
}

/// Confirmation pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmConfig {
    /// Master switch; when false, every request is allowed immediately.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Default audit log path (JSON Lines).
    pub audit_log_path: String,
    /// Seconds to wait for a user decision before treating it as denied.
    pub prompt_timeout_secs: u64,
    /// Force batch-mode short-circuiting regardless of per-request flag.
    pub batch_mode: bool,
}

impl Default for ConfirmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            audit_log_path: ".helix/audit/confirmations.jsonl".to_string(),
            prompt_timeout_secs: 120,
            batch_mode: false,
        }
    }
}

/// Consensus module configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Base election timeout, milliseconds (actual timeout is randomized
    /// within [base, 2*base) to avoid split votes).
    pub election_timeout_ms: u64,
    /// Heartbeat interval for the leader, milliseconds.
    pub heartbeat_interval_ms: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            election_timeout_ms: 500,
            heartbeat_interval_ms: 100,
        }
    }
}
