//! Engine configuration.
//!
//! Loaded from a TOML file (`fancast.toml`, overridable with `FC_CONFIG`).
//! Every field has a default so an empty file is a valid configuration; the
//! defaults are the recommended production values.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::ChannelThrottle;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub rate: RateConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub membership: MembershipConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TransportConfig {
    /// Platform API id. Required for a real transport; the in-memory
    /// transport ignores it.
    #[serde(default)]
    pub api_id: u32,
    /// Platform API hash. Redacted from `config show` output.
    #[serde(default)]
    pub api_hash: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Storage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path. `":memory:"` is accepted for tests.
    #[serde(default = "d_db_path")]
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { path: d_db_path() }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rate limits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateConfig {
    #[serde(default)]
    pub global: GlobalRateConfig,
    #[serde(default)]
    pub session: SessionRateConfig,
    #[serde(default)]
    pub recipient: RecipientRateConfig,
    /// Default per-channel pacing; individual channels may carry overrides.
    #[serde(default = "d_channel_throttle")]
    pub channel: ChannelThrottle,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            global: GlobalRateConfig::default(),
            session: SessionRateConfig::default(),
            recipient: RecipientRateConfig::default(),
            channel: d_channel_throttle(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalRateConfig {
    /// Token bucket capacity shared by every session.
    #[serde(default = "d_30")]
    pub capacity: u32,
    /// Tokens restored per minute.
    #[serde(default = "d_1200")]
    pub refill_per_minute: u32,
}

impl Default for GlobalRateConfig {
    fn default() -> Self {
        Self {
            capacity: 30,
            refill_per_minute: 1200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRateConfig {
    /// Sends permitted per session per minute (bucket refill; capacity is
    /// one minute's worth).
    #[serde(default = "d_60")]
    pub tokens_per_minute: u32,
}

impl Default for SessionRateConfig {
    fn default() -> Self {
        Self {
            tokens_per_minute: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientRateConfig {
    /// Minimum gap between two sends addressed to the same recipient.
    #[serde(default = "d_1000")]
    pub min_gap_ms: u64,
}

impl Default for RecipientRateConfig {
    fn default() -> Self {
        Self { min_gap_ms: 1000 }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatch / queue / retry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Recipients per fan-out chunk.
    #[serde(default = "d_10")]
    pub chunk_size: usize,
    /// Pause between chunks, letting governor back-pressure surface.
    #[serde(default = "d_2000")]
    pub inter_chunk_delay_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: 10,
            inter_chunk_delay_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Lower bound of the uniform inter-task delay on each session queue.
    #[serde(default = "d_2000")]
    pub min_inter_task_delay_ms: u64,
    /// Upper bound of the uniform inter-task delay.
    #[serde(default = "d_5000")]
    pub max_inter_task_delay_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            min_inter_task_delay_ms: 2000,
            max_inter_task_delay_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "d_3")]
    pub max_attempts: u32,
    #[serde(default = "d_1000")]
    pub base_delay_ms: u64,
    #[serde(default = "d_30000")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Retention / cleanup / membership / supervisor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Forwarded copies older than this are revoked by the scheduled sweep.
    #[serde(default = "d_24")]
    pub message_age_hours: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            message_age_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    #[serde(default = "d_1")]
    pub interval_hours: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self { interval_hours: 1 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipConfig {
    #[serde(default = "d_2")]
    pub sync_interval_minutes: u64,
    /// Participant enumeration cap per channel.
    #[serde(default = "d_1000u")]
    pub max_participants: usize,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            sync_interval_minutes: 2,
            max_participants: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "d_60u")]
    pub resume_check_interval_secs: u64,
    /// Quarantine length applied on spam warnings (flood waits use the
    /// platform-provided seconds instead).
    #[serde(default = "d_30u")]
    pub spam_backoff_minutes: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            resume_check_interval_secs: 60,
            spam_backoff_minutes: 30,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Admin server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    /// Environment variable holding the admin API bearer token. When the
    /// variable is unset the API runs unauthenticated (dev mode).
    #[serde(default = "d_token_env")]
    pub api_token_env: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            api_token_env: d_token_env(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
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
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        let mut error = |field: &str, message: String| {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: field.into(),
                message,
            });
        };

        if self.server.port == 0 {
            error("server.port", "port must be greater than 0".into());
        }
        if self.server.host.is_empty() {
            error("server.host", "host must not be empty".into());
        }
        if self.storage.path.is_empty() {
            error("storage.path", "database path must not be empty".into());
        }
        if self.rate.global.capacity == 0 {
            error("rate.global.capacity", "capacity must be at least 1".into());
        }
        if self.rate.global.refill_per_minute == 0 {
            error(
                "rate.global.refill_per_minute",
                "refill must be at least 1 token per minute".into(),
            );
        }
        if self.rate.session.tokens_per_minute == 0 {
            error(
                "rate.session.tokens_per_minute",
                "sessions need at least 1 token per minute".into(),
            );
        }
        if self.rate.channel.min_delay_ms > self.rate.channel.max_delay_ms {
            error(
                "rate.channel",
                format!(
                    "min_delay_ms ({}) exceeds max_delay_ms ({})",
                    self.rate.channel.min_delay_ms, self.rate.channel.max_delay_ms
                ),
            );
        }
        if self.dispatch.chunk_size == 0 {
            error("dispatch.chunk_size", "chunk size must be at least 1".into());
        }
        if self.queue.min_inter_task_delay_ms > self.queue.max_inter_task_delay_ms {
            error(
                "queue",
                format!(
                    "min_inter_task_delay_ms ({}) exceeds max_inter_task_delay_ms ({})",
                    self.queue.min_inter_task_delay_ms, self.queue.max_inter_task_delay_ms
                ),
            );
        }
        if self.retry.max_attempts == 0 {
            error("retry.max_attempts", "at least one attempt is required".into());
        }
        if self.retention.message_age_hours == 0 {
            error(
                "retention.message_age_hours",
                "retention window must be at least one hour".into(),
            );
        }
        if self.membership.max_participants == 0 {
            error(
                "membership.max_participants",
                "participant cap must be at least 1".into(),
            );
        }

        // A missing API hash is fine for tests but worth flagging.
        if self.transport.api_hash.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "transport.api_hash".into(),
                message: "no platform API hash configured — only the in-memory transport will work"
                    .into(),
            });
        }

        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Serde default helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn d_db_path() -> String {
    "fancast.db".into()
}
fn d_channel_throttle() -> ChannelThrottle {
    ChannelThrottle {
        base_delay_ms: 1000,
        per_member_delay_ms: 10,
        min_delay_ms: 500,
        max_delay_ms: 10_000,
    }
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_port() -> u16 {
    3220
}
fn d_token_env() -> String {
    "FC_API_TOKEN".into()
}
fn d_1() -> u64 {
    1
}
fn d_2() -> u64 {
    2
}
fn d_3() -> u32 {
    3
}
fn d_10() -> usize {
    10
}
fn d_24() -> u64 {
    24
}
fn d_30() -> u32 {
    30
}
fn d_30u() -> u64 {
    30
}
fn d_60() -> u32 {
    60
}
fn d_60u() -> u64 {
    60
}
fn d_1000() -> u64 {
    1000
}
fn d_1000u() -> usize {
    1000
}
fn d_1200() -> u32 {
    1200
}
fn d_2000() -> u64 {
    2000
}
fn d_5000() -> u64 {
    5000
}
fn d_30000() -> u64 {
    30_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_is_a_valid_config() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.dispatch.chunk_size, 10);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retention.message_age_hours, 24);
        assert_eq!(config.cleanup.interval_hours, 1);
        assert_eq!(config.membership.sync_interval_minutes, 2);
        assert_eq!(config.supervisor.resume_check_interval_secs, 60);
        assert_eq!(config.queue.min_inter_task_delay_ms, 2000);
        assert_eq!(config.queue.max_inter_task_delay_ms, 5000);

        // Only warnings (missing api_hash), no hard errors.
        let issues = config.validate();
        assert!(issues
            .iter()
            .all(|i| i.severity == ConfigSeverity::Warning));
    }

    #[test]
    fn sections_override_defaults() {
        let raw = r#"
            [dispatch]
            chunk_size = 25

            [rate.global]
            capacity = 5
            refill_per_minute = 10

            [supervisor]
            resume_check_interval_secs = 5
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.dispatch.chunk_size, 25);
        assert_eq!(config.rate.global.capacity, 5);
        assert_eq!(config.supervisor.resume_check_interval_secs, 5);
        // Untouched sections keep defaults.
        assert_eq!(config.dispatch.inter_chunk_delay_ms, 2000);
    }

    #[test]
    fn validation_flags_inverted_bounds() {
        let raw = r#"
            [queue]
            min_inter_task_delay_ms = 9000
            max_inter_task_delay_ms = 1000
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        let issues = config.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error && i.field == "queue"));
    }

    #[test]
    fn validation_rejects_zero_chunk() {
        let raw = "[dispatch]\nchunk_size = 0\n";
        let config: Config = toml::from_str(raw).unwrap();
        assert!(config
            .validate()
            .iter()
            .any(|i| i.field == "dispatch.chunk_size"));
    }
}
