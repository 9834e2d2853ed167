//! Process configuration, assembled from environment variables with typed
//! defaults. Mirrors the teacher's `RunConfigSummary` / `build_config_summary`
//! pattern: one place that reads `std::env` and hands out a typed struct,
//! rather than scattering `env::var` calls through the orchestration code.

use std::time::Duration;

/// Recognized configuration, covering every row of the specification's
/// Configuration table.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Durable checkpoint backend URL/token; `None` falls back to in-memory.
    pub checkpoint_backend_url: Option<String>,
    /// Checkpoint TTL. Default 60 minutes.
    pub checkpoint_ttl: Duration,
    /// Whether reading a checkpoint refreshes its TTL. Default on.
    pub checkpoint_refresh_on_read: bool,
    /// Max checkpoint put attempts before raising `CheckpointPutFailed`. Default 3.
    pub max_checkpoint_attempts: u32,
    /// Linear retry backoff between checkpoint attempts. Default 100ms.
    pub retry_backoff: Duration,
    /// Per-plan execution timeout, overridable per call. Default 5 minutes.
    pub plan_timeout: Duration,
    /// Whether a failed required stage aborts the plan or is recorded and skipped.
    pub continue_on_error: bool,
    /// Referenceable-field compression threshold, in bytes. Default 4096.
    pub inline_size_threshold_bytes: usize,
    /// Minimum delta savings percent to prefer delta storage over a full snapshot.
    pub delta_savings_threshold_percent: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            checkpoint_backend_url: None,
            checkpoint_ttl: Duration::from_secs(60 * 60),
            checkpoint_refresh_on_read: true,
            max_checkpoint_attempts: 3,
            retry_backoff: Duration::from_millis(100),
            plan_timeout: Duration::from_secs(5 * 60),
            continue_on_error: false,
            inline_size_threshold_bytes: 4096,
            delta_savings_threshold_percent: 30.0,
        }
    }
}

impl OrchestratorConfig {
    /// Builds configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            checkpoint_backend_url: std::env::var("ORCH_CHECKPOINT_BACKEND_URL").ok(),
            checkpoint_ttl: std::env::var("ORCH_CHECKPOINT_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(|m| Duration::from_secs(m * 60))
                .unwrap_or(defaults.checkpoint_ttl),
            checkpoint_refresh_on_read: std::env::var("ORCH_CHECKPOINT_REFRESH_ON_READ")
                .ok()
                .and_then(|v| v.parse::<bool>().ok())
                .unwrap_or(defaults.checkpoint_refresh_on_read),
            max_checkpoint_attempts: std::env::var("ORCH_MAX_CHECKPOINT_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(defaults.max_checkpoint_attempts),
            retry_backoff: std::env::var("ORCH_RETRY_BACKOFF_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_backoff),
            plan_timeout: std::env::var("ORCH_PLAN_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.plan_timeout),
            continue_on_error: std::env::var("ORCH_CONTINUE_ON_ERROR")
                .ok()
                .and_then(|v| v.parse::<bool>().ok())
                .unwrap_or(defaults.continue_on_error),
            inline_size_threshold_bytes: std::env::var("ORCH_INLINE_SIZE_THRESHOLD_BYTES")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(defaults.inline_size_threshold_bytes),
            delta_savings_threshold_percent: std::env::var("ORCH_DELTA_SAVINGS_THRESHOLD_PERCENT")
                .ok()
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(defaults.delta_savings_threshold_percent),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_defaults() {
        let c = OrchestratorConfig::default();
        assert_eq!(c.checkpoint_ttl, Duration::from_secs(3600));
        assert!(c.checkpoint_refresh_on_read);
        assert_eq!(c.max_checkpoint_attempts, 3);
        assert_eq!(c.retry_backoff, Duration::from_millis(100));
        assert!(!c.continue_on_error);
        assert_eq!(c.inline_size_threshold_bytes, 4096);
    }

    #[test]
    fn from_env_falls_back_to_defaults_when_unset() {
        std::env::remove_var("ORCH_CHECKPOINT_TTL_MINUTES");
        let c = OrchestratorConfig::from_env();
        assert_eq!(c.checkpoint_ttl, Duration::from_secs(3600));
    }
}
