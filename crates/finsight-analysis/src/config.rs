//! Analyzer client configuration.

use std::time::Duration;

use finsight_core::defaults;

/// Which analyzer call style the orchestrator uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalyzerMode {
    /// One long-lived request per analysis, bounded by the hard deadline.
    #[default]
    Sync,
    /// Submit a task, then poll `task_status` until terminal.
    Queued,
}

impl AnalyzerMode {
    /// Parse mode from string (case-insensitive).
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "sync" => Some(Self::Sync),
            "queued" | "async" => Some(Self::Queued),
            _ => None,
        }
    }
}

impl std::fmt::Display for AnalyzerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sync => write!(f, "sync"),
            Self::Queued => write!(f, "queued"),
        }
    }
}

/// Configuration for the analyzer HTTP client.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Analyzer service base URL.
    pub base_url: String,
    /// Call style.
    pub mode: AnalyzerMode,
    /// Hard deadline for a synchronous analyze call.
    pub analyze_timeout: Duration,
    /// Timeout for lightweight calls (submit, task status).
    pub short_timeout: Duration,
    /// Maximum retries per transient failure.
    pub max_retries: i32,
    /// Fixed backoff between retry attempts.
    pub retry_backoff: Duration,
    /// Poll interval while waiting on a queued task.
    pub task_poll_interval: Duration,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::ANALYZER_URL.to_string(),
            mode: AnalyzerMode::Sync,
            analyze_timeout: Duration::from_secs(defaults::ANALYZE_TIMEOUT_SECS),
            short_timeout: Duration::from_secs(defaults::ANALYZER_SHORT_TIMEOUT_SECS),
            max_retries: defaults::ANALYZE_MAX_RETRIES,
            retry_backoff: Duration::from_secs(defaults::ANALYZE_RETRY_BACKOFF_SECS),
            task_poll_interval: Duration::from_secs(defaults::TASK_POLL_INTERVAL_SECS),
        }
    }
}

impl AnalyzerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables with fallback to
    /// defaults. Invalid values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("ANALYZER_URL") {
            if !val.is_empty() {
                config.base_url = val;
            }
        }

        if let Ok(val) = std::env::var("ANALYZER_MODE") {
            if let Some(mode) = AnalyzerMode::from_str_loose(&val) {
                config.mode = mode;
            } else {
                tracing::warn!(value = %val, "Invalid ANALYZER_MODE, using default");
            }
        }

        if let Ok(val) = std::env::var("ANALYZER_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                config.analyze_timeout = Duration::from_secs(secs);
            } else {
                tracing::warn!(value = %val, "Invalid ANALYZER_TIMEOUT_SECS, using default");
            }
        }

        if let Ok(val) = std::env::var("ANALYZER_MAX_RETRIES") {
            if let Ok(n) = val.parse::<i32>() {
                config.max_retries = n.clamp(0, 10);
            } else {
                tracing::warn!(value = %val, "Invalid ANALYZER_MAX_RETRIES, using default");
            }
        }

        config
    }

    /// Set the base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the call style.
    pub fn mode(mut self, mode: AnalyzerMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the hard deadline for synchronous analysis.
    pub fn analyze_timeout(mut self, timeout: Duration) -> Self {
        self.analyze_timeout = timeout;
        self
    }

    /// Set the retry bound.
    pub fn max_retries(mut self, n: i32) -> Self {
        self.max_retries = n;
        self
    }

    /// Set the backoff between retries.
    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_centralized_constants() {
        let config = AnalyzerConfig::default();
        assert_eq!(config.base_url, defaults::ANALYZER_URL);
        assert_eq!(config.mode, AnalyzerMode::Sync);
        assert_eq!(
            config.analyze_timeout,
            Duration::from_secs(defaults::ANALYZE_TIMEOUT_SECS)
        );
        assert_eq!(config.max_retries, defaults::ANALYZE_MAX_RETRIES);
    }

    #[test]
    fn builder_overrides() {
        let config = AnalyzerConfig::new()
            .base_url("http://analyzer:9000")
            .mode(AnalyzerMode::Queued)
            .analyze_timeout(Duration::from_secs(30))
            .max_retries(1);

        assert_eq!(config.base_url, "http://analyzer:9000");
        assert_eq!(config.mode, AnalyzerMode::Queued);
        assert_eq!(config.analyze_timeout, Duration::from_secs(30));
        assert_eq!(config.max_retries, 1);
    }

    #[test]
    fn mode_parsing() {
        assert_eq!(AnalyzerMode::from_str_loose("SYNC"), Some(AnalyzerMode::Sync));
        assert_eq!(
            AnalyzerMode::from_str_loose("queued"),
            Some(AnalyzerMode::Queued)
        );
        assert_eq!(
            AnalyzerMode::from_str_loose("async"),
            Some(AnalyzerMode::Queued)
        );
        assert_eq!(AnalyzerMode::from_str_loose("batch"), None);
    }
}
