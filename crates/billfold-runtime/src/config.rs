//! Runtime configuration.

use chrono::Duration;
use reconcile_retriable_worker::ReconcileConfig;
use std::path::PathBuf;
use std::time::Duration as StdDuration;
use url::Url;

const DEFAULT_API_URL: &str = "https://api.billfold.app/v1/";

/// Data layer configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Base URL of the sync API.
    pub api_base_url: Url,

    /// Path of the SQLite row store.
    pub db_path: PathBuf,

    /// Quiet period for debounced invalidation events.
    pub debounce_window: StdDuration,

    /// Backoff and retry tuning for reconciliation passes.
    pub reconcile: ReconcileConfig,

    /// Whether isolation violations fail hard instead of being logged
    /// and scoped away.
    pub strict_isolation: bool,
}

impl RuntimeConfig {
    /// Build a config for the given database path.
    ///
    /// Uses default values for other settings, which can be overridden
    /// via environment variables.
    pub fn new(db_path: PathBuf) -> anyhow::Result<Self> {
        let api_base_url = std::env::var("BILLFOLD_API_URL")
            .unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let api_base_url = Url::parse(&api_base_url)?;

        let debounce_ms: u64 = std::env::var("BILLFOLD_DEBOUNCE_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(300);

        let backoff_base_secs: i64 = std::env::var("BILLFOLD_BACKOFF_BASE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(2);
        let backoff_max_secs: i64 = std::env::var("BILLFOLD_BACKOFF_MAX_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(300);
        let max_retries: u32 = std::env::var("BILLFOLD_MAX_RETRIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        let strict_isolation = std::env::var("BILLFOLD_STRICT_ISOLATION")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(cfg!(debug_assertions));

        Ok(Self {
            api_base_url,
            db_path,
            debounce_window: StdDuration::from_millis(debounce_ms),
            reconcile: ReconcileConfig {
                backoff_base: Duration::seconds(backoff_base_secs),
                backoff_max: Duration::seconds(backoff_max_secs),
                max_retries,
                ..ReconcileConfig::default()
            },
            strict_isolation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RuntimeConfig::new(PathBuf::from("billfold.db")).unwrap();
        assert_eq!(config.debounce_window, StdDuration::from_millis(300));
        assert_eq!(config.reconcile.backoff_base, Duration::seconds(2));
        assert_eq!(config.reconcile.max_retries, 5);
        assert_eq!(config.api_base_url.as_str(), DEFAULT_API_URL);
    }
}
