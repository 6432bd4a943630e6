//! Health classification and the background sweeper

use crate::cache::stats::CacheStats;
use crate::cache::store::AnalysisCache;
use crate::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Thresholds used by [`AnalysisCache::health_check`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthThresholds {
    /// Utilization above which the cache reports pressure
    pub high_utilization: f64,

    /// Hit rate below which the cache reports poor reuse
    pub low_hit_rate: f64,

    /// Requests required before the hit rate is judged
    pub min_samples: u64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            high_utilization: 0.95,
            low_hit_rate: 0.2,
            min_samples: 50,
        }
    }
}

impl HealthThresholds {
    /// Both ratios must lie in `[0, 1]`
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.high_utilization) {
            return Err(CacheError::InvalidConfig(format!(
                "high_utilization must be between 0 and 1, got {}",
                self.high_utilization
            )));
        }

        if !(0.0..=1.0).contains(&self.low_hit_rate) {
            return Err(CacheError::InvalidConfig(format!(
                "low_hit_rate must be between 0 and 1, got {}",
                self.low_hit_rate
            )));
        }

        Ok(())
    }
}

/// Cache health classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Cache is operating normally
    Healthy,

    /// Cache is nearly full; consider raising capacity
    WarningHighUtilization,

    /// Cache is serving few hits; TTLs may be too short
    WarningLowHitRate,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// Result of a health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Overall classification
    pub status: HealthStatus,

    /// Expired entries removed by the pre-check sweep
    pub swept: usize,

    /// Statistics after the sweep
    pub stats: CacheStats,

    /// Human-readable summary
    pub message: String,

    /// When the check ran
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    /// Classify a statistics snapshot
    pub fn classify(stats: &CacheStats, thresholds: &HealthThresholds) -> (HealthStatus, String) {
        if stats.utilization > thresholds.high_utilization {
            return (
                HealthStatus::WarningHighUtilization,
                format!(
                    "Utilization {:.1}% exceeds {:.1}%",
                    stats.utilization * 100.0,
                    thresholds.high_utilization * 100.0
                ),
            );
        }

        if stats.counters.total_requests >= thresholds.min_samples
            && stats.hit_rate < thresholds.low_hit_rate
        {
            return (
                HealthStatus::WarningLowHitRate,
                format!(
                    "Hit rate {:.1}% below {:.1}% over {} requests",
                    stats.hit_rate * 100.0,
                    thresholds.low_hit_rate * 100.0,
                    stats.counters.total_requests
                ),
            );
        }

        (HealthStatus::Healthy, "Cache operating normally".to_string())
    }
}

impl AnalysisCache {
    /// Sweep expired entries, then classify the cache
    pub async fn health_check(&self) -> HealthReport {
        let swept = self.sweep().await;
        let stats = self.stats().await;
        let (status, message) = HealthReport::classify(&stats, &self.config.health);

        if status.is_healthy() {
            debug!("Cache health: {}", message);
        } else {
            warn!("Cache health: {:?} ({})", status, message);
        }

        HealthReport {
            status,
            swept,
            stats,
            message,
            timestamp: self.clock.now(),
        }
    }

    /// Start the background sweep if enabled in the configuration
    pub fn start_auto_sweep(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if !self.config.enable_auto_sweep {
            return None;
        }
        Some(spawn_sweeper(Arc::clone(self), self.config.sweep_interval))
    }
}

/// Shortest interval the sweeper runs at
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Periodically remove expired entries until the task is aborted.
///
/// Intervals below [`MIN_SWEEP_INTERVAL`] (including zero) are raised to it.
pub fn spawn_sweeper(cache: Arc<AnalysisCache>, interval: Duration) -> JoinHandle<()> {
    let interval = interval.max(MIN_SWEEP_INTERVAL);
    info!("Starting cache sweeper (interval: {:?})", interval);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let removed = cache.sweep().await;
            if removed > 0 {
                info!("Sweeper removed {} expired entries", removed);
            }
        }
    })
}
