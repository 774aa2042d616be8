//! Sliding-window request budget shared by every external fetch.
//!
//! Timestamps are persisted so a process restart does not reset the budget.
//! Admission and recording happen together under one lock (`try_admit`),
//! immediately before the provider call, so neither concurrent callers nor
//! provider latency can slip past the ceiling.

use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Configuration for the sliding window limiter.
#[derive(Debug, Clone)]
pub struct RateLimiterSettings {
    /// Trailing window the ceiling applies to.
    pub window: Duration,
    /// Maximum request units admitted within the window.
    pub max_requests: usize,
    /// Whether limiting is enabled at all.
    pub enabled: bool,
}

impl Default for RateLimiterSettings {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(3600),
            max_requests: 90,
            enabled: true,
        }
    }
}

/// Persisted shape: one unix-millisecond entry per recorded unit.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
    #[serde(default)]
    timestamps: Vec<i64>,
}

/// Sliding-window admission counter over a persisted timestamp sequence.
pub struct SlidingWindowLimiter {
    timestamps: Mutex<VecDeque<i64>>,
    settings: RateLimiterSettings,
    state_path: Option<PathBuf>,
}

impl SlidingWindowLimiter {
    /// In-memory limiter (tests, or deployments that accept budget reset on
    /// restart).
    pub fn new(settings: RateLimiterSettings) -> Self {
        Self {
            timestamps: Mutex::new(VecDeque::new()),
            settings,
            state_path: None,
        }
    }

    /// Limiter whose timestamp sequence is loaded from and persisted to
    /// `state_path`. A missing or unreadable file starts empty.
    pub fn persisted(settings: RateLimiterSettings, state_path: PathBuf) -> Self {
        let restored = match std::fs::read(&state_path) {
            Ok(raw) => match serde_json::from_slice::<PersistedState>(&raw) {
                Ok(state) => {
                    debug!(
                        "Restored {} rate limiter timestamps from {:?}",
                        state.timestamps.len(),
                        state_path
                    );
                    state.timestamps.into_iter().collect()
                }
                Err(e) => {
                    warn!("Corrupt rate limiter state at {:?}: {}", state_path, e);
                    VecDeque::new()
                }
            },
            Err(_) => VecDeque::new(),
        };

        Self {
            timestamps: Mutex::new(restored),
            settings,
            state_path: Some(state_path),
        }
    }

    fn prune(&self, timestamps: &mut VecDeque<i64>, now_ms: i64) {
        let cutoff = now_ms - self.settings.window.as_millis() as i64;
        while let Some(front) = timestamps.front() {
            if *front < cutoff {
                timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    fn persist(&self, timestamps: &VecDeque<i64>) {
        let Some(path) = &self.state_path else {
            return;
        };
        let state = PersistedState {
            timestamps: timestamps.iter().copied().collect(),
        };
        // Best-effort: a failed persist only weakens restart continuity.
        if let Err(e) = serde_json::to_vec(&state)
            .context("serialize rate limiter state")
            .and_then(|body| std::fs::write(path, body).context("write rate limiter state"))
        {
            warn!("Failed to persist rate limiter state to {:?}: {}", path, e);
        }
    }

    /// Admit and record `cost` units in one lock acquisition, or deny and
    /// record nothing. A separate check-then-record pair would let two
    /// concurrent callers both pass the check at `max_requests - 1`.
    pub async fn try_admit(&self, cost: usize) -> bool {
        if !self.settings.enabled {
            return true;
        }
        let mut timestamps = self.timestamps.lock().await;
        let now_ms = Utc::now().timestamp_millis();
        self.prune(&mut timestamps, now_ms);
        if timestamps.len() + cost > self.settings.max_requests {
            return false;
        }
        for _ in 0..cost {
            timestamps.push_back(now_ms);
        }
        self.persist(&timestamps);
        true
    }

    /// Units currently counted against the window (monitoring/tests).
    pub async fn used(&self) -> usize {
        let mut timestamps = self.timestamps.lock().await;
        let now_ms = Utc::now().timestamp_millis();
        self.prune(&mut timestamps, now_ms);
        timestamps.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn settings(max: usize, window: Duration) -> RateLimiterSettings {
        RateLimiterSettings {
            window,
            max_requests: max,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_admits_under_ceiling() {
        let limiter = SlidingWindowLimiter::new(settings(3, Duration::from_secs(60)));
        assert!(limiter.try_admit(1).await);
        assert!(limiter.try_admit(1).await);
        assert!(!limiter.try_admit(2).await);
        assert!(limiter.try_admit(1).await);
    }

    #[tokio::test]
    async fn test_denied_units_are_not_recorded() {
        let limiter = SlidingWindowLimiter::new(settings(2, Duration::from_secs(60)));
        assert!(limiter.try_admit(2).await);
        assert!(!limiter.try_admit(1).await);
        assert_eq!(limiter.used().await, 2);
    }

    #[tokio::test]
    async fn test_window_expiry_frees_budget() {
        let limiter = SlidingWindowLimiter::new(settings(1, Duration::from_millis(50)));
        assert!(limiter.try_admit(1).await);
        assert!(!limiter.try_admit(1).await);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(limiter.try_admit(1).await);
        assert_eq!(limiter.used().await, 1);
    }

    #[tokio::test]
    async fn test_disabled_always_admits() {
        let limiter = SlidingWindowLimiter::new(RateLimiterSettings {
            window: Duration::from_secs(60),
            max_requests: 0,
            enabled: false,
        });
        assert!(limiter.try_admit(10).await);
        assert!(limiter.try_admit(10).await);
    }

    #[tokio::test]
    async fn test_concurrent_admissions_respect_ceiling() {
        let limiter = Arc::new(SlidingWindowLimiter::new(settings(1, Duration::from_secs(60))));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move { limiter.try_admit(1).await })
            })
            .collect();

        let mut admitted = 0;
        for task in tasks {
            if task.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
        assert_eq!(limiter.used().await, 1);
    }

    #[tokio::test]
    async fn test_budget_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rate_state.json");

        {
            let limiter =
                SlidingWindowLimiter::persisted(settings(2, Duration::from_secs(60)), path.clone());
            assert!(limiter.try_admit(2).await);
        }

        let restarted =
            SlidingWindowLimiter::persisted(settings(2, Duration::from_secs(60)), path);
        assert!(!restarted.try_admit(1).await);
    }

    #[tokio::test]
    async fn test_corrupt_state_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rate_state.json");
        std::fs::write(&path, b"][").unwrap();

        let limiter = SlidingWindowLimiter::persisted(settings(2, Duration::from_secs(60)), path);
        assert!(limiter.try_admit(2).await);
    }
}
