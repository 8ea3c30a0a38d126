//! Component G — SessionManager.
//!
//! Coalesces rapid in-progress updates into a single delayed write so a
//! listening session doesn't produce one remote mutation per few seconds
//! of playback (section 4.6). A pending update is flushed immediately
//! when it crosses a "milestone" percentage, when it's a completion, or
//! when the session has been idle past its timeout.

use chrono::{DateTime, Utc};

/// Percentage thresholds that always flush immediately, regardless of
/// how recently the session last synced.
const MILESTONES: &[u32] = &[25, 50, 75, 90, 95, 100];

/// A jump at least this large vs. the cached-or-pending progress flushes
/// immediately even if it doesn't cross a milestone (section 4.7).
const SIGNIFICANT_CHANGE_PCT: f64 = 5.0;

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub enabled: bool,
    pub session_timeout_s: u64,
    pub max_delay_s: u64,
    pub immediate_completion: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            session_timeout_s: 900,
            max_delay_s: 3600,
            immediate_completion: true,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(60..=7200).contains(&self.session_timeout_s) {
            return Err(format!(
                "session_timeout_s must be in [60, 7200], got {}",
                self.session_timeout_s
            ));
        }
        if !(300..=86400).contains(&self.max_delay_s) {
            return Err(format!(
                "max_delay_s must be in [300, 86400], got {}",
                self.max_delay_s
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionDecision {
    SyncNow,
    Delay,
}

fn crosses_milestone(old_pct: f64, new_pct: f64) -> bool {
    MILESTONES
        .iter()
        .any(|&m| (m as f64) > old_pct && (m as f64) <= new_pct)
}

pub struct SessionManager {
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    /// Decides whether a new progress reading should be synced now or
    /// coalesced into the pending session state.
    pub fn should_delay(
        &self,
        old_progress: f64,
        new_progress: f64,
        is_completion: bool,
        session_started_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> SessionDecision {
        if !self.config.enabled {
            return SessionDecision::SyncNow;
        }
        if is_completion && self.config.immediate_completion {
            return SessionDecision::SyncNow;
        }
        if crosses_milestone(old_progress, new_progress) {
            return SessionDecision::SyncNow;
        }
        if (new_progress - old_progress).abs() >= SIGNIFICANT_CHANGE_PCT {
            return SessionDecision::SyncNow;
        }
        if let Some(started) = session_started_at {
            let age = (now - started).num_seconds().max(0) as u64;
            if age >= self.config.max_delay_s {
                return SessionDecision::SyncNow;
            }
        }
        SessionDecision::Delay
    }

    /// A pending session update should be flushed once it's been idle
    /// (no new playback activity) for `session_timeout_s`.
    pub fn has_expired(&self, last_update_ts: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let idle = (now - last_update_ts).num_seconds().max(0) as u64;
        idle >= self.config.session_timeout_s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn completion_always_syncs_immediately() {
        let mgr = SessionManager::new(SessionConfig::default());
        let now = Utc::now();
        assert_eq!(
            mgr.should_delay(90.0, 100.0, true, Some(now), now),
            SessionDecision::SyncNow
        );
    }

    #[test]
    fn crossing_milestone_syncs_immediately() {
        let mgr = SessionManager::new(SessionConfig::default());
        let now = Utc::now();
        assert_eq!(
            mgr.should_delay(48.0, 51.0, false, Some(now), now),
            SessionDecision::SyncNow
        );
    }

    #[test]
    fn small_change_within_session_is_delayed() {
        let mgr = SessionManager::new(SessionConfig::default());
        let now = Utc::now();
        assert_eq!(
            mgr.should_delay(40.0, 42.0, false, Some(now), now),
            SessionDecision::Delay
        );
    }

    #[test]
    fn exceeding_max_delay_forces_sync() {
        let mgr = SessionManager::new(SessionConfig {
            max_delay_s: 300,
            ..SessionConfig::default()
        });
        let started = Utc::now() - Duration::seconds(301);
        let now = Utc::now();
        assert_eq!(
            mgr.should_delay(10.0, 12.0, false, Some(started), now),
            SessionDecision::SyncNow
        );
    }

    #[test]
    fn session_expires_after_timeout_idle() {
        let mgr = SessionManager::new(SessionConfig {
            session_timeout_s: 600,
            ..SessionConfig::default()
        });
        let last_update = Utc::now() - Duration::seconds(601);
        assert!(mgr.has_expired(last_update, Utc::now()));
    }

    #[test]
    fn rejects_out_of_range_config() {
        let cfg = SessionConfig {
            session_timeout_s: 10,
            ..SessionConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
