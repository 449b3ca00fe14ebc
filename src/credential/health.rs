use chrono::{DateTime, Local, TimeDelta};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use crate::retry::FailureCategory;

pub const DEFAULT_ERROR_THRESHOLD: u32 = 3;
pub const DEFAULT_COOLDOWN_SECS: u64 = 600;

/// Threshold and cooldown length applied to every credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    pub error_threshold: u32,
    pub cooldown: TimeDelta,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            error_threshold: DEFAULT_ERROR_THRESHOLD,
            cooldown: TimeDelta::seconds(DEFAULT_COOLDOWN_SECS as i64),
        }
    }
}

/// Derived eligibility state of a credential at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CredentialState {
    Active,
    Cooling { until: DateTime<Local> },
    ScheduleExcluded,
    PendingActivation { at: DateTime<Local> },
    Disabled,
}

impl CredentialState {
    pub fn is_eligible(&self) -> bool {
        matches!(self, CredentialState::Active)
    }

    pub fn label(&self) -> &'static str {
        match self {
            CredentialState::Active => "active",
            CredentialState::Cooling { .. } => "cooling",
            CredentialState::ScheduleExcluded => "schedule_excluded",
            CredentialState::PendingActivation { .. } => "pending_activation",
            CredentialState::Disabled => "disabled",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub error_count: u32,
    pub cooldown_until: Option<DateTime<Local>>,
}

/// Effect of recording one failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureEffect {
    Counted(u32),
    CooldownEntered(DateTime<Local>),
    IgnoredWhileCooling,
}

/// Mutable runtime health of one credential.
///
/// Lives outside the declarative config so it survives reloads. Every
/// read-modify-write happens under the per-credential lock, so concurrent
/// failures against the same credential neither lose nor double count.
#[derive(Debug, Default)]
pub struct HealthHandle {
    state: Mutex<HealthSnapshot>,
}

impl HealthHandle {
    fn lock(&self) -> MutexGuard<'_, HealthSnapshot> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        *self.lock()
    }

    /// Clear an expired cooldown and return the one still in force, if any
    pub fn active_cooldown(&self, id: &str, now: DateTime<Local>) -> Option<DateTime<Local>> {
        let mut state = self.lock();
        match state.cooldown_until {
            Some(until) if now >= until => {
                state.cooldown_until = None;
                state.error_count = 0;
                info!(credential = %id, "Cooldown expired, credential re-enabled");
                None
            }
            other => other,
        }
    }

    pub fn record_success(&self, id: &str) {
        let mut state = self.lock();
        if state.error_count > 0 {
            info!(
                credential = %id,
                previous_errors = state.error_count,
                "Request succeeded, error count reset"
            );
        }
        state.error_count = 0;
    }

    pub fn record_failure(
        &self,
        id: &str,
        category: FailureCategory,
        policy: &HealthPolicy,
        now: DateTime<Local>,
    ) -> FailureEffect {
        let mut state = self.lock();

        if let Some(until) = state.cooldown_until
            && now < until
        {
            return FailureEffect::IgnoredWhileCooling;
        }
        state.cooldown_until = None;

        state.error_count += 1;
        if state.error_count >= policy.error_threshold {
            let until = now + policy.cooldown;
            state.cooldown_until = Some(until);
            state.error_count = 0;
            warn!(
                credential = %id,
                failure = %category,
                cooldown_until = %until.to_rfc3339(),
                "Error threshold reached, credential entering cooldown"
            );
            FailureEffect::CooldownEntered(until)
        } else {
            warn!(
                credential = %id,
                failure = %category,
                error_count = state.error_count,
                threshold = policy.error_threshold,
                "Credential failure counted"
            );
            FailureEffect::Counted(state.error_count)
        }
    }

    #[doc(hidden)]
    pub fn set_snapshot(&self, snapshot: HealthSnapshot) {
        *self.lock() = snapshot;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::TransportKind;

    const FAIL: FailureCategory = FailureCategory::Transport(TransportKind::Reset);

    #[test]
    fn test_threshold_enters_cooldown() {
        let handle = HealthHandle::default();
        let policy = HealthPolicy::default();
        let now = Local::now();

        assert_eq!(handle.record_failure("a", FAIL, &policy, now), FailureEffect::Counted(1));
        assert_eq!(handle.record_failure("a", FAIL, &policy, now), FailureEffect::Counted(2));
        assert_eq!(
            handle.record_failure("a", FAIL, &policy, now),
            FailureEffect::CooldownEntered(now + TimeDelta::minutes(10))
        );

        let snap = handle.snapshot();
        assert_eq!(snap.error_count, 0);
        assert_eq!(snap.cooldown_until, Some(now + TimeDelta::minutes(10)));
    }

    #[test]
    fn test_failure_while_cooling_does_not_extend() {
        let handle = HealthHandle::default();
        let policy = HealthPolicy {
            error_threshold: 1,
            cooldown: TimeDelta::seconds(60),
        };
        let now = Local::now();

        handle.record_failure("a", FAIL, &policy, now);
        let later = now + TimeDelta::seconds(30);
        assert_eq!(
            handle.record_failure("a", FAIL, &policy, later),
            FailureEffect::IgnoredWhileCooling
        );
        assert_eq!(handle.snapshot().cooldown_until, Some(now + TimeDelta::seconds(60)));
    }

    #[test]
    fn test_expiry_resets() {
        let handle = HealthHandle::default();
        let now = Local::now();
        handle.set_snapshot(HealthSnapshot {
            error_count: 2,
            cooldown_until: Some(now),
        });

        assert_eq!(handle.active_cooldown("a", now - TimeDelta::seconds(1)), Some(now));
        assert_eq!(handle.active_cooldown("a", now), None);
        assert_eq!(handle.snapshot(), HealthSnapshot::default());
    }

    #[test]
    fn test_success_resets_counter() {
        let handle = HealthHandle::default();
        let policy = HealthPolicy::default();
        let now = Local::now();

        handle.record_failure("a", FAIL, &policy, now);
        handle.record_failure("a", FAIL, &policy, now);
        handle.record_success("a");
        assert_eq!(handle.record_failure("a", FAIL, &policy, now), FailureEffect::Counted(1));
    }

    #[test]
    fn test_concurrent_failures_are_not_lost() {
        let handle = std::sync::Arc::new(HealthHandle::default());
        let policy = HealthPolicy {
            error_threshold: 1000,
            cooldown: TimeDelta::seconds(60),
        };
        let now = Local::now();

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let handle = handle.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        handle.record_failure("a", FAIL, &policy, now);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(handle.snapshot().error_count, 400);
    }
}
