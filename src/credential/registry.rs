use arc_swap::ArcSwap;
use chrono::{DateTime, Local};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use super::health::{CredentialState, FailureEffect, HealthHandle, HealthPolicy, HealthSnapshot};
use super::{CredentialConfig, ProviderFamily};
use crate::retry::FailureCategory;

/// Result of one exchange against a credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure(FailureCategory),
}

/// Why a family has no candidate right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoEligibleReason {
    NoneConfigured,
    AllDisabled,
    AllCooling { next_available: DateTime<Local> },
    AllScheduleExcluded,
    AwaitingActivation { earliest: DateTime<Local> },
    Mixed {
        disabled: usize,
        cooling: usize,
        schedule_excluded: usize,
        pending_activation: usize,
    },
}

impl fmt::Display for NoEligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoEligibleReason::NoneConfigured => f.write_str("no credentials configured"),
            NoEligibleReason::AllDisabled => f.write_str("all credentials are disabled"),
            NoEligibleReason::AllCooling { next_available } => write!(
                f,
                "all credentials are cooling down (next available at {})",
                next_available.to_rfc3339()
            ),
            NoEligibleReason::AllScheduleExcluded => {
                f.write_str("all credentials are outside their scheduled windows")
            }
            NoEligibleReason::AwaitingActivation { earliest } => write!(
                f,
                "all credentials await billing activation (earliest at {})",
                earliest.to_rfc3339()
            ),
            NoEligibleReason::Mixed {
                disabled,
                cooling,
                schedule_excluded,
                pending_activation,
            } => write!(
                f,
                "no credential available ({} disabled, {} cooling, {} outside schedule, {} awaiting activation)",
                disabled, cooling, schedule_excluded, pending_activation
            ),
        }
    }
}

/// Config view merged with the live health handle of one credential.
///
/// Holding a candidate keeps both alive, so a credential removed by a reload
/// stays usable until in-flight requests against it finish.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub family: ProviderFamily,
    pub config: Arc<CredentialConfig>,
    health: Arc<HealthHandle>,
}

impl Candidate {
    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// Re-derive eligibility from config, health and wall-clock time
    pub fn state_at(&self, now: DateTime<Local>) -> CredentialState {
        if !self.config.enabled {
            return CredentialState::Disabled;
        }
        if let Some(until) = self.health.active_cooldown(&self.config.id, now) {
            return CredentialState::Cooling { until };
        }
        if !self.config.schedule.is_open(now.naive_local()) {
            return CredentialState::ScheduleExcluded;
        }
        if let Some(activate_at) = self.config.activate_at {
            let at = activate_at.with_timezone(&Local);
            if now < at {
                return CredentialState::PendingActivation { at };
            }
        }
        CredentialState::Active
    }

    pub fn health(&self) -> HealthSnapshot {
        self.health.snapshot()
    }
}

/// Health row reported by the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatus {
    pub family: ProviderFamily,
    pub id: String,
    pub name: String,
    pub priority: u32,
    #[serde(flatten)]
    pub state: CredentialState,
    pub error_count: u32,
    pub cooldown_remaining_secs: Option<i64>,
}

struct PoolEntry {
    priority: u32,
    config: Arc<CredentialConfig>,
}

struct Snapshot {
    claude: Vec<PoolEntry>,
    codex: Vec<PoolEntry>,
    policy: HealthPolicy,
}

impl Snapshot {
    fn build(claude: Vec<CredentialConfig>, codex: Vec<CredentialConfig>, policy: HealthPolicy) -> Self {
        Self {
            claude: Self::order(claude),
            codex: Self::order(codex),
            policy,
        }
    }

    // priority ascending, ties keep config order
    fn order(configs: Vec<CredentialConfig>) -> Vec<PoolEntry> {
        let mut entries: Vec<PoolEntry> = configs
            .into_iter()
            .enumerate()
            .map(|(index, config)| PoolEntry {
                priority: config.priority.unwrap_or(index as u32),
                config: Arc::new(config),
            })
            .collect();
        entries.sort_by_key(|e| e.priority);
        entries
    }

    fn pool(&self, family: ProviderFamily) -> &[PoolEntry] {
        match family {
            ProviderFamily::Claude => &self.claude,
            ProviderFamily::Codex => &self.codex,
        }
    }
}

/// Credential pools per family with health that outlives config reloads
pub struct CredentialRegistry {
    snapshot: ArcSwap<Snapshot>,
    health: DashMap<(ProviderFamily, String), Arc<HealthHandle>>,
}

impl CredentialRegistry {
    pub fn new(claude: Vec<CredentialConfig>, codex: Vec<CredentialConfig>, policy: HealthPolicy) -> Self {
        let registry = Self {
            snapshot: ArcSwap::from_pointee(Snapshot::build(Vec::new(), Vec::new(), policy)),
            health: DashMap::new(),
        };
        registry.reload(claude, codex, policy);
        registry
    }

    /// Swap in a new declarative snapshot; health of surviving ids is kept
    pub fn reload(&self, claude: Vec<CredentialConfig>, codex: Vec<CredentialConfig>, policy: HealthPolicy) {
        let snapshot = Snapshot::build(claude, codex, policy);

        let mut live = HashSet::new();
        for family in [ProviderFamily::Claude, ProviderFamily::Codex] {
            for entry in snapshot.pool(family) {
                let key = (family, entry.config.id.clone());
                self.health.entry(key.clone()).or_default();
                live.insert(key);
            }
        }
        let before = self.health.len();
        self.health.retain(|key, _| live.contains(key));

        info!(
            claude = snapshot.claude.len(),
            codex = snapshot.codex.len(),
            dropped_health = before - self.health.len(),
            "Credential registry loaded"
        );
        self.snapshot.store(Arc::new(snapshot));
    }

    pub fn policy(&self) -> HealthPolicy {
        self.snapshot.load().policy
    }

    fn candidate(&self, family: ProviderFamily, config: &Arc<CredentialConfig>) -> Candidate {
        let health = self
            .health
            .entry((family, config.id.clone()))
            .or_default()
            .clone();
        Candidate {
            family,
            config: config.clone(),
            health,
        }
    }

    pub fn candidates(&self, family: ProviderFamily) -> Vec<Candidate> {
        self.candidates_at(family, Local::now())
    }

    /// Eligible credentials of `family` at `now`, in priority order
    pub fn candidates_at(&self, family: ProviderFamily, now: DateTime<Local>) -> Vec<Candidate> {
        self.select_at(family, now).unwrap_or_default()
    }

    /// Eligible credentials, or the reason none qualifies
    pub fn select_at(
        &self,
        family: ProviderFamily,
        now: DateTime<Local>,
    ) -> std::result::Result<Vec<Candidate>, NoEligibleReason> {
        let snapshot = self.snapshot.load();
        let mut eligible = Vec::new();
        let mut excluded = Vec::new();

        for entry in snapshot.pool(family) {
            let candidate = self.candidate(family, &entry.config);
            match candidate.state_at(now) {
                CredentialState::Active => eligible.push(candidate),
                state => {
                    debug!(credential = %candidate.id(), state = state.label(), "Credential skipped");
                    excluded.push(state);
                }
            }
        }

        if eligible.is_empty() {
            Err(Self::reason(&excluded))
        } else {
            Ok(eligible)
        }
    }

    fn reason(states: &[CredentialState]) -> NoEligibleReason {
        if states.is_empty() {
            return NoEligibleReason::NoneConfigured;
        }

        let mut disabled = 0;
        let mut schedule_excluded = 0;
        let mut cooling = Vec::new();
        let mut pending = Vec::new();
        for state in states {
            match state {
                CredentialState::Disabled => disabled += 1,
                CredentialState::ScheduleExcluded => schedule_excluded += 1,
                CredentialState::Cooling { until } => cooling.push(*until),
                CredentialState::PendingActivation { at } => pending.push(*at),
                CredentialState::Active => {}
            }
        }

        let total = states.len();
        if disabled == total {
            NoEligibleReason::AllDisabled
        } else if schedule_excluded == total {
            NoEligibleReason::AllScheduleExcluded
        } else if let Some(next_available) = cooling.iter().min().copied()
            && cooling.len() == total
        {
            NoEligibleReason::AllCooling { next_available }
        } else if let Some(earliest) = pending.iter().min().copied()
            && pending.len() == total
        {
            NoEligibleReason::AwaitingActivation { earliest }
        } else {
            NoEligibleReason::Mixed {
                disabled,
                cooling: cooling.len(),
                schedule_excluded,
                pending_activation: pending.len(),
            }
        }
    }

    pub fn report_outcome(&self, family: ProviderFamily, id: &str, outcome: Outcome) -> Option<FailureEffect> {
        self.report_outcome_at(family, id, outcome, Local::now())
    }

    /// Record an outcome by credential id; unknown ids are ignored
    pub fn report_outcome_at(
        &self,
        family: ProviderFamily,
        id: &str,
        outcome: Outcome,
        now: DateTime<Local>,
    ) -> Option<FailureEffect> {
        let handle = match self.health.get(&(family, id.to_string())) {
            Some(handle) => handle.clone(),
            None => {
                debug!(credential = %id, "Outcome for unknown credential ignored");
                return None;
            }
        };
        self.apply(id, &handle, outcome, now)
    }

    /// Record an outcome through a candidate, valid even after the credential was removed
    pub fn report_at(&self, candidate: &Candidate, outcome: Outcome, now: DateTime<Local>) -> Option<FailureEffect> {
        self.apply(candidate.id(), &candidate.health, outcome, now)
    }

    fn apply(
        &self,
        id: &str,
        handle: &HealthHandle,
        outcome: Outcome,
        now: DateTime<Local>,
    ) -> Option<FailureEffect> {
        match outcome {
            Outcome::Success => {
                handle.record_success(id);
                None
            }
            Outcome::Failure(category) => {
                let policy = self.policy();
                Some(handle.record_failure(id, category, &policy, now))
            }
        }
    }

    pub fn health(&self, family: ProviderFamily, id: &str) -> Option<HealthSnapshot> {
        self.health
            .get(&(family, id.to_string()))
            .map(|handle| handle.snapshot())
    }

    /// Seed the health of a configured credential
    pub fn set_health(&self, family: ProviderFamily, id: &str, snapshot: HealthSnapshot) -> bool {
        match self.health.get(&(family, id.to_string())) {
            Some(handle) => {
                handle.set_snapshot(snapshot);
                true
            }
            None => false,
        }
    }

    pub fn statuses_at(&self, now: DateTime<Local>) -> Vec<CredentialStatus> {
        let snapshot = self.snapshot.load();
        let mut statuses = Vec::new();
        for family in [ProviderFamily::Claude, ProviderFamily::Codex] {
            for entry in snapshot.pool(family) {
                let candidate = self.candidate(family, &entry.config);
                let state = candidate.state_at(now);
                let health = candidate.health();
                statuses.push(CredentialStatus {
                    family,
                    id: entry.config.id.clone(),
                    name: entry.config.display_name().to_string(),
                    priority: entry.priority,
                    state,
                    error_count: health.error_count,
                    cooldown_remaining_secs: health
                        .cooldown_until
                        .map(|until| (until - now).num_seconds().max(0)),
                });
            }
        }
        statuses
    }
}
