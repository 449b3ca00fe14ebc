pub mod health;
pub mod registry;
pub mod schedule;

use chrono::{DateTime, FixedOffset, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use health::{CredentialState, FailureEffect, HealthHandle, HealthPolicy, HealthSnapshot};
pub use registry::{Candidate, CredentialRegistry, CredentialStatus, NoEligibleReason, Outcome};
pub use schedule::{ScheduleWindow, WeeklySchedule};

/// Upstream protocol dialect a credential speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderFamily {
    Claude,
    Codex,
}

impl ProviderFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderFamily::Claude => "claude",
            ProviderFamily::Codex => "codex",
        }
    }
}

impl fmt::Display for ProviderFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_enabled() -> bool {
    true
}

/// Declarative part of a credential, replaced wholesale on reload
#[derive(Clone, Deserialize)]
pub struct CredentialConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    /// Lower is preferred; defaults to the position in the list
    #[serde(default)]
    pub priority: Option<u32>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub schedule: WeeklySchedule,
    /// Billing activation instant; the credential is ineligible before it
    #[serde(default)]
    pub activate_at: Option<DateTime<FixedOffset>>,
    /// Send a small request every day at `activation_time` to open the billing window
    #[serde(default)]
    pub activation_enabled: bool,
    #[serde(default, deserialize_with = "schedule::hhmm")]
    pub activation_time: Option<NaiveTime>,
}

impl CredentialConfig {
    pub fn new(id: impl Into<String>, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            base_url: base_url.into(),
            api_key: api_key.into(),
            priority: None,
            enabled: true,
            schedule: WeeklySchedule::default(),
            activate_at: None,
            activation_enabled: false,
            activation_time: None,
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_daily_activation(mut self, at: NaiveTime) -> Self {
        self.activation_enabled = true;
        self.activation_time = Some(at);
        self
    }

    /// Local time of the daily activation ping, if enabled; 08:00 unless configured
    pub fn daily_activation(&self) -> Option<NaiveTime> {
        if !self.activation_enabled {
            return None;
        }
        self.activation_time.or(NaiveTime::from_hms_opt(8, 0, 0))
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

// api_key stays out of logs
impl fmt::Debug for CredentialConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialConfig")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("priority", &self.priority)
            .field("enabled", &self.enabled)
            .field("schedule", &self.schedule)
            .field("activate_at", &self.activate_at)
            .field("activation_enabled", &self.activation_enabled)
            .field("activation_time", &self.activation_time)
            .finish_non_exhaustive()
    }
}
