use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{GatewayError, Result};

/// Kind of transport-level failure observed before a usable response arrived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Connect,
    Timeout,
    Reset,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportKind::Connect => "connect",
            TransportKind::Timeout => "timeout",
            TransportKind::Reset => "reset",
        };
        f.write_str(name)
    }
}

/// What went wrong with one attempt, as seen by the retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    Transport(TransportKind),
    Status(u16),
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCategory::Transport(kind) => write!(f, "transport {}", kind),
            FailureCategory::Status(status) => write!(f, "HTTP {}", status),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusClass {
    #[serde(rename = "4xx")]
    ClientError,
    #[serde(rename = "5xx")]
    ServerError,
}

impl StatusClass {
    fn contains(&self, status: u16) -> bool {
        match self {
            StatusClass::ClientError => (400..500).contains(&status),
            StatusClass::ServerError => (500..600).contains(&status),
        }
    }
}

/// Match predicate of a strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMatcher {
    Status(u16),
    StatusClass(StatusClass),
    Transport(TransportKind),
}

impl FailureMatcher {
    pub fn matches(&self, category: FailureCategory) -> bool {
        match (self, category) {
            (FailureMatcher::Status(code), FailureCategory::Status(status)) => *code == status,
            (FailureMatcher::StatusClass(class), FailureCategory::Status(status)) => {
                class.contains(status)
            }
            (FailureMatcher::Transport(kind), FailureCategory::Transport(observed)) => {
                *kind == observed
            }
            _ => false,
        }
    }

    fn overlaps(&self, other: &FailureMatcher) -> bool {
        match (self, other) {
            (FailureMatcher::Status(a), FailureMatcher::Status(b)) => a == b,
            (FailureMatcher::Status(code), FailureMatcher::StatusClass(class))
            | (FailureMatcher::StatusClass(class), FailureMatcher::Status(code)) => {
                class.contains(*code)
            }
            (FailureMatcher::StatusClass(a), FailureMatcher::StatusClass(b)) => a == b,
            (FailureMatcher::Transport(a), FailureMatcher::Transport(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for FailureMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureMatcher::Status(code) => write!(f, "status {}", code),
            FailureMatcher::StatusClass(StatusClass::ClientError) => f.write_str("status 4xx"),
            FailureMatcher::StatusClass(StatusClass::ServerError) => f.write_str("status 5xx"),
            FailureMatcher::Transport(kind) => write!(f, "transport {}", kind),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    RetrySame,
    RetrySameWithBackoff,
    SwitchCredential,
    SurfaceToClient,
}

/// One `[[retry.strategies]]` entry as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub on: FailureMatcher,
    pub action: ActionKind,
    #[serde(default)]
    pub attempts: Option<u32>,
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    RetrySame,
    RetrySameWithBackoff(Duration),
    SwitchCredential,
    SurfaceToClient,
}

/// What the dispatcher should do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub action: RetryAction,
    /// Total attempts allowed against the same credential, first one included
    pub max_attempts: u32,
}

impl Decision {
    pub const SWITCH: Decision = Decision {
        action: RetryAction::SwitchCredential,
        max_attempts: 1,
    };
}

#[derive(Debug, Clone)]
struct Strategy {
    on: FailureMatcher,
    decision: Decision,
}

/// Ordered, disjoint strategy table; unmatched failures switch credential
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    strategies: Vec<Strategy>,
}

const DEFAULT_RETRY_ATTEMPTS: u32 = 2;
const DEFAULT_BACKOFF_MS: u64 = 1000;

impl RetryPolicy {
    pub fn from_config(configs: &[StrategyConfig]) -> Result<Self> {
        for (i, a) in configs.iter().enumerate() {
            for b in &configs[i + 1..] {
                if a.on.overlaps(&b.on) {
                    return Err(GatewayError::ConfigError(format!(
                        "Retry strategies overlap: '{}' and '{}' match the same failure",
                        a.on, b.on
                    )));
                }
            }
        }

        let strategies = configs
            .iter()
            .map(|cfg| {
                let attempts = cfg.attempts.unwrap_or(DEFAULT_RETRY_ATTEMPTS);
                if attempts == 0 {
                    return Err(GatewayError::ConfigError(format!(
                        "Retry strategy '{}' must allow at least 1 attempt",
                        cfg.on
                    )));
                }
                let decision = match cfg.action {
                    ActionKind::RetrySame => Decision {
                        action: RetryAction::RetrySame,
                        max_attempts: attempts,
                    },
                    ActionKind::RetrySameWithBackoff => Decision {
                        action: RetryAction::RetrySameWithBackoff(Duration::from_millis(
                            cfg.delay_ms.unwrap_or(DEFAULT_BACKOFF_MS),
                        )),
                        max_attempts: attempts,
                    },
                    ActionKind::SwitchCredential => Decision::SWITCH,
                    ActionKind::SurfaceToClient => Decision {
                        action: RetryAction::SurfaceToClient,
                        max_attempts: 1,
                    },
                };
                Ok(Strategy {
                    on: cfg.on,
                    decision,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { strategies })
    }

    /// Exactly one strategy matches (predicates are disjoint), else switch credential
    pub fn decide(&self, category: FailureCategory) -> Decision {
        self.strategies
            .iter()
            .find(|s| s.on.matches(category))
            .map(|s| s.decision)
            .unwrap_or(Decision::SWITCH)
    }

    /// Built-in strategy table used when the config file has none
    pub fn default_strategies() -> Vec<StrategyConfig> {
        let backoff = |status: u16| StrategyConfig {
            on: FailureMatcher::Status(status),
            action: ActionKind::RetrySameWithBackoff,
            attempts: Some(DEFAULT_RETRY_ATTEMPTS),
            delay_ms: Some(DEFAULT_BACKOFF_MS),
        };
        let simple = |on: FailureMatcher, action: ActionKind| StrategyConfig {
            on,
            action,
            attempts: None,
            delay_ms: None,
        };

        let mut strategies: Vec<StrategyConfig> = [408, 429, 500, 502, 503, 504, 520, 521, 522, 524]
            .into_iter()
            .map(backoff)
            .collect();
        for status in [401, 403] {
            strategies.push(simple(
                FailureMatcher::Status(status),
                ActionKind::SwitchCredential,
            ));
        }
        for status in [400, 404, 422] {
            strategies.push(simple(
                FailureMatcher::Status(status),
                ActionKind::SurfaceToClient,
            ));
        }
        strategies.push(StrategyConfig {
            on: FailureMatcher::Transport(TransportKind::Timeout),
            action: ActionKind::RetrySameWithBackoff,
            attempts: Some(DEFAULT_RETRY_ATTEMPTS),
            delay_ms: Some(DEFAULT_BACKOFF_MS),
        });
        strategies.push(simple(
            FailureMatcher::Transport(TransportKind::Connect),
            ActionKind::SwitchCredential,
        ));
        strategies.push(simple(
            FailureMatcher::Transport(TransportKind::Reset),
            ActionKind::SwitchCredential,
        ));
        strategies
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&Self::default_strategies())
            .unwrap_or(Self { strategies: Vec::new() })
    }
}
