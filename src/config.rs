use chrono::TimeDelta;
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::credential::{CredentialConfig, HealthPolicy, ProviderFamily};
use crate::credential::health::{DEFAULT_COOLDOWN_SECS, DEFAULT_ERROR_THRESHOLD};
use crate::error::{GatewayError, Result};
use crate::retry::{RetryPolicy, StrategyConfig};
use crate::transform::ModelConversionRule;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_THINKING_BUDGET: u32 = 30000;
pub const DEFAULT_CACHE_CONTROL_LIMIT: usize = 4;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub claude: Vec<CredentialConfig>,
    #[serde(default)]
    pub codex: Vec<CredentialConfig>,
    #[serde(default)]
    pub openai_bridge: BridgeConfig,
    #[serde(default)]
    pub model_conversions: Vec<ModelConversionRule>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub optimization: OptimizationConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
        }
    }
}

/// How `/v1/chat/completions` requests are served
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub target: ProviderFamily,
    /// Upstream model used when no conversion rule matches and the requested
    /// model does not belong to the target family
    pub default_model: Option<String>,
    /// Base instructions sent to Codex when the client supplied no system prompt
    pub instructions: Option<String>,
    pub thinking_budget: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            target: ProviderFamily::Claude,
            default_model: None,
            instructions: None,
            thinking_budget: DEFAULT_THINKING_BUDGET,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "RetryPolicy::default_strategies")]
    pub strategies: Vec<StrategyConfig>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategies: RetryPolicy::default_strategies(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub connect_secs: u64,
    pub first_byte_secs: u64,
    pub idle_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 10,
            first_byte_secs: 120,
            idle_secs: 300,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn first_byte(&self) -> Duration {
        Duration::from_secs(self.first_byte_secs)
    }

    pub fn idle(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub error_threshold: u32,
    pub cooldown_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            error_threshold: DEFAULT_ERROR_THRESHOLD,
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
        }
    }
}

impl HealthConfig {
    pub fn policy(&self) -> HealthPolicy {
        HealthPolicy {
            error_threshold: self.error_threshold,
            cooldown: TimeDelta::seconds(self.cooldown_secs as i64),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OptimizationConfig {
    /// Maximum `cache_control` markers kept on Claude requests, 0 disables the limit
    pub cache_control_limit: usize,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            cache_control_limit: DEFAULT_CACHE_CONTROL_LIMIT,
        }
    }
}

/// Startup health check and daily activation pings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Ping every enabled credential once when the gateway starts
    pub startup_check: bool,
    /// Pause between two consecutive pings
    pub pause_secs: u64,
    /// How often the activation scheduler wakes up; at most 300
    pub tick_secs: u64,
    /// Wait before retrying a failed activation
    pub retry_interval_secs: u64,
    /// Activation attempts per credential per day
    pub max_attempts: u32,
    pub claude_model: String,
    pub codex_model: String,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            startup_check: true,
            pause_secs: 2,
            tick_secs: 30,
            retry_interval_secs: 60,
            max_attempts: 20,
            claude_model: "claude-sonnet-4-5".to_string(),
            codex_model: "gpt-5-codex".to_string(),
        }
    }
}

impl MaintenanceConfig {
    pub fn pause(&self) -> Duration {
        Duration::from_secs(self.pause_secs)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }

    pub fn retry_interval(&self) -> TimeDelta {
        TimeDelta::seconds(self.retry_interval_secs as i64)
    }

    pub fn model(&self, family: ProviderFamily) -> &str {
        match family {
            ProviderFamily::Claude => &self.claude_model,
            ProviderFamily::Codex => &self.codex_model,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())
            .map_err(|e| GatewayError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let mut config = Self::parse(&contents)?;

        // Allow environment variables to override file config
        if let Ok(addr) = env::var("GATEWAY_LISTEN_ADDR") {
            config.server.listen_addr = addr;
        }

        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| GatewayError::ConfigError(format!("Failed to parse config file: {}", e)))
    }

    pub fn credentials(&self, family: ProviderFamily) -> &[CredentialConfig] {
        match family {
            ProviderFamily::Claude => &self.claude,
            ProviderFamily::Codex => &self.codex,
        }
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        RetryPolicy::from_config(&self.retry.strategies)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.listen_addr.is_empty() {
            return Err(GatewayError::ConfigError(
                "Listen address is empty".to_string(),
            ));
        }

        for family in [ProviderFamily::Claude, ProviderFamily::Codex] {
            let mut seen = HashSet::new();
            for credential in self.credentials(family) {
                if credential.id.is_empty() {
                    return Err(GatewayError::ConfigError(format!(
                        "A {} credential has an empty id",
                        family
                    )));
                }
                if !seen.insert(credential.id.as_str()) {
                    return Err(GatewayError::ConfigError(format!(
                        "Duplicate {} credential id '{}'",
                        family, credential.id
                    )));
                }
                if credential.base_url.is_empty() {
                    return Err(GatewayError::ConfigError(format!(
                        "Credential '{}' has an empty base_url",
                        credential.id
                    )));
                }
                if credential.api_key.is_empty() {
                    return Err(GatewayError::ConfigError(format!(
                        "Credential '{}' has an empty api_key",
                        credential.id
                    )));
                }
                if credential.schedule.has_empty_window() {
                    return Err(GatewayError::ConfigError(format!(
                        "Credential '{}' has a schedule window whose start equals its end",
                        credential.id
                    )));
                }
            }
        }

        for rule in &self.model_conversions {
            if rule.source.is_empty() || rule.target.is_empty() {
                return Err(GatewayError::ConfigError(
                    "Model conversion rules need both source and target".to_string(),
                ));
            }
        }

        if !(1..=300).contains(&self.maintenance.tick_secs) {
            return Err(GatewayError::ConfigError(
                "Maintenance tick_secs must be between 1 and 300".to_string(),
            ));
        }
        if self.maintenance.max_attempts == 0 {
            return Err(GatewayError::ConfigError(
                "Maintenance max_attempts must be greater than 0".to_string(),
            ));
        }

        if self.health.error_threshold == 0 {
            return Err(GatewayError::ConfigError(
                "Error threshold must be greater than 0".to_string(),
            ));
        }

        if self.timeouts.connect_secs == 0
            || self.timeouts.first_byte_secs == 0
            || self.timeouts.idle_secs == 0
        {
            return Err(GatewayError::ConfigError(
                "Timeouts must be greater than 0".to_string(),
            ));
        }

        self.retry_policy()?;
        Ok(())
    }
}
