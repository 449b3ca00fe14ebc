use arc_swap::ArcSwap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::client::HttpTransport;
use crate::config::GatewayConfig;
use crate::credential::{CredentialRegistry, ProviderFamily};
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::transform::ModelMapper;
use crate::transport::Transport;
use crate::usage::{TracingUsageSink, UsageSink};

/// Shared state behind every route.
///
/// The declarative config is swapped whole on reload; credential health lives
/// in the registry and is keyed by credential id, so it outlives the swap.
pub struct AppState {
    config: ArcSwap<GatewayConfig>,
    mapper: ArcSwap<ModelMapper>,
    dispatcher: Dispatcher,
    usage_sink: Arc<dyn UsageSink>,
}

impl AppState {
    /// Build state with the reqwest transport configured from `config.timeouts`
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(&config.timeouts)?);
        Self::with_transport(config, transport)
    }

    pub fn with_transport(config: GatewayConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let policy = config.retry_policy()?;
        let registry = Arc::new(CredentialRegistry::new(
            config.claude.clone(),
            config.codex.clone(),
            config.health.policy(),
        ));
        info!(
            claude = config.claude.len(),
            codex = config.codex.len(),
            transport = transport.name(),
            "Credential registry ready"
        );

        Ok(Self {
            mapper: ArcSwap::from_pointee(mapper_for(&config)),
            config: ArcSwap::from_pointee(config),
            dispatcher: Dispatcher::new(registry, transport, policy),
            usage_sink: Arc::new(TracingUsageSink),
        })
    }

    pub fn with_usage_sink(mut self, sink: Arc<dyn UsageSink>) -> Self {
        self.usage_sink = sink;
        self
    }

    pub fn config(&self) -> Arc<GatewayConfig> {
        self.config.load_full()
    }

    pub fn mapper(&self) -> Arc<ModelMapper> {
        self.mapper.load_full()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn registry(&self) -> &Arc<CredentialRegistry> {
        self.dispatcher.registry()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        self.dispatcher.transport()
    }

    pub fn usage_sink(&self) -> Arc<dyn UsageSink> {
        self.usage_sink.clone()
    }

    /// Swap in a new config snapshot.
    ///
    /// In-flight requests keep the snapshot they started with. The listen
    /// address and timeouts only take effect on restart.
    pub fn reload(&self, config: GatewayConfig) -> Result<()> {
        config.validate()?;
        let policy = config.retry_policy()?;
        let current = self.config();

        if current.server.listen_addr != config.server.listen_addr {
            warn!(
                current = %current.server.listen_addr,
                requested = %config.server.listen_addr,
                "Listen address change ignored until restart"
            );
        }
        if current.timeouts != config.timeouts {
            warn!("Timeout changes ignored until restart");
        }

        self.registry().reload(
            config.claude.clone(),
            config.codex.clone(),
            config.health.policy(),
        );
        self.dispatcher.set_policy(policy);
        self.mapper.store(Arc::new(mapper_for(&config)));
        info!(
            claude = config.credentials(ProviderFamily::Claude).len(),
            codex = config.credentials(ProviderFamily::Codex).len(),
            "Configuration reloaded"
        );
        self.config.store(Arc::new(config));
        Ok(())
    }
}

fn mapper_for(config: &GatewayConfig) -> ModelMapper {
    ModelMapper::new(
        config.model_conversions.clone(),
        config.openai_bridge.default_model.clone(),
    )
}
