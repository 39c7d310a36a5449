use crate::errors::ToolError;
use crate::managers::{ContainersManager, RemoteManager, ServersManager};
use crate::services::config::PlatformConfig;
use crate::services::containers::ContainerControl;
use crate::services::guard::ProtectedTargetGuard;
use crate::services::logger::Logger;
use crate::services::registry::{ReachabilityProbe, ServerRegistry};
use crate::services::resolver::ConnectionResolver;
use crate::services::tool_executor::{ToolExecutor, ToolHandler};
use crate::stores::{open_store, ServerStore};
use crate::transport::{BollardEngineFactory, EngineFactory, Ssh2Transport, SshTransport};
use crate::utils::redact::redact_url;
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct App {
    pub logger: Logger,
    pub config: Arc<PlatformConfig>,
    pub store: Arc<dyn ServerStore>,
    pub registry: Arc<ServerRegistry>,
    pub resolver: ConnectionResolver,
    pub tool_executor: Arc<ToolExecutor>,
}

impl App {
    pub async fn initialize(config: PlatformConfig) -> Result<Self, ToolError> {
        let logger = Logger::new("hostctl");
        let store = open_store(&config.database_url, config.db_pool_size).await?;
        store.migrate().await?;
        logger.info(
            "storage ready",
            Some(&serde_json::json!({"database_url": redact_url(&config.database_url)})),
        );
        let transport: Arc<dyn SshTransport> = Arc::new(Ssh2Transport::new(logger.clone()));
        let engines: Arc<dyn EngineFactory> = Arc::new(BollardEngineFactory);
        Ok(Self::from_parts(logger, config, store, transport, engines))
    }

    /// Wires every service around already-built storage and transports.
    pub fn from_parts(
        logger: Logger,
        config: PlatformConfig,
        store: Arc<dyn ServerStore>,
        transport: Arc<dyn SshTransport>,
        engines: Arc<dyn EngineFactory>,
    ) -> Self {
        let config = Arc::new(config);
        let resolver = ConnectionResolver::new(logger.clone(), config.clone(), transport, engines);
        let probe: Arc<dyn ReachabilityProbe> = Arc::new(resolver.clone());
        let registry = Arc::new(ServerRegistry::new(logger.clone(), store.clone(), probe));
        let guard = ProtectedTargetGuard::new(&config.protected_name);
        let control = ContainerControl::new(logger.clone(), resolver.clone(), guard);

        let mut handlers: BTreeMap<String, Arc<dyn ToolHandler>> = BTreeMap::new();
        handlers.insert(
            "servers".to_string(),
            Arc::new(ServersManager::new(logger.clone(), registry.clone())),
        );
        handlers.insert(
            "remote".to_string(),
            Arc::new(RemoteManager::new(
                logger.clone(),
                registry.clone(),
                resolver.clone(),
            )),
        );
        handlers.insert(
            "containers".to_string(),
            Arc::new(ContainersManager::new(
                logger.clone(),
                registry.clone(),
                control,
            )),
        );
        let tool_executor = Arc::new(ToolExecutor::new(logger.clone(), handlers));

        Self {
            logger,
            config,
            store,
            registry,
            resolver,
            tool_executor,
        }
    }
}
