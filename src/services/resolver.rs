use crate::errors::{ToolError, ToolErrorKind};
use crate::models::Server;
use crate::services::config::{PlatformConfig, SshDefaults};
use crate::services::context::{ExecutionContext, Interrupt};
use crate::services::logger::Logger;
use crate::services::registry::ReachabilityProbe;
use crate::transport::{
    CommandOutput, ContainerEngine, EngineFactory, RemoteSession, SshAuth, SshEndpoint,
    SshTransport,
};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    BoundServer(Uuid),
    PlatformDefault,
}

impl CredentialSource {
    pub fn describe(self) -> Value {
        match self {
            CredentialSource::BoundServer(id) => serde_json::json!({"server_id": id}),
            CredentialSource::PlatformDefault => serde_json::json!({"server_id": null}),
        }
    }
}

/// Everything needed to open one SSH session.
#[derive(Clone)]
pub struct Credentials {
    pub source: CredentialSource,
    pub endpoint: SshEndpoint,
    pub private_key_path: Option<String>,
    pub private_key_pem: Option<String>,
    pub passphrase: Option<String>,
    pub password: Option<String>,
}

impl Credentials {
    pub fn from_server(server: &Server) -> Self {
        Self {
            source: CredentialSource::BoundServer(server.id),
            endpoint: SshEndpoint {
                host: server.host.clone(),
                port: server.port,
                username: server.username.clone(),
            },
            private_key_path: non_empty(server.ssh_private_key_path.as_deref()),
            private_key_pem: None,
            passphrase: None,
            password: non_empty(server.ssh_password.as_deref()),
        }
    }

    pub fn from_defaults(defaults: &SshDefaults) -> Self {
        Self {
            source: CredentialSource::PlatformDefault,
            endpoint: SshEndpoint {
                host: defaults.host.clone(),
                port: defaults.port,
                username: defaults.username.clone(),
            },
            private_key_path: non_empty(defaults.private_key_path.as_deref()),
            private_key_pem: non_empty(defaults.private_key.as_deref()),
            passphrase: non_empty(defaults.passphrase.as_deref()),
            password: non_empty(defaults.password.as_deref()),
        }
    }

    /// Authentication attempts in the order they are tried: key file, inline
    /// key, then password.
    pub fn auth_chain(&self) -> Vec<SshAuth> {
        let mut chain = Vec::new();
        if let Some(path) = &self.private_key_path {
            chain.push(SshAuth::PrivateKeyFile {
                path: path.clone(),
                passphrase: self.passphrase.clone(),
            });
        }
        if let Some(pem) = &self.private_key_pem {
            chain.push(SshAuth::PrivateKeyMemory {
                pem: pem.clone(),
                passphrase: self.passphrase.clone(),
            });
        }
        if let Some(password) = &self.password {
            chain.push(SshAuth::Password(password.clone()));
        }
        chain
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("source", &self.source)
            .field("endpoint", &self.endpoint)
            .field("private_key_path", &self.private_key_path)
            .field("has_private_key_pem", &self.private_key_pem.is_some())
            .field("has_password", &self.password.is_some())
            .finish()
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Tries each configured method in order and returns the first session that
/// authenticates. Never dials when no method is configured.
pub fn authenticate(
    transport: &dyn SshTransport,
    credentials: &Credentials,
    timeout: Duration,
    interrupt: &Interrupt,
) -> Result<Box<dyn RemoteSession>, ToolError> {
    let chain = credentials.auth_chain();
    if chain.is_empty() {
        return Err(
            ToolError::authentication_failed("no SSH credentials available")
                .with_hint("Configure a private key or a password for this server.")
                .with_details(credentials.source.describe()),
        );
    }

    let mut reasons = serde_json::Map::new();
    let mut all_unreachable = true;
    for auth in &chain {
        interrupt.check()?;
        match transport.connect(&credentials.endpoint, auth, timeout, interrupt) {
            Ok(session) => return Ok(session),
            Err(err) if err.kind == ToolErrorKind::Cancelled => return Err(err),
            Err(err) => {
                all_unreachable &= err.kind == ToolErrorKind::SshUnreachable;
                let entry = reasons
                    .entry(auth.method().to_string())
                    .or_insert_with(|| Value::String(String::new()));
                let merged = match entry.as_str() {
                    Some("") | None => err.message.clone(),
                    Some(previous) => format!("{}; {}", previous, err.message),
                };
                *entry = Value::String(merged);
            }
        }
    }

    let details = Value::Object(reasons);
    if all_unreachable {
        return Err(ToolError::ssh_unreachable(format!(
            "cannot reach {}",
            credentials.endpoint.address()
        ))
        .with_details(details));
    }
    Err(ToolError::authentication_failed(format!(
        "SSH authentication to {} failed",
        credentials.endpoint.address()
    ))
    .with_details(details))
}

/// Where an engine handle ended up pointing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineOrigin {
    Remote(CredentialSource),
    LocalSocket,
}

pub struct EngineHandle {
    engine: Box<dyn ContainerEngine>,
    origin: EngineOrigin,
}

impl EngineHandle {
    pub fn engine(&self) -> &dyn ContainerEngine {
        self.engine.as_ref()
    }

    pub fn origin(&self) -> EngineOrigin {
        self.origin
    }

    pub fn close(self) {}
}

/// Single-use SSH handle. Dropping it closes the session.
pub struct RemoteHandle {
    logger: Logger,
    session: Option<Box<dyn RemoteSession>>,
    ctx: ExecutionContext,
    exec_timeout: Duration,
    source: CredentialSource,
}

impl RemoteHandle {
    pub fn source(&self) -> CredentialSource {
        self.source
    }

    pub async fn run(&mut self, command: &str) -> Result<CommandOutput, ToolError> {
        let mut session = self
            .session
            .take()
            .ok_or_else(|| ToolError::internal("remote handle is closed"))?;
        let command = command.to_string();
        let timeout = self.exec_timeout;
        let (session, output) = self
            .ctx
            .run_blocking("ssh exec", move |interrupt| {
                let output = session.exec(&command, timeout, &interrupt);
                Ok((session, output))
            })
            .await?;
        self.session = Some(session);
        output
    }

    pub async fn close(mut self) {
        if let Some(session) = self.session.take() {
            close_session(&self.logger, session).await;
        }
    }
}

/// Turns an execution context into a live SSH session or engine client.
#[derive(Clone)]
pub struct ConnectionResolver {
    logger: Logger,
    config: Arc<PlatformConfig>,
    transport: Arc<dyn SshTransport>,
    engines: Arc<dyn EngineFactory>,
}

impl ConnectionResolver {
    pub fn new(
        logger: Logger,
        config: Arc<PlatformConfig>,
        transport: Arc<dyn SshTransport>,
        engines: Arc<dyn EngineFactory>,
    ) -> Self {
        Self {
            logger: logger.child("resolver"),
            config,
            transport,
            engines,
        }
    }

    pub fn credentials(&self, ctx: &ExecutionContext) -> Credentials {
        match &ctx.target {
            Some(server) => Credentials::from_server(server),
            None => Credentials::from_defaults(&self.config.ssh),
        }
    }

    async fn open_session(
        &self,
        ctx: &ExecutionContext,
        credentials: Credentials,
    ) -> Result<Box<dyn RemoteSession>, ToolError> {
        let transport = self.transport.clone();
        let timeout = self.config.connect_timeout;
        self.logger.debug(
            "opening ssh session",
            Some(&serde_json::json!({
                "endpoint": credentials.endpoint.address(),
                "source": credentials.source.describe(),
            })),
        );
        ctx.run_blocking("ssh connect", move |interrupt| {
            authenticate(transport.as_ref(), &credentials, timeout, &interrupt)
        })
        .await
    }

    pub async fn connect(&self, ctx: &ExecutionContext) -> Result<RemoteHandle, ToolError> {
        let credentials = self.credentials(ctx);
        let source = credentials.source;
        let session = self.open_session(ctx, credentials).await?;
        Ok(RemoteHandle {
            logger: self.logger.clone(),
            session: Some(session),
            ctx: ctx.clone(),
            exec_timeout: self.config.exec_timeout,
            source,
        })
    }

    async fn remote_engine(
        &self,
        ctx: &ExecutionContext,
        credentials: Credentials,
    ) -> Result<Box<dyn ContainerEngine>, ToolError> {
        let session = self.open_session(ctx, credentials).await?;
        let bridge = ctx
            .run_blocking("engine bridge", move |_| session.into_engine_bridge())
            .await?;
        let engine = self.engines.remote(bridge)?;
        match tokio::time::timeout(self.config.connect_timeout, engine.ping()).await {
            Ok(result) => result?,
            Err(_) => return Err(ToolError::engine_unavailable("engine ping timed out")),
        }
        Ok(engine)
    }

    /// Engine client for the context's target. Only an unbound context may
    /// degrade to the local engine socket.
    pub async fn engine(&self, ctx: &ExecutionContext) -> Result<EngineHandle, ToolError> {
        let credentials = self.credentials(ctx);
        let source = credentials.source;
        let failure = match self.remote_engine(ctx, credentials).await {
            Ok(engine) => {
                return Ok(EngineHandle {
                    engine,
                    origin: EngineOrigin::Remote(source),
                })
            }
            Err(err) => err,
        };
        if failure.kind == ToolErrorKind::Cancelled {
            return Err(failure);
        }
        ctx.check()?;

        if let Some(server) = &ctx.target {
            return Err(ToolError::engine_unavailable(format!(
                "container engine on server {} is unreachable: {}",
                server.name, failure.message
            ))
            .with_details(serde_json::json!({
                "server_id": server.id,
                "cause": failure.code,
                "cause_details": failure.details,
            })));
        }

        self.logger.warn(
            "remote engine unavailable, using local socket",
            Some(&serde_json::json!({"cause": failure.code, "error": failure.message})),
        );
        let engine = self.engines.local()?;
        engine.ping().await?;
        Ok(EngineHandle {
            engine,
            origin: EngineOrigin::LocalSocket,
        })
    }
}

#[async_trait]
impl ReachabilityProbe for ConnectionResolver {
    async fn probe(
        &self,
        ctx: &ExecutionContext,
        credentials: Credentials,
    ) -> Result<(), ToolError> {
        let session = self.open_session(ctx, credentials).await?;
        close_session(&self.logger, session).await;
        Ok(())
    }
}

async fn close_session(logger: &Logger, mut session: Box<dyn RemoteSession>) {
    if let Err(err) = tokio::task::spawn_blocking(move || session.close()).await {
        logger.debug(
            "ssh session close failed",
            Some(&serde_json::json!({"error": err.to_string()})),
        );
    }
}
