#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hostctl::app::App;
use hostctl::errors::ToolError;
use hostctl::models::{
    CreateServerRequest, ListingScope, Organization, Server, ServerQuery, ServerStatus,
};
use hostctl::services::config::PlatformConfig;
use hostctl::services::context::{ExecutionContext, Interrupt};
use hostctl::services::logger::{LogLevel, Logger};
use hostctl::services::registry::{ReachabilityProbe, ServerRegistry};
use hostctl::services::resolver::Credentials;
use hostctl::stores::{ServerStore, ServerTx, SqliteServerStore, StoreError};
use hostctl::transport::{
    CommandOutput, ContainerEngine, ContainerInfo, EngineBridge, EngineFactory, RemoteSession,
    SshAuth, SshEndpoint, SshTransport,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub fn quiet_logger() -> Logger {
    Logger::with_level("test", LogLevel::Error)
}

pub fn test_config() -> PlatformConfig {
    PlatformConfig::from_lookup(|key| match key {
        "HOSTCTL_DATABASE_URL" => Some("sqlite::memory:".to_string()),
        "HOSTCTL_SSH_HOST" => Some("10.9.9.9".to_string()),
        "HOSTCTL_SSH_PASSWORD" => Some("platform-secret".to_string()),
        "HOSTCTL_SSH_CONNECT_TIMEOUT_MS" => Some("2000".to_string()),
        _ => None,
    })
}

pub async fn memory_store() -> Arc<dyn ServerStore> {
    let store = SqliteServerStore::open_in_memory().expect("in-memory sqlite");
    store.migrate().await.expect("migrate");
    Arc::new(store)
}

/// A user inside a freshly inserted organization.
#[derive(Debug, Clone, Copy)]
pub struct Tenant {
    pub organization_id: Uuid,
    pub user_id: Uuid,
}

pub async fn seed_tenant(store: &Arc<dyn ServerStore>) -> Tenant {
    let org = Organization::new("acme");
    store.insert_organization(&org).await.expect("organization");
    Tenant {
        organization_id: org.id,
        user_id: Uuid::new_v4(),
    }
}

pub fn create_request(name: &str, host: &str, port: i64) -> CreateServerRequest {
    CreateServerRequest {
        name: name.to_string(),
        description: "test host".to_string(),
        host: host.to_string(),
        port,
        username: "deploy".to_string(),
        ssh_password: Some("s3cret".to_string()),
        ..Default::default()
    }
}

pub fn server_record(
    password: Option<&str>,
    key_path: Option<&str>,
    owner: Uuid,
    organization_id: Uuid,
) -> Server {
    let now = Utc::now();
    Server {
        id: Uuid::new_v4(),
        name: "bound".to_string(),
        description: String::new(),
        host: "10.0.0.5".to_string(),
        port: 22,
        username: "ops".to_string(),
        ssh_password: password.map(str::to_string),
        ssh_private_key_path: key_path.map(str::to_string),
        status: ServerStatus::Active,
        user_id: owner,
        organization_id,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    }
}

pub struct AcceptAll;

#[async_trait]
impl ReachabilityProbe for AcceptAll {
    async fn probe(
        &self,
        _ctx: &ExecutionContext,
        _credentials: Credentials,
    ) -> Result<(), ToolError> {
        Ok(())
    }
}

/// Rejects every probe and remembers how often it was asked.
#[derive(Default)]
pub struct RejectAll {
    pub calls: AtomicUsize,
}

#[async_trait]
impl ReachabilityProbe for RejectAll {
    async fn probe(
        &self,
        _ctx: &ExecutionContext,
        _credentials: Credentials,
    ) -> Result<(), ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ToolError::authentication_failed("password rejected"))
    }
}

pub fn registry_with(store: Arc<dyn ServerStore>, probe: Arc<dyn ReachabilityProbe>) -> ServerRegistry {
    ServerRegistry::new(quiet_logger(), store, probe)
}

// SSH fakes

/// Accepts the listed auth methods. Every dial is recorded as
/// `method@host:port`.
pub struct FakeTransport {
    accepted: Vec<&'static str>,
    unreachable: bool,
    bridge: Option<SocketAddr>,
    panic_on_close: bool,
    pub dials: Arc<Mutex<Vec<String>>>,
    pub commands: Arc<Mutex<Vec<String>>>,
}

impl FakeTransport {
    pub fn accepting(methods: &[&'static str]) -> Self {
        Self {
            accepted: methods.to_vec(),
            unreachable: false,
            bridge: Some(SocketAddr::from(([127, 0, 0, 1], 1))),
            panic_on_close: false,
            dials: Arc::new(Mutex::new(Vec::new())),
            commands: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::accepting(&[])
        }
    }

    pub fn without_engine_bridge(mut self) -> Self {
        self.bridge = None;
        self
    }

    pub fn panicking_on_close(mut self) -> Self {
        self.panic_on_close = true;
        self
    }

    pub fn dial_log(&self) -> Vec<String> {
        self.dials.lock().unwrap().clone()
    }

    pub fn command_log(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

impl SshTransport for FakeTransport {
    fn connect(
        &self,
        endpoint: &SshEndpoint,
        auth: &SshAuth,
        _timeout: Duration,
        interrupt: &Interrupt,
    ) -> Result<Box<dyn RemoteSession>, ToolError> {
        interrupt.check()?;
        self.dials
            .lock()
            .unwrap()
            .push(format!("{}@{}", auth.method(), endpoint.address()));
        if self.unreachable {
            return Err(ToolError::ssh_unreachable("connection refused"));
        }
        if !self.accepted.contains(&auth.method()) {
            return Err(ToolError::authentication_failed(format!(
                "{} rejected",
                auth.method()
            )));
        }
        Ok(Box::new(FakeSession {
            bridge: self.bridge,
            panic_on_close: self.panic_on_close,
            commands: self.commands.clone(),
        }))
    }
}

pub struct FakeSession {
    bridge: Option<SocketAddr>,
    panic_on_close: bool,
    commands: Arc<Mutex<Vec<String>>>,
}

impl RemoteSession for FakeSession {
    fn exec(
        &mut self,
        command: &str,
        _timeout: Duration,
        interrupt: &Interrupt,
    ) -> Result<CommandOutput, ToolError> {
        interrupt.check()?;
        self.commands.lock().unwrap().push(command.to_string());
        Ok(CommandOutput {
            stdout: format!("ran: {}", command),
            stderr: String::new(),
            exit_code: 0,
        })
    }

    fn close(&mut self) {
        if self.panic_on_close {
            panic!("session teardown blew up");
        }
    }

    fn into_engine_bridge(self: Box<Self>) -> Result<EngineBridge, ToolError> {
        self.bridge
            .map(EngineBridge::detached)
            .ok_or_else(|| ToolError::engine_unavailable("dial-stdio not supported"))
    }
}

// Engine fakes

/// Containers by id with their display names. Calls are recorded as
/// `origin:action:id`.
pub struct FakeEngineFactory {
    remote_ok: bool,
    containers: HashMap<String, String>,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl FakeEngineFactory {
    pub fn new(containers: &[(&str, &str)]) -> Self {
        Self {
            remote_ok: true,
            containers: containers
                .iter()
                .map(|(id, name)| (id.to_string(), name.to_string()))
                .collect(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn refusing_remote(mut self) -> Self {
        self.remote_ok = false;
        self
    }

    pub fn call_log(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn engine(&self, origin: &'static str) -> Box<dyn ContainerEngine> {
        Box::new(FakeEngine {
            origin,
            containers: self.containers.clone(),
            calls: self.calls.clone(),
        })
    }
}

impl EngineFactory for FakeEngineFactory {
    fn remote(&self, _bridge: EngineBridge) -> Result<Box<dyn ContainerEngine>, ToolError> {
        if !self.remote_ok {
            return Err(ToolError::engine_unavailable("remote engine refused"));
        }
        Ok(self.engine("remote"))
    }

    fn local(&self) -> Result<Box<dyn ContainerEngine>, ToolError> {
        Ok(self.engine("local"))
    }
}

pub struct FakeEngine {
    origin: &'static str,
    containers: HashMap<String, String>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl FakeEngine {
    fn record(&self, action: &str, id: &str) -> Result<(), ToolError> {
        if !self.containers.contains_key(id) {
            return Err(ToolError::not_found(
                "CONTAINER_NOT_FOUND",
                format!("no such container: {}", id),
            ));
        }
        self.calls
            .lock()
            .unwrap()
            .push(format!("{}:{}:{}", self.origin, action, id));
        Ok(())
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn ping(&self) -> Result<(), ToolError> {
        Ok(())
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerInfo, ToolError> {
        let name = self.containers.get(container_id).cloned().ok_or_else(|| {
            ToolError::not_found(
                "CONTAINER_NOT_FOUND",
                format!("no such container: {}", container_id),
            )
        })?;
        Ok(ContainerInfo {
            id: container_id.to_string(),
            name,
            image: Some("nginx:latest".to_string()),
            state: Some("running".to_string()),
            running: true,
        })
    }

    async fn start(&self, container_id: &str) -> Result<(), ToolError> {
        self.record("start", container_id)
    }

    async fn stop(&self, container_id: &str) -> Result<(), ToolError> {
        self.record("stop", container_id)
    }

    async fn restart(&self, container_id: &str) -> Result<(), ToolError> {
        self.record("restart", container_id)
    }

    async fn remove(&self, container_id: &str, _force: bool) -> Result<(), ToolError> {
        self.record("remove", container_id)
    }
}

pub fn app_with(
    store: Arc<dyn ServerStore>,
    transport: Arc<FakeTransport>,
    engines: Arc<FakeEngineFactory>,
) -> App {
    App::from_parts(quiet_logger(), test_config(), store, transport, engines)
}

// Storage wrapper

/// Counts uniqueness lookups made inside transactions and every
/// non-transactional read.
pub struct CountingStore {
    inner: Arc<dyn ServerStore>,
    pub uniqueness_lookups: Arc<AtomicUsize>,
    pub reads: Arc<AtomicUsize>,
}

impl CountingStore {
    pub fn wrap(inner: Arc<dyn ServerStore>) -> Self {
        Self {
            inner,
            uniqueness_lookups: Arc::new(AtomicUsize::new(0)),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn lookups(&self) -> usize {
        self.uniqueness_lookups.load(Ordering::SeqCst)
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServerStore for CountingStore {
    async fn migrate(&self) -> Result<(), StoreError> {
        self.inner.migrate().await
    }

    async fn begin(&self) -> Result<Box<dyn ServerTx>, StoreError> {
        let inner = self.inner.begin().await?;
        Ok(Box::new(CountingTx {
            inner,
            lookups: self.uniqueness_lookups.clone(),
        }))
    }

    async fn find_live(&self, id: Uuid) -> Result<Option<Server>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.find_live(id).await
    }

    async fn count_page(
        &self,
        scope: &ListingScope,
        search: Option<&str>,
    ) -> Result<u64, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.count_page(scope, search).await
    }

    async fn list_page(
        &self,
        scope: &ListingScope,
        query: &ServerQuery,
    ) -> Result<Vec<Server>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.list_page(scope, query).await
    }

    async fn insert_organization(&self, org: &Organization) -> Result<(), StoreError> {
        self.inner.insert_organization(org).await
    }
}

struct CountingTx {
    inner: Box<dyn ServerTx>,
    lookups: Arc<AtomicUsize>,
}

#[async_trait]
impl ServerTx for CountingTx {
    async fn organization_exists(&mut self, id: Uuid) -> Result<bool, StoreError> {
        self.inner.organization_exists(id).await
    }

    async fn find_live(&mut self, id: Uuid) -> Result<Option<Server>, StoreError> {
        self.inner.find_live(id).await
    }

    async fn find_by_name(
        &mut self,
        organization_id: Uuid,
        name: &str,
        exclude: Option<Uuid>,
    ) -> Result<Option<Server>, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.find_by_name(organization_id, name, exclude).await
    }

    async fn find_by_endpoint(
        &mut self,
        organization_id: Uuid,
        host: &str,
        port: u16,
        exclude: Option<Uuid>,
    ) -> Result<Option<Server>, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner
            .find_by_endpoint(organization_id, host, port, exclude)
            .await
    }

    async fn insert(&mut self, server: &Server) -> Result<(), StoreError> {
        self.inner.insert(server).await
    }

    async fn update(&mut self, server: &Server) -> Result<(), StoreError> {
        self.inner.update(server).await
    }

    async fn update_status(
        &mut self,
        id: Uuid,
        status: ServerStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.inner.update_status(id, status, at).await
    }

    async fn soft_delete(&mut self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.inner.soft_delete(id, at).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.rollback().await
    }
}
