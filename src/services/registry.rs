use crate::errors::{ToolError, ToolErrorKind};
use crate::models::{
    CreateServerRequest, Pagination, Server, ServerPage, ServerQuery, ServerQueryParams,
    UpdateServerRequest,
};
use crate::services::access::OwnershipPolicy;
use crate::services::context::ExecutionContext;
use crate::services::logger::Logger;
use crate::services::resolver::Credentials;
use crate::services::validation::Validation;
use crate::stores::{ServerStore, ServerTx};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Live SSH check run before a record with new connection facts is stored.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(
        &self,
        ctx: &ExecutionContext,
        credentials: Credentials,
    ) -> Result<(), ToolError>;
}

/// Persistent registry of servers. Every write runs in one transaction that
/// is rolled back on any error.
#[derive(Clone)]
pub struct ServerRegistry {
    logger: Logger,
    validation: Validation,
    store: Arc<dyn ServerStore>,
    probe: Arc<dyn ReachabilityProbe>,
    ownership: OwnershipPolicy,
}

impl ServerRegistry {
    pub fn new(
        logger: Logger,
        store: Arc<dyn ServerStore>,
        probe: Arc<dyn ReachabilityProbe>,
    ) -> Self {
        Self {
            logger: logger.child("registry"),
            validation: Validation::new(),
            store,
            probe,
            ownership: OwnershipPolicy::new(),
        }
    }

    pub async fn create(
        &self,
        ctx: &ExecutionContext,
        request: &CreateServerRequest,
        owner: Uuid,
        organization_id: Uuid,
    ) -> Result<Server, ToolError> {
        let draft = self.validation.validate_create(request)?;
        let now = Utc::now();
        let server = Server {
            id: Uuid::new_v4(),
            name: draft.name,
            description: draft.description,
            host: draft.host,
            port: draft.port,
            username: draft.username,
            ssh_password: draft.ssh_password,
            ssh_private_key_path: draft.ssh_private_key_path,
            status: draft.status,
            user_id: owner,
            organization_id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.verify_reachable(ctx, &server).await?;

        let mut tx = self.begin().await?;
        let outcome = self.insert_new(tx.as_mut(), &server).await;
        self.finish(tx, outcome).await?;

        self.logger.info(
            "server created",
            Some(&serde_json::json!({
                "server_id": server.id,
                "name": server.name,
                "organization_id": organization_id,
            })),
        );
        Ok(server)
    }

    pub async fn get(&self, id: &str, requester: Uuid) -> Result<Server, ToolError> {
        let id = self.validation.validate_id(id, "server id")?;
        let server = self
            .store
            .find_live(id)
            .await?
            .ok_or_else(|| missing(id))?;
        self.ownership.authorize_record(&server, requester)?;
        Ok(server)
    }

    pub async fn update(
        &self,
        ctx: &ExecutionContext,
        request: &UpdateServerRequest,
        requester: Uuid,
    ) -> Result<Server, ToolError> {
        let current = self.get(&request.id, requester).await?;
        let preview = self.merge_update(&current, request)?;
        if request.touches_connection() && connection_changed(&current, &preview) {
            self.verify_reachable(ctx, &preview).await?;
        }

        let mut tx = self.begin().await?;
        let outcome = self
            .apply_update(tx.as_mut(), current.id, request, requester)
            .await;
        let updated = self.finish(tx, outcome).await?;

        self.logger.info(
            "server updated",
            Some(&serde_json::json!({"server_id": updated.id, "name": updated.name})),
        );
        Ok(updated)
    }

    /// Changes only the status, then returns the record as persisted.
    pub async fn update_status(
        &self,
        id: &str,
        status: &str,
        requester: Uuid,
    ) -> Result<Server, ToolError> {
        let id = self.validation.validate_id(id, "server id")?;
        let status = self.validation.validate_status(status)?;

        let mut tx = self.begin().await?;
        let outcome = async {
            self.owned_in_tx(tx.as_mut(), id, requester).await?;
            tx.update_status(id, status, Utc::now()).await?;
            Ok::<(), ToolError>(())
        }
        .await;
        self.finish(tx, outcome).await?;

        self.store
            .find_live(id)
            .await?
            .ok_or_else(|| missing(id))
    }

    pub async fn delete(&self, id: &str, requester: Uuid) -> Result<Server, ToolError> {
        let id = self.validation.validate_id(id, "server id")?;
        let mut tx = self.begin().await?;
        let outcome = async {
            let mut server = self.owned_in_tx(tx.as_mut(), id, requester).await?;
            let at = Utc::now();
            tx.soft_delete(id, at).await?;
            server.deleted_at = Some(at);
            server.updated_at = at;
            Ok::<Server, ToolError>(server)
        }
        .await;
        let deleted = self.finish(tx, outcome).await?;
        self.logger.info(
            "server deleted",
            Some(&serde_json::json!({"server_id": deleted.id, "name": deleted.name})),
        );
        Ok(deleted)
    }

    pub async fn list(
        &self,
        organization_id: Uuid,
        requester: Uuid,
        params: &ServerQueryParams,
    ) -> Result<ServerPage, ToolError> {
        let query = ServerQuery::from_params(params)?;
        let scope = self.ownership.listing_scope(organization_id, requester);
        let total = self
            .store
            .count_page(&scope, query.search.as_deref())
            .await?;
        let servers = if total == 0 {
            Vec::new()
        } else {
            self.store.list_page(&scope, &query).await?
        };
        Ok(ServerPage {
            servers: servers.iter().map(Server::summary).collect(),
            pagination: Pagination::compute(query.page, query.page_size, total),
        })
    }

    /// Maps an optional server id from a request onto the caller's record.
    pub async fn resolve_target(
        &self,
        server_id: Option<&str>,
        requester: Uuid,
    ) -> Result<Option<Server>, ToolError> {
        match server_id.map(str::trim).filter(|id| !id.is_empty()) {
            None => Ok(None),
            Some(id) => self.get(id, requester).await.map(Some),
        }
    }

    async fn begin(&self) -> Result<Box<dyn ServerTx>, ToolError> {
        self.store
            .begin()
            .await
            .map_err(|err| ToolError::transaction(format!("failed to begin transaction: {}", err)))
    }

    async fn finish<T>(
        &self,
        tx: Box<dyn ServerTx>,
        outcome: Result<T, ToolError>,
    ) -> Result<T, ToolError> {
        match outcome {
            Ok(value) => {
                tx.commit().await.map_err(|err| {
                    ToolError::transaction(format!("failed to commit transaction: {}", err))
                })?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    self.logger.warn(
                        "rollback failed",
                        Some(&serde_json::json!({"error": rollback.to_string()})),
                    );
                }
                Err(err)
            }
        }
    }

    async fn verify_reachable(
        &self,
        ctx: &ExecutionContext,
        server: &Server,
    ) -> Result<(), ToolError> {
        ctx.check()?;
        match self.probe.probe(ctx, Credentials::from_server(server)).await {
            Ok(()) => Ok(()),
            Err(err) if matches!(err.kind, ToolErrorKind::Cancelled | ToolErrorKind::Timeout) => {
                Err(err)
            }
            Err(err) => Err(ToolError::ssh_unreachable(format!(
                "cannot establish an SSH connection to {}: {}",
                server.endpoint(),
                err.message
            ))
            .with_details(serde_json::json!({
                "cause": err.code,
                "reasons": err.details,
            }))),
        }
    }

    async fn insert_new(&self, tx: &mut dyn ServerTx, server: &Server) -> Result<(), ToolError> {
        if !tx.organization_exists(server.organization_id).await? {
            return Err(ToolError::organization_not_found(format!(
                "organization {} not found",
                server.organization_id
            )));
        }
        self.ensure_unique(tx, server, None, true, true).await?;
        tx.insert(server).await?;
        Ok(())
    }

    async fn apply_update(
        &self,
        tx: &mut dyn ServerTx,
        id: Uuid,
        request: &UpdateServerRequest,
        requester: Uuid,
    ) -> Result<Server, ToolError> {
        let fresh = self.owned_in_tx(tx, id, requester).await?;
        let merged = self.merge_update(&fresh, request)?;
        let name_changed = merged.name != fresh.name;
        let endpoint_changed = merged.host != fresh.host || merged.port != fresh.port;
        self.ensure_unique(tx, &merged, Some(id), name_changed, endpoint_changed)
            .await?;
        tx.update(&merged).await?;
        Ok(merged)
    }

    async fn owned_in_tx(
        &self,
        tx: &mut dyn ServerTx,
        id: Uuid,
        requester: Uuid,
    ) -> Result<Server, ToolError> {
        let server = tx.find_live(id).await?.ok_or_else(|| missing(id))?;
        self.ownership.authorize_record(&server, requester)?;
        Ok(server)
    }

    async fn ensure_unique(
        &self,
        tx: &mut dyn ServerTx,
        server: &Server,
        exclude: Option<Uuid>,
        check_name: bool,
        check_endpoint: bool,
    ) -> Result<(), ToolError> {
        if check_name
            && tx
                .find_by_name(server.organization_id, &server.name, exclude)
                .await?
                .is_some()
        {
            return Err(ToolError::already_exists(format!(
                "a server named '{}' already exists in this organization",
                server.name
            ))
            .with_details(serde_json::json!({"field": "name"})));
        }
        if check_endpoint
            && tx
                .find_by_endpoint(server.organization_id, &server.host, server.port, exclude)
                .await?
                .is_some()
        {
            return Err(ToolError::already_exists(format!(
                "a server for {} already exists in this organization",
                server.endpoint()
            ))
            .with_details(serde_json::json!({"field": "host_port"})));
        }
        Ok(())
    }

    fn merge_update(
        &self,
        current: &Server,
        request: &UpdateServerRequest,
    ) -> Result<Server, ToolError> {
        let mut next = current.clone();
        if let Some(name) = &request.name {
            let name = name.trim();
            self.validation.validate_name(name)?;
            next.name = name.to_string();
        }
        if let Some(description) = &request.description {
            next.description = description.trim().to_string();
        }
        if let Some(host) = &request.host {
            let host = host.trim();
            self.validation.validate_host(host)?;
            next.host = host.to_string();
        }
        if let Some(port) = request.port {
            next.port = self.validation.validate_port(port)?;
        }
        if let Some(username) = &request.username {
            let username = username.trim();
            self.validation.validate_username(username)?;
            next.username = username.to_string();
        }
        if let Some(password) = &request.ssh_password {
            next.ssh_password = Some(password.clone()).filter(|p| !p.is_empty());
        }
        if let Some(key_path) = &request.ssh_private_key_path {
            next.ssh_private_key_path = Some(key_path.trim().to_string()).filter(|k| !k.is_empty());
        }
        let had_credentials = current.has_password() || current.has_private_key();
        self.validation.validate_ssh_auth(
            next.ssh_password.as_deref(),
            next.ssh_private_key_path.as_deref(),
            had_credentials,
        )?;
        next.updated_at = Utc::now();
        Ok(next)
    }
}

fn missing(id: Uuid) -> ToolError {
    ToolError::server_not_found(format!("server {} not found", id))
}

fn connection_changed(before: &Server, after: &Server) -> bool {
    before.host != after.host
        || before.port != after.port
        || before.username != after.username
        || before.ssh_password != after.ssh_password
        || before.ssh_private_key_path != after.ssh_private_key_path
}
