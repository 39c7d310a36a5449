use super::EngineBridge;
use crate::constants::network::ENGINE_TIMEOUT_SECS;
use crate::errors::{ToolError, ToolErrorKind};
use async_trait::async_trait;
use bollard::container::{
    InspectContainerOptions, RemoveContainerOptions, RestartContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::Docker;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: Option<String>,
    pub state: Option<String>,
    pub running: bool,
}

/// The slice of the container engine API the control plane drives.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn ping(&self) -> Result<(), ToolError>;

    async fn inspect(&self, container_id: &str) -> Result<ContainerInfo, ToolError>;

    async fn start(&self, container_id: &str) -> Result<(), ToolError>;

    async fn stop(&self, container_id: &str) -> Result<(), ToolError>;

    async fn restart(&self, container_id: &str) -> Result<(), ToolError>;

    async fn remove(&self, container_id: &str, force: bool) -> Result<(), ToolError>;
}

/// Builds engine clients either over an SSH bridge or against the local
/// socket.
pub trait EngineFactory: Send + Sync {
    fn remote(&self, bridge: EngineBridge) -> Result<Box<dyn ContainerEngine>, ToolError>;

    fn local(&self) -> Result<Box<dyn ContainerEngine>, ToolError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BollardEngineFactory;

impl EngineFactory for BollardEngineFactory {
    fn remote(&self, bridge: EngineBridge) -> Result<Box<dyn ContainerEngine>, ToolError> {
        let docker = Docker::connect_with_http(
            &bridge.docker_url(),
            ENGINE_TIMEOUT_SECS,
            bollard::API_DEFAULT_VERSION,
        )
        .map_err(|err| ToolError::engine_unavailable(format!("engine client: {}", err)))?;
        Ok(Box::new(BollardEngine {
            docker,
            _bridge: Some(bridge),
        }))
    }

    fn local(&self) -> Result<Box<dyn ContainerEngine>, ToolError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|err| ToolError::engine_unavailable(format!("local engine: {}", err)))?
            .with_timeout(std::time::Duration::from_secs(ENGINE_TIMEOUT_SECS));
        Ok(Box::new(BollardEngine {
            docker,
            _bridge: None,
        }))
    }
}

/// Engine client. Holds the SSH bridge (if any) so it lives exactly as long
/// as the client.
pub struct BollardEngine {
    docker: Docker,
    _bridge: Option<EngineBridge>,
}

#[async_trait]
impl ContainerEngine for BollardEngine {
    async fn ping(&self) -> Result<(), ToolError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|err| ToolError::engine_unavailable(format!("engine ping failed: {}", err)))
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerInfo, ToolError> {
        let info = self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
            .map_err(|err| map_engine_error(err, container_id))?;
        let name = info
            .name
            .as_deref()
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default();
        let state = info.state.as_ref();
        Ok(ContainerInfo {
            id: info.id.clone().unwrap_or_else(|| container_id.to_string()),
            name,
            image: info.config.as_ref().and_then(|c| c.image.clone()),
            state: state
                .and_then(|s| s.status.as_ref())
                .map(|status| status.to_string()),
            running: state.and_then(|s| s.running).unwrap_or(false),
        })
    }

    async fn start(&self, container_id: &str) -> Result<(), ToolError> {
        let result = self
            .docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await;
        not_modified_is_ok(result, container_id)
    }

    async fn stop(&self, container_id: &str) -> Result<(), ToolError> {
        let result = self
            .docker
            .stop_container(container_id, Some(StopContainerOptions { t: 10 }))
            .await;
        not_modified_is_ok(result, container_id)
    }

    async fn restart(&self, container_id: &str) -> Result<(), ToolError> {
        self.docker
            .restart_container(container_id, None::<RestartContainerOptions>)
            .await
            .map_err(|err| map_engine_error(err, container_id))
    }

    async fn remove(&self, container_id: &str, force: bool) -> Result<(), ToolError> {
        let options = RemoveContainerOptions {
            force,
            v: false,
            link: false,
        };
        self.docker
            .remove_container(container_id, Some(options))
            .await
            .map_err(|err| map_engine_error(err, container_id))
    }
}

fn not_modified_is_ok(
    result: Result<(), BollardError>,
    container_id: &str,
) -> Result<(), ToolError> {
    match result {
        Ok(()) => Ok(()),
        Err(BollardError::DockerResponseServerError {
            status_code: 304, ..
        }) => Ok(()),
        Err(err) => Err(map_engine_error(err, container_id)),
    }
}

pub(crate) fn map_engine_error(err: BollardError, container_id: &str) -> ToolError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404, ..
        } => ToolError::not_found(
            "CONTAINER_NOT_FOUND",
            format!("container {} not found", container_id),
        ),
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => ToolError::new(
            ToolErrorKind::Internal,
            "ENGINE_REQUEST_FAILED",
            format!("engine rejected request ({}): {}", status_code, message),
        ),
        BollardError::RequestTimeoutError => ToolError::timeout("engine request timed out"),
        other => ToolError::engine_unavailable(format!("engine unreachable: {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_container_maps_to_not_found() {
        let err = map_engine_error(
            BollardError::DockerResponseServerError {
                status_code: 404,
                message: "No such container".to_string(),
            },
            "web",
        );
        assert_eq!(err.code, "CONTAINER_NOT_FOUND");
        let err = map_engine_error(
            BollardError::DockerResponseServerError {
                status_code: 409,
                message: "conflict".to_string(),
            },
            "web",
        );
        assert_eq!(err.code, "ENGINE_REQUEST_FAILED");
    }
}
