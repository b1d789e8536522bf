// SPDX-License-Identifier: Apache-2.0

//! Container runtime client.
//!
//! Defines the [`ContainerRuntime`] capability the lifecycle manager consumes,
//! and its Docker/Podman implementation via the bollard API. The runtime is
//! the single source of truth for backend existence and status; in-memory
//! bookkeeping is only an optimization for avoiding duplicate creation.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use tracing::{debug, info};

use crate::error::RuntimeError;

/// Label attached to every container this system creates.
/// Distinguishes owned backends from unrelated containers on the same host.
pub const OWNER_LABEL_KEY: &str = "emberless.managed";
pub const OWNER_LABEL_VALUE: &str = "true";

/// Seconds a container gets to shut down before the stop is forced.
const STOP_TIMEOUT_SECS: i64 = 10;

/// Backend container status as reported live by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerStatus {
    /// Container is running and addressable on the network.
    Running,
    /// Container exists but has exited; a start command revives it.
    Exited,
    /// Any other state (created, paused, restarting, ...). These are
    /// recycled rather than repaired.
    Other(String),
}

/// Everything needed to create a backend container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Container name; doubles as the backend's network hostname.
    pub name: String,
    /// Image reference to create the container from.
    pub image: String,
    /// Environment variables to inject.
    pub env: HashMap<String, String>,
    /// Network to attach the container to.
    pub network: String,
}

/// Capability to query and mutate named containers.
///
/// Restart and health handling are owned by the lifecycle manager, so
/// implementations must create containers with restart policy "no" and the
/// ownership label applied.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Query the status of a named container. `None` means it does not exist.
    async fn inspect(&self, name: &str) -> Result<Option<ContainerStatus>, RuntimeError>;

    /// Create a container from the spec. Does not start it.
    async fn create(&self, spec: &ContainerSpec) -> Result<(), RuntimeError>;

    /// Start a previously created or exited container.
    async fn start(&self, name: &str) -> Result<(), RuntimeError>;

    /// Stop a running container. Already-stopped is not an error.
    async fn stop(&self, name: &str) -> Result<(), RuntimeError>;

    /// Remove a container, optionally force-killing it first.
    async fn remove(&self, name: &str, force: bool) -> Result<(), RuntimeError>;

    /// List names of containers carrying the given label, in any state.
    async fn list_by_label(&self, key: &str, value: &str) -> Result<Vec<String>, RuntimeError>;
}

/// Docker/Podman implementation of [`ContainerRuntime`] via the bollard API.
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to the local container daemon and verify it responds.
    pub async fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()?;
        docker.ping().await?;
        info!("Connected to container runtime");
        Ok(Self { docker })
    }
}

/// Map a 404 API response to the given error, pass everything else through.
fn map_not_found(err: bollard::errors::Error, name: &str) -> RuntimeError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::NotFound(name.to_string()),
        e => RuntimeError::Api(e),
    }
}

/// Translate the runtime's status enum into the three states the lifecycle
/// decision tree distinguishes.
fn map_status(status: Option<bollard::models::ContainerStateStatusEnum>) -> ContainerStatus {
    use bollard::models::ContainerStateStatusEnum;

    match status {
        Some(ContainerStateStatusEnum::RUNNING) => ContainerStatus::Running,
        Some(ContainerStateStatusEnum::EXITED) => ContainerStatus::Exited,
        Some(other) => ContainerStatus::Other(other.to_string()),
        None => ContainerStatus::Other("unknown".to_string()),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn inspect(&self, name: &str) -> Result<Option<ContainerStatus>, RuntimeError> {
        let response = match self
            .docker
            .inspect_container(name, None::<bollard::query_parameters::InspectContainerOptions>)
            .await
        {
            Ok(response) => response,
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => return Ok(None),
            Err(e) => return Err(RuntimeError::Api(e)),
        };

        Ok(Some(map_status(response.state.and_then(|s| s.status))))
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<(), RuntimeError> {
        let options = bollard::container::CreateContainerOptions {
            name: spec.name.as_str(),
            ..Default::default()
        };

        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();

        let labels = HashMap::from([(OWNER_LABEL_KEY.to_string(), OWNER_LABEL_VALUE.to_string())]);

        let host_config = bollard::models::HostConfig {
            network_mode: Some(spec.network.clone()),
            // Restart and health are owned by the lifecycle manager.
            restart_policy: Some(bollard::models::RestartPolicy {
                name: Some(bollard::models::RestartPolicyNameEnum::NO),
                maximum_retry_count: None,
            }),
            ..Default::default()
        };

        let config = bollard::container::Config {
            image: Some(spec.image.clone()),
            env: Some(env),
            labels: Some(labels),
            host_config: Some(host_config),
            ..Default::default()
        };

        debug!(container = %spec.name, image = %spec.image, "Creating container");
        self.docker.create_container(Some(options), config).await?;
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<(), RuntimeError> {
        debug!(container = %name, "Starting container");
        self.docker
            .start_container(name, None::<bollard::container::StartContainerOptions<String>>)
            .await
            .map_err(|e| map_not_found(e, name))?;
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), RuntimeError> {
        debug!(container = %name, "Stopping container");
        match self
            .docker
            .stop_container(
                name,
                Some(bollard::container::StopContainerOptions {
                    t: STOP_TIMEOUT_SECS,
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            // 304 = already stopped.
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(map_not_found(e, name)),
        }
    }

    async fn remove(&self, name: &str, force: bool) -> Result<(), RuntimeError> {
        debug!(container = %name, force, "Removing container");
        self.docker
            .remove_container(
                name,
                Some(bollard::container::RemoveContainerOptions {
                    force,
                    v: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| map_not_found(e, name))?;
        Ok(())
    }

    async fn list_by_label(&self, key: &str, value: &str) -> Result<Vec<String>, RuntimeError> {
        let filters = HashMap::from([(
            "label".to_string(),
            vec![format!("{}={}", key, value)],
        )]);

        let containers = self
            .docker
            .list_containers(Some(bollard::container::ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await?;

        Ok(containers
            .into_iter()
            .filter_map(|c| c.names.and_then(|names| names.into_iter().next()))
            .map(|name| name.trim_start_matches('/').to_string())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::ContainerStateStatusEnum;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            map_status(Some(ContainerStateStatusEnum::RUNNING)),
            ContainerStatus::Running
        );
        assert_eq!(
            map_status(Some(ContainerStateStatusEnum::EXITED)),
            ContainerStatus::Exited
        );
        assert!(matches!(
            map_status(Some(ContainerStateStatusEnum::PAUSED)),
            ContainerStatus::Other(_)
        ));
        assert!(matches!(map_status(None), ContainerStatus::Other(_)));
    }

    #[tokio::test]
    #[ignore] // Requires Docker/Podman to be running
    async fn test_docker_connection() {
        let runtime = DockerRuntime::connect().await.unwrap();
        assert_eq!(runtime.inspect("no-such-container-zzz").await.unwrap(), None);
    }
}
