//! Record store adapters.
//!
//! The actuator reads and writes Kubernetes objects through two narrow
//! traits so it can run against an in-memory store in tests:
//! - `MachineStore`: read the latest Machine, write the whole record, write status
//! - `ClusterClient`: cluster identity and Secrets

use async_trait::async_trait;
use crds::{INFRASTRUCTURE_NAME, Infrastructure, Machine};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client};
use tracing::debug;

use crate::error::ControllerError;

/// Status-writable access to Machine records.
#[async_trait]
pub trait MachineStore: Send + Sync {
    /// Read the latest version of a record.
    async fn get(&self, namespace: &str, name: &str) -> Result<Machine, ControllerError>;

    /// Persist metadata and spec of a record.
    async fn update(&self, machine: &Machine) -> Result<Machine, ControllerError>;

    /// Persist the status subresource of a record.
    async fn update_status(&self, machine: &Machine) -> Result<Machine, ControllerError>;
}

/// Access to cluster-scoped collaborators of the actuator.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Actual cluster identity (`Infrastructure/cluster` `status.infrastructureName`).
    async fn infrastructure_name(&self) -> Result<String, ControllerError>;

    /// Read a Secret; `None` when it does not exist.
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ControllerError>;

    async fn create_secret(&self, secret: &Secret) -> Result<(), ControllerError>;
}

fn name_of(machine: &Machine) -> Result<&str, ControllerError> {
    machine
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| ControllerError::InvalidConfig("Machine missing name".to_string()))
}

/// `MachineStore` backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeMachineStore {
    client: Client,
}

impl KubeMachineStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Machine> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl MachineStore for KubeMachineStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Machine, ControllerError> {
        Ok(self.api(namespace).get(name).await?)
    }

    async fn update(&self, machine: &Machine) -> Result<Machine, ControllerError> {
        let name = name_of(machine)?;
        let namespace = machine.metadata.namespace.as_deref().unwrap_or("default");
        debug!("Replacing Machine {}/{}", namespace, name);
        Ok(self
            .api(namespace)
            .replace(name, &PostParams::default(), machine)
            .await?)
    }

    async fn update_status(&self, machine: &Machine) -> Result<Machine, ControllerError> {
        let name = name_of(machine)?;
        let namespace = machine.metadata.namespace.as_deref().unwrap_or("default");
        debug!("Patching Machine {}/{} status", namespace, name);
        // Every field is spelled out: a merge patch leaves omitted fields untouched
        // and null clears them.
        let status = machine.status.clone().unwrap_or_default();
        let status_patch = serde_json::json!({
            "status": {
                "addresses": status.addresses,
                "errorReason": status.error_reason,
                "errorMessage": status.error_message,
                "lastUpdated": status.last_updated,
            }
        });
        let pp = PatchParams::default();
        Ok(self
            .api(namespace)
            .patch_status(name, &pp, &Patch::Merge(&status_patch))
            .await?)
    }
}

/// `ClusterClient` backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn infrastructure_name(&self) -> Result<String, ControllerError> {
        let api: Api<Infrastructure> = Api::all(self.client.clone());
        let infrastructure = api.get(INFRASTRUCTURE_NAME).await.map_err(|e| {
            ControllerError::Store(format!(
                "Failed to retrieve cluster Infrastructure object: {}",
                e
            ))
        })?;

        Ok(infrastructure
            .status
            .map(|status| status.infrastructure_name)
            .unwrap_or_default())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ControllerError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_secret(&self, secret: &Secret) -> Result<(), ControllerError> {
        let namespace = secret.metadata.namespace.as_deref().unwrap_or("default");
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), secret).await?;
        Ok(())
    }
}
