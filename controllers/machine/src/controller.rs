//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the actuator to
//! its collaborators (compute client, record store, cluster client, event
//! recorder) and runs the Machine watcher.

use crate::actuator::{Actuator, ActuatorParams};
use crate::config::ActuatorConfig;
use crate::error::ControllerError;
use crate::events::{KubeEventPublisher, REPORTER_NAME};
use crate::store::{KubeClusterClient, KubeMachineStore};
use crate::watcher::{Context, watch_machines};
use crds::Machine;
use kube::{Api, Client};
use openstack_client::{Endpoints, OpenStackClient};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Main controller for OpenStack machines.
pub struct Controller {
    machine_watcher: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(
        endpoints: Endpoints,
        auth_token: String,
        namespace: Option<String>,
        config: ActuatorConfig,
    ) -> Result<Self, ControllerError> {
        info!("Initializing OpenStack Machine Controller");

        let kube_client = Client::try_default().await?;
        let compute = OpenStackClient::new(endpoints, auth_token)?;

        let actuator = Actuator::new(ActuatorParams {
            compute: Arc::new(compute),
            cluster: Arc::new(KubeClusterClient::new(kube_client.clone())),
            store: Some(Arc::new(KubeMachineStore::new(kube_client.clone()))),
            events: Arc::new(KubeEventPublisher::new(kube_client.clone(), REPORTER_NAME)),
            config,
        });

        let machine_api: Api<Machine> = match namespace.as_deref() {
            Some(ns) => Api::namespaced(kube_client.clone(), ns),
            None => Api::all(kube_client.clone()),
        };
        let ctx = Arc::new(Context::new(kube_client, actuator));

        let machine_watcher = tokio::spawn(async move { watch_machines(machine_api, ctx).await });

        Ok(Self { machine_watcher })
    }

    /// Runs until the watcher exits.
    pub async fn run(self) -> Result<(), ControllerError> {
        info!("OpenStack Machine Controller running");

        self.machine_watcher
            .await
            .map_err(|e| ControllerError::Watch(format!("Machine watcher panicked: {}", e)))?
            .map_err(|e| ControllerError::Watch(format!("Machine watcher error: {}", e)))?;

        Err(ControllerError::Watch("Machine watcher exited unexpectedly".to_string()))
    }
}
