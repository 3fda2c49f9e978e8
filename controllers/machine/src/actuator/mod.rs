//! Instance lifecycle actuator.
//!
//! Implements Create, Delete, Update and Exists for a single Machine against
//! the compute provider. Every operation is safe to re-invoke: Create refuses
//! records that were already bound, Delete treats a missing instance as done,
//! and Update only writes what changed.
//!
//! Classified failures are reported onto the record (event, error fields and
//! the `ERROR` instance state) before being returned to the caller.

mod status;

use std::collections::BTreeMap;
use std::sync::Arc;

use crds::{CLUSTER_LABEL, ERROR_STATE, INSTANCE_STATE_ANNOTATION, Machine, OpenstackProviderSpec, ProviderSpec, RESOURCE_ID_ANNOTATION};
use openstack_client::{BootVolume, ComputeClientTrait, CreateInstanceRequest, Instance, InstanceListOpts, NetworkAttachment};
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};

use crate::bootstrap::issue_bootstrap_token;
use crate::config::ActuatorConfig;
use crate::error::{ControllerError, MachineError};
use crate::events::{EventAction, EventPublisher, EventType, reasons};
use crate::store::{ClusterClient, MachineStore};
use crate::userdata::{Postprocessor, RenderContext, UserDataSource, render, user_data_text};

/// Server metadata key carrying the machine name.
pub const MACHINE_NAME_METADATA: &str = "machine.uccp.io/name";

/// Server metadata key carrying the machine namespace.
pub const MACHINE_NAMESPACE_METADATA: &str = "machine.uccp.io/namespace";

/// Collaborators of the actuator.
pub struct ActuatorParams {
    pub compute: Arc<dyn ComputeClientTrait>,
    pub cluster: Arc<dyn ClusterClient>,
    /// Status-writable record store; `None` before the cluster API is available
    pub store: Option<Arc<dyn MachineStore>>,
    pub events: Arc<dyn EventPublisher>,
    pub config: ActuatorConfig,
}

/// Machine actuator for OpenStack.
pub struct Actuator {
    compute: Arc<dyn ComputeClientTrait>,
    cluster: Arc<dyn ClusterClient>,
    store: Option<Arc<dyn MachineStore>>,
    events: Arc<dyn EventPublisher>,
    config: ActuatorConfig,
}

impl Actuator {
    pub fn new(params: ActuatorParams) -> Self {
        Self {
            compute: params.compute,
            cluster: params.cluster,
            store: params.store,
            events: params.events,
            config: params.config,
        }
    }

    /// Provision an instance for a machine and bind it to the record.
    pub async fn create(&self, machine: &Machine) -> Result<(), ControllerError> {
        let key = machine.key();
        let name = machine.metadata.name.clone().unwrap_or_default();
        let namespace = machine.metadata.namespace.clone().unwrap_or_else(|| "default".to_string());
        info!("Creating Machine {}", key);

        let cluster_name = self.cluster.infrastructure_name().await?;
        let cluster_label = machine.cluster_label().unwrap_or_default();
        if cluster_label != cluster_name {
            error!(
                "{} label value is incorrect: {}, machine {} cannot join cluster {}",
                CLUSTER_LABEL, cluster_label, name, cluster_name
            );
            let err = MachineError::invalid_configuration(format!(
                "{} label value is incorrect: {}, machine {} cannot join cluster {}",
                CLUSTER_LABEL, cluster_label, name, cluster_name
            ));
            return Err(self.report(machine, err, Some(EventAction::Create)).await);
        }

        // A destroyed instance is never recreated under the same identity.
        if machine.spec.provider_id.is_some() {
            error!("The instance has been destroyed for the machine {}, cannot recreate it", name);
            let err = MachineError::invalid_configuration(format!(
                "the instance has been destroyed for the machine {}, cannot recreate it",
                name
            ));
            return Err(self.report(machine, err, Some(EventAction::Create)).await);
        }

        let spec = match ProviderSpec::openstack(&machine.spec.provider_spec) {
            Ok(spec) => spec,
            Err(e) => {
                let err = MachineError::invalid_configuration(format!("Cannot unmarshal providerSpec field: {}", e));
                return Err(self.report(machine, err, Some(EventAction::Create)).await);
            }
        };

        if let Err(e) = self.validate(&spec).await {
            let err = MachineError::invalid_configuration(format!("Machine validation failed: {}", e));
            return Err(self.report(machine, err, Some(EventAction::Create)).await);
        }

        let source = match self.user_data_source(&namespace, &spec).await {
            Ok(source) => source,
            Err(ControllerError::Machine(err)) => {
                return Err(self.report(machine, err, Some(EventAction::Create)).await);
            }
            Err(e) => return Err(e),
        };

        let mut user_data = source.data.clone();
        if !source.data.is_empty() && !source.disable_templating {
            let token = if machine.is_control_plane() {
                None
            } else {
                info!("Creating bootstrap token for Machine {}", key);
                match issue_bootstrap_token(
                    self.cluster.as_ref(),
                    &self.config.bootstrap_token_namespace,
                    self.config.bootstrap_token_ttl,
                )
                .await
                {
                    Ok(token) => Some(token),
                    Err(e) => {
                        let err = MachineError::create(format!("error creating bootstrap token: {}", e));
                        return Err(self.report(machine, err, Some(EventAction::Create)).await);
                    }
                }
            };

            let ctx = RenderContext {
                machine_name: &name,
                machine_namespace: &namespace,
                cluster_name: &cluster_name,
                spec: &spec,
                bootstrap_token: token.as_deref(),
            };
            let rendered = user_data_text(&source.data).and_then(|template| render(template, &ctx));
            user_data = match rendered {
                Ok(rendered) => rendered.into_bytes(),
                Err(e) => {
                    let err = MachineError::create(format!("error rendering user data: {}", e));
                    return Err(self.report(machine, err, Some(EventAction::Create)).await);
                }
            };
        } else {
            debug!("Templating skipped for Machine {}", key);
        }

        if let Some(postprocessor) = source.postprocessor.as_deref() {
            let processed = postprocessor
                .parse::<Postprocessor>()
                .map_err(|e| MachineError::invalid_configuration(format!("Postprocessor error: {}", e)))
                .and_then(|processor| {
                    let text = user_data_text(&user_data)
                        .map_err(|e| MachineError::create(format!("error rendering user data: {}", e)))?;
                    processor
                        .apply(text)
                        .map_err(|e| MachineError::invalid_configuration(format!("Postprocessor error: {}", e)))
                });
            user_data = match processed {
                Ok(processed) => processed.into_bytes(),
                Err(err) => return Err(self.report(machine, err, Some(EventAction::Create)).await),
            };
        }

        let request = create_request(&name, &spec, user_data);
        let instance = match self.compute.create_instance(&request).await {
            Ok(instance) => instance,
            Err(e) => {
                let err = MachineError::create(format!("error creating OpenStack instance: {}", e));
                return Err(self.report(machine, err, Some(EventAction::Create)).await);
            }
        };
        info!("Created instance {} for Machine {}, waiting for it to become ACTIVE", instance.id, key);

        let instance = match self.wait_for_active(&instance.id).await {
            Ok(instance) => instance,
            Err(err) => return Err(self.report(machine, err, Some(EventAction::Create)).await),
        };

        if let Some(floating_ip) = spec.floating_ip.as_deref().filter(|ip| !ip.is_empty()) {
            if let Err(e) = self.compute.associate_floating_ip(&instance.id, floating_ip).await {
                let err = MachineError::create(format!("Associate floatingIP err: {}", e));
                return Err(self.report(machine, err, Some(EventAction::Create)).await);
            }
            info!("Associated floating IP {} with instance {}", floating_ip, instance.id);
        }

        // Best-effort: the instance is usable without its labels.
        let labels = BTreeMap::from([
            (MACHINE_NAME_METADATA.to_string(), name.clone()),
            (MACHINE_NAMESPACE_METADATA.to_string(), namespace.clone()),
            (CLUSTER_LABEL.to_string(), cluster_name.clone()),
        ]);
        if let Err(e) = self.compute.set_instance_metadata(&instance.id, &labels).await {
            warn!("Failed to set labels on instance {} for Machine {}: {}", instance.id, key, e);
        }

        self.events
            .publish(
                machine,
                EventType::Normal,
                reasons::CREATED,
                EventAction::Create,
                Some(format!("Created machine {}", name)),
            )
            .await;

        self.write_back(machine, &instance).await
    }

    /// Delete the instance bound to a machine, if any.
    pub async fn delete(&self, machine: &Machine) -> Result<(), ControllerError> {
        let key = machine.key();
        let Some(instance) = self.find_instance(machine).await? else {
            info!("Skipped deleting {} that is already deleted", key);
            return Ok(());
        };

        let id = machine
            .annotation(RESOURCE_ID_ANNOTATION)
            .filter(|id| !id.is_empty())
            .unwrap_or(&instance.id);
        info!("Deleting instance {} for Machine {}", id, key);

        if let Err(e) = self.compute.delete_instance(id).await {
            let err = MachineError::delete(format!("error deleting OpenStack instance: {}", e));
            return Err(self.report(machine, err, Some(EventAction::Delete)).await);
        }

        self.events
            .publish(
                machine,
                EventType::Normal,
                reasons::DELETED,
                EventAction::Delete,
                Some(format!("Deleted machine {}", machine.metadata.name.as_deref().unwrap_or_default())),
            )
            .await;
        Ok(())
    }

    /// Refresh the record from the bound instance.
    pub async fn update(&self, machine: &Machine) -> Result<(), ControllerError> {
        debug!("Updating Machine {}", machine.key());
        match self.find_instance(machine).await? {
            Some(instance) => self.write_back(machine, &instance).await,
            None => self.clear_instance_state(machine).await,
        }
    }

    /// Whether an instance matching the machine exists.
    pub async fn exists(&self, machine: &Machine) -> Result<bool, ControllerError> {
        Ok(self.find_instance(machine).await?.is_some())
    }

    /// Look up the instance by name, image and flavor.
    async fn find_instance(&self, machine: &Machine) -> Result<Option<Instance>, ControllerError> {
        let spec = ProviderSpec::openstack(&machine.spec.provider_spec).map_err(|e| {
            MachineError::invalid_configuration(format!(
                "Error getting the machine spec from the provider spec: {}",
                e
            ))
        })?;

        let opts = InstanceListOpts {
            name: machine.metadata.name.clone().unwrap_or_default(),
            image: spec.image,
            flavor: spec.flavor,
        };
        let instances = self.compute.list_instances(&opts).await?;
        if instances.len() > 1 {
            warn!(
                "Found {} instances matching Machine {}, using {}",
                instances.len(),
                machine.key(),
                instances[0].id
            );
        }
        Ok(instances.into_iter().next())
    }

    async fn validate(&self, spec: &OpenstackProviderSpec) -> Result<(), ControllerError> {
        if spec.root_volume.is_none() {
            self.compute.image_exists(&spec.image).await?;
        }
        self.compute.flavor_exists(&spec.flavor).await?;
        if let Some(zone) = spec.availability_zone.as_deref().filter(|zone| !zone.is_empty()) {
            self.compute.availability_zone_exists(zone).await?;
        }
        Ok(())
    }

    /// Read user data settings; classified errors are configuration problems.
    async fn user_data_source(
        &self,
        machine_namespace: &str,
        spec: &OpenstackProviderSpec,
    ) -> Result<UserDataSource, ControllerError> {
        let Some(secret_ref) = spec.user_data_secret.as_ref() else {
            return Ok(UserDataSource::default());
        };
        if secret_ref.name.is_empty() {
            return Err(MachineError::invalid_configuration("UserDataSecret name must be provided").into());
        }

        let namespace = secret_ref
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(machine_namespace);
        let secret = self
            .cluster
            .get_secret(namespace, &secret_ref.name)
            .await?
            .ok_or_else(|| {
                MachineError::invalid_configuration(format!(
                    "Machine's userdata secret {} in namespace {} was not found",
                    secret_ref.name, namespace
                ))
            })?;

        UserDataSource::from_secret(&secret).ok_or_else(|| {
            MachineError::invalid_configuration(format!(
                "Machine's userdata secret {} in namespace {} did not contain key {}",
                secret_ref.name,
                namespace,
                crate::userdata::USER_DATA_KEY
            ))
            .into()
        })
    }

    /// Poll the instance until it is ACTIVE or the create timeout elapses.
    async fn wait_for_active(&self, id: &str) -> Result<Instance, MachineError> {
        let started = Instant::now();
        loop {
            match self.compute.get_instance(id).await {
                Ok(instance) if instance.is_active() => return Ok(instance),
                Ok(instance) => debug!("Instance {} is {}, waiting", id, instance.status),
                Err(e) => debug!("Polling instance {} failed: {}", id, e),
            }

            if started.elapsed() >= self.config.instance_create_timeout {
                return Err(MachineError::create(format!(
                    "error creating OpenStack instance: timed out after {:?} waiting for instance {} to become ACTIVE",
                    self.config.instance_create_timeout, id
                )));
            }
            sleep(self.config.poll_interval).await;
        }
    }

    /// Report a classified error onto the record and hand it back.
    ///
    /// Without a store the error is only logged. If persisting the report
    /// fails, that failure is returned instead.
    pub(crate) async fn report(
        &self,
        machine: &Machine,
        err: MachineError,
        action: Option<EventAction>,
    ) -> ControllerError {
        let key = machine.key();
        if let Some(action) = action {
            self.events
                .publish(
                    machine,
                    EventType::Warning,
                    &action.failed_reason(),
                    action,
                    Some(err.reason.to_string()),
                )
                .await;
        }

        if let Some(store) = &self.store {
            if let Err(e) = self.persist_error(store.as_ref(), machine, &err).await {
                error!("Failed to record error on Machine {}: {}", key, e);
                return ControllerError::StatusUpdate(e.to_string());
            }
        }

        error!("Machine error {}: {}", key, err.message);
        err.into()
    }

    async fn persist_error(
        &self,
        store: &dyn MachineStore,
        machine: &Machine,
        err: &MachineError,
    ) -> Result<(), ControllerError> {
        let (namespace, name) = record_key(machine)?;
        let mut latest = store.get(namespace, name).await?;
        if latest.annotation(INSTANCE_STATE_ANNOTATION) != Some(ERROR_STATE) {
            latest.set_annotation(INSTANCE_STATE_ANNOTATION, ERROR_STATE);
            latest = store.update(&latest).await?;
        }

        // Repeating the same failure must not generate new watch events
        let recorded = latest.status.as_ref().is_some_and(|status| {
            status.error_reason.as_deref() == Some(err.reason.as_str())
                && status.error_message.as_deref() == Some(err.message.as_str())
        });
        if recorded {
            debug!("Error already recorded on Machine {}", machine.key());
            return Ok(());
        }

        let status = latest.status.get_or_insert_with(Default::default);
        status.error_reason = Some(err.reason.to_string());
        status.error_message = Some(err.message.clone());
        status.last_updated = Some(chrono::Utc::now());
        store.update_status(&latest).await?;
        Ok(())
    }

    /// Latest version of the record, or the given copy without a store.
    async fn latest(&self, machine: &Machine) -> Result<Machine, ControllerError> {
        match &self.store {
            Some(store) => {
                let (namespace, name) = record_key(machine)?;
                store.get(namespace, name).await
            }
            None => Ok(machine.clone()),
        }
    }

    async fn persist(&self, machine: Machine) -> Result<Machine, ControllerError> {
        match &self.store {
            Some(store) => store.update(&machine).await,
            None => {
                debug!("No store configured, not persisting Machine {}", machine.key());
                Ok(machine)
            }
        }
    }

    async fn persist_status(&self, machine: Machine) -> Result<Machine, ControllerError> {
        match &self.store {
            Some(store) => store.update_status(&machine).await,
            None => {
                debug!("No store configured, not persisting Machine {} status", machine.key());
                Ok(machine)
            }
        }
    }
}

fn record_key(machine: &Machine) -> Result<(&str, &str), ControllerError> {
    let name = machine
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| ControllerError::InvalidConfig("Machine missing name".to_string()))?;
    let namespace = machine.metadata.namespace.as_deref().unwrap_or("default");
    Ok((namespace, name))
}

fn create_request(name: &str, spec: &OpenstackProviderSpec, user_data: Vec<u8>) -> CreateInstanceRequest {
    CreateInstanceRequest {
        name: name.to_string(),
        image: spec.image.clone(),
        flavor: spec.flavor.clone(),
        key_name: spec.key_name.clone(),
        availability_zone: spec.availability_zone.clone(),
        user_data,
        networks: spec
            .networks
            .iter()
            .map(|network| NetworkAttachment {
                uuid: network.uuid.clone(),
                fixed_ip: network.fixed_ip.clone(),
            })
            .collect(),
        security_groups: spec.security_groups.clone(),
        tags: spec.tags.clone(),
        metadata: spec.server_metadata.clone(),
        root_volume: spec.root_volume.as_ref().map(|volume| BootVolume {
            source_type: volume.source_type.clone(),
            source_uuid: volume.source_uuid.clone(),
            volume_type: volume.volume_type.clone(),
            size_gb: volume.disk_size,
        }),
    }
}
