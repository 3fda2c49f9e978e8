//! Test utilities for unit testing the actuator
//!
//! This module provides in-memory stand-ins for the record store, the
//! cluster client and the event publisher, plus helpers for creating test data.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use crds::*;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use openstack_client::{Instance, InstanceAddress, MockComputeClient, STATUS_ACTIVE};

use crate::actuator::{Actuator, ActuatorParams};
use crate::config::ActuatorConfig;
use crate::error::ControllerError;
use crate::events::{EventAction, EventPublisher, EventType};
use crate::store::{ClusterClient, MachineStore};

pub const TEST_CLUSTER: &str = "cluster-1";
pub const TEST_NAMESPACE: &str = "machines";
pub const TEST_IMAGE: &str = "rhcos";
pub const TEST_FLAVOR: &str = "m1.large";
pub const TEST_ZONE: &str = "nova";

/// In-memory `MachineStore` counting writes
#[derive(Clone, Default)]
pub struct MockMachineStore {
    machines: Arc<Mutex<HashMap<String, Machine>>>,
    update_calls: Arc<Mutex<usize>>,
    status_calls: Arc<Mutex<usize>>,
    fail_writes: Arc<Mutex<bool>>,
}

fn store_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

impl MockMachineStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, machine: Machine) {
        let key = store_key(
            machine.metadata.namespace.as_deref().unwrap_or("default"),
            machine.metadata.name.as_deref().unwrap_or_default(),
        );
        self.machines.lock().unwrap().insert(key, machine);
    }

    pub fn machine(&self, namespace: &str, name: &str) -> Machine {
        self.machines.lock().unwrap()[&store_key(namespace, name)].clone()
    }

    pub fn update_calls(&self) -> usize {
        *self.update_calls.lock().unwrap()
    }

    pub fn status_calls(&self) -> usize {
        *self.status_calls.lock().unwrap()
    }

    /// Make every write fail from now on
    pub fn fail_writes(&self) {
        *self.fail_writes.lock().unwrap() = true;
    }

    fn check_writable(&self) -> Result<(), ControllerError> {
        if *self.fail_writes.lock().unwrap() {
            return Err(ControllerError::Store("injected write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MachineStore for MockMachineStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Machine, ControllerError> {
        self.machines
            .lock()
            .unwrap()
            .get(&store_key(namespace, name))
            .cloned()
            .ok_or_else(|| ControllerError::Store(format!("Machine {}/{} not found", namespace, name)))
    }

    async fn update(&self, machine: &Machine) -> Result<Machine, ControllerError> {
        *self.update_calls.lock().unwrap() += 1;
        self.check_writable()?;

        let key = store_key(
            machine.metadata.namespace.as_deref().unwrap_or("default"),
            machine.metadata.name.as_deref().unwrap_or_default(),
        );
        let mut machines = self.machines.lock().unwrap();
        // Status is a subresource: a record write never changes it
        let status = machines.get(&key).and_then(|existing| existing.status.clone());
        let mut stored = machine.clone();
        stored.status = status;
        machines.insert(key, stored.clone());
        Ok(stored)
    }

    async fn update_status(&self, machine: &Machine) -> Result<Machine, ControllerError> {
        *self.status_calls.lock().unwrap() += 1;
        self.check_writable()?;

        let key = store_key(
            machine.metadata.namespace.as_deref().unwrap_or("default"),
            machine.metadata.name.as_deref().unwrap_or_default(),
        );
        let mut machines = self.machines.lock().unwrap();
        let stored = machines
            .get_mut(&key)
            .ok_or_else(|| ControllerError::Store(format!("Machine {} not found", key)))?;
        stored.status = machine.status.clone();
        Ok(stored.clone())
    }
}

/// In-memory `ClusterClient`
#[derive(Clone, Default)]
pub struct MockClusterClient {
    infrastructure_name: String,
    secrets: Arc<Mutex<HashMap<String, Secret>>>,
    created: Arc<Mutex<Vec<Secret>>>,
    fail_secret_writes: Arc<Mutex<bool>>,
}

impl MockClusterClient {
    pub fn new(infrastructure_name: &str) -> Self {
        Self {
            infrastructure_name: infrastructure_name.to_string(),
            ..Default::default()
        }
    }

    pub fn add_secret(&self, namespace: &str, name: &str, data: &[(&str, &str)]) {
        let data: Vec<(&str, &[u8])> = data.iter().map(|(key, value)| (*key, value.as_bytes())).collect();
        self.add_secret_bytes(namespace, name, &data);
    }

    pub fn add_secret_bytes(&self, namespace: &str, name: &str, data: &[(&str, &[u8])]) {
        let data = data
            .iter()
            .map(|(key, value)| (key.to_string(), ByteString(value.to_vec())))
            .collect::<BTreeMap<_, _>>();
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        };
        self.secrets.lock().unwrap().insert(store_key(namespace, name), secret);
    }

    pub fn created_secrets(&self) -> Vec<Secret> {
        self.created.lock().unwrap().clone()
    }

    pub fn fail_secret_writes(&self) {
        *self.fail_secret_writes.lock().unwrap() = true;
    }
}

#[async_trait]
impl ClusterClient for MockClusterClient {
    async fn infrastructure_name(&self) -> Result<String, ControllerError> {
        Ok(self.infrastructure_name.clone())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ControllerError> {
        Ok(self.secrets.lock().unwrap().get(&store_key(namespace, name)).cloned())
    }

    async fn create_secret(&self, secret: &Secret) -> Result<(), ControllerError> {
        if *self.fail_secret_writes.lock().unwrap() {
            return Err(ControllerError::Store("injected secret write failure".to_string()));
        }
        self.created.lock().unwrap().push(secret.clone());
        Ok(())
    }
}

/// An event captured by `RecordingEventPublisher`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub event_type: EventType,
    pub reason: String,
    pub action: EventAction,
    pub note: Option<String>,
}

/// Event publisher that keeps every event in memory
#[derive(Clone, Default)]
pub struct RecordingEventPublisher {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl RecordingEventPublisher {
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|event| event.reason).collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(
        &self,
        _machine: &Machine,
        event_type: EventType,
        reason: &str,
        action: EventAction,
        note: Option<String>,
    ) {
        self.events.lock().unwrap().push(RecordedEvent {
            event_type,
            reason: reason.to_string(),
            action,
            note,
        });
    }
}

/// Everything an actuator test needs, wired together
pub struct TestHarness {
    pub compute: MockComputeClient,
    pub cluster: MockClusterClient,
    pub store: MockMachineStore,
    pub events: RecordingEventPublisher,
    pub actuator: Actuator,
}

/// Config with short timings for tests
pub fn test_config() -> ActuatorConfig {
    ActuatorConfig {
        poll_interval: Duration::from_secs(10),
        instance_create_timeout: Duration::from_secs(60),
        ..Default::default()
    }
}

/// Compute mock knowing the test image, flavor and zone
pub fn create_test_compute() -> MockComputeClient {
    let compute = MockComputeClient::new();
    compute.add_image(TEST_IMAGE);
    compute.add_flavor(TEST_FLAVOR);
    compute.add_availability_zone(TEST_ZONE);
    compute
}

pub fn create_harness(with_store: bool) -> TestHarness {
    let compute = create_test_compute();
    let cluster = MockClusterClient::new(TEST_CLUSTER);
    let store = MockMachineStore::new();
    let events = RecordingEventPublisher::default();

    let actuator = Actuator::new(ActuatorParams {
        compute: Arc::new(compute.clone()),
        cluster: Arc::new(cluster.clone()),
        store: if with_store {
            Some(Arc::new(store.clone()) as Arc<dyn MachineStore>)
        } else {
            None
        },
        events: Arc::new(events.clone()),
        config: test_config(),
    });

    TestHarness {
        compute,
        cluster,
        store,
        events,
        actuator,
    }
}

/// Helper to create a provider spec blob
pub fn create_test_provider_spec(extra: serde_json::Value) -> ProviderSpecHolder {
    let mut value = serde_json::json!({
        "apiVersion": "openstackproviderconfig.openshift.io/v1alpha1",
        "kind": "OpenstackProviderSpec",
        "image": TEST_IMAGE,
        "flavor": TEST_FLAVOR,
        "keyName": "ops",
        "availabilityZone": TEST_ZONE,
    });
    if let (Some(base), Some(extra)) = (value.as_object_mut(), extra.as_object()) {
        for (key, field) in extra {
            base.insert(key.clone(), field.clone());
        }
    }
    ProviderSpecHolder { value: Some(value) }
}

/// Helper to create test Machine CRD
pub fn create_test_machine(name: &str, role: Option<&str>, provider_spec: ProviderSpecHolder) -> Machine {
    let mut labels = BTreeMap::new();
    labels.insert(CLUSTER_LABEL.to_string(), TEST_CLUSTER.to_string());
    if let Some(role) = role {
        labels.insert(MACHINE_ROLE_LABEL.to_string(), role.to_string());
    }

    Machine {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: MachineSpec {
            provider_spec,
            provider_id: None,
        },
        status: None,
    }
}

/// Helper to create an ACTIVE instance with the given `(addr, version, type)` interfaces
pub fn create_test_instance(id: &str, name: &str, interfaces: &[(&str, u8, &str)]) -> Instance {
    let mut addresses = BTreeMap::new();
    addresses.insert(
        "private".to_string(),
        interfaces
            .iter()
            .map(|(addr, version, ip_type)| InstanceAddress::new(*addr, *version, *ip_type))
            .collect(),
    );
    Instance {
        id: id.to_string(),
        name: name.to_string(),
        status: STATUS_ACTIVE.to_string(),
        addresses,
        metadata: BTreeMap::new(),
    }
}
