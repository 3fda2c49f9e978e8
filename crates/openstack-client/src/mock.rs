//! Mock ComputeClient for unit testing
//!
//! This module provides a mock implementation of ComputeClientTrait that can be used
//! in unit tests without requiring a running OpenStack cloud.
//!
//! Instances are stored in memory. Each operation can be made to fail, every call is
//! counted, and the number of polls before an instance reports ACTIVE is configurable.

use crate::compute_trait::ComputeClientTrait;
use crate::error::ComputeError;
use crate::models::*;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Operations of the compute client, used for failure injection and call counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    CreateInstance,
    GetInstance,
    ListInstances,
    DeleteInstance,
    AssociateFloatingIp,
    SetInstanceMetadata,
    ImageExists,
    FlavorExists,
    AvailabilityZoneExists,
}

#[derive(Debug, Clone)]
struct StoredInstance {
    instance: Instance,
    image: String,
    flavor: String,
}

/// Mock ComputeClient for testing
#[derive(Clone, Default)]
pub struct MockComputeClient {
    instances: Arc<Mutex<HashMap<String, StoredInstance>>>,
    images: Arc<Mutex<HashSet<String>>>,
    flavors: Arc<Mutex<HashSet<String>>>,
    availability_zones: Arc<Mutex<HashSet<String>>>,
    failures: Arc<Mutex<HashSet<MockOperation>>>,
    calls: Arc<Mutex<HashMap<MockOperation, usize>>>,
    // None means instances never become ACTIVE
    polls_until_active: Arc<Mutex<Option<usize>>>,
    polls: Arc<Mutex<HashMap<String, usize>>>,
    created_addresses: Arc<Mutex<BTreeMap<String, Vec<InstanceAddress>>>>,
    created_requests: Arc<Mutex<Vec<CreateInstanceRequest>>>,
    floating_ips: Arc<Mutex<Vec<(String, String)>>>,
}

impl MockComputeClient {
    /// Create a new mock client; instances become ACTIVE on the first poll
    pub fn new() -> Self {
        Self {
            polls_until_active: Arc::new(Mutex::new(Some(0))),
            ..Default::default()
        }
    }

    /// Register an image name (for test setup)
    pub fn add_image(&self, name: &str) {
        self.images.lock().unwrap().insert(name.to_string());
    }

    /// Deregister an image; instances booted from it keep running
    pub fn remove_image(&self, name: &str) {
        self.images.lock().unwrap().remove(name);
    }

    /// Register a flavor name (for test setup)
    pub fn add_flavor(&self, name: &str) {
        self.flavors.lock().unwrap().insert(name.to_string());
    }

    /// Register an availability zone (for test setup)
    pub fn add_availability_zone(&self, name: &str) {
        self.availability_zones.lock().unwrap().insert(name.to_string());
    }

    /// Add an existing instance booted from `image` with `flavor` (for test setup)
    pub fn add_instance(&self, instance: Instance, image: &str, flavor: &str) {
        self.instances.lock().unwrap().insert(
            instance.id.clone(),
            StoredInstance {
                instance,
                image: image.to_string(),
                flavor: flavor.to_string(),
            },
        );
    }

    /// Addresses given to every instance created from now on
    pub fn set_created_addresses(&self, addresses: BTreeMap<String, Vec<InstanceAddress>>) {
        *self.created_addresses.lock().unwrap() = addresses;
    }

    /// Number of `get_instance` polls answered with BUILD before ACTIVE
    pub fn set_polls_until_active(&self, polls: usize) {
        *self.polls_until_active.lock().unwrap() = Some(polls);
    }

    /// Instances stay in BUILD forever
    pub fn set_never_active(&self) {
        *self.polls_until_active.lock().unwrap() = None;
    }

    /// Make every call of `operation` fail with an API error
    pub fn fail_on(&self, operation: MockOperation) {
        self.failures.lock().unwrap().insert(operation);
    }

    /// Number of times `operation` was called
    pub fn calls(&self, operation: MockOperation) -> usize {
        self.calls.lock().unwrap().get(&operation).copied().unwrap_or(0)
    }

    /// Requests passed to `create_instance`, in call order
    pub fn created_requests(&self) -> Vec<CreateInstanceRequest> {
        self.created_requests.lock().unwrap().clone()
    }

    /// `(instance_id, floating_ip)` pairs associated so far
    pub fn floating_ip_associations(&self) -> Vec<(String, String)> {
        self.floating_ips.lock().unwrap().clone()
    }

    /// Current copy of an instance
    pub fn instance(&self, id: &str) -> Option<Instance> {
        self.instances.lock().unwrap().get(id).map(|stored| stored.instance.clone())
    }

    pub fn instance_count(&self) -> usize {
        self.instances.lock().unwrap().len()
    }

    fn record(&self, operation: MockOperation) -> Result<(), ComputeError> {
        *self.calls.lock().unwrap().entry(operation).or_insert(0) += 1;
        if self.failures.lock().unwrap().contains(&operation) {
            return Err(ComputeError::Api(format!("injected failure for {:?}", operation)));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ComputeClientTrait for MockComputeClient {
    async fn create_instance(&self, request: &CreateInstanceRequest) -> Result<Instance, ComputeError> {
        self.record(MockOperation::CreateInstance)?;
        self.created_requests.lock().unwrap().push(request.clone());

        let instance = Instance {
            id: uuid::Uuid::new_v4().to_string(),
            name: request.name.clone(),
            status: "BUILD".to_string(),
            addresses: self.created_addresses.lock().unwrap().clone(),
            metadata: request.metadata.clone(),
        };
        self.add_instance(instance.clone(), &request.image, &request.flavor);
        Ok(instance)
    }

    async fn get_instance(&self, id: &str) -> Result<Instance, ComputeError> {
        self.record(MockOperation::GetInstance)?;

        let polls = {
            let mut polls = self.polls.lock().unwrap();
            let count = polls.entry(id.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        let threshold = *self.polls_until_active.lock().unwrap();

        let mut instances = self.instances.lock().unwrap();
        let stored = instances
            .get_mut(id)
            .ok_or_else(|| ComputeError::NotFound(format!("server {} not found", id)))?;
        if stored.instance.status == "BUILD" && threshold.is_some_and(|t| polls > t) {
            stored.instance.status = STATUS_ACTIVE.to_string();
        }
        Ok(stored.instance.clone())
    }

    async fn list_instances(&self, opts: &InstanceListOpts) -> Result<Vec<Instance>, ComputeError> {
        self.record(MockOperation::ListInstances)?;
        // Like the real client, a name that no longer resolves is not used as a filter
        let filter_image = !opts.image.is_empty() && self.images.lock().unwrap().contains(&opts.image);
        let filter_flavor = !opts.flavor.is_empty() && self.flavors.lock().unwrap().contains(&opts.flavor);
        let instances = self.instances.lock().unwrap();
        let mut matches: Vec<Instance> = instances
            .values()
            .filter(|stored| {
                stored.instance.name == opts.name
                    && (!filter_image || stored.image == opts.image)
                    && (!filter_flavor || stored.flavor == opts.flavor)
            })
            .map(|stored| stored.instance.clone())
            .collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matches)
    }

    async fn delete_instance(&self, id: &str) -> Result<(), ComputeError> {
        self.record(MockOperation::DeleteInstance)?;
        self.instances.lock().unwrap().remove(id);
        Ok(())
    }

    async fn associate_floating_ip(&self, instance_id: &str, floating_ip: &str) -> Result<(), ComputeError> {
        self.record(MockOperation::AssociateFloatingIp)?;
        let mut instances = self.instances.lock().unwrap();
        let stored = instances
            .get_mut(instance_id)
            .ok_or_else(|| ComputeError::NotFound(format!("server {} not found", instance_id)))?;
        if let Some(first) = stored.instance.addresses.values_mut().next() {
            first.push(InstanceAddress::new(floating_ip, 4, "floating"));
        }
        self.floating_ips
            .lock()
            .unwrap()
            .push((instance_id.to_string(), floating_ip.to_string()));
        Ok(())
    }

    async fn set_instance_metadata(
        &self,
        instance_id: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), ComputeError> {
        self.record(MockOperation::SetInstanceMetadata)?;
        let mut instances = self.instances.lock().unwrap();
        let stored = instances
            .get_mut(instance_id)
            .ok_or_else(|| ComputeError::NotFound(format!("server {} not found", instance_id)))?;
        stored.instance.metadata.extend(metadata.clone());
        Ok(())
    }

    async fn image_exists(&self, name: &str) -> Result<(), ComputeError> {
        self.record(MockOperation::ImageExists)?;
        if self.images.lock().unwrap().contains(name) {
            Ok(())
        } else {
            Err(ComputeError::NotFound(format!("image {} not found", name)))
        }
    }

    async fn flavor_exists(&self, name: &str) -> Result<(), ComputeError> {
        self.record(MockOperation::FlavorExists)?;
        if self.flavors.lock().unwrap().contains(name) {
            Ok(())
        } else {
            Err(ComputeError::NotFound(format!("flavor {} not found", name)))
        }
    }

    async fn availability_zone_exists(&self, name: &str) -> Result<(), ComputeError> {
        self.record(MockOperation::AvailabilityZoneExists)?;
        if self.availability_zones.lock().unwrap().contains(name) {
            Ok(())
        } else {
            Err(ComputeError::NotFound(format!("availability zone {} not found", name)))
        }
    }
}
