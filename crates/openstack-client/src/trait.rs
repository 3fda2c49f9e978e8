//! ComputeClient trait for mocking
//!
//! This trait abstracts the OpenStack client to enable mocking in unit tests.
//! The concrete OpenStackClient implements this trait, and tests can use mock implementations.

use std::collections::BTreeMap;

use crate::error::ComputeError;
use crate::models::*;

/// Trait for compute provider operations used by the machine actuator
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
/// Implementations hold no per-machine state and are shared across reconciles.
#[async_trait::async_trait]
pub trait ComputeClientTrait: Send + Sync {
    // Instance lifecycle
    async fn create_instance(&self, request: &CreateInstanceRequest) -> Result<Instance, ComputeError>;
    async fn get_instance(&self, id: &str) -> Result<Instance, ComputeError>;
    async fn list_instances(&self, opts: &InstanceListOpts) -> Result<Vec<Instance>, ComputeError>;
    async fn delete_instance(&self, id: &str) -> Result<(), ComputeError>;

    // Networking
    async fn associate_floating_ip(&self, instance_id: &str, floating_ip: &str) -> Result<(), ComputeError>;

    /// Create or update metadata items on an instance
    async fn set_instance_metadata(&self, instance_id: &str, metadata: &BTreeMap<String, String>) -> Result<(), ComputeError>;

    // Reference validation: `Err(ComputeError::NotFound)` when absent
    async fn image_exists(&self, name: &str) -> Result<(), ComputeError>;
    async fn flavor_exists(&self, name: &str) -> Result<(), ComputeError>;
    async fn availability_zone_exists(&self, name: &str) -> Result<(), ComputeError>;
}
