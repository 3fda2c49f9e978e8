//! Infrastructure CRD
//!
//! Cluster-scoped singleton (`cluster`) describing the cluster the machine
//! controller runs in. Only the infrastructure name is consumed.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Name of the singleton Infrastructure object.
pub const INFRASTRUCTURE_NAME: &str = "cluster";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "config.uccp.io",
    version = "v1",
    kind = "Infrastructure",
    status = "InfrastructureStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureSpec {
    /// Cloud platform type (informational)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureStatus {
    /// Unique identity of the cluster, matched against machine cluster labels
    #[serde(default)]
    pub infrastructure_name: String,
}
