//! Machine CRD
//!
//! Desired-state record for a single compute instance. The spec is owned by
//! the operator (or a scaling component); status and the instance annotations
//! are written only by the machine actuator.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Label carrying the name of the cluster a machine belongs to.
pub const CLUSTER_LABEL: &str = "machine.uccp.io/cluster-api-cluster";

/// Label carrying the machine role (`master` for control plane nodes).
pub const MACHINE_ROLE_LABEL: &str = "machine.uccp.io/cluster-api-machine-role";

/// Role label value marking an initial/control plane node.
pub const MASTER_ROLE: &str = "master";

/// Annotation holding the provider-reported instance lifecycle state.
pub const INSTANCE_STATE_ANNOTATION: &str = "machine.uccp.io/instance-state";

/// Annotation holding the provider resource id of the bound instance.
pub const RESOURCE_ID_ANNOTATION: &str = "openstack-resourceId";

/// Instance state sentinel written when the machine is broken.
pub const ERROR_STATE: &str = "ERROR";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "machine.uccp.io",
    version = "v1beta1",
    kind = "Machine",
    namespaced,
    status = "MachineStatus",
    shortname = "ma",
    derive = "PartialEq",
    derive = "Default",
    printcolumn = r#"{"name":"ProviderID","type":"string","jsonPath":".spec.providerID"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".metadata.annotations.machine\\.uccp\\.io/instance-state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Provider-specific configuration, decoded by the actuator
    #[serde(default)]
    pub provider_spec: ProviderSpecHolder,

    /// Identity of the bound provider instance. Immutable once set.
    #[serde(default, rename = "providerID", skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

/// Wrapper around the raw provider configuration blob.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSpecHolder {
    /// Raw provider configuration (see `ProviderSpec`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    /// Addresses assigned to the bound instance
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<MachineAddress>,

    /// Machine-readable reason for the last terminal error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,

    /// Human-readable message for the last terminal error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Last time the status was written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<chrono::DateTime<chrono::Utc>>,
}

/// A single network address of a machine.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct MachineAddress {
    /// Address type
    #[serde(rename = "type")]
    pub address_type: MachineAddressType,

    /// The address itself (IP or hostname)
    pub address: String,
}

impl MachineAddress {
    pub fn new(address_type: MachineAddressType, address: impl Into<String>) -> Self {
        Self {
            address_type,
            address: address.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum MachineAddressType {
    /// Floating / externally routable IP
    #[serde(rename = "ExternalIP")]
    ExternalIp,

    /// Fixed / tenant network IP
    #[serde(rename = "InternalIP")]
    InternalIp,

    #[serde(rename = "Hostname")]
    Hostname,

    #[serde(rename = "InternalDNS")]
    InternalDns,
}

impl Machine {
    /// `namespace/name` key used in logs and backoff bookkeeping.
    pub fn key(&self) -> String {
        format!(
            "{}/{}",
            self.metadata.namespace.as_deref().unwrap_or("default"),
            self.metadata.name.as_deref().unwrap_or("<unknown>")
        )
    }

    /// Value of the cluster membership label, if any.
    pub fn cluster_label(&self) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(CLUSTER_LABEL))
            .map(String::as_str)
    }

    /// Whether the machine is an initial/control plane node.
    pub fn is_control_plane(&self) -> bool {
        self.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(MACHINE_ROLE_LABEL))
            .is_some_and(|role| role == MASTER_ROLE)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(key))
            .map(String::as_str)
    }

    pub fn set_annotation(&mut self, key: &str, value: impl Into<String>) {
        self.metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.into());
    }

    pub fn remove_annotation(&mut self, key: &str) {
        if let Some(annotations) = self.metadata.annotations.as_mut() {
            annotations.remove(key);
        }
    }

    /// Current address list (empty when no status has been written yet).
    pub fn addresses(&self) -> &[MachineAddress] {
        self.status
            .as_ref()
            .map(|status| status.addresses.as_slice())
            .unwrap_or_default()
    }
}

fn preserve_unknown_fields(_: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    #[test]
    fn test_machine_status_serializes_address_types() {
        let status = MachineStatus {
            addresses: vec![
                MachineAddress::new(MachineAddressType::ExternalIp, "172.24.4.10"),
                MachineAddress::new(MachineAddressType::InternalDns, "worker-0"),
            ],
            ..Default::default()
        };

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["addresses"][0]["type"], "ExternalIP");
        assert_eq!(json["addresses"][1]["type"], "InternalDNS");
        assert!(json.get("errorReason").is_none());
    }

    #[test]
    fn test_provider_id_uses_uppercase_id_suffix() {
        let spec = MachineSpec {
            provider_id: Some("openstack:///abc".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["providerID"], "openstack:///abc");
    }

    #[test]
    fn test_machine_role_and_annotations() {
        let mut machine = Machine {
            metadata: ObjectMeta {
                name: Some("master-0".to_string()),
                namespace: Some("machine-api".to_string()),
                labels: Some(BTreeMap::from([
                    (CLUSTER_LABEL.to_string(), "cluster-x".to_string()),
                    (MACHINE_ROLE_LABEL.to_string(), MASTER_ROLE.to_string()),
                ])),
                ..Default::default()
            },
            spec: MachineSpec::default(),
            status: None,
        };

        assert!(machine.is_control_plane());
        assert_eq!(machine.cluster_label(), Some("cluster-x"));
        assert_eq!(machine.key(), "machine-api/master-0");
        assert!(machine.addresses().is_empty());

        machine.set_annotation(INSTANCE_STATE_ANNOTATION, ERROR_STATE);
        assert_eq!(machine.annotation(INSTANCE_STATE_ANNOTATION), Some("ERROR"));
        machine.remove_annotation(INSTANCE_STATE_ANNOTATION);
        assert_eq!(machine.annotation(INSTANCE_STATE_ANNOTATION), None);
    }
}
