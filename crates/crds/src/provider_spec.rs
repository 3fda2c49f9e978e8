//! OpenStack provider spec
//!
//! The `spec.providerSpec.value` blob of a `Machine` is decoded exactly once at
//! the actuator boundary into a `ProviderSpec`. The blob is tagged by `kind`;
//! unknown kinds and unknown fields are rejected.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::machine::ProviderSpecHolder;

/// Errors produced while decoding a provider spec blob
#[derive(Debug, Error)]
pub enum ProviderSpecError {
    /// `spec.providerSpec.value` is missing
    #[error("providerSpec.value is not set")]
    Missing,

    /// The blob does not match any supported provider schema
    #[error("cannot unmarshal providerSpec field: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Provider-specific machine configuration, one variant per provider kind.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(tag = "kind")]
pub enum ProviderSpec {
    #[serde(rename = "OpenstackProviderSpec")]
    Openstack(OpenstackProviderSpec),
}

impl ProviderSpec {
    /// Decode the raw provider spec of a machine.
    pub fn from_holder(holder: &ProviderSpecHolder) -> Result<Self, ProviderSpecError> {
        let value = holder.value.as_ref().ok_or(ProviderSpecError::Missing)?;
        Ok(Self::deserialize(value)?)
    }

    /// Decode and unwrap the OpenStack variant.
    pub fn openstack(holder: &ProviderSpecHolder) -> Result<OpenstackProviderSpec, ProviderSpecError> {
        match Self::from_holder(holder)? {
            Self::Openstack(spec) => Ok(spec),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OpenstackProviderSpec {
    /// API version of the blob (informational)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Image name to boot from (ignored when booting from a root volume)
    #[serde(default)]
    pub image: String,

    /// Flavor name
    pub flavor: String,

    /// SSH key pair name
    #[serde(default)]
    pub key_name: String,

    /// Availability zone (provider default when empty)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,

    /// Boot from a volume instead of the image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_volume: Option<RootVolume>,

    /// Floating IP to associate once the instance is active
    #[serde(default, rename = "floatingIP", skip_serializing_if = "Option::is_none")]
    pub floating_ip: Option<String>,

    /// Secret holding the startup script
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data_secret: Option<SecretReference>,

    /// Networks to attach
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<NetworkParam>,

    /// Security group names
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_groups: Vec<String>,

    /// Server tags
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Extra server metadata
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub server_metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RootVolume {
    /// Source type (e.g. "image")
    pub source_type: String,

    /// Source UUID
    #[serde(rename = "sourceUUID")]
    pub source_uuid: String,

    /// Cinder volume type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_type: Option<String>,

    /// Size in GiB
    #[serde(default)]
    pub disk_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SecretReference {
    /// Secret name
    #[serde(default)]
    pub name: String,

    /// Namespace (defaults to the machine's namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NetworkParam {
    /// Network UUID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,

    /// Fixed IP requested on this network
    #[serde(default, rename = "fixedIP", skip_serializing_if = "Option::is_none")]
    pub fixed_ip: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn holder(value: serde_json::Value) -> ProviderSpecHolder {
        ProviderSpecHolder { value: Some(value) }
    }

    #[test]
    fn test_decode_openstack_spec() {
        let spec = ProviderSpec::openstack(&holder(json!({
            "apiVersion": "openstackproviderconfig.openshift.io/v1alpha1",
            "kind": "OpenstackProviderSpec",
            "image": "rhcos",
            "flavor": "m1.large",
            "keyName": "ops",
            "floatingIP": "172.24.4.10",
            "userDataSecret": {"name": "worker-user-data"},
            "networks": [{"uuid": "net-1"}],
        })))
        .unwrap();

        assert_eq!(spec.image, "rhcos");
        assert_eq!(spec.flavor, "m1.large");
        assert_eq!(spec.floating_ip.as_deref(), Some("172.24.4.10"));
        assert_eq!(spec.user_data_secret.unwrap().name, "worker-user-data");
        assert_eq!(spec.networks[0].uuid.as_deref(), Some("net-1"));
    }

    #[test]
    fn test_unknown_field_fails_closed() {
        let err = ProviderSpec::openstack(&holder(json!({
            "kind": "OpenstackProviderSpec",
            "flavor": "m1.large",
            "imageRef": "typo",
        })))
        .unwrap_err();
        assert!(matches!(err, ProviderSpecError::Decode(_)));
    }

    #[test]
    fn test_unknown_kind_fails_closed() {
        let err = ProviderSpec::from_holder(&holder(json!({
            "kind": "AWSMachineProviderConfig",
            "flavor": "m1.large",
        })))
        .unwrap_err();
        assert!(matches!(err, ProviderSpecError::Decode(_)));
    }

    #[test]
    fn test_missing_value() {
        let err = ProviderSpec::from_holder(&ProviderSpecHolder::default()).unwrap_err();
        assert!(matches!(err, ProviderSpecError::Missing));
    }
}
