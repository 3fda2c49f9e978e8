//! OpenStack API data models
//!
//! Types mirror the subset of the Nova (compute), Neutron (network) and
//! Glance (image) JSON payloads used by the machine controller.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Server status reported once an instance has finished building
pub const STATUS_ACTIVE: &str = "ACTIVE";

/// A compute instance (Nova server)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Instance {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Lifecycle state (BUILD, ACTIVE, ERROR, ...)
    #[serde(default)]
    pub status: String,
    /// Addresses keyed by network name
    #[serde(default)]
    pub addresses: BTreeMap<String, Vec<InstanceAddress>>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Instance {
    pub fn is_active(&self) -> bool {
        self.status == STATUS_ACTIVE
    }
}

/// A single address on one of the instance's network interfaces
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceAddress {
    /// The IP address
    pub addr: String,
    /// IP family (4 or 6)
    pub version: u8,
    /// Interface role: "fixed" or "floating"
    #[serde(rename = "OS-EXT-IPS:type", default)]
    pub ip_type: String,
}

impl InstanceAddress {
    pub fn new(addr: impl Into<String>, version: u8, ip_type: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            version,
            ip_type: ip_type.into(),
        }
    }
}

/// Filter used to find the instance bound to a machine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceListOpts {
    pub name: String,
    pub image: String,
    pub flavor: String,
}

/// Request to boot a new instance
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateInstanceRequest {
    pub name: String,
    pub image: String,
    pub flavor: String,
    pub key_name: String,
    pub availability_zone: Option<String>,
    /// Provisioning payload, passed through byte for byte (sent base64-encoded)
    pub user_data: Vec<u8>,
    pub networks: Vec<NetworkAttachment>,
    pub security_groups: Vec<String>,
    pub tags: Vec<String>,
    pub metadata: BTreeMap<String, String>,
    pub root_volume: Option<BootVolume>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkAttachment {
    pub uuid: Option<String>,
    pub fixed_ip: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootVolume {
    pub source_type: String,
    pub source_uuid: String,
    pub volume_type: Option<String>,
    pub size_gb: u32,
}

// Wire envelopes

#[derive(Debug, Deserialize)]
pub(crate) struct ServerEnvelope {
    pub server: Instance,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ServersEnvelope {
    pub servers: Vec<Instance>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flavor {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FlavorsEnvelope {
    pub flavors: Vec<Flavor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ImagesEnvelope {
    pub images: Vec<Image>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityZone {
    pub zone_name: String,
    #[serde(default)]
    pub zone_state: ZoneState,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ZoneState {
    #[serde(default)]
    pub available: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AvailabilityZonesEnvelope {
    #[serde(rename = "availabilityZoneInfo")]
    pub availability_zone_info: Vec<AvailabilityZone>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloatingIp {
    pub id: String,
    pub floating_ip_address: String,
    #[serde(default)]
    pub port_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FloatingIpsEnvelope {
    pub floatingips: Vec<FloatingIp>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Port {
    pub id: String,
    #[serde(default)]
    pub device_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PortsEnvelope {
    pub ports: Vec<Port>,
}
