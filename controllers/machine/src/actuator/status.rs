//! Status write-back.
//!
//! Binds the provider identity onto the record, records the instance id and
//! lifecycle state as annotations, and derives the record's address list
//! from the instance's interfaces.

use crds::{
    INSTANCE_STATE_ANNOTATION, Machine, MachineAddress, MachineAddressType, RESOURCE_ID_ANNOTATION,
};
use openstack_client::Instance;
use tracing::{debug, info};

use super::Actuator;
use crate::error::{ControllerError, MachineError};
use crate::events::EventAction;

/// Prefix of OpenStack provider ids.
pub const PROVIDER_ID_PREFIX: &str = "openstack:///";

pub fn provider_id_for(instance_id: &str) -> String {
    format!("{}{}", PROVIDER_ID_PREFIX, instance_id)
}

/// Compute the address list of a machine from its instance.
///
/// Only IPv4 interfaces are considered: `fixed` becomes `InternalIP` and
/// `floating` becomes `ExternalIP`. `Hostname` and `InternalDNS` entries equal
/// to the machine name are appended.
pub fn addresses_from_instance(instance: &Instance, machine_name: &str) -> Vec<MachineAddress> {
    let mut addresses = Vec::new();

    for interfaces in instance.addresses.values() {
        for interface in interfaces {
            if interface.version != 4 {
                debug!(
                    "Ignoring IPv{} address {}: only IPv4 is supported",
                    interface.version, interface.addr
                );
                continue;
            }

            let address_type = match interface.ip_type.as_str() {
                "floating" => MachineAddressType::ExternalIp,
                "fixed" => MachineAddressType::InternalIp,
                other => {
                    debug!("Ignoring address {} with unknown type '{}'", interface.addr, other);
                    continue;
                }
            };
            addresses.push(MachineAddress::new(address_type, interface.addr.clone()));
        }
    }

    addresses.push(MachineAddress::new(MachineAddressType::Hostname, machine_name));
    addresses.push(MachineAddress::new(MachineAddressType::InternalDns, machine_name));
    addresses
}

impl Actuator {
    /// Record the bound instance onto the machine.
    pub(crate) async fn write_back(&self, machine: &Machine, instance: &Instance) -> Result<(), ControllerError> {
        let mut latest = self.latest(machine).await?;
        let key = latest.key();
        let provider_id = provider_id_for(&instance.id);

        match latest.spec.provider_id.as_deref() {
            Some(existing) if existing != provider_id => {
                let err = MachineError::invalid_configuration(format!(
                    "providerID has changed from {} to {}. This is not supported. \
                     The recommended action is to delete and recreate this machine.",
                    existing, provider_id
                ));
                return Err(self.report(&latest, err, Some(EventAction::Update)).await);
            }
            Some(_) => {}
            None => {
                info!("Binding Machine {} to {}", key, provider_id);
                latest.spec.provider_id = Some(provider_id);
            }
        }

        latest.set_annotation(RESOURCE_ID_ANNOTATION, instance.id.clone());
        latest.set_annotation(INSTANCE_STATE_ANNOTATION, instance.status.clone());
        let mut latest = self.persist(latest).await?;

        let name = latest.metadata.name.clone().unwrap_or_default();
        let addresses = addresses_from_instance(instance, &name);
        if latest.addresses() == addresses.as_slice() {
            debug!("Machine {} addresses unchanged, skipping status update", key);
            return Ok(());
        }

        let status = latest.status.get_or_insert_with(Default::default);
        status.addresses = addresses;
        status.last_updated = Some(chrono::Utc::now());
        self.persist_status(latest).await?;
        info!("Updated Machine {} addresses", key);
        Ok(())
    }

    /// Forget the instance after it disappeared from the provider.
    pub(crate) async fn clear_instance_state(&self, machine: &Machine) -> Result<(), ControllerError> {
        let mut latest = self.latest(machine).await?;
        let key = latest.key();
        info!("No instance found for Machine {}, clearing instance state", key);

        if latest.annotation(INSTANCE_STATE_ANNOTATION).is_some() {
            latest.remove_annotation(INSTANCE_STATE_ANNOTATION);
            latest = self.persist(latest).await?;
        }

        if !latest.addresses().is_empty() {
            let status = latest.status.get_or_insert_with(Default::default);
            status.addresses.clear();
            status.last_updated = Some(chrono::Utc::now());
            self.persist_status(latest).await?;
        }
        Ok(())
    }
}
