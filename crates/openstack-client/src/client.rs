//! OpenStack API client
//!
//! Implements `ComputeClientTrait` over the Nova, Neutron and Glance REST
//! APIs. Authentication is a pre-issued token; endpoint discovery through the
//! service catalog is left to the caller.

use std::collections::BTreeMap;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde_json::json;
use tracing::debug;

use crate::common::HttpClient;
use crate::compute_trait::ComputeClientTrait;
use crate::error::ComputeError;
use crate::models::*;

/// Base URLs of the OpenStack services in use
#[derive(Debug, Clone)]
pub struct Endpoints {
    /// Compute endpoint, including the version (e.g. `https://nova/v2.1`)
    pub compute: String,
    /// Network endpoint, without the `/v2.0` suffix
    pub network: String,
    /// Image endpoint, without the `/v2` suffix
    pub image: String,
}

/// OpenStack API client
pub struct OpenStackClient {
    http: HttpClient,
    endpoints: Endpoints,
}

impl OpenStackClient {
    /// Create a new OpenStack client
    ///
    /// # Arguments
    /// * `endpoints` - Service endpoints
    /// * `token` - Keystone token used for every request
    pub fn new(endpoints: Endpoints, token: String) -> Result<Self, ComputeError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http: HttpClient::new(client, token),
            endpoints,
        })
    }

    fn compute_url(&self, path: &str) -> String {
        HttpClient::build_url(&self.endpoints.compute, path)
    }

    fn network_url(&self, path: &str) -> String {
        HttpClient::build_url(&self.endpoints.network, path)
    }

    fn image_url(&self, path: &str) -> String {
        HttpClient::build_url(&self.endpoints.image, path)
    }

    /// Resolve an image name to its id
    async fn find_image(&self, name: &str) -> Result<Image, ComputeError> {
        let url = self.image_url(&format!("/v2/images?name={}", urlencoding::encode(name)));
        let envelope: ImagesEnvelope = self.http.get(&url).await?;
        envelope
            .images
            .into_iter()
            .next()
            .ok_or_else(|| ComputeError::NotFound(format!("image {} not found", name)))
    }

    /// Resolve a flavor name to its id
    async fn find_flavor(&self, name: &str) -> Result<Flavor, ComputeError> {
        let envelope: FlavorsEnvelope = self.http.get(&self.compute_url("/flavors/detail")).await?;
        envelope
            .flavors
            .into_iter()
            .find(|flavor| flavor.name == name)
            .ok_or_else(|| ComputeError::NotFound(format!("flavor {} not found", name)))
    }

    async fn find_floating_ip(&self, address: &str) -> Result<FloatingIp, ComputeError> {
        let url = self.network_url(&format!(
            "/v2.0/floatingips?floating_ip_address={}",
            urlencoding::encode(address)
        ));
        let envelope: FloatingIpsEnvelope = self.http.get(&url).await?;
        envelope
            .floatingips
            .into_iter()
            .next()
            .ok_or_else(|| ComputeError::NotFound(format!("floating IP {} not found", address)))
    }

    async fn find_instance_port(&self, instance_id: &str) -> Result<Port, ComputeError> {
        let url = self.network_url(&format!(
            "/v2.0/ports?device_id={}",
            urlencoding::encode(instance_id)
        ));
        let envelope: PortsEnvelope = self.http.get(&url).await?;
        envelope
            .ports
            .into_iter()
            .next()
            .ok_or_else(|| ComputeError::NotFound(format!("no port found for instance {}", instance_id)))
    }
}

/// Nova `name` filter matching exactly `name`; Nova treats the filter as a regular expression.
fn exact_name_filter(name: &str) -> String {
    let mut filter = String::with_capacity(name.len() + 2);
    filter.push('^');
    for c in name.chars() {
        if "\\.^$|?*+()[]{}".contains(c) {
            filter.push('\\');
        }
        filter.push(c);
    }
    filter.push('$');
    filter
}

/// Build the Nova `server` body for a create request
fn server_body(request: &CreateInstanceRequest, image_id: Option<&str>, flavor_id: &str) -> serde_json::Value {
    let mut server = json!({
        "name": request.name,
        "flavorRef": flavor_id,
        "user_data": BASE64.encode(&request.user_data),
        "metadata": request.metadata,
    });

    if let Some(image_id) = image_id {
        server["imageRef"] = json!(image_id);
    }
    if !request.key_name.is_empty() {
        server["key_name"] = json!(request.key_name);
    }
    if let Some(zone) = request.availability_zone.as_deref().filter(|z| !z.is_empty()) {
        server["availability_zone"] = json!(zone);
    }

    server["networks"] = if request.networks.is_empty() {
        json!("auto")
    } else {
        let networks: Vec<serde_json::Value> = request
            .networks
            .iter()
            .map(|network| {
                let mut entry = json!({});
                if let Some(uuid) = &network.uuid {
                    entry["uuid"] = json!(uuid);
                }
                if let Some(fixed_ip) = &network.fixed_ip {
                    entry["fixed_ip"] = json!(fixed_ip);
                }
                entry
            })
            .collect();
        json!(networks)
    };

    if !request.security_groups.is_empty() {
        let groups: Vec<serde_json::Value> = request
            .security_groups
            .iter()
            .map(|name| json!({ "name": name }))
            .collect();
        server["security_groups"] = json!(groups);
    }
    if !request.tags.is_empty() {
        server["tags"] = json!(request.tags);
    }
    if let Some(volume) = &request.root_volume {
        let mut mapping = json!({
            "boot_index": 0,
            "source_type": volume.source_type,
            "uuid": volume.source_uuid,
            "destination_type": "volume",
            "volume_size": volume.size_gb,
            "delete_on_termination": true,
        });
        if let Some(volume_type) = &volume.volume_type {
            mapping["volume_type"] = json!(volume_type);
        }
        server["block_device_mapping_v2"] = json!([mapping]);
    }

    json!({ "server": server })
}

#[async_trait::async_trait]
impl ComputeClientTrait for OpenStackClient {
    async fn create_instance(&self, request: &CreateInstanceRequest) -> Result<Instance, ComputeError> {
        let image_id = if request.root_volume.is_some() || request.image.is_empty() {
            None
        } else {
            Some(self.find_image(&request.image).await?.id)
        };
        let flavor = self.find_flavor(&request.flavor).await?;

        let body = server_body(request, image_id.as_deref(), &flavor.id);
        let created: ServerEnvelope = self.http.post(&self.compute_url("/servers"), &body).await?;
        debug!("Created server {} ({})", request.name, created.server.id);

        let mut instance = created.server;
        if instance.name.is_empty() {
            instance.name = request.name.clone();
        }
        Ok(instance)
    }

    async fn get_instance(&self, id: &str) -> Result<Instance, ComputeError> {
        let envelope: ServerEnvelope = self
            .http
            .get(&self.compute_url(&format!("/servers/{}", id)))
            .await?;
        Ok(envelope.server)
    }

    async fn list_instances(&self, opts: &InstanceListOpts) -> Result<Vec<Instance>, ComputeError> {
        let mut query = vec![format!("name={}", urlencoding::encode(&exact_name_filter(&opts.name)))];

        // A retired image or flavor must not hide the servers still running from it
        if !opts.image.is_empty() {
            match self.find_image(&opts.image).await {
                Ok(image) => query.push(format!("image={}", image.id)),
                Err(ComputeError::NotFound(_)) => {
                    debug!("Image {} no longer resolves, listing without image filter", opts.image);
                }
                Err(e) => return Err(e),
            }
        }
        if !opts.flavor.is_empty() {
            match self.find_flavor(&opts.flavor).await {
                Ok(flavor) => query.push(format!("flavor={}", flavor.id)),
                Err(ComputeError::NotFound(_)) => {
                    debug!("Flavor {} no longer resolves, listing without flavor filter", opts.flavor);
                }
                Err(e) => return Err(e),
            }
        }

        let url = self.compute_url(&format!("/servers/detail?{}", query.join("&")));
        let envelope: ServersEnvelope = self.http.get(&url).await?;
        Ok(envelope.servers)
    }

    async fn delete_instance(&self, id: &str) -> Result<(), ComputeError> {
        match self.http.delete(&self.compute_url(&format!("/servers/{}", id))).await {
            Ok(()) => Ok(()),
            Err(ComputeError::NotFound(_)) => {
                debug!("Server {} already gone", id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn associate_floating_ip(&self, instance_id: &str, floating_ip: &str) -> Result<(), ComputeError> {
        let fip = self.find_floating_ip(floating_ip).await?;
        let port = self.find_instance_port(instance_id).await?;

        if fip.port_id.as_deref() == Some(port.id.as_str()) {
            debug!("Floating IP {} already bound to port {}", floating_ip, port.id);
            return Ok(());
        }

        let body = json!({ "floatingip": { "port_id": port.id } });
        self.http
            .put(&self.network_url(&format!("/v2.0/floatingips/{}", fip.id)), &body)
            .await
    }

    async fn set_instance_metadata(
        &self,
        instance_id: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), ComputeError> {
        let body = json!({ "metadata": metadata });
        let _: serde_json::Value = self
            .http
            .post(&self.compute_url(&format!("/servers/{}/metadata", instance_id)), &body)
            .await?;
        Ok(())
    }

    async fn image_exists(&self, name: &str) -> Result<(), ComputeError> {
        self.find_image(name).await.map(|_| ())
    }

    async fn flavor_exists(&self, name: &str) -> Result<(), ComputeError> {
        self.find_flavor(name).await.map(|_| ())
    }

    async fn availability_zone_exists(&self, name: &str) -> Result<(), ComputeError> {
        let envelope: AvailabilityZonesEnvelope = self
            .http
            .get(&self.compute_url("/os-availability-zone"))
            .await?;

        if envelope
            .availability_zone_info
            .iter()
            .any(|zone| zone.zone_name == name && zone.zone_state.available)
        {
            Ok(())
        } else {
            Err(ComputeError::NotFound(format!(
                "availability zone {} not found or unavailable",
                name
            )))
        }
    }
}
