//! OpenStack Machine Controller
//!
//! Provisions OpenStack compute instances for `Machine` records: creates,
//! refreshes and deletes instances, renders their user data, issues
//! bootstrap tokens for joining nodes and reports failures onto the record.

mod actuator;
mod backoff;
mod bootstrap;
mod config;
mod controller;
mod error;
mod events;
mod store;
mod userdata;
mod watcher;
#[cfg(test)]
mod test_utils;

use crate::config::ActuatorConfig;
use crate::error::ControllerError;
use controller::Controller;
use openstack_client::Endpoints;
use std::env;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn required_env(name: &str) -> Result<String, ControllerError> {
    env::var(name).map_err(|_| ControllerError::InvalidConfig(format!("{} environment variable is required", name)))
}

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kube and reqwest both link rustls; pick the provider once
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting OpenStack Machine Controller");

    // Load configuration from environment variables
    let endpoints = Endpoints {
        compute: required_env("OS_COMPUTE_ENDPOINT")?,
        network: required_env("OS_NETWORK_ENDPOINT")?,
        image: required_env("OS_IMAGE_ENDPOINT")?,
    };
    let auth_token = required_env("OS_AUTH_TOKEN")?;
    let namespace = env::var("WATCH_NAMESPACE").ok();
    let config = ActuatorConfig::from_env();

    info!("Configuration:");
    info!("  Compute endpoint: {}", endpoints.compute);
    info!("  Namespace: {}", namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Instance create timeout: {:?}", config.instance_create_timeout);

    // Initialize and run controller
    let controller = Controller::new(endpoints, auth_token, namespace, config).await?;
    controller.run().await?;

    Ok(())
}
