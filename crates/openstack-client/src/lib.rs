//! OpenStack REST API Client
//!
//! A small client for the parts of the OpenStack compute (Nova), network
//! (Neutron) and image (Glance) APIs that the machine controller needs.
//!
//! # Example
//!
//! ```no_run
//! use openstack_client::{ComputeClientTrait, Endpoints, InstanceListOpts, OpenStackClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = OpenStackClient::new(
//!     Endpoints {
//!         compute: "https://nova.example.com/v2.1".to_string(),
//!         network: "https://neutron.example.com".to_string(),
//!         image: "https://glance.example.com".to_string(),
//!     },
//!     "your-auth-token".to_string(),
//! )?;
//!
//! let instances = client
//!     .list_instances(&InstanceListOpts {
//!         name: "worker-0".to_string(),
//!         image: "rhcos".to_string(),
//!         flavor: "m1.large".to_string(),
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod common;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod compute_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::{Endpoints, OpenStackClient};
pub use common::HttpClient;
pub use compute_trait::ComputeClientTrait;
pub use error::ComputeError;
pub use models::*;
#[cfg(feature = "test-util")]
pub use mock::{MockComputeClient, MockOperation};
