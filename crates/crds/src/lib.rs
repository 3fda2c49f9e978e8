//! Machine API CRD Definitions
//!
//! Kubernetes Custom Resource Definitions consumed by the OpenStack machine
//! controller, plus the decoded OpenStack provider spec.

pub mod infrastructure;
pub mod machine;
pub mod provider_spec;

pub use infrastructure::*;
pub use machine::*;
pub use provider_spec::*;
