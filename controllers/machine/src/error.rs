//! Controller-specific error types.
//!
//! `MachineError` is the classified failure reported back onto a Machine
//! record. `ControllerError` is what every fallible operation in the
//! controller returns.

use std::fmt;

use kube::Error as KubeError;
use openstack_client::ComputeError;
use thiserror::Error;

/// Machine-readable reason written to `status.errorReason`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineErrorReason {
    InvalidConfiguration,
    CreateError,
    DeleteError,
}

impl MachineErrorReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidConfiguration => "InvalidConfiguration",
            Self::CreateError => "CreateError",
            Self::DeleteError => "DeleteError",
        }
    }
}

impl fmt::Display for MachineErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broad class of a machine error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The desired state is wrong; retrying without a change cannot succeed.
    Configuration,
    /// The provider or a collaborator failed; retrying may succeed.
    Provisioning,
}

/// A classified machine failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{reason}: {message}")]
pub struct MachineError {
    pub reason: MachineErrorReason,
    pub message: String,
}

impl MachineError {
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self {
            reason: MachineErrorReason::InvalidConfiguration,
            message: message.into(),
        }
    }

    pub fn create(message: impl Into<String>) -> Self {
        Self {
            reason: MachineErrorReason::CreateError,
            message: message.into(),
        }
    }

    pub fn delete(message: impl Into<String>) -> Self {
        Self {
            reason: MachineErrorReason::DeleteError,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self.reason {
            MachineErrorReason::InvalidConfiguration => ErrorKind::Configuration,
            _ => ErrorKind::Provisioning,
        }
    }
}

/// Errors that can occur in the machine controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// OpenStack API error
    #[error("OpenStack error: {0}")]
    Compute(#[from] ComputeError),

    /// Classified machine failure (already reported onto the record)
    #[error("Machine error: {0}")]
    Machine(#[from] MachineError),

    /// Record store read or write failed
    #[error("Store error: {0}")]
    Store(String),

    /// Persisting an error report onto the record failed
    #[error("unable to update machine status: {0}")]
    StatusUpdate(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Finalizer bookkeeping failed
    #[error("Finalizer error: {0}")]
    Finalizer(#[source] Box<kube_runtime::finalizer::Error<ControllerError>>),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// The classified machine error, if this is one.
    pub fn machine_error(&self) -> Option<&MachineError> {
        match self {
            Self::Machine(e) => Some(e),
            Self::Finalizer(inner) => match inner.as_ref() {
                kube_runtime::finalizer::Error::ApplyFailed(e)
                | kube_runtime::finalizer::Error::CleanupFailed(e) => e.machine_error(),
                _ => None,
            },
            _ => None,
        }
    }

    /// Whether retrying without a change to the record could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.machine_error().map(MachineError::kind),
            Some(ErrorKind::Configuration)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_kinds() {
        assert_eq!(MachineError::invalid_configuration("x").kind(), ErrorKind::Configuration);
        assert_eq!(MachineError::create("x").kind(), ErrorKind::Provisioning);
        assert_eq!(MachineError::delete("x").kind(), ErrorKind::Provisioning);
    }

    #[test]
    fn test_retryable() {
        let config: ControllerError = MachineError::invalid_configuration("bad flavor").into();
        assert!(!config.is_retryable());

        let provisioning: ControllerError = MachineError::create("quota").into();
        assert!(provisioning.is_retryable());

        assert!(ControllerError::Store("timeout".to_string()).is_retryable());
    }

    #[test]
    fn test_display() {
        let err = MachineError::delete("error deleting OpenStack instance: boom");
        assert_eq!(err.to_string(), "DeleteError: error deleting OpenStack instance: boom");
    }
}
