//! Kubernetes Event publishing.
//!
//! The actuator emits lifecycle events (`Created`, `Deleted`, `Failed<Action>`)
//! on the Machine it is acting on. Publishing is best-effort: a failed
//! publish is logged and never fails the operation.

use async_trait::async_trait;
use crds::Machine;
use kube::Client;
use kube::Resource;
use kube::runtime::events::{Event, EventType as KubeEventType, Recorder, Reporter};
use tracing::{debug, warn};

/// Name the controller reports events under.
pub const REPORTER_NAME: &str = "openstack-machine-controller";

/// Event reasons emitted by the actuator.
pub mod reasons {
    pub const CREATED: &str = "Created";
    pub const DELETED: &str = "Deleted";
    pub const FAILED_PREFIX: &str = "Failed";
}

/// Actions an event relates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    Create,
    Update,
    Delete,
}

impl EventAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
        }
    }

    /// Reason used when this action fails (`FailedCreate`, ...).
    pub fn failed_reason(self) -> String {
        format!("{}{}", reasons::FAILED_PREFIX, self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

/// Sink for Machine events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        machine: &Machine,
        event_type: EventType,
        reason: &str,
        action: EventAction,
        note: Option<String>,
    );
}

/// Publishes events through the Kubernetes events API.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    pub fn new(client: Client, controller: &str) -> Self {
        let reporter = Reporter {
            controller: controller.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        machine: &Machine,
        event_type: EventType,
        reason: &str,
        action: EventAction,
        note: Option<String>,
    ) {
        let event = Event {
            type_: match event_type {
                EventType::Normal => KubeEventType::Normal,
                EventType::Warning => KubeEventType::Warning,
            },
            reason: reason.to_string(),
            note,
            action: action.as_str().to_string(),
            secondary: None,
        };

        let reference = machine.object_ref(&());
        if let Err(e) = self.recorder.publish(&event, &reference).await {
            warn!("Failed to publish {} event for Machine {}: {}", reason, machine.key(), e);
        }
    }
}

/// Discards events; used before the cluster API is reachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        machine: &Machine,
        _event_type: EventType,
        reason: &str,
        _action: EventAction,
        _note: Option<String>,
    ) {
        debug!("Dropping {} event for Machine {}", reason, machine.key());
    }
}
