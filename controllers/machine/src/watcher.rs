//! Machine watcher.
//!
//! Watches Machine records with `kube_runtime::Controller` and drives the
//! actuator: a live record is created or refreshed, a deleted one has its
//! instance removed before the finalizer is released.

use crate::actuator::Actuator;
use crate::backoff::FibonacciBackoff;
use crate::error::ControllerError;
use crds::Machine;
use futures::StreamExt;
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::finalizer::{Event as FinalizerEvent, finalizer};
use kube_runtime::{Controller, watcher};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Finalizer held on every Machine until its instance is gone.
pub const MACHINE_FINALIZER: &str = "machine.uccp.io/machine";

/// Healthy machines are refreshed this often to pick up address changes.
const RESYNC_PERIOD: Duration = Duration::from_secs(600);

const BACKOFF_MIN_SECONDS: u64 = 10;
const BACKOFF_MAX_SECONDS: u64 = 300;

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::new(BACKOFF_MIN_SECONDS, BACKOFF_MAX_SECONDS),
            error_count: 0,
        }
    }
}

/// Per-record retry delays (namespace/name -> BackoffState)
#[derive(Debug, Default)]
pub struct RetryTracker {
    states: Mutex<HashMap<String, BackoffState>>,
}

impl RetryTracker {
    /// Next delay for a failing record, with the number of consecutive failures.
    pub fn next(&self, key: &str) -> (Duration, u32) {
        match self.states.lock() {
            Ok(mut states) => {
                let state = states.entry(key.to_string()).or_insert_with(BackoffState::new);
                state.error_count += 1;
                (state.backoff.next_backoff(), state.error_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff states: {}, using default backoff", e);
                (Duration::from_secs(BACKOFF_MIN_SECONDS), 0)
            }
        }
    }

    /// Forget the failures of a record after a successful reconcile.
    pub fn reset(&self, key: &str) {
        if let Ok(mut states) = self.states.lock() {
            states.remove(key);
        }
    }

    /// Decide how to retry a failed reconcile.
    ///
    /// Configuration errors wait for the record to change; everything else is
    /// retried with a growing delay.
    pub fn action_for(&self, key: &str, error: &ControllerError) -> Action {
        if !error.is_retryable() {
            warn!("Machine {} is misconfigured, waiting for a change: {}", key, error);
            return Action::await_change();
        }

        let (delay, attempts) = self.next(key);
        error!(
            "Reconciliation error for Machine {} (attempt {}), retrying in {:?}: {}",
            key, attempts, delay, error
        );
        Action::requeue(delay)
    }
}

/// Shared state of the reconcile loop.
pub struct Context {
    client: Client,
    actuator: Actuator,
    retries: RetryTracker,
}

impl Context {
    pub fn new(client: Client, actuator: Actuator) -> Self {
        Self {
            client,
            actuator,
            retries: RetryTracker::default(),
        }
    }

    async fn apply(&self, machine: &Machine) -> Result<Action, ControllerError> {
        if self.actuator.exists(machine).await? {
            self.actuator.update(machine).await?;
        } else {
            self.actuator.create(machine).await?;
        }
        Ok(Action::requeue(RESYNC_PERIOD))
    }

    async fn cleanup(&self, machine: &Machine) -> Result<Action, ControllerError> {
        self.actuator.delete(machine).await?;
        Ok(Action::await_change())
    }
}

async fn reconcile(machine: Arc<Machine>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let key = machine.key();
    let namespace = machine.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<Machine> = Api::namespaced(ctx.client.clone(), &namespace);
    debug!("Reconciling Machine {}", key);

    let actuator_ctx = ctx.clone();
    let result = finalizer(&api, MACHINE_FINALIZER, machine, move |event| async move {
        match event {
            FinalizerEvent::Apply(machine) => actuator_ctx.apply(&machine).await,
            FinalizerEvent::Cleanup(machine) => actuator_ctx.cleanup(&machine).await,
        }
    })
    .await
    .map_err(|e| ControllerError::Finalizer(Box::new(e)));

    if result.is_ok() {
        ctx.retries.reset(&key);
    }
    result
}

fn error_policy(machine: Arc<Machine>, error: &ControllerError, ctx: Arc<Context>) -> Action {
    ctx.retries.action_for(&machine.key(), error)
}

/// Watch Machine records until the stream ends.
pub async fn watch_machines(api: Api<Machine>, ctx: Arc<Context>) -> Result<(), ControllerError> {
    info!("Starting Machine watcher");

    // Debounce batches bursts of record writes; concurrency bounds provider load
    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(5))
        .concurrency(3);

    Controller::new(api, watcher::Config::default())
        .with_config(controller_config)
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled Machine {}", obj),
                Err(e) => error!("Controller error for Machine: {}", e),
            }
        })
        .await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MachineError;

    #[test]
    fn test_configuration_errors_wait_for_change() {
        let tracker = RetryTracker::default();
        let err: ControllerError = MachineError::invalid_configuration("bad flavor").into();

        assert_eq!(tracker.action_for("machines/worker-0", &err), Action::await_change());
        // No retry budget is consumed
        assert_eq!(tracker.next("machines/worker-0"), (Duration::from_secs(10), 1));
    }

    #[test]
    fn test_provisioning_errors_back_off_per_record() {
        let tracker = RetryTracker::default();
        let err: ControllerError = MachineError::create("quota exceeded").into();

        assert_eq!(tracker.action_for("machines/a", &err), Action::requeue(Duration::from_secs(10)));
        assert_eq!(tracker.action_for("machines/a", &err), Action::requeue(Duration::from_secs(10)));
        assert_eq!(tracker.action_for("machines/a", &err), Action::requeue(Duration::from_secs(20)));
        assert_eq!(tracker.action_for("machines/b", &err), Action::requeue(Duration::from_secs(10)));
    }

    #[test]
    fn test_transport_errors_are_retried() {
        let tracker = RetryTracker::default();
        let err = ControllerError::Store("connection refused".to_string());
        assert_eq!(tracker.action_for("machines/a", &err), Action::requeue(Duration::from_secs(10)));
    }

    #[test]
    fn test_reset_restarts_sequence() {
        let tracker = RetryTracker::default();
        tracker.next("machines/a");
        tracker.next("machines/a");
        assert_eq!(tracker.next("machines/a"), (Duration::from_secs(20), 3));

        tracker.reset("machines/a");
        assert_eq!(tracker.next("machines/a"), (Duration::from_secs(10), 1));
    }
}
