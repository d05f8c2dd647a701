//! Deployment events and notifiers for observability.
//!
//! Events are emitted while applying or destroying so consumers can observe
//! progress, print it, stream it, etc.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::plan::Action;

/// Events emitted during apply and destroy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeploymentEvent {
  /// An apply has started.
  ApplyStarted {
    deployment_id: String,
    stack_name: String,
  },

  /// A provider call for a resource has started.
  ResourceStarted {
    deployment_id: String,
    logical_id: String,
    action: Action,
  },

  /// A resource reached its planned state.
  ResourceCompleted {
    deployment_id: String,
    logical_id: String,
    action: Action,
    physical_id: String,
  },

  /// A provider call failed.
  ResourceFailed {
    deployment_id: String,
    logical_id: String,
    error: String,
  },

  /// A resource was removed from state without being deleted.
  ResourceRetained {
    deployment_id: String,
    logical_id: String,
    physical_id: String,
  },

  /// Changes made by a failed apply are being undone.
  RollbackStarted { deployment_id: String },

  /// One change was undone.
  ResourceRolledBack {
    deployment_id: String,
    logical_id: String,
  },

  /// The apply succeeded.
  ApplyCompleted { deployment_id: String },

  /// The apply failed and was rolled back.
  ApplyFailed { deployment_id: String, error: String },

  /// Teardown has started.
  DestroyStarted {
    deployment_id: String,
    stack_name: String,
  },

  /// Every resource was deleted or retained.
  DestroyCompleted { deployment_id: String },
}

/// Trait for receiving deployment events.
///
/// The engine calls `notify` for each event; implementations decide what to
/// do with them.
pub trait DeploymentNotifier: Send + Sync {
  fn notify(&self, event: DeploymentEvent);
}

/// A no-op notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl DeploymentNotifier for NoopNotifier {
  fn notify(&self, _event: DeploymentEvent) {}
}

/// A notifier that sends events to an unbounded channel.
///
/// Event volume is a handful per resource, so the channel is unbounded to
/// keep a slow consumer from stalling provider calls.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<DeploymentEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<DeploymentEvent>) -> Self {
    Self { sender }
  }
}

impl DeploymentNotifier for ChannelNotifier {
  fn notify(&self, event: DeploymentEvent) {
    // Receiver may have been dropped
    let _ = self.sender.send(event);
  }
}
