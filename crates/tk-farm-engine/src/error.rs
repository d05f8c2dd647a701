//! Error types for provisioning.

use thiserror::Error;
use tk_farm_stack::{ResourceKind, StackError};

use crate::plan::Action;

/// Errors reported by a [`Provider`](crate::Provider).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
  /// A resource with the same name already exists.
  #[error("{kind} '{name}' already exists")]
  AlreadyExists { kind: ResourceKind, name: String },

  /// The resource to update or delete does not exist.
  #[error("{kind} '{id}' not found")]
  NotFound { kind: ResourceKind, id: String },

  /// The resolved properties are malformed for this kind.
  #[error("invalid properties for {kind}: {message}")]
  InvalidProperties { kind: ResourceKind, message: String },

  /// The request was well-formed but refused.
  #[error("{kind} request rejected: {message}")]
  Rejected { kind: ResourceKind, message: String },
}

/// Errors that can occur while applying or destroying a deployment.
#[derive(Debug, Error)]
pub enum ApplyError {
  /// The template itself is invalid.
  #[error(transparent)]
  Stack(#[from] StackError),

  /// A reference could not be resolved against provisioned resources.
  #[error("'{from}' references '{to}{}' which has not been provisioned", attribute_suffix(.attribute))]
  UnresolvedReference {
    from: String,
    to: String,
    attribute: Option<String>,
  },

  /// An `Fn::Join` part did not resolve to a string.
  #[error("'{from}' joins a value that is not a string")]
  InvalidJoin { from: String },

  /// A provider call failed.
  #[error("failed to {action} '{logical_id}': {source}")]
  Provider {
    logical_id: String,
    action: Action,
    #[source]
    source: ProviderError,
  },

  /// The operation was cancelled.
  #[error("deployment cancelled")]
  Cancelled,
}

fn attribute_suffix(attribute: &Option<String>) -> String {
  attribute
    .as_ref()
    .map(|a| format!(".{}", a))
    .unwrap_or_default()
}
