//! Error types for the local cloud.

use thiserror::Error;
use tk_farm_engine::ProviderError;
use tk_farm_stack::ResourceKind;

/// Errors returned by control-plane, data-plane and edge calls.
#[derive(Debug, Error)]
pub enum CloudError {
  /// A name that must be unique is taken.
  #[error("{kind} '{name}' already exists")]
  AlreadyExists { kind: ResourceKind, name: String },

  /// The addressed resource does not exist.
  #[error("{kind} '{id}' not found")]
  NotFound { kind: ResourceKind, id: String },

  /// The bucket exists but the key does not.
  #[error("no such key '{key}' in bucket '{bucket}'")]
  NoSuchKey { bucket: String, key: String },

  /// The caller is not authorized.
  #[error("{principal} is not authorized to perform {action} on {resource}")]
  AccessDenied {
    principal: String,
    action: String,
    resource: String,
  },

  /// Object keys must be relative, printable, and free of `..`.
  #[error("invalid object key '{key}'")]
  InvalidKey { key: String },

  /// The properties cannot be interpreted for this kind.
  #[error("invalid {kind} properties: {message}")]
  InvalidProperties { kind: ResourceKind, message: String },

  /// The request conflicts with the current state.
  #[error("{kind} conflict: {message}")]
  Conflict { kind: ResourceKind, message: String },

  /// No distribution serves this domain.
  #[error("no distribution serves '{domain}'")]
  UnknownDomain { domain: String },

  /// Reading or writing a snapshot failed.
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  /// A snapshot is not valid JSON.
  #[error("invalid snapshot: {0}")]
  Json(#[from] serde_json::Error),
}

impl CloudError {
  /// HTTP-style status for this error as the data plane would report it.
  pub fn status(&self) -> u16 {
    match self {
      CloudError::AccessDenied { .. } => 403,
      CloudError::NotFound { .. } | CloudError::NoSuchKey { .. } | CloudError::UnknownDomain { .. } => 404,
      CloudError::AlreadyExists { .. } | CloudError::Conflict { .. } => 409,
      CloudError::InvalidKey { .. } | CloudError::InvalidProperties { .. } => 400,
      CloudError::Io(_) | CloudError::Json(_) => 500,
    }
  }

  /// Translate into the error a provisioning call reports for `kind`.
  pub fn into_provider_error(self, kind: ResourceKind) -> ProviderError {
    match self {
      CloudError::AlreadyExists { kind, name } => ProviderError::AlreadyExists { kind, name },
      CloudError::NotFound { kind, id } => ProviderError::NotFound { kind, id },
      CloudError::InvalidProperties { kind, message } => {
        ProviderError::InvalidProperties { kind, message }
      }
      CloudError::Json(e) => ProviderError::InvalidProperties {
        kind,
        message: e.to_string(),
      },
      CloudError::Conflict { kind, message } => ProviderError::Rejected { kind, message },
      other => ProviderError::Rejected {
        kind,
        message: other.to_string(),
      },
    }
  }
}
