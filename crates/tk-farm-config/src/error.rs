use thiserror::Error;

/// Errors raised while loading or validating a [`crate::StackConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
  /// The config file is not valid JSON or has the wrong shape.
  #[error("failed to parse stack config: {0}")]
  Parse(#[from] serde_json::Error),

  /// A field holds a value the stack cannot be built from.
  #[error("invalid value for '{field}': {message}")]
  InvalidField { field: &'static str, message: String },

  /// Retaining the bucket while also auto-emptying it makes no sense.
  #[error("auto_delete_objects requires removal_policy 'destroy'")]
  AutoDeleteWithRetain,
}
