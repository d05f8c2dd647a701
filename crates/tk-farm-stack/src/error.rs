use thiserror::Error;

/// Errors that can occur while declaring or synthesizing a stack.
#[derive(Debug, Error)]
pub enum StackError {
  /// Two resources were declared with the same logical id.
  #[error("duplicate logical id: {logical_id}")]
  DuplicateLogicalId { logical_id: String },

  /// An operation named a resource that was never declared.
  #[error("unknown resource: {logical_id}")]
  UnknownResource { logical_id: String },

  /// A property, dependency or output points at a resource that does not exist.
  #[error("resource '{from}' references unknown resource '{to}'")]
  DanglingReference { from: String, to: String },

  /// `Fn::GetAtt` asked for an attribute the target type does not expose.
  #[error("resource '{from}' reads unknown attribute '{attribute}' of '{to}'")]
  InvalidAttribute {
    from: String,
    to: String,
    attribute: String,
  },

  /// The dependency graph is not acyclic.
  #[error("cycle detected in resource graph")]
  CycleDetected,

  /// An override path could not be applied to the synthesized properties.
  #[error("invalid override on '{logical_id}' at '{path}': {message}")]
  InvalidOverride {
    logical_id: String,
    path: String,
    message: String,
  },

  /// The declared resource could not be serialized into properties.
  #[error("failed to serialize properties of '{logical_id}': {source}")]
  Serialize {
    logical_id: String,
    #[source]
    source: serde_json::Error,
  },

  /// A template could not be read or written as JSON.
  #[error("template json error: {0}")]
  Json(#[from] serde_json::Error),

  /// The stack configuration is not usable.
  #[error(transparent)]
  Config(#[from] tk_farm_config::ConfigError),
}
