use std::fmt;

use serde::{Deserialize, Serialize};

/// What happens to a resource when it leaves the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalPolicy {
  /// Delete the resource on teardown. Suitable for demo environments.
  #[default]
  Destroy,
  /// Keep the resource; the stack merely forgets about it.
  Retain,
}

impl RemovalPolicy {
  /// The `DeletionPolicy` value used in a synthesized template.
  pub fn as_deletion_policy(&self) -> &'static str {
    match self {
      RemovalPolicy::Destroy => "Delete",
      RemovalPolicy::Retain => "Retain",
    }
  }
}

impl fmt::Display for RemovalPolicy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RemovalPolicy::Destroy => write!(f, "destroy"),
      RemovalPolicy::Retain => write!(f, "retain"),
    }
  }
}
