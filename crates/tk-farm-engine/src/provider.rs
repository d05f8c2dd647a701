use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tk_farm_stack::ResourceKind;

use crate::error::ProviderError;

/// A resource with every intrinsic resolved, ready for a provider call.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRequest {
  pub logical_id: String,
  pub kind: ResourceKind,
  /// Properties with all `Ref` / `Fn::GetAtt` / `Fn::Join` replaced by values.
  pub properties: Value,
}

/// What a provider hands back once a resource exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionedResource {
  /// The value `Ref` resolves to.
  pub physical_id: String,
  /// The values `Fn::GetAtt` resolves to, by attribute name.
  #[serde(default)]
  pub attributes: BTreeMap<String, String>,
}

/// The control plane the engine provisions against.
///
/// Every call receives fully resolved properties. Implementations must make
/// `create` either succeed completely or leave nothing behind.
#[async_trait]
pub trait Provider: Send + Sync {
  /// Create a new physical resource.
  async fn create(&self, request: &ResourceRequest) -> Result<ProvisionedResource, ProviderError>;

  /// Update an existing resource in place. Replacement-only properties never
  /// reach this call.
  async fn update(
    &self,
    request: &ResourceRequest,
    current: &ProvisionedResource,
  ) -> Result<ProvisionedResource, ProviderError>;

  /// Delete a resource. `request` carries the properties it was last applied
  /// with.
  async fn delete(
    &self,
    request: &ResourceRequest,
    current: &ProvisionedResource,
  ) -> Result<(), ProviderError>;
}
