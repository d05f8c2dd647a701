//! Persisted deployment state.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tk_farm_stack::{DeletionPolicy, Graph, ResourceKind};

use crate::provider::{ProvisionedResource, ResourceRequest};

/// A resource as it was last applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployedResource {
  pub kind: ResourceKind,
  #[serde(flatten)]
  pub provisioned: ProvisionedResource,
  /// Declared properties, intrinsics intact. Plans compare against these.
  pub properties: Value,
  /// Properties as sent to the provider.
  pub resolved_properties: Value,
  #[serde(default)]
  pub dependencies: BTreeSet<String>,
  pub deletion_policy: DeletionPolicy,
}

impl DeployedResource {
  pub fn physical_id(&self) -> &str {
    &self.provisioned.physical_id
  }

  /// Rebuild the request this resource was last applied with.
  pub fn request(&self, logical_id: &str) -> ResourceRequest {
    ResourceRequest {
      logical_id: logical_id.to_string(),
      kind: self.kind,
      properties: self.resolved_properties.clone(),
    }
  }
}

/// The result of the last successful apply of a stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
  pub deployment_id: String,
  pub stack_name: String,
  pub resources: BTreeMap<String, DeployedResource>,
  /// Resolved stack outputs.
  #[serde(default)]
  pub outputs: BTreeMap<String, String>,
  pub updated_at: DateTime<Utc>,
}

impl Deployment {
  pub fn new(stack_name: impl Into<String>) -> Self {
    Self {
      deployment_id: uuid::Uuid::new_v4().to_string(),
      stack_name: stack_name.into(),
      resources: BTreeMap::new(),
      outputs: BTreeMap::new(),
      updated_at: Utc::now(),
    }
  }

  pub fn resource(&self, logical_id: &str) -> Option<&DeployedResource> {
    self.resources.get(logical_id)
  }

  pub fn output(&self, name: &str) -> Option<&str> {
    self.outputs.get(name).map(String::as_str)
  }

  pub fn is_empty(&self) -> bool {
    self.resources.is_empty()
  }

  /// Dependency graph over the recorded resources.
  pub fn graph(&self) -> Graph {
    let edges: Vec<(String, String)> = self
      .resources
      .iter()
      .flat_map(|(id, resource)| {
        resource
          .dependencies
          .iter()
          .map(move |dependency| (dependency.clone(), id.clone()))
      })
      .collect();
    Graph::new(self.resources.keys().map(String::as_str), &edges)
  }

  /// Logical ids in the order they can be deleted: dependents first.
  pub fn teardown_order(&self) -> Vec<String> {
    let mut order = match self.graph().topological_order() {
      Ok(order) => order,
      // Recorded state came from an acyclic template; fall back to id order.
      Err(_) => self.resources.keys().cloned().collect(),
    };
    order.reverse();
    order
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn resource(kind: ResourceKind, deps: &[&str]) -> DeployedResource {
    DeployedResource {
      kind,
      provisioned: ProvisionedResource {
        physical_id: "p".to_string(),
        attributes: BTreeMap::new(),
      },
      properties: json!({}),
      resolved_properties: json!({}),
      dependencies: deps.iter().map(|d| d.to_string()).collect(),
      deletion_policy: DeletionPolicy::Delete,
    }
  }

  #[test]
  fn test_teardown_order_deletes_dependents_first() {
    let mut deployment = Deployment::new("frontend");
    deployment
      .resources
      .insert("Bucket".to_string(), resource(ResourceKind::Bucket, &[]));
    deployment.resources.insert(
      "Distribution".to_string(),
      resource(ResourceKind::Distribution, &["Bucket"]),
    );
    deployment.resources.insert(
      "BucketPolicy".to_string(),
      resource(ResourceKind::BucketPolicy, &["Bucket", "Distribution"]),
    );

    assert_eq!(
      deployment.teardown_order(),
      vec!["BucketPolicy", "Distribution", "Bucket"]
    );
  }

  #[test]
  fn test_state_serializes_flat_provisioned_fields() {
    let mut deployment = Deployment::new("frontend");
    deployment
      .resources
      .insert("Bucket".to_string(), resource(ResourceKind::Bucket, &[]));

    let json = serde_json::to_value(&deployment).unwrap();
    assert_eq!(json["resources"]["Bucket"]["physical_id"], "p");
    assert_eq!(json["resources"]["Bucket"]["kind"], "AWS::S3::Bucket");

    let back: Deployment = serde_json::from_value(json).unwrap();
    assert_eq!(back, deployment);
  }
}
