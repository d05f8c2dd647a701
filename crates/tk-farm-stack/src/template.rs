//! The synthesized template: the "locked" form of a stack.
//!
//! A template is plain data. It is what gets printed by `synth`, stored with a
//! deployment, and walked by the engine. References between resources are
//! intrinsics inside `Properties`, so the template carries its own
//! dependency graph.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StackError;
use crate::expr::{Attribute, references};
use crate::graph::Graph;
use crate::resource::{DeletionPolicy, ResourceKind};

pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
  #[serde(rename = "AWSTemplateFormatVersion")]
  pub format_version: String,
  #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(rename = "Resources")]
  pub resources: BTreeMap<String, TemplateResource>,
  #[serde(rename = "Outputs", default, skip_serializing_if = "BTreeMap::is_empty")]
  pub outputs: BTreeMap<String, TemplateOutput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TemplateResource {
  #[serde(rename = "Type")]
  pub kind: ResourceKind,
  #[serde(default)]
  pub properties: Value,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub depends_on: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub deletion_policy: Option<DeletionPolicy>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub update_replace_policy: Option<DeletionPolicy>,
}

impl TemplateResource {
  /// Logical ids this resource depends on, from intrinsics and `DependsOn`.
  pub fn dependencies(&self) -> BTreeSet<String> {
    references(&self.properties)
      .into_iter()
      .map(|r| r.target)
      .chain(self.depends_on.iter().cloned())
      .collect()
  }

  pub fn effective_deletion_policy(&self) -> DeletionPolicy {
    self.deletion_policy.unwrap_or(DeletionPolicy::Delete)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TemplateOutput {
  pub value: Value,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
}

impl Template {
  /// Parse a template and check its references.
  pub fn from_json(content: &str) -> Result<Self, StackError> {
    let template: Template = serde_json::from_str(content)?;
    template.validate_references()?;
    template.graph().batches()?;
    Ok(template)
  }

  pub fn to_json_pretty(&self) -> Result<String, StackError> {
    Ok(serde_json::to_string_pretty(self)?)
  }

  pub fn resource(&self, logical_id: &str) -> Option<&TemplateResource> {
    self.resources.get(logical_id)
  }

  /// Resources of one kind, in logical id order.
  pub fn resources_of(
    &self,
    kind: ResourceKind,
  ) -> impl Iterator<Item = (&String, &TemplateResource)> {
    self.resources.iter().filter(move |(_, r)| r.kind == kind)
  }

  /// Every reference must name a declared resource and a valid attribute.
  pub fn validate_references(&self) -> Result<(), StackError> {
    for (logical_id, resource) in &self.resources {
      for reference in references(&resource.properties) {
        self.check_reference(logical_id, &reference.target, reference.attribute.as_deref())?;
      }
      for dependency in &resource.depends_on {
        self.check_reference(logical_id, dependency, None)?;
      }
    }

    for (name, output) in &self.outputs {
      for reference in references(&output.value) {
        self.check_reference(name, &reference.target, reference.attribute.as_deref())?;
      }
    }

    Ok(())
  }

  fn check_reference(
    &self,
    from: &str,
    to: &str,
    attribute: Option<&str>,
  ) -> Result<(), StackError> {
    let target = self
      .resources
      .get(to)
      .ok_or_else(|| StackError::DanglingReference {
        from: from.to_string(),
        to: to.to_string(),
      })?;

    if let Some(attribute) = attribute {
      let known = Attribute::parse(attribute)
        .map(|a| target.kind.attributes().contains(&a))
        .unwrap_or(false);
      if !known {
        return Err(StackError::InvalidAttribute {
          from: from.to_string(),
          to: to.to_string(),
          attribute: attribute.to_string(),
        });
      }
    }

    Ok(())
  }

  /// Build the dependency graph.
  pub fn graph(&self) -> Graph {
    let edges: Vec<(String, String)> = self
      .resources
      .iter()
      .flat_map(|(id, resource)| {
        resource
          .dependencies()
          .into_iter()
          .map(move |dependency| (dependency, id.clone()))
      })
      .collect();
    Graph::new(self.resources.keys().map(String::as_str), &edges)
  }
}
