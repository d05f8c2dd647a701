//! Change planning: what an apply would do to a deployment.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tk_farm_stack::{DeletionPolicy, ResourceKind, StackError, Template};

use crate::resolve::property_at;
use crate::state::Deployment;

/// The operation planned for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
  Create,
  Update,
  /// Create a new physical resource, then delete the old one.
  Replace,
  Delete,
  Unchanged,
}

impl Action {
  fn symbol(&self) -> &'static str {
    match self {
      Action::Create => "+",
      Action::Update => "~",
      Action::Replace => "-/+",
      Action::Delete => "-",
      Action::Unchanged => "=",
    }
  }
}

impl fmt::Display for Action {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Action::Create => "create",
      Action::Update => "update",
      Action::Replace => "replace",
      Action::Delete => "delete",
      Action::Unchanged => "unchanged",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedChange {
  pub logical_id: String,
  pub kind: ResourceKind,
  pub action: Action,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub reason: Option<String>,
}

/// Planned changes, creates and updates in dependency order followed by
/// deletions in teardown order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
  pub changes: Vec<PlannedChange>,
}

impl Plan {
  pub fn get(&self, logical_id: &str) -> Option<&PlannedChange> {
    self.changes.iter().find(|c| c.logical_id == logical_id)
  }

  pub fn action(&self, logical_id: &str) -> Option<Action> {
    self.get(logical_id).map(|c| c.action)
  }

  pub fn count(&self, action: Action) -> usize {
    self.changes.iter().filter(|c| c.action == action).count()
  }

  /// True when applying would touch nothing.
  pub fn is_empty(&self) -> bool {
    self.changes.iter().all(|c| c.action == Action::Unchanged)
  }
}

impl fmt::Display for Plan {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for change in &self.changes {
      write!(
        f,
        "{:>3} {} ({})",
        change.action.symbol(),
        change.logical_id,
        change.kind
      )?;
      if let Some(reason) = &change.reason {
        write!(f, ": {}", reason)?;
      }
      writeln!(f)?;
    }
    write!(
      f,
      "{} to create, {} to update, {} to replace, {} to delete, {} unchanged",
      self.count(Action::Create),
      self.count(Action::Update),
      self.count(Action::Replace),
      self.count(Action::Delete),
      self.count(Action::Unchanged),
    )
  }
}

/// Compare a template with the last deployment.
///
/// Changes to replacement-only properties plan a replace, and resources that
/// depend directly on a replaced resource plan an update since the values
/// they resolve will change.
pub fn plan(template: &Template, previous: Option<&Deployment>) -> Result<Plan, StackError> {
  template.validate_references()?;
  let order = template.graph().topological_order()?;

  let mut changes = Vec::with_capacity(order.len());
  let mut replaced = BTreeSet::new();

  for logical_id in order {
    let Some(resource) = template.resource(&logical_id) else {
      continue;
    };
    let dependencies = resource.dependencies();

    let (action, reason) = match previous.and_then(|d| d.resource(&logical_id)) {
      None => (Action::Create, None),
      Some(old) if old.kind != resource.kind => (
        Action::Replace,
        Some(format!("type changed from {}", old.kind)),
      ),
      Some(old) => {
        let replacing: Vec<&str> = resource
          .kind
          .replacement_paths()
          .iter()
          .copied()
          .filter(|path| property_at(&old.properties, path) != property_at(&resource.properties, path))
          .collect();

        if !replacing.is_empty() {
          (
            Action::Replace,
            Some(format!("{} changed", replacing.join(", "))),
          )
        } else if old.properties != resource.properties {
          (Action::Update, None)
        } else if let Some(dependency) = dependencies.iter().find(|d| replaced.contains(*d)) {
          (
            Action::Update,
            Some(format!("dependency '{}' is replaced", dependency)),
          )
        } else if old.deletion_policy != resource.effective_deletion_policy()
          || old.dependencies != dependencies
        {
          (Action::Update, Some("metadata changed".to_string()))
        } else {
          (Action::Unchanged, None)
        }
      }
    };

    if action == Action::Replace {
      replaced.insert(logical_id.clone());
    }

    changes.push(PlannedChange {
      logical_id,
      kind: resource.kind,
      action,
      reason,
    });
  }

  if let Some(previous) = previous {
    for logical_id in previous.teardown_order() {
      if template.resource(&logical_id).is_some() {
        continue;
      }
      let Some(old) = previous.resource(&logical_id) else {
        continue;
      };
      let reason = (old.deletion_policy == DeletionPolicy::Retain)
        .then(|| "retained, removed from state only".to_string());
      changes.push(PlannedChange {
        logical_id,
        kind: old.kind,
        action: Action::Delete,
        reason,
      });
    }
  }

  Ok(Plan { changes })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::provider::ProvisionedResource;
  use crate::state::DeployedResource;
  use tk_farm_config::StackConfig;
  use tk_farm_stack::{BUCKET_ID, BUCKET_POLICY_ID, CACHE_POLICY_ID, DISTRIBUTION_ID, FrontendStack};

  /// A deployment that recorded exactly what `template` declares.
  fn deployed(template: &Template) -> Deployment {
    let mut deployment = Deployment::new("tk-farm-frontend");
    for (id, resource) in &template.resources {
      deployment.resources.insert(
        id.clone(),
        DeployedResource {
          kind: resource.kind,
          provisioned: ProvisionedResource {
            physical_id: format!("{}-physical", id),
            attributes: Default::default(),
          },
          properties: resource.properties.clone(),
          resolved_properties: resource.properties.clone(),
          dependencies: resource.dependencies(),
          deletion_policy: resource.effective_deletion_policy(),
        },
      );
    }
    deployment
  }

  #[test]
  fn test_first_deploy_creates_everything_in_order() {
    let template = FrontendStack::synth(&StackConfig::default()).unwrap();
    let plan = plan(&template, None).unwrap();

    assert_eq!(plan.count(Action::Create), 7);
    let position = |id: &str| plan.changes.iter().position(|c| c.logical_id == id).unwrap();
    assert!(position(BUCKET_ID) < position(DISTRIBUTION_ID));
    assert!(position(DISTRIBUTION_ID) < position(BUCKET_POLICY_ID));
  }

  #[test]
  fn test_identical_template_plans_nothing() {
    let template = FrontendStack::synth(&StackConfig::default()).unwrap();
    let plan = plan(&template, Some(&deployed(&template))).unwrap();
    assert!(plan.is_empty());
    assert_eq!(plan.count(Action::Unchanged), 7);
  }

  #[test]
  fn test_ttl_change_updates_cache_policy_only() {
    let template = FrontendStack::synth(&StackConfig::default()).unwrap();
    let previous = deployed(&template);

    let mut next = template.clone();
    next.resources.get_mut(CACHE_POLICY_ID).unwrap().properties["CachePolicyConfig"]["MaxTTL"] =
      serde_json::json!(60);

    let plan = plan(&next, Some(&previous)).unwrap();
    assert_eq!(plan.action(CACHE_POLICY_ID), Some(Action::Update));
    assert_eq!(plan.count(Action::Unchanged), 6);
  }

  #[test]
  fn test_bucket_rename_replaces_and_updates_dependents() {
    let template = FrontendStack::synth(&StackConfig::default()).unwrap();
    let previous = deployed(&template);

    let config = StackConfig {
      account_id: "210987654321".to_string(),
      ..StackConfig::default()
    };
    let next = FrontendStack::synth(&config).unwrap();

    let plan = plan(&next, Some(&previous)).unwrap();
    let bucket = plan.get(BUCKET_ID).unwrap();
    assert_eq!(bucket.action, Action::Replace);
    assert_eq!(bucket.reason.as_deref(), Some("BucketName changed"));
    assert_eq!(plan.action(DISTRIBUTION_ID), Some(Action::Update));
  }

  #[test]
  fn test_removed_resources_are_deleted_last() {
    let template = FrontendStack::synth(&StackConfig::default()).unwrap();
    let mut previous = deployed(&template);
    let mut orphan = previous.resources[CACHE_POLICY_ID].clone();
    orphan.deletion_policy = DeletionPolicy::Retain;
    previous.resources.insert("OldCachePolicy".to_string(), orphan);

    let plan = plan(&template, Some(&previous)).unwrap();
    let last = plan.changes.last().unwrap();
    assert_eq!(last.logical_id, "OldCachePolicy");
    assert_eq!(last.action, Action::Delete);
    assert!(last.reason.is_some());
  }

  #[test]
  fn test_display_summarises_counts() {
    let template = FrontendStack::synth(&StackConfig::default()).unwrap();
    let rendered = plan(&template, None).unwrap().to_string();
    assert!(rendered.contains("  + FrontendBucket (AWS::S3::Bucket)"));
    assert!(rendered.ends_with("7 to create, 0 to update, 0 to replace, 0 to delete, 0 unchanged"));
  }
}
