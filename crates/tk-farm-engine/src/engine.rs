//! Apply and destroy.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tk_farm_stack::{DeletionPolicy, ResourceKind, Template, TemplateResource};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::error::ApplyError;
use crate::events::{DeploymentEvent, DeploymentNotifier, NoopNotifier};
use crate::plan::{Action, Plan, plan};
use crate::provider::{ProvisionedResource, Provider, ResourceRequest};
use crate::resolve::{property_at, resolve};
use crate::state::{DeployedResource, Deployment};

/// A change that was carried out.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedChange {
  pub logical_id: String,
  pub kind: ResourceKind,
  pub action: Action,
}

/// Result of a successful apply.
#[derive(Debug, Clone)]
pub struct ApplyReport {
  /// The new state, to be persisted by the caller.
  pub deployment: Deployment,
  /// Changes made, unchanged resources excluded.
  pub changes: Vec<AppliedChange>,
  /// Resources dropped from state without deleting them.
  pub retained: Vec<String>,
}

impl ApplyReport {
  pub fn is_noop(&self) -> bool {
    self.changes.is_empty() && self.retained.is_empty()
  }
}

/// Result of a successful destroy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DestroyReport {
  pub deleted: Vec<String>,
  pub retained: Vec<String>,
}

/// What one resource step did, before it is folded into the run.
enum Step {
  Unchanged {
    logical_id: String,
    resource: DeployedResource,
  },
  Created {
    logical_id: String,
    resource: DeployedResource,
  },
  Updated {
    logical_id: String,
    before: DeployedResource,
    after: DeployedResource,
  },
  Replaced {
    logical_id: String,
    old: DeployedResource,
    new: DeployedResource,
  },
}

/// How to undo one change when an apply fails.
enum Undo {
  Created {
    logical_id: String,
    resource: DeployedResource,
  },
  Updated {
    logical_id: String,
    before: DeployedResource,
    after: DeployedResource,
  },
}

/// Mutable bookkeeping for one apply.
struct Run {
  current: BTreeMap<String, DeployedResource>,
  journal: Vec<Undo>,
  changes: Vec<AppliedChange>,
  /// Old halves of replacements, deleted once the apply succeeds.
  retired: Vec<(String, DeployedResource)>,
}

/// The deployment engine.
///
/// Walks a template's dependency graph batch by batch, resolving intrinsics
/// against what is already provisioned and calling the [`Provider`] for each
/// resource that changed.
pub struct Engine {
  provider: Arc<dyn Provider>,
  notifier: Arc<dyn DeploymentNotifier>,
}

impl Engine {
  pub fn new(provider: Arc<dyn Provider>) -> Self {
    Self {
      provider,
      notifier: Arc::new(NoopNotifier),
    }
  }

  pub fn with_notifier(mut self, notifier: Arc<dyn DeploymentNotifier>) -> Self {
    self.notifier = notifier;
    self
  }

  /// Preview what [`Engine::apply`] would do.
  pub fn plan(&self, template: &Template, previous: Option<&Deployment>) -> Result<Plan, ApplyError> {
    Ok(plan(template, previous)?)
  }

  /// Bring the provider in line with `template`.
  ///
  /// On any failure, or if `cancel` fires, every change made by this apply
  /// is undone and `previous` remains the accurate state.
  #[instrument(
    name = "stack_apply",
    skip(self, stack_name, template, previous, cancel),
    fields(stack_name = %stack_name)
  )]
  pub async fn apply(
    &self,
    stack_name: &str,
    template: &Template,
    previous: Option<&Deployment>,
    cancel: CancellationToken,
  ) -> Result<ApplyReport, ApplyError> {
    let plan = plan(template, previous)?;
    let batches = template.graph().batches()?;
    let deployment_id = uuid::Uuid::new_v4().to_string();

    info!(
      deployment_id = %deployment_id,
      resources = template.resources.len(),
      "apply_started"
    );
    self.notifier.notify(DeploymentEvent::ApplyStarted {
      deployment_id: deployment_id.clone(),
      stack_name: stack_name.to_string(),
    });

    let mut run = Run {
      current: previous.map(|d| d.resources.clone()).unwrap_or_default(),
      journal: Vec::new(),
      changes: Vec::new(),
      retired: Vec::new(),
    };

    let result = match self
      .run_batches(&deployment_id, template, &plan, &batches, &mut run, &cancel)
      .await
    {
      Ok(()) => resolve_outputs(template, &run.current),
      Err(e) => Err(e),
    };

    let outputs = match result {
      Ok(outputs) => outputs,
      Err(e) => {
        error!(deployment_id = %deployment_id, error = %e, "apply_failed");
        self.rollback(&deployment_id, run.journal).await;
        self.notifier.notify(DeploymentEvent::ApplyFailed {
          deployment_id,
          error: e.to_string(),
        });
        return Err(e);
      }
    };

    let retained = self.cleanup(&deployment_id, &plan, &mut run).await;

    info!(
      deployment_id = %deployment_id,
      changes = run.changes.len(),
      "apply_completed"
    );
    self.notifier.notify(DeploymentEvent::ApplyCompleted {
      deployment_id: deployment_id.clone(),
    });

    Ok(ApplyReport {
      deployment: Deployment {
        deployment_id,
        stack_name: stack_name.to_string(),
        resources: run.current,
        outputs,
        updated_at: Utc::now(),
      },
      changes: run.changes,
      retained,
    })
  }

  /// Execute batches in order; resources inside a batch run concurrently.
  async fn run_batches(
    &self,
    deployment_id: &str,
    template: &Template,
    plan: &Plan,
    batches: &[Vec<String>],
    run: &mut Run,
    cancel: &CancellationToken,
  ) -> Result<(), ApplyError> {
    for batch in batches {
      if cancel.is_cancelled() {
        warn!(deployment_id = %deployment_id, "apply cancelled");
        return Err(ApplyError::Cancelled);
      }

      let mut steps = Vec::with_capacity(batch.len());
      for logical_id in batch {
        let Some(resource) = template.resource(logical_id) else {
          continue;
        };
        let request = ResourceRequest {
          logical_id: logical_id.clone(),
          kind: resource.kind,
          properties: resolve(logical_id, &resource.properties, &run.current)?,
        };
        let planned = plan.action(logical_id).unwrap_or(Action::Create);
        let existing = run.current.get(logical_id).cloned();
        steps.push(self.step(deployment_id, resource, planned, request, existing));
      }

      // In-flight calls finish even when cancelled so the journal sees them.
      let results = futures::future::join_all(steps).await;

      let mut failure = None;
      for result in results {
        match result {
          Ok(step) => run.record(step),
          Err(e) => {
            failure.get_or_insert(e);
          }
        }
      }

      if let Some(e) = failure {
        return Err(e);
      }
    }

    if cancel.is_cancelled() {
      warn!(deployment_id = %deployment_id, "apply cancelled after last batch");
      return Err(ApplyError::Cancelled);
    }

    Ok(())
  }

  /// Decide and carry out the operation for one resource.
  async fn step(
    &self,
    deployment_id: &str,
    resource: &TemplateResource,
    planned: Action,
    request: ResourceRequest,
    existing: Option<DeployedResource>,
  ) -> Result<Step, ApplyError> {
    let logical_id = request.logical_id.clone();
    let record = |provisioned| DeployedResource {
      kind: resource.kind,
      provisioned,
      properties: resource.properties.clone(),
      resolved_properties: request.properties.clone(),
      dependencies: resource.dependencies(),
      deletion_policy: resource.effective_deletion_policy(),
    };

    let Some(old) = existing else {
      let provisioned = self
        .call(deployment_id, Action::Create, &request, None)
        .await?;
      return Ok(Step::Created {
        logical_id,
        resource: record(provisioned),
      });
    };

    let action = if planned == Action::Replace || old.kind != resource.kind {
      Action::Replace
    } else if old.resolved_properties == request.properties {
      Action::Unchanged
    } else if requires_replacement(resource.kind, &old.resolved_properties, &request.properties) {
      Action::Replace
    } else {
      Action::Update
    };

    match action {
      Action::Replace => {
        let provisioned = self
          .call(deployment_id, Action::Replace, &request, None)
          .await?;
        Ok(Step::Replaced {
          logical_id,
          old,
          new: record(provisioned),
        })
      }
      Action::Update => {
        let provisioned = self
          .call(deployment_id, Action::Update, &request, Some(&old))
          .await?;
        Ok(Step::Updated {
          logical_id,
          before: old,
          after: record(provisioned),
        })
      }
      _ => Ok(Step::Unchanged {
        logical_id,
        resource: record(old.provisioned),
      }),
    }
  }

  /// One provider call, logged and reported.
  async fn call(
    &self,
    deployment_id: &str,
    action: Action,
    request: &ResourceRequest,
    existing: Option<&DeployedResource>,
  ) -> Result<ProvisionedResource, ApplyError> {
    let logical_id = &request.logical_id;
    info!(
      deployment_id = %deployment_id,
      logical_id = %logical_id,
      kind = %request.kind,
      action = %action,
      "resource_started"
    );
    self.notifier.notify(DeploymentEvent::ResourceStarted {
      deployment_id: deployment_id.to_string(),
      logical_id: logical_id.clone(),
      action,
    });

    let result = match existing {
      Some(existing) => self.provider.update(request, &existing.provisioned).await,
      None => self.provider.create(request).await,
    };

    match result {
      Ok(provisioned) => {
        info!(
          deployment_id = %deployment_id,
          logical_id = %logical_id,
          physical_id = %provisioned.physical_id,
          action = %action,
          "resource_completed"
        );
        self.notifier.notify(DeploymentEvent::ResourceCompleted {
          deployment_id: deployment_id.to_string(),
          logical_id: logical_id.clone(),
          action,
          physical_id: provisioned.physical_id.clone(),
        });
        Ok(provisioned)
      }
      Err(source) => {
        error!(
          deployment_id = %deployment_id,
          logical_id = %logical_id,
          action = %action,
          error = %source,
          "resource_failed"
        );
        self.notifier.notify(DeploymentEvent::ResourceFailed {
          deployment_id: deployment_id.to_string(),
          logical_id: logical_id.clone(),
          error: source.to_string(),
        });
        Err(ApplyError::Provider {
          logical_id: logical_id.clone(),
          action,
          source,
        })
      }
    }
  }

  /// Undo journaled changes, newest first. Failures are logged and skipped.
  async fn rollback(&self, deployment_id: &str, journal: Vec<Undo>) {
    if journal.is_empty() {
      return;
    }

    warn!(deployment_id = %deployment_id, changes = journal.len(), "rollback_started");
    self.notifier.notify(DeploymentEvent::RollbackStarted {
      deployment_id: deployment_id.to_string(),
    });

    for undo in journal.into_iter().rev() {
      let (logical_id, result) = match undo {
        Undo::Created {
          logical_id,
          resource,
        } => {
          let result = self
            .provider
            .delete(&resource.request(&logical_id), &resource.provisioned)
            .await;
          (logical_id, result)
        }
        Undo::Updated {
          logical_id,
          before,
          after,
        } => {
          let result = self
            .provider
            .update(&before.request(&logical_id), &after.provisioned)
            .await
            .map(|_| ());
          (logical_id, result)
        }
      };

      match result {
        Ok(()) => {
          warn!(deployment_id = %deployment_id, logical_id = %logical_id, "resource_rolled_back");
          self.notifier.notify(DeploymentEvent::ResourceRolledBack {
            deployment_id: deployment_id.to_string(),
            logical_id,
          });
        }
        Err(e) => {
          error!(
            deployment_id = %deployment_id,
            logical_id = %logical_id,
            error = %e,
            "rollback_failed"
          );
        }
      }
    }
  }

  /// Delete removed resources, then the old halves of replacements.
  ///
  /// The apply has already succeeded, so failures here are logged and the
  /// resource is kept in state for the next apply to retry.
  async fn cleanup(&self, deployment_id: &str, plan: &Plan, run: &mut Run) -> Vec<String> {
    let mut retained = Vec::new();

    let removals = plan
      .changes
      .iter()
      .filter(|c| c.action == Action::Delete)
      .map(|c| c.logical_id.clone());
    for logical_id in removals {
      let Some(resource) = run.current.get(&logical_id).cloned() else {
        continue;
      };
      match self.retire(deployment_id, &logical_id, &resource).await {
        Ok(deleted) => {
          run.current.remove(&logical_id);
          if deleted {
            run.changes.push(AppliedChange {
              logical_id,
              kind: resource.kind,
              action: Action::Delete,
            });
          } else {
            retained.push(logical_id);
          }
        }
        Err(e) => {
          warn!(
            deployment_id = %deployment_id,
            logical_id = %logical_id,
            error = %e,
            "removed resource could not be deleted"
          );
        }
      }
    }

    for (logical_id, old) in std::mem::take(&mut run.retired).into_iter().rev() {
      match self.retire(deployment_id, &logical_id, &old).await {
        Ok(true) => {}
        Ok(false) => retained.push(format!("{} ({})", logical_id, old.physical_id())),
        Err(e) => {
          warn!(
            deployment_id = %deployment_id,
            logical_id = %logical_id,
            physical_id = %old.physical_id(),
            error = %e,
            "replaced resource could not be deleted"
          );
        }
      }
    }

    retained
  }

  /// Delete a resource, or forget it under `DeletionPolicy: Retain`.
  /// Returns whether it was deleted.
  async fn retire(
    &self,
    deployment_id: &str,
    logical_id: &str,
    resource: &DeployedResource,
  ) -> Result<bool, ApplyError> {
    if resource.deletion_policy == DeletionPolicy::Retain {
      info!(
        deployment_id = %deployment_id,
        logical_id = %logical_id,
        physical_id = %resource.physical_id(),
        "resource_retained"
      );
      self.notifier.notify(DeploymentEvent::ResourceRetained {
        deployment_id: deployment_id.to_string(),
        logical_id: logical_id.to_string(),
        physical_id: resource.physical_id().to_string(),
      });
      return Ok(false);
    }

    info!(
      deployment_id = %deployment_id,
      logical_id = %logical_id,
      physical_id = %resource.physical_id(),
      action = %Action::Delete,
      "resource_started"
    );
    self.notifier.notify(DeploymentEvent::ResourceStarted {
      deployment_id: deployment_id.to_string(),
      logical_id: logical_id.to_string(),
      action: Action::Delete,
    });

    self
      .provider
      .delete(&resource.request(logical_id), &resource.provisioned)
      .await
      .map_err(|source| ApplyError::Provider {
        logical_id: logical_id.to_string(),
        action: Action::Delete,
        source,
      })?;

    self.notifier.notify(DeploymentEvent::ResourceCompleted {
      deployment_id: deployment_id.to_string(),
      logical_id: logical_id.to_string(),
      action: Action::Delete,
      physical_id: resource.physical_id().to_string(),
    });
    Ok(true)
  }

  /// Delete every resource of a deployment, dependents first.
  ///
  /// Resources are removed from `deployment` as they go, so on error it
  /// holds exactly what still exists.
  #[instrument(
    name = "stack_destroy",
    skip(self, deployment, cancel),
    fields(stack_name = %deployment.stack_name)
  )]
  pub async fn destroy(
    &self,
    deployment: &mut Deployment,
    cancel: CancellationToken,
  ) -> Result<DestroyReport, ApplyError> {
    let deployment_id = deployment.deployment_id.clone();
    info!(deployment_id = %deployment_id, resources = deployment.resources.len(), "destroy_started");
    self.notifier.notify(DeploymentEvent::DestroyStarted {
      deployment_id: deployment_id.clone(),
      stack_name: deployment.stack_name.clone(),
    });

    let mut report = DestroyReport::default();
    for logical_id in deployment.teardown_order() {
      if cancel.is_cancelled() {
        warn!(deployment_id = %deployment_id, "destroy cancelled");
        return Err(ApplyError::Cancelled);
      }

      let Some(resource) = deployment.resources.get(&logical_id).cloned() else {
        continue;
      };

      match self.retire(&deployment_id, &logical_id, &resource).await {
        Ok(deleted) => {
          deployment.resources.remove(&logical_id);
          if deleted {
            report.deleted.push(logical_id);
          } else {
            report.retained.push(logical_id);
          }
        }
        Err(e) => {
          error!(deployment_id = %deployment_id, logical_id = %logical_id, error = %e, "destroy_failed");
          return Err(e);
        }
      }
    }

    deployment.outputs.clear();
    deployment.updated_at = Utc::now();

    info!(deployment_id = %deployment_id, "destroy_completed");
    self.notifier.notify(DeploymentEvent::DestroyCompleted { deployment_id });
    Ok(report)
  }
}

impl Run {
  fn record(&mut self, step: Step) {
    match step {
      Step::Unchanged {
        logical_id,
        resource,
      } => {
        self.current.insert(logical_id, resource);
      }
      Step::Created {
        logical_id,
        resource,
      } => {
        self.changes.push(AppliedChange {
          logical_id: logical_id.clone(),
          kind: resource.kind,
          action: Action::Create,
        });
        self.current.insert(logical_id.clone(), resource.clone());
        self.journal.push(Undo::Created {
          logical_id,
          resource,
        });
      }
      Step::Updated {
        logical_id,
        before,
        after,
      } => {
        self.changes.push(AppliedChange {
          logical_id: logical_id.clone(),
          kind: after.kind,
          action: Action::Update,
        });
        self.current.insert(logical_id.clone(), after.clone());
        self.journal.push(Undo::Updated {
          logical_id,
          before,
          after,
        });
      }
      Step::Replaced {
        logical_id,
        old,
        new,
      } => {
        self.changes.push(AppliedChange {
          logical_id: logical_id.clone(),
          kind: new.kind,
          action: Action::Replace,
        });
        self.current.insert(logical_id.clone(), new.clone());
        self.journal.push(Undo::Created {
          logical_id: logical_id.clone(),
          resource: new,
        });
        self.retired.push((logical_id, old));
      }
    }
  }
}

/// True when a replacement-only property resolves to a different value.
fn requires_replacement(kind: ResourceKind, old: &Value, new: &Value) -> bool {
  kind
    .replacement_paths()
    .iter()
    .any(|path| property_at(old, path) != property_at(new, path))
}

fn resolve_outputs(
  template: &Template,
  resources: &BTreeMap<String, DeployedResource>,
) -> Result<BTreeMap<String, String>, ApplyError> {
  template
    .outputs
    .iter()
    .map(|(name, output)| {
      let value = match resolve(name, &output.value, resources)? {
        Value::String(s) => s,
        other => other.to_string(),
      };
      Ok((name.clone(), value))
    })
    .collect()
}
