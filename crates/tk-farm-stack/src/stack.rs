//! Stack builder.
//!
//! A [`Stack`] collects resource declarations, overrides and outputs, then
//! synthesizes them into a validated [`Template`]. Typed constructors return
//! handles ([`BucketRef`], [`DistributionRef`], ...) whose accessors are the
//! only way to reference another resource's attributes.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::error::StackError;
use crate::expr::{Attribute, Expr};
use crate::overrides::PropertyOverride;
use crate::resource::{
  BucketPolicyProps, BucketProps, CachePolicyProps, DeletionPolicy, DistributionProps,
  OriginAccessControlProps, PolicyProps, ResourceKind, UserProps,
};
use crate::template::{TEMPLATE_FORMAT_VERSION, Template, TemplateOutput, TemplateResource};

#[derive(Debug, Clone)]
struct Declaration {
  logical_id: String,
  kind: ResourceKind,
  properties: Value,
  deletion_policy: Option<DeletionPolicy>,
  depends_on: Vec<String>,
  overrides: Vec<PropertyOverride>,
}

/// A stack of declared resources.
#[derive(Debug, Clone)]
pub struct Stack {
  name: String,
  account_id: String,
  description: Option<String>,
  declarations: Vec<Declaration>,
  outputs: BTreeMap<String, TemplateOutput>,
}

impl Stack {
  pub fn new(name: impl Into<String>, account_id: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      account_id: account_id.into(),
      description: None,
      declarations: Vec::new(),
      outputs: BTreeMap::new(),
    }
  }

  pub fn with_description(mut self, description: impl Into<String>) -> Self {
    self.description = Some(description.into());
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn account_id(&self) -> &str {
    &self.account_id
  }

  /// Declare a resource from any serializable property struct.
  pub fn declare<P: Serialize>(
    &mut self,
    logical_id: &str,
    kind: ResourceKind,
    properties: &P,
  ) -> Result<(), StackError> {
    if self
      .declarations
      .iter()
      .any(|d| d.logical_id == logical_id)
    {
      return Err(StackError::DuplicateLogicalId {
        logical_id: logical_id.to_string(),
      });
    }

    let properties = serde_json::to_value(properties).map_err(|source| StackError::Serialize {
      logical_id: logical_id.to_string(),
      source,
    })?;

    self.declarations.push(Declaration {
      logical_id: logical_id.to_string(),
      kind,
      properties,
      deletion_policy: None,
      depends_on: Vec::new(),
      overrides: Vec::new(),
    });
    Ok(())
  }

  fn declaration_mut(&mut self, logical_id: &str) -> Result<&mut Declaration, StackError> {
    self
      .declarations
      .iter_mut()
      .find(|d| d.logical_id == logical_id)
      .ok_or_else(|| StackError::UnknownResource {
        logical_id: logical_id.to_string(),
      })
  }

  pub fn set_deletion_policy(
    &mut self,
    logical_id: &str,
    policy: DeletionPolicy,
  ) -> Result<(), StackError> {
    self.declaration_mut(logical_id)?.deletion_policy = Some(policy);
    Ok(())
  }

  /// Add an explicit ordering edge that no property expresses.
  pub fn add_dependency(&mut self, logical_id: &str, depends_on: &str) -> Result<(), StackError> {
    let declaration = self.declaration_mut(logical_id)?;
    if !declaration.depends_on.iter().any(|d| d == depends_on) {
      declaration.depends_on.push(depends_on.to_string());
    }
    Ok(())
  }

  /// Overwrite a synthesized property. Applied in declaration order.
  pub fn add_property_override<V: Serialize>(
    &mut self,
    logical_id: &str,
    path: &str,
    value: V,
  ) -> Result<(), StackError> {
    let value = serde_json::to_value(value).map_err(|source| StackError::Serialize {
      logical_id: logical_id.to_string(),
      source,
    })?;
    self
      .declaration_mut(logical_id)?
      .overrides
      .push(PropertyOverride::Set {
        path: path.to_string(),
        value,
      });
    Ok(())
  }

  /// Remove a synthesized property. Applied in declaration order.
  pub fn add_property_deletion_override(
    &mut self,
    logical_id: &str,
    path: &str,
  ) -> Result<(), StackError> {
    self
      .declaration_mut(logical_id)?
      .overrides
      .push(PropertyOverride::Delete {
        path: path.to_string(),
      });
    Ok(())
  }

  pub fn add_output(&mut self, name: &str, value: Expr, description: &str) -> Result<(), StackError> {
    let value = serde_json::to_value(&value).map_err(|source| StackError::Serialize {
      logical_id: name.to_string(),
      source,
    })?;
    self.outputs.insert(
      name.to_string(),
      TemplateOutput {
        value,
        description: Some(description.to_string()),
      },
    );
    Ok(())
  }

  /// Produce the template: apply overrides, then check references and cycles.
  pub fn synth(&self) -> Result<Template, StackError> {
    let mut resources = BTreeMap::new();

    for declaration in &self.declarations {
      let mut properties = declaration.properties.clone();
      for patch in &declaration.overrides {
        patch
          .apply(&mut properties)
          .map_err(|message| StackError::InvalidOverride {
            logical_id: declaration.logical_id.clone(),
            path: patch.path().to_string(),
            message,
          })?;
      }

      resources.insert(
        declaration.logical_id.clone(),
        TemplateResource {
          kind: declaration.kind,
          properties,
          depends_on: declaration.depends_on.clone(),
          deletion_policy: declaration.deletion_policy,
          update_replace_policy: declaration.deletion_policy,
        },
      );
    }

    let template = Template {
      format_version: TEMPLATE_FORMAT_VERSION.to_string(),
      description: self.description.clone(),
      resources,
      outputs: self.outputs.clone(),
    };

    template.validate_references()?;
    template.graph().batches()?;

    Ok(template)
  }

  pub fn bucket(&mut self, logical_id: &str, props: &BucketProps) -> Result<BucketRef, StackError> {
    self.declare(logical_id, ResourceKind::Bucket, props)?;
    Ok(BucketRef {
      logical_id: logical_id.to_string(),
    })
  }

  pub fn bucket_policy(
    &mut self,
    logical_id: &str,
    props: &BucketPolicyProps,
  ) -> Result<(), StackError> {
    self.declare(logical_id, ResourceKind::BucketPolicy, props)
  }

  pub fn origin_access_control(
    &mut self,
    logical_id: &str,
    props: &OriginAccessControlProps,
  ) -> Result<OriginAccessControlRef, StackError> {
    self.declare(logical_id, ResourceKind::OriginAccessControl, props)?;
    Ok(OriginAccessControlRef {
      logical_id: logical_id.to_string(),
    })
  }

  pub fn cache_policy(
    &mut self,
    logical_id: &str,
    props: &CachePolicyProps,
  ) -> Result<CachePolicyRef, StackError> {
    self.declare(logical_id, ResourceKind::CachePolicy, props)?;
    Ok(CachePolicyRef {
      logical_id: logical_id.to_string(),
    })
  }

  pub fn distribution(
    &mut self,
    logical_id: &str,
    props: &DistributionProps,
  ) -> Result<DistributionRef, StackError> {
    self.declare(logical_id, ResourceKind::Distribution, props)?;
    Ok(DistributionRef {
      logical_id: logical_id.to_string(),
      account_id: self.account_id.clone(),
    })
  }

  pub fn user(&mut self, logical_id: &str, props: &UserProps) -> Result<UserRef, StackError> {
    self.declare(logical_id, ResourceKind::User, props)?;
    Ok(UserRef {
      logical_id: logical_id.to_string(),
    })
  }

  pub fn policy(&mut self, logical_id: &str, props: &PolicyProps) -> Result<(), StackError> {
    self.declare(logical_id, ResourceKind::Policy, props)
  }
}

/// Handle to a declared bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketRef {
  logical_id: String,
}

impl BucketRef {
  pub fn logical_id(&self) -> &str {
    &self.logical_id
  }

  pub fn name(&self) -> Expr {
    Expr::Ref(self.logical_id.clone())
  }

  pub fn arn(&self) -> Expr {
    Expr::GetAtt(self.logical_id.clone(), Attribute::Arn)
  }

  /// ARN matching every object in the bucket.
  pub fn objects_arn(&self) -> Expr {
    Expr::join([self.arn(), "/*".into()])
  }

  pub fn regional_domain_name(&self) -> Expr {
    Expr::GetAtt(self.logical_id.clone(), Attribute::RegionalDomainName)
  }
}

/// Handle to a declared origin access control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginAccessControlRef {
  logical_id: String,
}

impl OriginAccessControlRef {
  pub fn logical_id(&self) -> &str {
    &self.logical_id
  }

  pub fn id(&self) -> Expr {
    Expr::GetAtt(self.logical_id.clone(), Attribute::Id)
  }
}

/// Handle to a declared cache policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicyRef {
  logical_id: String,
}

impl CachePolicyRef {
  pub fn logical_id(&self) -> &str {
    &self.logical_id
  }

  pub fn id(&self) -> Expr {
    Expr::Ref(self.logical_id.clone())
  }
}

/// Handle to a declared distribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionRef {
  logical_id: String,
  account_id: String,
}

impl DistributionRef {
  pub fn logical_id(&self) -> &str {
    &self.logical_id
  }

  pub fn id(&self) -> Expr {
    Expr::Ref(self.logical_id.clone())
  }

  pub fn domain_name(&self) -> Expr {
    Expr::GetAtt(self.logical_id.clone(), Attribute::DomainName)
  }

  /// `arn:aws:cloudfront::<account>:distribution/<id>`, bound to this distribution.
  pub fn arn(&self) -> Expr {
    Expr::join([
      format!("arn:aws:cloudfront::{}:distribution/", self.account_id).into(),
      self.id(),
    ])
  }
}

/// Handle to a declared IAM user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRef {
  logical_id: String,
}

impl UserRef {
  pub fn logical_id(&self) -> &str {
    &self.logical_id
  }

  pub fn name(&self) -> Expr {
    Expr::Ref(self.logical_id.clone())
  }

  pub fn arn(&self) -> Expr {
    Expr::GetAtt(self.logical_id.clone(), Attribute::Arn)
  }
}
