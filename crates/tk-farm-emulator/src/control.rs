//! Control plane: creating, updating and deleting resources.
//!
//! Properties arrive fully resolved and are parsed into small typed structs
//! per kind. Each operation validates against the current state before
//! touching it, so a failed call leaves the state unchanged.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tk_farm_engine::{Provider, ProviderError, ProvisionedResource, ResourceRequest};
use tk_farm_stack::{AUTO_DELETE_OBJECTS_TAG, ResourceKind};
use tracing::{info, warn};

use crate::access::PolicyDocument;
use crate::cloud::LocalCloud;
use crate::error::CloudError;
use crate::naming;
use crate::state::{
  BucketRecord, CachePolicyRecord, CloudState, DistributionRecord, ErrorResponseRecord,
  InlinePolicyRecord, OriginAccessControlRecord, OriginRecord, PublicAccessBlock, UserRecord,
  ViewerProtocolPolicy,
};

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BucketProps {
  bucket_name: String,
  #[serde(default)]
  public_access_block_configuration: PublicAccessBlock,
  #[serde(default)]
  tags: Vec<TagProps>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TagProps {
  key: String,
  value: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BucketPolicyProps {
  bucket: String,
  policy_document: PolicyDocument,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OriginAccessControlProps {
  origin_access_control_config: OriginAccessControlConfigProps,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OriginAccessControlConfigProps {
  name: String,
  origin_access_control_origin_type: String,
  signing_behavior: String,
  signing_protocol: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CachePolicyProps {
  cache_policy_config: CachePolicyConfigProps,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CachePolicyConfigProps {
  name: String,
  #[serde(rename = "MinTTL")]
  min_ttl: u64,
  #[serde(rename = "DefaultTTL")]
  default_ttl: u64,
  #[serde(rename = "MaxTTL")]
  max_ttl: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DistributionProps {
  distribution_config: DistributionConfigProps,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DistributionConfigProps {
  enabled: bool,
  #[serde(default)]
  default_root_object: Option<String>,
  origins: Vec<OriginProps>,
  default_cache_behavior: CacheBehaviorProps,
  #[serde(default)]
  custom_error_responses: Vec<ErrorResponseProps>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OriginProps {
  id: String,
  domain_name: String,
  #[serde(default)]
  s3_origin_config: Option<S3OriginProps>,
  #[serde(default)]
  origin_access_control_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct S3OriginProps {
  #[serde(default)]
  origin_access_identity: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CacheBehaviorProps {
  target_origin_id: String,
  viewer_protocol_policy: ViewerProtocolPolicy,
  cache_policy_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorResponseProps {
  error_code: u16,
  #[serde(default)]
  response_code: Option<u16>,
  #[serde(default)]
  response_page_path: Option<String>,
  #[serde(rename = "ErrorCachingMinTTL", default)]
  error_caching_min_ttl: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UserProps {
  user_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PolicyProps {
  policy_name: String,
  policy_document: PolicyDocument,
  #[serde(default)]
  users: Vec<String>,
}

fn parse<T: DeserializeOwned>(kind: ResourceKind, properties: &Value) -> Result<T, CloudError> {
  serde_json::from_value(properties.clone()).map_err(|e| CloudError::InvalidProperties {
    kind,
    message: e.to_string(),
  })
}

fn invalid(kind: ResourceKind, message: impl Into<String>) -> CloudError {
  CloudError::InvalidProperties {
    kind,
    message: message.into(),
  }
}

fn conflict(kind: ResourceKind, message: impl Into<String>) -> CloudError {
  CloudError::Conflict {
    kind,
    message: message.into(),
  }
}

fn not_found(kind: ResourceKind, id: &str) -> CloudError {
  CloudError::NotFound {
    kind,
    id: id.to_string(),
  }
}

fn provisioned(physical_id: String, attributes: &[(&str, String)]) -> ProvisionedResource {
  ProvisionedResource {
    physical_id,
    attributes: attributes
      .iter()
      .map(|(name, value)| (name.to_string(), value.clone()))
      .collect(),
  }
}

impl CloudState {
  pub(crate) fn create_resource(
    &mut self,
    kind: ResourceKind,
    properties: &Value,
  ) -> Result<ProvisionedResource, CloudError> {
    match kind {
      ResourceKind::Bucket => self.create_bucket(parse(kind, properties)?),
      ResourceKind::BucketPolicy => self.put_bucket_policy(parse(kind, properties)?, None),
      ResourceKind::OriginAccessControl => {
        self.put_origin_access_control(parse(kind, properties)?, None)
      }
      ResourceKind::CachePolicy => self.put_cache_policy(parse(kind, properties)?, None),
      ResourceKind::Distribution => self.put_distribution(parse(kind, properties)?, None),
      ResourceKind::User => self.create_user(parse(kind, properties)?),
      ResourceKind::Policy => self.put_policy(parse(kind, properties)?, None),
    }
  }

  pub(crate) fn update_resource(
    &mut self,
    kind: ResourceKind,
    properties: &Value,
    current: &ProvisionedResource,
  ) -> Result<ProvisionedResource, CloudError> {
    let id = Some(current.physical_id.as_str());
    match kind {
      ResourceKind::Bucket => self.update_bucket(parse(kind, properties)?, &current.physical_id),
      ResourceKind::BucketPolicy => self.put_bucket_policy(parse(kind, properties)?, id),
      ResourceKind::OriginAccessControl => {
        self.put_origin_access_control(parse(kind, properties)?, id)
      }
      ResourceKind::CachePolicy => self.put_cache_policy(parse(kind, properties)?, id),
      ResourceKind::Distribution => self.put_distribution(parse(kind, properties)?, id),
      ResourceKind::User => {
        let props: UserProps = parse(kind, properties)?;
        if props.user_name != current.physical_id {
          return Err(invalid(kind, "UserName cannot change in place"));
        }
        let user = self
          .users
          .get(&current.physical_id)
          .ok_or_else(|| not_found(kind, &current.physical_id))?;
        Ok(provisioned(user.name.clone(), &[("Arn", user.arn.clone())]))
      }
      ResourceKind::Policy => self.put_policy(parse(kind, properties)?, id),
    }
  }

  pub(crate) fn delete_resource(
    &mut self,
    kind: ResourceKind,
    current: &ProvisionedResource,
  ) -> Result<(), CloudError> {
    let id = current.physical_id.as_str();
    match kind {
      ResourceKind::Bucket => self.delete_bucket(id),
      ResourceKind::BucketPolicy => {
        let bucket = self
          .buckets
          .get_mut(id)
          .ok_or_else(|| not_found(ResourceKind::Bucket, id))?;
        bucket
          .policy
          .take()
          .map(|_| ())
          .ok_or_else(|| not_found(kind, id))
      }
      ResourceKind::OriginAccessControl => {
        if let Some(distribution) = self
          .distributions
          .values()
          .find(|d| d.origins.iter().any(|o| o.origin_access_control_id.as_deref() == Some(id)))
        {
          return Err(conflict(
            kind,
            format!("'{}' is in use by distribution '{}'", id, distribution.id),
          ));
        }
        self
          .origin_access_controls
          .remove(id)
          .map(|_| ())
          .ok_or_else(|| not_found(kind, id))
      }
      ResourceKind::CachePolicy => {
        if let Some(distribution) = self.distributions.values().find(|d| d.cache_policy_id == id) {
          return Err(conflict(
            kind,
            format!("'{}' is in use by distribution '{}'", id, distribution.id),
          ));
        }
        self
          .cache_policies
          .remove(id)
          .map(|_| ())
          .ok_or_else(|| not_found(kind, id))
      }
      ResourceKind::Distribution => self
        .distributions
        .remove(id)
        .map(|_| ())
        .ok_or_else(|| not_found(kind, id)),
      ResourceKind::User => {
        if let Some(policy) = self.user_policies(id).next() {
          return Err(conflict(
            kind,
            format!("'{}' must detach inline policy '{}' first", id, policy.name),
          ));
        }
        self
          .users
          .remove(id)
          .map(|_| ())
          .ok_or_else(|| not_found(kind, id))
      }
      ResourceKind::Policy => self
        .policies
        .remove(id)
        .map(|_| ())
        .ok_or_else(|| not_found(kind, id)),
    }
  }

  fn bucket_attributes(&self, name: &str) -> ProvisionedResource {
    provisioned(
      name.to_string(),
      &[
        ("Arn", naming::bucket_arn(name)),
        ("DomainName", naming::bucket_domain_name(name)),
        (
          "RegionalDomainName",
          naming::bucket_regional_domain_name(name, &self.region),
        ),
      ],
    )
  }

  fn create_bucket(&mut self, props: BucketProps) -> Result<ProvisionedResource, CloudError> {
    let kind = ResourceKind::Bucket;
    if !naming::is_valid_bucket_name(&props.bucket_name) {
      return Err(invalid(kind, format!("invalid bucket name '{}'", props.bucket_name)));
    }
    if self.buckets.contains_key(&props.bucket_name) {
      return Err(CloudError::AlreadyExists {
        kind,
        name: props.bucket_name,
      });
    }

    let tags: BTreeMap<String, String> = props.tags.into_iter().map(|t| (t.key, t.value)).collect();
    let record = BucketRecord {
      name: props.bucket_name.clone(),
      public_access_block: props.public_access_block_configuration,
      auto_delete_objects: tags.get(AUTO_DELETE_OBJECTS_TAG).is_some_and(|v| v == "true"),
      tags,
      policy: None,
      objects: BTreeMap::new(),
      created_at: chrono::Utc::now(),
    };
    self.buckets.insert(props.bucket_name.clone(), record);
    Ok(self.bucket_attributes(&props.bucket_name))
  }

  fn update_bucket(&mut self, props: BucketProps, name: &str) -> Result<ProvisionedResource, CloudError> {
    let kind = ResourceKind::Bucket;
    if props.bucket_name != name {
      return Err(invalid(kind, "BucketName cannot change in place"));
    }
    let bucket = self.buckets.get_mut(name).ok_or_else(|| not_found(kind, name))?;

    let tags: BTreeMap<String, String> = props.tags.into_iter().map(|t| (t.key, t.value)).collect();
    bucket.public_access_block = props.public_access_block_configuration;
    bucket.auto_delete_objects = tags.get(AUTO_DELETE_OBJECTS_TAG).is_some_and(|v| v == "true");
    bucket.tags = tags;
    Ok(self.bucket_attributes(name))
  }

  fn delete_bucket(&mut self, name: &str) -> Result<(), CloudError> {
    let kind = ResourceKind::Bucket;
    let bucket = self.buckets.get(name).ok_or_else(|| not_found(kind, name))?;
    if !bucket.objects.is_empty() {
      if !bucket.auto_delete_objects {
        return Err(conflict(
          kind,
          format!("bucket '{}' is not empty ({} objects)", name, bucket.objects.len()),
        ));
      }
      info!(bucket = %name, objects = bucket.objects.len(), "emptying bucket before deletion");
    }
    self.buckets.remove(name);
    Ok(())
  }

  fn put_bucket_policy(
    &mut self,
    props: BucketPolicyProps,
    existing: Option<&str>,
  ) -> Result<ProvisionedResource, CloudError> {
    let kind = ResourceKind::BucketPolicy;
    if let Some(existing) = existing
      && existing != props.bucket
    {
      return Err(invalid(kind, "Bucket cannot change in place"));
    }

    let bucket = self
      .buckets
      .get_mut(&props.bucket)
      .ok_or_else(|| not_found(ResourceKind::Bucket, &props.bucket))?;

    if existing.is_none() && bucket.policy.is_some() {
      return Err(CloudError::AlreadyExists {
        kind,
        name: props.bucket.clone(),
      });
    }
    if bucket.public_access_block.block_public_policy && props.policy_document.grants_public_access() {
      return Err(conflict(
        kind,
        format!("bucket '{}' blocks public policies", props.bucket),
      ));
    }

    let bucket_arn = naming::bucket_arn(&props.bucket);
    let objects_prefix = format!("{}/", bucket_arn);
    for statement in &props.policy_document.statement {
      if statement.principal.is_none() {
        return Err(invalid(kind, "every statement needs a Principal"));
      }
      for resource in statement.resource.values() {
        if *resource != bucket_arn && !resource.starts_with(&objects_prefix) {
          return Err(invalid(
            kind,
            format!("resource '{}' is outside bucket '{}'", resource, props.bucket),
          ));
        }
      }
    }

    bucket.policy = Some(props.policy_document);
    Ok(provisioned(props.bucket, &[]))
  }

  fn put_origin_access_control(
    &mut self,
    props: OriginAccessControlProps,
    existing: Option<&str>,
  ) -> Result<ProvisionedResource, CloudError> {
    let kind = ResourceKind::OriginAccessControl;
    let config = props.origin_access_control_config;

    if config.origin_access_control_origin_type != "s3" {
      return Err(invalid(
        kind,
        format!("unsupported origin type '{}'", config.origin_access_control_origin_type),
      ));
    }
    if !["always", "never", "no-override"].contains(&config.signing_behavior.as_str()) {
      return Err(invalid(
        kind,
        format!("unknown signing behavior '{}'", config.signing_behavior),
      ));
    }
    if config.signing_protocol != "sigv4" {
      return Err(invalid(
        kind,
        format!("unknown signing protocol '{}'", config.signing_protocol),
      ));
    }
    if self
      .origin_access_controls
      .values()
      .any(|o| o.name == config.name && Some(o.id.as_str()) != existing)
    {
      return Err(CloudError::AlreadyExists {
        kind,
        name: config.name,
      });
    }

    let id = match existing {
      Some(id) if self.origin_access_controls.contains_key(id) => id.to_string(),
      Some(id) => return Err(not_found(kind, id)),
      None => naming::short_id('E', 13),
    };

    self.origin_access_controls.insert(
      id.clone(),
      OriginAccessControlRecord {
        id: id.clone(),
        name: config.name,
        origin_type: config.origin_access_control_origin_type,
        signing_behavior: config.signing_behavior,
        signing_protocol: config.signing_protocol,
      },
    );
    Ok(provisioned(id.clone(), &[("Id", id)]))
  }

  fn put_cache_policy(
    &mut self,
    props: CachePolicyProps,
    existing: Option<&str>,
  ) -> Result<ProvisionedResource, CloudError> {
    let kind = ResourceKind::CachePolicy;
    let config = props.cache_policy_config;

    if !(config.min_ttl <= config.default_ttl && config.default_ttl <= config.max_ttl) {
      return Err(invalid(
        kind,
        format!(
          "TTLs must satisfy MinTTL <= DefaultTTL <= MaxTTL (got {}/{}/{})",
          config.min_ttl, config.default_ttl, config.max_ttl
        ),
      ));
    }
    if self
      .cache_policies
      .values()
      .any(|p| p.name == config.name && Some(p.id.as_str()) != existing)
    {
      return Err(CloudError::AlreadyExists {
        kind,
        name: config.name,
      });
    }

    let id = match existing {
      Some(id) if self.cache_policies.contains_key(id) => id.to_string(),
      Some(id) => return Err(not_found(kind, id)),
      None => uuid::Uuid::new_v4().to_string(),
    };

    self.cache_policies.insert(
      id.clone(),
      CachePolicyRecord {
        id: id.clone(),
        name: config.name,
        min_ttl: config.min_ttl,
        default_ttl: config.default_ttl,
        max_ttl: config.max_ttl,
      },
    );
    Ok(provisioned(id.clone(), &[("Id", id)]))
  }

  fn put_distribution(
    &mut self,
    props: DistributionProps,
    existing: Option<&str>,
  ) -> Result<ProvisionedResource, CloudError> {
    let kind = ResourceKind::Distribution;
    let config = props.distribution_config;

    if config.origins.is_empty() {
      return Err(invalid(kind, "at least one origin is required"));
    }
    if !config
      .origins
      .iter()
      .any(|o| o.id == config.default_cache_behavior.target_origin_id)
    {
      return Err(invalid(
        kind,
        format!(
          "target origin '{}' is not declared",
          config.default_cache_behavior.target_origin_id
        ),
      ));
    }
    if !self
      .cache_policies
      .contains_key(&config.default_cache_behavior.cache_policy_id)
    {
      return Err(invalid(
        kind,
        format!(
          "cache policy '{}' does not exist",
          config.default_cache_behavior.cache_policy_id
        ),
      ));
    }
    if let Some(root) = &config.default_root_object
      && root.starts_with('/')
    {
      return Err(invalid(kind, "DefaultRootObject must not start with '/'"));
    }

    let mut origins = Vec::with_capacity(config.origins.len());
    for origin in config.origins {
      let identity = origin
        .s3_origin_config
        .and_then(|s3| s3.origin_access_identity)
        .filter(|oai| !oai.is_empty());
      if let Some(identity) = identity {
        return Err(invalid(
          kind,
          format!("origin access identity '{}' does not exist", identity),
        ));
      }
      if let Some(oac) = &origin.origin_access_control_id
        && !self.origin_access_controls.contains_key(oac)
      {
        return Err(invalid(
          kind,
          format!("origin access control '{}' does not exist", oac),
        ));
      }
      origins.push(OriginRecord {
        id: origin.id,
        domain_name: origin.domain_name,
        origin_access_control_id: origin.origin_access_control_id,
      });
    }

    let mut error_responses = Vec::with_capacity(config.custom_error_responses.len());
    for response in config.custom_error_responses {
      if !(400..=599).contains(&response.error_code) {
        return Err(invalid(
          kind,
          format!("error code {} is not an HTTP error", response.error_code),
        ));
      }
      error_responses.push(ErrorResponseRecord {
        error_code: response.error_code,
        response_code: response.response_code.unwrap_or(response.error_code),
        response_page_path: response.response_page_path.unwrap_or_default(),
        error_caching_min_ttl: response.error_caching_min_ttl,
      });
    }

    let (id, invalidations) = match existing {
      Some(id) => {
        let current = self.distributions.get(id).ok_or_else(|| not_found(kind, id))?;
        (id.to_string(), current.invalidations.clone())
      }
      None => (naming::distribution_id(), Vec::new()),
    };
    let domain_name = naming::distribution_domain_name(&id);

    self.distributions.insert(
      id.clone(),
      DistributionRecord {
        id: id.clone(),
        domain_name: domain_name.clone(),
        enabled: config.enabled,
        default_root_object: config.default_root_object.filter(|r| !r.is_empty()),
        origins,
        target_origin_id: config.default_cache_behavior.target_origin_id,
        viewer_protocol_policy: config.default_cache_behavior.viewer_protocol_policy,
        cache_policy_id: config.default_cache_behavior.cache_policy_id,
        error_responses,
        invalidations,
      },
    );
    Ok(provisioned(id.clone(), &[("Id", id), ("DomainName", domain_name)]))
  }

  fn create_user(&mut self, props: UserProps) -> Result<ProvisionedResource, CloudError> {
    let kind = ResourceKind::User;
    if props.user_name.is_empty() || props.user_name.len() > 64 {
      return Err(invalid(kind, "UserName must be 1 to 64 characters"));
    }
    if self.users.contains_key(&props.user_name) {
      return Err(CloudError::AlreadyExists {
        kind,
        name: props.user_name,
      });
    }

    let arn = naming::user_arn(&self.account_id, &props.user_name);
    self.users.insert(
      props.user_name.clone(),
      UserRecord {
        name: props.user_name.clone(),
        arn: arn.clone(),
      },
    );
    Ok(provisioned(props.user_name, &[("Arn", arn)]))
  }

  fn put_policy(
    &mut self,
    props: PolicyProps,
    existing: Option<&str>,
  ) -> Result<ProvisionedResource, CloudError> {
    let kind = ResourceKind::Policy;

    if props.users.is_empty() {
      return Err(invalid(kind, "an inline policy must be attached to a user"));
    }
    for user in &props.users {
      if !self.users.contains_key(user) {
        return Err(not_found(ResourceKind::User, user));
      }
    }
    for statement in &props.policy_document.statement {
      if statement.principal.is_some() {
        return Err(invalid(kind, "identity policies cannot name a Principal"));
      }
      if statement.action.values().is_empty() {
        return Err(invalid(kind, "every statement needs an Action"));
      }
    }
    if let Some((_, duplicate)) = self.policies.iter().find(|(id, p)| {
      Some(id.as_str()) != existing
        && p.name == props.policy_name
        && p.users.iter().any(|u| props.users.contains(u))
    }) {
      return Err(CloudError::AlreadyExists {
        kind,
        name: format!("{} on {}", duplicate.name, duplicate.users.join(", ")),
      });
    }

    let id = match existing {
      Some(id) if self.policies.contains_key(id) => id.to_string(),
      Some(id) => return Err(not_found(kind, id)),
      None => format!("{}-{}", props.policy_name, naming::short_id('P', 11)),
    };

    self.policies.insert(
      id.clone(),
      InlinePolicyRecord {
        name: props.policy_name,
        users: props.users,
        document: props.policy_document,
      },
    );
    Ok(provisioned(id, &[]))
  }
}

#[async_trait]
impl Provider for LocalCloud {
  async fn create(&self, request: &ResourceRequest) -> Result<ProvisionedResource, ProviderError> {
    let result = self
      .state
      .write()
      .await
      .create_resource(request.kind, &request.properties);

    match result {
      Ok(provisioned) => {
        info!(
          kind = %request.kind,
          logical_id = %request.logical_id,
          physical_id = %provisioned.physical_id,
          "created"
        );
        Ok(provisioned)
      }
      Err(e) => {
        warn!(kind = %request.kind, logical_id = %request.logical_id, error = %e, "create rejected");
        Err(e.into_provider_error(request.kind))
      }
    }
  }

  async fn update(
    &self,
    request: &ResourceRequest,
    current: &ProvisionedResource,
  ) -> Result<ProvisionedResource, ProviderError> {
    let result = self
      .state
      .write()
      .await
      .update_resource(request.kind, &request.properties, current);

    match result {
      Ok(provisioned) => {
        if request.kind == ResourceKind::Distribution {
          self.edge.lock().await.flush(&current.physical_id);
        }
        info!(
          kind = %request.kind,
          logical_id = %request.logical_id,
          physical_id = %provisioned.physical_id,
          "updated"
        );
        Ok(provisioned)
      }
      Err(e) => {
        warn!(kind = %request.kind, logical_id = %request.logical_id, error = %e, "update rejected");
        Err(e.into_provider_error(request.kind))
      }
    }
  }

  async fn delete(
    &self,
    request: &ResourceRequest,
    current: &ProvisionedResource,
  ) -> Result<(), ProviderError> {
    let result = self
      .state
      .write()
      .await
      .delete_resource(request.kind, current);

    match result {
      Ok(()) => {
        if request.kind == ResourceKind::Distribution {
          self.edge.lock().await.flush(&current.physical_id);
        }
        info!(
          kind = %request.kind,
          logical_id = %request.logical_id,
          physical_id = %current.physical_id,
          "deleted"
        );
        Ok(())
      }
      Err(e) => {
        warn!(kind = %request.kind, logical_id = %request.logical_id, error = %e, "delete rejected");
        Err(e.into_provider_error(request.kind))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn state() -> CloudState {
    CloudState::new("123456789012", "us-east-1")
  }

  fn bucket(name: &str, block: bool, auto_delete: bool) -> Value {
    let mut properties = json!({
      "BucketName": name,
      "PublicAccessBlockConfiguration": {
        "BlockPublicAcls": block,
        "BlockPublicPolicy": block,
        "IgnorePublicAcls": block,
        "RestrictPublicBuckets": block
      }
    });
    if auto_delete {
      properties["Tags"] = json!([{ "Key": AUTO_DELETE_OBJECTS_TAG, "Value": "true" }]);
    }
    properties
  }

  fn oac(name: &str) -> Value {
    json!({
      "OriginAccessControlConfig": {
        "Name": name,
        "OriginAccessControlOriginType": "s3",
        "SigningBehavior": "always",
        "SigningProtocol": "sigv4"
      }
    })
  }

  fn cache_policy(name: &str) -> Value {
    json!({
      "CachePolicyConfig": { "Name": name, "MinTTL": 0, "DefaultTTL": 0, "MaxTTL": 0 }
    })
  }

  fn distribution(cache_policy_id: &str, oac_id: Option<&str>, identity: &str) -> Value {
    let mut origin = json!({
      "Id": "origin1",
      "DomainName": "site.s3.us-east-1.amazonaws.com",
      "S3OriginConfig": {}
    });
    if !identity.is_empty() {
      origin["S3OriginConfig"]["OriginAccessIdentity"] = json!(identity);
    }
    if let Some(oac_id) = oac_id {
      origin["OriginAccessControlId"] = json!(oac_id);
    }
    json!({
      "DistributionConfig": {
        "Enabled": true,
        "DefaultRootObject": "index.html",
        "Origins": [origin],
        "DefaultCacheBehavior": {
          "TargetOriginId": "origin1",
          "ViewerProtocolPolicy": "redirect-to-https",
          "CachePolicyId": cache_policy_id
        }
      }
    })
  }

  #[test]
  fn test_bucket_attributes_and_name_collisions() {
    let mut state = state();
    let created = state
      .create_resource(ResourceKind::Bucket, &bucket("site", true, false))
      .unwrap();
    assert_eq!(created.physical_id, "site");
    assert_eq!(created.attributes["Arn"], "arn:aws:s3:::site");
    assert_eq!(
      created.attributes["RegionalDomainName"],
      "site.s3.us-east-1.amazonaws.com"
    );

    let err = state
      .create_resource(ResourceKind::Bucket, &bucket("site", true, false))
      .unwrap_err();
    assert!(matches!(err, CloudError::AlreadyExists { .. }));

    let err = state
      .create_resource(ResourceKind::Bucket, &bucket("Not_Valid", true, false))
      .unwrap_err();
    assert!(matches!(err, CloudError::InvalidProperties { .. }));
  }

  #[test]
  fn test_public_bucket_policy_is_blocked() {
    let mut state = state();
    state
      .create_resource(ResourceKind::Bucket, &bucket("site", true, false))
      .unwrap();

    let public = json!({
      "Bucket": "site",
      "PolicyDocument": {
        "Version": "2012-10-17",
        "Statement": [{
          "Effect": "Allow",
          "Principal": "*",
          "Action": "s3:GetObject",
          "Resource": "arn:aws:s3:::site/*"
        }]
      }
    });
    let err = state
      .create_resource(ResourceKind::BucketPolicy, &public)
      .unwrap_err();
    assert!(matches!(err, CloudError::Conflict { .. }));
    assert!(state.buckets["site"].policy.is_none());
  }

  #[test]
  fn test_bucket_policy_must_stay_inside_its_bucket() {
    let mut state = state();
    state
      .create_resource(ResourceKind::Bucket, &bucket("site", true, false))
      .unwrap();

    let foreign = json!({
      "Bucket": "site",
      "PolicyDocument": {
        "Statement": [{
          "Effect": "Allow",
          "Principal": { "Service": "cloudfront.amazonaws.com" },
          "Action": "s3:GetObject",
          "Resource": "arn:aws:s3:::other/*"
        }]
      }
    });
    let err = state
      .create_resource(ResourceKind::BucketPolicy, &foreign)
      .unwrap_err();
    assert!(matches!(err, CloudError::InvalidProperties { .. }));
  }

  #[test]
  fn test_distribution_rejects_dangling_origin_identity() {
    let mut state = state();
    let policy = state
      .create_resource(ResourceKind::CachePolicy, &cache_policy("no-cache"))
      .unwrap();

    let err = state
      .create_resource(
        ResourceKind::Distribution,
        &distribution(&policy.physical_id, None, "origin-access-identity/cloudfront/"),
      )
      .unwrap_err();
    assert!(matches!(err, CloudError::InvalidProperties { .. }));
    assert!(state.distributions.is_empty());
  }

  #[test]
  fn test_distribution_ids_and_in_use_dependencies() {
    let mut state = state();
    let policy = state
      .create_resource(ResourceKind::CachePolicy, &cache_policy("no-cache"))
      .unwrap();
    let control = state
      .create_resource(ResourceKind::OriginAccessControl, &oac("site-oac"))
      .unwrap();

    let created = state
      .create_resource(
        ResourceKind::Distribution,
        &distribution(&policy.physical_id, Some(&control.physical_id), ""),
      )
      .unwrap();
    assert!(created.physical_id.starts_with('E'));
    assert_eq!(created.physical_id.len(), 14);
    assert_eq!(
      created.attributes["DomainName"],
      format!("{}.cloudfront.net", created.physical_id.to_lowercase())
    );

    let err = state
      .delete_resource(ResourceKind::OriginAccessControl, &control)
      .unwrap_err();
    assert!(matches!(err, CloudError::Conflict { .. }));
    let err = state
      .delete_resource(ResourceKind::CachePolicy, &policy)
      .unwrap_err();
    assert!(matches!(err, CloudError::Conflict { .. }));

    state
      .delete_resource(ResourceKind::Distribution, &created)
      .unwrap();
    state
      .delete_resource(ResourceKind::OriginAccessControl, &control)
      .unwrap();
    state
      .delete_resource(ResourceKind::CachePolicy, &policy)
      .unwrap();
  }

  #[test]
  fn test_cache_policy_ttls_must_be_ordered() {
    let mut state = state();
    let err = state
      .create_resource(
        ResourceKind::CachePolicy,
        &json!({
          "CachePolicyConfig": { "Name": "bad", "MinTTL": 10, "DefaultTTL": 0, "MaxTTL": 60 }
        }),
      )
      .unwrap_err();
    assert!(matches!(err, CloudError::InvalidProperties { .. }));
  }

  #[test]
  fn test_non_empty_bucket_deletion_depends_on_auto_delete() {
    let object = || crate::state::StoredObject {
      body: bytes::Bytes::from_static(b"x"),
      content_type: None,
      etag: "etag".to_string(),
      last_modified: chrono::Utc::now(),
    };

    let mut state = state();
    let kept = state
      .create_resource(ResourceKind::Bucket, &bucket("kept", true, false))
      .unwrap();
    let purged = state
      .create_resource(ResourceKind::Bucket, &bucket("purged", true, true))
      .unwrap();
    for name in ["kept", "purged"] {
      state
        .buckets
        .get_mut(name)
        .unwrap()
        .objects
        .insert("index.html".to_string(), object());
    }

    let err = state.delete_resource(ResourceKind::Bucket, &kept).unwrap_err();
    assert!(matches!(err, CloudError::Conflict { .. }));
    state.delete_resource(ResourceKind::Bucket, &purged).unwrap();
    assert!(state.buckets.contains_key("kept"));
    assert!(!state.buckets.contains_key("purged"));
  }

  #[test]
  fn test_users_keep_their_policies_attached() {
    let mut state = state();
    let user = state
      .create_resource(ResourceKind::User, &json!({ "UserName": "deployer" }))
      .unwrap();
    assert_eq!(user.attributes["Arn"], "arn:aws:iam::123456789012:user/deployer");

    let properties = json!({
      "PolicyName": "deploy",
      "Users": ["deployer"],
      "PolicyDocument": {
        "Statement": [{ "Effect": "Allow", "Action": "s3:PutObject", "Resource": "*" }]
      }
    });
    let policy = state
      .create_resource(ResourceKind::Policy, &properties)
      .unwrap();
    assert!(policy.physical_id.starts_with("deploy-"));

    let err = state
      .create_resource(ResourceKind::Policy, &properties)
      .unwrap_err();
    assert!(matches!(err, CloudError::AlreadyExists { .. }));

    let err = state.delete_resource(ResourceKind::User, &user).unwrap_err();
    assert!(matches!(err, CloudError::Conflict { .. }));
    state.delete_resource(ResourceKind::Policy, &policy).unwrap();
    state.delete_resource(ResourceKind::User, &user).unwrap();
  }
}
