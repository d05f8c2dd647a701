//! Data plane: objects and invalidations.
//!
//! Every call is authorized first. A user's inline policies and the bucket
//! policy are combined; an explicit deny anywhere wins. Buckets with
//! `RestrictPublicBuckets` never admit anonymous callers.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tk_farm_stack::ResourceKind;
use tracing::info;

use crate::access::{AccessRequest, Caller, Decision, combine};
use crate::cloud::LocalCloud;
use crate::error::CloudError;
use crate::naming;
use crate::state::{BucketRecord, CloudState, InvalidationRecord, StoredObject};

/// Object metadata as listings report it.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInfo {
  pub key: String,
  pub size: u64,
  pub etag: String,
  pub content_type: Option<String>,
  pub last_modified: DateTime<Utc>,
}

impl ObjectInfo {
  fn new(key: &str, object: &StoredObject) -> Self {
    Self {
      key: key.to_string(),
      size: object.body.len() as u64,
      etag: object.etag.clone(),
      content_type: object.content_type.clone(),
      last_modified: object.last_modified,
    }
  }
}

impl CloudState {
  /// Decision of every identity policy attached to the caller.
  fn identity_decision(&self, request: &AccessRequest<'_>) -> Decision {
    match request.caller {
      Caller::User(name) => combine(
        self
          .user_policies(name)
          .map(|p| p.document.evaluate_identity(request)),
      ),
      _ => Decision::ImplicitDeny,
    }
  }

  pub(crate) fn authorize_bucket(
    &self,
    bucket: &BucketRecord,
    caller: &Caller,
    action: &str,
    resource: &str,
  ) -> Result<(), CloudError> {
    if let Caller::User(name) = caller
      && !self.users.contains_key(name)
    {
      return Err(denied(caller, action, resource));
    }

    let request = AccessRequest {
      caller,
      action,
      resource,
    };
    let restricted =
      bucket.public_access_block.restrict_public_buckets && *caller == Caller::Anonymous;
    let resource_decision = match &bucket.policy {
      Some(policy) if !restricted => policy.evaluate_resource(&request, &self.account_id),
      _ => Decision::ImplicitDeny,
    };

    match combine([self.identity_decision(&request), resource_decision]) {
      Decision::Allow => Ok(()),
      _ => Err(denied(caller, action, resource)),
    }
  }

  fn bucket_for(&self, name: &str) -> Result<&BucketRecord, CloudError> {
    self.buckets.get(name).ok_or_else(|| CloudError::NotFound {
      kind: ResourceKind::Bucket,
      id: name.to_string(),
    })
  }

  /// Read an object the way the edge and `get_object` both do.
  pub(crate) fn read_object(
    &self,
    caller: &Caller,
    bucket: &str,
    key: &str,
  ) -> Result<(ObjectInfo, Bytes), CloudError> {
    if !naming::is_valid_object_key(key) {
      return Err(CloudError::InvalidKey {
        key: key.to_string(),
      });
    }
    let record = self.bucket_for(bucket)?;
    self.authorize_bucket(record, caller, "s3:GetObject", &naming::object_arn(bucket, key))?;

    let object = record.objects.get(key).ok_or_else(|| CloudError::NoSuchKey {
      bucket: bucket.to_string(),
      key: key.to_string(),
    })?;
    Ok((ObjectInfo::new(key, object), object.body.clone()))
  }
}

fn denied(caller: &Caller, action: &str, resource: &str) -> CloudError {
  CloudError::AccessDenied {
    principal: caller.to_string(),
    action: action.to_string(),
    resource: resource.to_string(),
  }
}

impl LocalCloud {
  /// Store an object, replacing any previous body under the same key.
  pub async fn put_object(
    &self,
    caller: &Caller,
    bucket: &str,
    key: &str,
    body: impl Into<Bytes>,
    content_type: Option<&str>,
  ) -> Result<ObjectInfo, CloudError> {
    if !naming::is_valid_object_key(key) {
      return Err(CloudError::InvalidKey {
        key: key.to_string(),
      });
    }

    let mut state = self.state.write().await;
    let record = state.bucket_for(bucket)?;
    state.authorize_bucket(record, caller, "s3:PutObject", &naming::object_arn(bucket, key))?;

    let body = body.into();
    let object = StoredObject {
      etag: format!("\"{:x}\"", md5::compute(&body)),
      body,
      content_type: content_type.map(str::to_string),
      last_modified: Utc::now(),
    };
    let info = ObjectInfo::new(key, &object);

    if let Some(record) = state.buckets.get_mut(bucket) {
      record.objects.insert(key.to_string(), object);
    }
    info!(bucket = %bucket, key = %key, size = info.size, "put object");
    Ok(info)
  }

  pub async fn get_object(
    &self,
    caller: &Caller,
    bucket: &str,
    key: &str,
  ) -> Result<(ObjectInfo, Bytes), CloudError> {
    self.state.read().await.read_object(caller, bucket, key)
  }

  /// Delete an object. Deleting a missing key succeeds.
  pub async fn delete_object(&self, caller: &Caller, bucket: &str, key: &str) -> Result<(), CloudError> {
    if !naming::is_valid_object_key(key) {
      return Err(CloudError::InvalidKey {
        key: key.to_string(),
      });
    }

    let mut state = self.state.write().await;
    let record = state.bucket_for(bucket)?;
    state.authorize_bucket(record, caller, "s3:DeleteObject", &naming::object_arn(bucket, key))?;

    if let Some(record) = state.buckets.get_mut(bucket)
      && record.objects.remove(key).is_some()
    {
      info!(bucket = %bucket, key = %key, "deleted object");
    }
    Ok(())
  }

  /// List objects in key order, optionally under a prefix.
  pub async fn list_objects(
    &self,
    caller: &Caller,
    bucket: &str,
    prefix: Option<&str>,
  ) -> Result<Vec<ObjectInfo>, CloudError> {
    let state = self.state.read().await;
    let record = state.bucket_for(bucket)?;
    state.authorize_bucket(record, caller, "s3:ListBucket", &naming::bucket_arn(bucket))?;

    let prefix = prefix.unwrap_or_default();
    Ok(
      record
        .objects
        .range(prefix.to_string()..)
        .take_while(|(key, _)| key.starts_with(prefix))
        .map(|(key, object)| ObjectInfo::new(key, object))
        .collect(),
    )
  }

  /// Evict paths from the edge cache of a distribution.
  ///
  /// Paths start with `/`; a trailing `*` matches every path under the
  /// prefix. Only users can invalidate, through their inline policies.
  pub async fn create_invalidation(
    &self,
    caller: &Caller,
    distribution_id: &str,
    paths: &[&str],
  ) -> Result<InvalidationRecord, CloudError> {
    let action = "cloudfront:CreateInvalidation";
    let mut state = self.state.write().await;
    let arn = naming::distribution_arn(&state.account_id, distribution_id);

    let authorized = matches!(caller, Caller::User(name) if state.users.contains_key(name))
      && state.identity_decision(&AccessRequest {
        caller,
        action,
        resource: &arn,
      }) == Decision::Allow;
    if !authorized {
      return Err(denied(caller, action, &arn));
    }

    if paths.is_empty() {
      return Err(CloudError::InvalidProperties {
        kind: ResourceKind::Distribution,
        message: "an invalidation needs at least one path".to_string(),
      });
    }
    if let Some(path) = paths.iter().find(|p| !p.starts_with('/')) {
      return Err(CloudError::InvalidProperties {
        kind: ResourceKind::Distribution,
        message: format!("invalidation path '{}' must start with '/'", path),
      });
    }

    let distribution = state
      .distributions
      .get_mut(distribution_id)
      .ok_or_else(|| CloudError::NotFound {
        kind: ResourceKind::Distribution,
        id: distribution_id.to_string(),
      })?;

    let record = InvalidationRecord {
      id: naming::invalidation_id(),
      paths: paths.iter().map(|p| p.to_string()).collect(),
      created_at: Utc::now(),
    };
    distribution.invalidations.push(record.clone());

    let evicted = self.edge.lock().await.invalidate(distribution_id, &record.paths);
    info!(
      distribution_id = %distribution_id,
      invalidation_id = %record.id,
      evicted,
      "created invalidation"
    );
    Ok(record)
  }
}
