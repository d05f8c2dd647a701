//! Records kept by the local cloud.
//!
//! Everything here is plain serializable data so a whole cloud can be
//! snapshotted to disk between CLI invocations. Edge caches are not part of
//! the snapshot.

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::access::PolicyDocument;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PublicAccessBlock {
  #[serde(default)]
  pub block_public_acls: bool,
  #[serde(default)]
  pub block_public_policy: bool,
  #[serde(default)]
  pub ignore_public_acls: bool,
  #[serde(default)]
  pub restrict_public_buckets: bool,
}

impl PublicAccessBlock {
  pub fn all_blocked(&self) -> bool {
    self.block_public_acls
      && self.block_public_policy
      && self.ignore_public_acls
      && self.restrict_public_buckets
  }
}

/// An object body with its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredObject {
  #[serde(with = "base64_body")]
  pub body: Bytes,
  pub content_type: Option<String>,
  pub etag: String,
  pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketRecord {
  pub name: String,
  pub public_access_block: PublicAccessBlock,
  /// Objects are purged when the bucket is deleted.
  pub auto_delete_objects: bool,
  #[serde(default)]
  pub tags: BTreeMap<String, String>,
  #[serde(default)]
  pub policy: Option<PolicyDocument>,
  #[serde(default)]
  pub objects: BTreeMap<String, StoredObject>,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginAccessControlRecord {
  pub id: String,
  pub name: String,
  pub origin_type: String,
  pub signing_behavior: String,
  pub signing_protocol: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachePolicyRecord {
  pub id: String,
  pub name: String,
  pub min_ttl: u64,
  pub default_ttl: u64,
  pub max_ttl: u64,
}

impl CachePolicyRecord {
  /// Seconds a successful response stays cached when the origin sends no
  /// cache headers.
  pub fn effective_ttl(&self) -> u64 {
    self.default_ttl.clamp(self.min_ttl, self.max_ttl.max(self.min_ttl))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViewerProtocolPolicy {
  AllowAll,
  RedirectToHttps,
  HttpsOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginRecord {
  pub id: String,
  pub domain_name: String,
  pub origin_access_control_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponseRecord {
  pub error_code: u16,
  pub response_code: u16,
  pub response_page_path: String,
  pub error_caching_min_ttl: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidationRecord {
  pub id: String,
  pub paths: Vec<String>,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionRecord {
  pub id: String,
  pub domain_name: String,
  pub enabled: bool,
  pub default_root_object: Option<String>,
  pub origins: Vec<OriginRecord>,
  pub target_origin_id: String,
  pub viewer_protocol_policy: ViewerProtocolPolicy,
  pub cache_policy_id: String,
  pub error_responses: Vec<ErrorResponseRecord>,
  #[serde(default)]
  pub invalidations: Vec<InvalidationRecord>,
}

impl DistributionRecord {
  pub fn target_origin(&self) -> Option<&OriginRecord> {
    self.origins.iter().find(|o| o.id == self.target_origin_id)
  }

  pub fn error_response(&self, status: u16) -> Option<&ErrorResponseRecord> {
    self.error_responses.iter().find(|r| r.error_code == status)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
  pub name: String,
  pub arn: String,
}

/// An inline policy attached to one or more users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlinePolicyRecord {
  pub name: String,
  pub users: Vec<String>,
  pub document: PolicyDocument,
}

/// The whole control-plane state of one account and region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudState {
  pub account_id: String,
  pub region: String,
  #[serde(default)]
  pub buckets: BTreeMap<String, BucketRecord>,
  #[serde(default)]
  pub origin_access_controls: BTreeMap<String, OriginAccessControlRecord>,
  #[serde(default)]
  pub cache_policies: BTreeMap<String, CachePolicyRecord>,
  #[serde(default)]
  pub distributions: BTreeMap<String, DistributionRecord>,
  #[serde(default)]
  pub users: BTreeMap<String, UserRecord>,
  /// Inline policies by physical id.
  #[serde(default)]
  pub policies: BTreeMap<String, InlinePolicyRecord>,
}

impl CloudState {
  pub fn new(account_id: impl Into<String>, region: impl Into<String>) -> Self {
    Self {
      account_id: account_id.into(),
      region: region.into(),
      buckets: BTreeMap::new(),
      origin_access_controls: BTreeMap::new(),
      cache_policies: BTreeMap::new(),
      distributions: BTreeMap::new(),
      users: BTreeMap::new(),
      policies: BTreeMap::new(),
    }
  }

  /// The bucket whose global or regional endpoint is `domain`.
  pub fn bucket_by_domain(&self, domain: &str) -> Option<&BucketRecord> {
    self.buckets.values().find(|b| {
      domain == crate::naming::bucket_domain_name(&b.name)
        || domain == crate::naming::bucket_regional_domain_name(&b.name, &self.region)
    })
  }

  pub fn distribution_by_domain(&self, domain: &str) -> Option<&DistributionRecord> {
    self
      .distributions
      .values()
      .find(|d| d.domain_name.eq_ignore_ascii_case(domain))
  }

  /// Inline policies attached to `user`.
  pub fn user_policies(&self, user: &str) -> impl Iterator<Item = &InlinePolicyRecord> {
    self
      .policies
      .values()
      .filter(move |p| p.users.iter().any(|u| u == user))
  }
}

mod base64_body {
  use base64::Engine;
  use base64::engine::general_purpose::STANDARD;
  use bytes::Bytes;
  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(body))
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    STANDARD
      .decode(encoded)
      .map(Bytes::from)
      .map_err(serde::de::Error::custom)
  }
}
