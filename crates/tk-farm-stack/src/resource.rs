//! Resource kinds and their declared properties.
//!
//! Property structs serialize to the template property names. Fields that
//! point at another resource are [`Expr`]s, so the dependency is visible to
//! the graph rather than hidden inside a formatted string.

use serde::{Deserialize, Serialize};

use crate::expr::{Attribute, Expr};
use crate::policy::PolicyDocument;

/// The resource types this stack knows how to declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
  #[serde(rename = "AWS::S3::Bucket")]
  Bucket,
  #[serde(rename = "AWS::S3::BucketPolicy")]
  BucketPolicy,
  #[serde(rename = "AWS::CloudFront::OriginAccessControl")]
  OriginAccessControl,
  #[serde(rename = "AWS::CloudFront::CachePolicy")]
  CachePolicy,
  #[serde(rename = "AWS::CloudFront::Distribution")]
  Distribution,
  #[serde(rename = "AWS::IAM::User")]
  User,
  #[serde(rename = "AWS::IAM::Policy")]
  Policy,
}

impl ResourceKind {
  pub fn type_name(&self) -> &'static str {
    match self {
      ResourceKind::Bucket => "AWS::S3::Bucket",
      ResourceKind::BucketPolicy => "AWS::S3::BucketPolicy",
      ResourceKind::OriginAccessControl => "AWS::CloudFront::OriginAccessControl",
      ResourceKind::CachePolicy => "AWS::CloudFront::CachePolicy",
      ResourceKind::Distribution => "AWS::CloudFront::Distribution",
      ResourceKind::User => "AWS::IAM::User",
      ResourceKind::Policy => "AWS::IAM::Policy",
    }
  }

  /// Attributes readable with `Fn::GetAtt`.
  pub fn attributes(&self) -> &'static [Attribute] {
    match self {
      ResourceKind::Bucket => &[
        Attribute::Arn,
        Attribute::DomainName,
        Attribute::RegionalDomainName,
      ],
      ResourceKind::OriginAccessControl | ResourceKind::CachePolicy => &[Attribute::Id],
      ResourceKind::Distribution => &[Attribute::Id, Attribute::DomainName],
      ResourceKind::User => &[Attribute::Arn],
      ResourceKind::BucketPolicy | ResourceKind::Policy => &[],
    }
  }

  /// Property paths whose change forces a new physical resource.
  pub fn replacement_paths(&self) -> &'static [&'static str] {
    match self {
      ResourceKind::Bucket => &["BucketName"],
      ResourceKind::BucketPolicy => &["Bucket"],
      ResourceKind::OriginAccessControl => &["OriginAccessControlConfig.Name"],
      ResourceKind::CachePolicy => &["CachePolicyConfig.Name"],
      ResourceKind::Distribution => &[],
      ResourceKind::User => &["UserName"],
      ResourceKind::Policy => &["PolicyName"],
    }
  }
}

impl std::fmt::Display for ResourceKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.type_name())
  }
}

/// Template-level deletion behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletionPolicy {
  Delete,
  Retain,
}

impl From<tk_farm_config::RemovalPolicy> for DeletionPolicy {
  fn from(policy: tk_farm_config::RemovalPolicy) -> Self {
    match policy {
      tk_farm_config::RemovalPolicy::Destroy => DeletionPolicy::Delete,
      tk_farm_config::RemovalPolicy::Retain => DeletionPolicy::Retain,
    }
  }
}

/// Tag marking a bucket whose contents are purged before deletion.
pub const AUTO_DELETE_OBJECTS_TAG: &str = "tk-farm:auto-delete-objects";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Tag {
  pub key: String,
  pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PublicAccessBlockConfiguration {
  pub block_public_acls: bool,
  pub block_public_policy: bool,
  pub ignore_public_acls: bool,
  pub restrict_public_buckets: bool,
}

impl PublicAccessBlockConfiguration {
  pub fn block_all() -> Self {
    Self {
      block_public_acls: true,
      block_public_policy: true,
      ignore_public_acls: true,
      restrict_public_buckets: true,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BucketProps {
  pub bucket_name: Expr,
  pub public_access_block_configuration: PublicAccessBlockConfiguration,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BucketPolicyProps {
  pub bucket: Expr,
  pub policy_document: PolicyDocument,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct OriginAccessControlConfig {
  pub name: Expr,
  pub origin_access_control_origin_type: String,
  pub signing_behavior: String,
  pub signing_protocol: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct OriginAccessControlProps {
  pub origin_access_control_config: OriginAccessControlConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CookiesConfig {
  pub cookie_behavior: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct HeadersConfig {
  pub header_behavior: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryStringsConfig {
  pub query_string_behavior: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CacheKeyParameters {
  pub cookies_config: CookiesConfig,
  pub headers_config: HeadersConfig,
  pub query_strings_config: QueryStringsConfig,
  #[serde(rename = "EnableAcceptEncodingGzip")]
  pub enable_accept_encoding_gzip: bool,
  #[serde(rename = "EnableAcceptEncodingBrotli")]
  pub enable_accept_encoding_brotli: bool,
}

impl Default for CacheKeyParameters {
  fn default() -> Self {
    Self {
      cookies_config: CookiesConfig {
        cookie_behavior: "none".to_string(),
      },
      headers_config: HeadersConfig {
        header_behavior: "none".to_string(),
      },
      query_strings_config: QueryStringsConfig {
        query_string_behavior: "none".to_string(),
      },
      enable_accept_encoding_gzip: false,
      enable_accept_encoding_brotli: false,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CachePolicyConfig {
  pub name: Expr,
  #[serde(rename = "MinTTL")]
  pub min_ttl: u64,
  #[serde(rename = "DefaultTTL")]
  pub default_ttl: u64,
  #[serde(rename = "MaxTTL")]
  pub max_ttl: u64,
  pub parameters_in_cache_key_and_forwarded_to_origin: CacheKeyParameters,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CachePolicyProps {
  pub cache_policy_config: CachePolicyConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct S3OriginConfig {
  /// Legacy identity-based access. Replaced by an origin access control.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub origin_access_identity: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Origin {
  pub id: String,
  pub domain_name: Expr,
  pub s3_origin_config: S3OriginConfig,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub origin_access_control_id: Option<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViewerProtocolPolicy {
  AllowAll,
  RedirectToHttps,
  HttpsOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DefaultCacheBehavior {
  pub target_origin_id: String,
  pub viewer_protocol_policy: ViewerProtocolPolicy,
  pub cache_policy_id: Expr,
  pub compress: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomErrorResponse {
  pub error_code: u16,
  pub response_code: u16,
  pub response_page_path: String,
  #[serde(rename = "ErrorCachingMinTTL", skip_serializing_if = "Option::is_none")]
  pub error_caching_min_ttl: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DistributionConfig {
  pub enabled: bool,
  pub default_root_object: String,
  pub origins: Vec<Origin>,
  pub default_cache_behavior: DefaultCacheBehavior,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub custom_error_responses: Vec<CustomErrorResponse>,
  pub http_version: String,
  #[serde(rename = "IPV6Enabled")]
  pub ipv6_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DistributionProps {
  pub distribution_config: DistributionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserProps {
  pub user_name: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyProps {
  pub policy_name: Expr,
  pub policy_document: PolicyDocument,
  pub users: Vec<Expr>,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_kind_round_trips_through_type_name() {
    let kind: ResourceKind = serde_json::from_value(json!("AWS::CloudFront::Distribution")).unwrap();
    assert_eq!(kind, ResourceKind::Distribution);
    assert_eq!(
      serde_json::to_value(ResourceKind::Bucket).unwrap(),
      json!(ResourceKind::Bucket.type_name())
    );
  }

  #[test]
  fn test_cache_policy_ttl_names() {
    let props = CachePolicyProps {
      cache_policy_config: CachePolicyConfig {
        name: "no-cache".into(),
        min_ttl: 0,
        default_ttl: 0,
        max_ttl: 0,
        parameters_in_cache_key_and_forwarded_to_origin: CacheKeyParameters::default(),
      },
    };
    let value = serde_json::to_value(&props).unwrap();
    let config = &value["CachePolicyConfig"];
    assert_eq!(config["MinTTL"], json!(0));
    assert_eq!(config["DefaultTTL"], json!(0));
    assert_eq!(config["MaxTTL"], json!(0));
  }

  #[test]
  fn test_viewer_protocol_policy_is_kebab_case() {
    assert_eq!(
      serde_json::to_value(ViewerProtocolPolicy::RedirectToHttps).unwrap(),
      json!("redirect-to-https")
    );
  }

  #[test]
  fn test_distribution_exposes_domain_name() {
    assert!(
      ResourceKind::Distribution
        .attributes()
        .contains(&Attribute::DomainName)
    );
    assert!(ResourceKind::BucketPolicy.attributes().is_empty());
  }
}
