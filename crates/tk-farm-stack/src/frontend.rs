//! The tk-farm frontend stack.
//!
//! ```text
//!   FrontendBucket ──┐
//!                    ├──► Distribution ──┬──► FrontendBucketPolicy
//!   OAC ─────────────┤                   └──► DeployPolicy ◄── DeployUser
//!   CachePolicy ─────┘
//! ```
//!
//! The bucket stays fully private. The distribution reads it through an
//! origin access control, and the bucket policy only admits the CDN service
//! when the request comes from this distribution. The deploy user can replace
//! site content and invalidate the edge, nothing else.

use tk_farm_config::{RemovalPolicy, StackConfig};

use crate::error::StackError;
use crate::expr::Expr;
use crate::policy::{PolicyDocument, PolicyStatement, Principal};
use crate::resource::{
  AUTO_DELETE_OBJECTS_TAG, BucketPolicyProps, BucketProps, CacheKeyParameters, CachePolicyConfig,
  CachePolicyProps, CustomErrorResponse, DefaultCacheBehavior, DeletionPolicy, DistributionConfig,
  DistributionProps, Origin, OriginAccessControlConfig, OriginAccessControlProps, PolicyProps,
  PublicAccessBlockConfiguration, S3OriginConfig, Tag, UserProps, ViewerProtocolPolicy,
};
use crate::stack::{BucketRef, Stack};
use crate::template::Template;

pub const BUCKET_ID: &str = "FrontendBucket";
pub const BUCKET_POLICY_ID: &str = "FrontendBucketPolicy";
pub const ORIGIN_ACCESS_CONTROL_ID: &str = "OAC";
pub const CACHE_POLICY_ID: &str = "CachePolicy";
pub const DISTRIBUTION_ID: &str = "Distribution";
pub const DEPLOY_USER_ID: &str = "DeployUser";
pub const DEPLOY_POLICY_ID: &str = "DeployPolicy";

pub const OUTPUT_BUCKET_NAME: &str = "BucketName";
pub const OUTPUT_DISTRIBUTION_ID: &str = "DistributionId";
pub const OUTPUT_DISTRIBUTION_DOMAIN_NAME: &str = "DistributionDomainName";
pub const OUTPUT_DEPLOY_USER_NAME: &str = "DeployUserName";

pub const CLOUDFRONT_SERVICE: &str = "cloudfront.amazonaws.com";
pub const SOURCE_ARN_KEY: &str = "AWS:SourceArn";

/// Actions the deploy user may perform on the bucket and its objects.
pub const DEPLOY_BUCKET_ACTIONS: [&str; 4] = [
  "s3:PutObject",
  "s3:PutObjectAcl",
  "s3:DeleteObject",
  "s3:ListBucket",
];

/// Actions the deploy user may perform on the distribution.
pub const DEPLOY_DISTRIBUTION_ACTIONS: [&str; 1] = ["cloudfront:CreateInvalidation"];

/// Origin status rewritten into the root document.
const FALLBACK_ERROR_CODE: u16 = 404;

const ORIGIN_ID: &str = "origin1";
const ORIGIN_ACCESS_IDENTITY_PATH: &str =
  "DistributionConfig.Origins.0.S3OriginConfig.OriginAccessIdentity";
const ORIGIN_ACCESS_CONTROL_PATH: &str = "DistributionConfig.Origins.0.OriginAccessControlId";

/// Declares the frontend stack from a config.
pub struct FrontendStack;

impl FrontendStack {
  /// Build the stack. The config is validated first.
  pub fn build(config: &StackConfig) -> Result<Stack, StackError> {
    config.validate()?;

    let mut stack = Stack::new(format!("{}-frontend", config.prefix), &config.account_id)
      .with_description(format!("Static frontend hosting for {}", config.prefix));

    // Origin storage
    let bucket = stack.bucket(BUCKET_ID, &bucket_props(config))?;
    stack.set_deletion_policy(BUCKET_ID, DeletionPolicy::from(config.removal_policy))?;

    // Origin access binding
    let oac = stack.origin_access_control(
      ORIGIN_ACCESS_CONTROL_ID,
      &OriginAccessControlProps {
        origin_access_control_config: OriginAccessControlConfig {
          name: config.origin_access_control_name().into(),
          origin_access_control_origin_type: "s3".to_string(),
          signing_behavior: "always".to_string(),
          signing_protocol: "sigv4".to_string(),
        },
      },
    )?;

    // Distribution and its pass-through cache policy. Every TTL is zero so
    // the edge always goes back to the origin.
    let cache_policy = stack.cache_policy(
      CACHE_POLICY_ID,
      &CachePolicyProps {
        cache_policy_config: CachePolicyConfig {
          name: config.cache_policy_name().into(),
          min_ttl: 0,
          default_ttl: 0,
          max_ttl: 0,
          parameters_in_cache_key_and_forwarded_to_origin: CacheKeyParameters::default(),
        },
      },
    )?;

    let distribution = stack.distribution(
      DISTRIBUTION_ID,
      &DistributionProps {
        distribution_config: DistributionConfig {
          enabled: true,
          default_root_object: config.default_root_object.clone(),
          origins: vec![s3_origin(&bucket, DISTRIBUTION_ID)],
          default_cache_behavior: DefaultCacheBehavior {
            target_origin_id: ORIGIN_ID.to_string(),
            viewer_protocol_policy: ViewerProtocolPolicy::RedirectToHttps,
            cache_policy_id: cache_policy.id(),
            compress: true,
          },
          // Client-side routes are unknown to the origin.
          custom_error_responses: vec![CustomErrorResponse {
            error_code: FALLBACK_ERROR_CODE,
            response_code: 200,
            response_page_path: config.root_document_path(),
            error_caching_min_ttl: Some(0),
          }],
          http_version: "http2".to_string(),
          ipv6_enabled: true,
        },
      },
    )?;

    // Swap the default identity-based origin access for the binding.
    stack.add_property_override(DISTRIBUTION_ID, ORIGIN_ACCESS_CONTROL_PATH, oac.id())?;
    stack.add_property_deletion_override(DISTRIBUTION_ID, ORIGIN_ACCESS_IDENTITY_PATH)?;

    // Origin resource policy
    stack.bucket_policy(
      BUCKET_POLICY_ID,
      &BucketPolicyProps {
        bucket: bucket.name(),
        policy_document: PolicyDocument::new(vec![
          PolicyStatement::allow(["s3:GetObject"], [bucket.objects_arn()])
            .with_principal(Principal::Service(CLOUDFRONT_SERVICE.to_string()))
            .with_condition("StringEquals", SOURCE_ARN_KEY, distribution.arn()),
        ]),
      },
    )?;

    // Deployment identity
    let user = stack.user(
      DEPLOY_USER_ID,
      &UserProps {
        user_name: config.deploy_user_name().into(),
      },
    )?;
    stack.policy(
      DEPLOY_POLICY_ID,
      &PolicyProps {
        policy_name: config.deploy_policy_name().into(),
        policy_document: PolicyDocument::new(vec![
          PolicyStatement::allow(DEPLOY_BUCKET_ACTIONS, [bucket.arn(), bucket.objects_arn()]),
          PolicyStatement::allow(DEPLOY_DISTRIBUTION_ACTIONS, [distribution.arn()]),
        ]),
        users: vec![user.name()],
      },
    )?;

    // Outputs
    stack.add_output(OUTPUT_BUCKET_NAME, bucket.name(), "S3 Bucket Name")?;
    stack.add_output(
      OUTPUT_DISTRIBUTION_ID,
      distribution.id(),
      "CloudFront Distribution ID",
    )?;
    stack.add_output(
      OUTPUT_DISTRIBUTION_DOMAIN_NAME,
      distribution.domain_name(),
      "CloudFront Distribution Domain Name",
    )?;
    stack.add_output(OUTPUT_DEPLOY_USER_NAME, user.name(), "Deploy User Name")?;

    Ok(stack)
  }

  /// Build and synthesize in one step.
  pub fn synth(config: &StackConfig) -> Result<Template, StackError> {
    Self::build(config)?.synth()
  }
}

fn bucket_props(config: &StackConfig) -> BucketProps {
  let mut tags = Vec::new();
  if config.auto_delete_objects && config.removal_policy == RemovalPolicy::Destroy {
    tags.push(Tag {
      key: AUTO_DELETE_OBJECTS_TAG.to_string(),
      value: "true".to_string(),
    });
  }

  BucketProps {
    bucket_name: config.bucket_name().into(),
    public_access_block_configuration: PublicAccessBlockConfiguration::block_all(),
    tags,
  }
}

/// An S3 origin as the provider declares it by default: identity-based
/// access through an origin access identity owned by the distribution.
fn s3_origin(bucket: &BucketRef, distribution_id: &str) -> Origin {
  Origin {
    id: ORIGIN_ID.to_string(),
    domain_name: bucket.regional_domain_name(),
    s3_origin_config: S3OriginConfig {
      origin_access_identity: Some(Expr::join([
        "origin-access-identity/cloudfront/".into(),
        Expr::Ref(format!("{}Origin1S3Origin", distribution_id)),
      ])),
    },
    origin_access_control_id: None,
  }
}
