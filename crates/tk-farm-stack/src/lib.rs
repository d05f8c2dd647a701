//! tk-farm Stack
//!
//! This crate declares the frontend hosting stack and synthesizes it into a
//! [`Template`]: the "locked" form that the engine deploys.
//!
//! Key differences from `tk-farm-config`:
//! - Resources are declared with typed properties and typed handles, so a
//!   reference can only name an attribute the target actually exposes
//! - Property overrides are applied during synthesis
//! - References and the dependency graph are validated (no dangling ids,
//!   no cycles)
//! - [`validate`] checks the security invariants of a synthesized template

mod error;
mod expr;
mod frontend;
mod graph;
mod overrides;
mod policy;
mod resource;
mod stack;
mod template;
mod validate;

pub use error::StackError;
pub use expr::{Attribute, Expr, Intrinsic, Reference, references};
pub use frontend::{
  BUCKET_ID, BUCKET_POLICY_ID, CACHE_POLICY_ID, CLOUDFRONT_SERVICE, DEPLOY_BUCKET_ACTIONS,
  DEPLOY_DISTRIBUTION_ACTIONS, DEPLOY_POLICY_ID, DEPLOY_USER_ID, DISTRIBUTION_ID, FrontendStack,
  ORIGIN_ACCESS_CONTROL_ID, OUTPUT_BUCKET_NAME, OUTPUT_DEPLOY_USER_NAME, OUTPUT_DISTRIBUTION_DOMAIN_NAME,
  OUTPUT_DISTRIBUTION_ID, SOURCE_ARN_KEY,
};
pub use graph::Graph;
pub use overrides::PropertyOverride;
pub use policy::{
  Effect, POLICY_VERSION, PolicyDocument, PolicyStatement, Principal, is_public_principal,
  principal_entries,
};
pub use resource::{
  AUTO_DELETE_OBJECTS_TAG, BucketPolicyProps, BucketProps, CacheKeyParameters, CachePolicyConfig,
  CachePolicyProps, CookiesConfig, CustomErrorResponse, DefaultCacheBehavior, DeletionPolicy,
  DistributionConfig, DistributionProps, HeadersConfig, Origin, OriginAccessControlConfig,
  OriginAccessControlProps, PolicyProps, PublicAccessBlockConfiguration, QueryStringsConfig,
  ResourceKind, S3OriginConfig, Tag, UserProps, ViewerProtocolPolicy,
};
pub use stack::{
  BucketRef, CachePolicyRef, DistributionRef, OriginAccessControlRef, Stack, UserRef,
};
pub use template::{TEMPLATE_FORMAT_VERSION, Template, TemplateOutput, TemplateResource};
pub use validate::{Violation, validate};
