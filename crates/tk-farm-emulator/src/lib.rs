//! tk-farm Local Cloud
//!
//! An in-memory stand-in for the services the frontend stack provisions:
//! object storage with bucket policies and public access blocks, a CDN with
//! origin access control and edge caching, and IAM users with inline
//! policies.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         LocalCloud                           │
//! │                                                              │
//! │  control plane   impl Provider: create / update / delete     │
//! │  data plane      put / get / delete / list objects,          │
//! │                  create_invalidation                         │
//! │  edge            request(domain, scheme, path)               │
//! └──────────────────────────────────────────────────────────────┘
//!          │                    │                     │
//!          ▼                    ▼                     ▼
//!     CloudState ◄──────── access::combine ◄───── EdgeCache
//!     (snapshot to JSON)   (IAM + bucket policy)  (tokio clock TTLs)
//! ```
//!
//! Every data-plane and edge call is authorized with the same policy
//! evaluation, so a misconfigured stack fails here the way it would fail in
//! a real account.

mod access;
mod cloud;
mod control;
mod data;
mod edge;
mod error;
mod naming;
mod state;

pub use access::{AccessRequest, Caller, Decision, PolicyDocument, Statement, combine, wildcard_match};
pub use cloud::LocalCloud;
pub use data::ObjectInfo;
pub use edge::{CacheStatus, DEFAULT_ERROR_CACHING_MIN_TTL, EdgeResponse, Scheme};
pub use error::CloudError;
pub use naming::{
  bucket_arn, bucket_domain_name, bucket_regional_domain_name, distribution_arn,
  distribution_domain_name, is_valid_bucket_name, is_valid_object_key, object_arn, user_arn,
};
pub use state::{
  BucketRecord, CachePolicyRecord, CloudState, DistributionRecord, ErrorResponseRecord,
  InlinePolicyRecord, InvalidationRecord, OriginAccessControlRecord, OriginRecord,
  PublicAccessBlock, StoredObject, UserRecord, ViewerProtocolPolicy,
};
