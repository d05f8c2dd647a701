//! Review-time checks on a synthesized template.
//!
//! These checks look at declared properties only. They catch the mistakes
//! that would otherwise surface as a public bucket, a bucket readable by any
//! distribution or foreign account, a deploy user with account-wide
//! permissions, or an edge that caches or loses the single-page fallback.

use std::collections::BTreeSet;
use std::fmt;

use serde_json::Value;

use crate::expr::Intrinsic;
use crate::policy::{is_public_principal, principal_entries};
use crate::frontend::{
  CLOUDFRONT_SERVICE, DEPLOY_BUCKET_ACTIONS, DEPLOY_DISTRIBUTION_ACTIONS, SOURCE_ARN_KEY,
};
use crate::resource::ResourceKind;
use crate::template::Template;

const PUBLIC_ACCESS_FLAGS: [&str; 4] = [
  "BlockPublicAcls",
  "BlockPublicPolicy",
  "IgnorePublicAcls",
  "RestrictPublicBuckets",
];

/// A broken invariant, named by the resource it was found on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
  /// A public-access-block flag is missing or false.
  PublicAccessNotBlocked { bucket: String, flag: &'static str },
  /// A statement grants access to everyone.
  PublicPrincipal { policy: String },
  /// A principal other than the CDN service may read objects.
  ForeignReader { policy: String, principal: String },
  /// A CDN read grant is not pinned to a distribution in this stack.
  UnscopedOriginRead { policy: String, reason: String },
  /// The deploy policy grants something outside the publishing closure.
  DeployPolicyTooBroad { policy: String, detail: String },
  /// The deploy policy lacks an action publishing needs.
  DeployPolicyIncomplete { policy: String, action: String },
  /// The distribution serves plain HTTP.
  InsecureViewerProtocol { distribution: String, policy: String },
  /// The identity-based origin access field survived synthesis.
  LegacyOriginIdentity { distribution: String },
  /// An S3 origin has no origin access control attached.
  MissingOriginAccessControl { distribution: String },
  /// An origin access control is attached to more than one distribution.
  SharedOriginAccessControl { access_control: String },
  /// A cache policy lets the edge keep content.
  CachingEnabled {
    cache_policy: String,
    ttl: &'static str,
    seconds: u64,
  },
  /// Unknown paths do not fall back to the root document.
  MissingRootFallback { distribution: String },
}

impl fmt::Display for Violation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Violation::PublicAccessNotBlocked { bucket, flag } => {
        write!(f, "bucket '{}' does not set {} = true", bucket, flag)
      }
      Violation::PublicPrincipal { policy } => {
        write!(f, "policy '{}' grants access to a public principal", policy)
      }
      Violation::ForeignReader { policy, principal } => write!(
        f,
        "policy '{}' lets {} read objects; only the CDN may",
        policy, principal
      ),
      Violation::UnscopedOriginRead { policy, reason } => {
        write!(f, "policy '{}' has an unscoped CDN read: {}", policy, reason)
      }
      Violation::DeployPolicyTooBroad { policy, detail } => {
        write!(f, "deploy policy '{}' is too broad: {}", policy, detail)
      }
      Violation::DeployPolicyIncomplete { policy, action } => {
        write!(f, "deploy policy '{}' is missing {}", policy, action)
      }
      Violation::InsecureViewerProtocol {
        distribution,
        policy,
      } => write!(
        f,
        "distribution '{}' uses viewer protocol policy '{}'",
        distribution, policy
      ),
      Violation::LegacyOriginIdentity { distribution } => write!(
        f,
        "distribution '{}' still declares an origin access identity",
        distribution
      ),
      Violation::MissingOriginAccessControl { distribution } => write!(
        f,
        "distribution '{}' has an S3 origin without an origin access control",
        distribution
      ),
      Violation::SharedOriginAccessControl { access_control } => write!(
        f,
        "origin access control '{}' is attached to more than one distribution",
        access_control
      ),
      Violation::CachingEnabled {
        cache_policy,
        ttl,
        seconds,
      } => write!(
        f,
        "cache policy '{}' sets {} = {}, expected 0",
        cache_policy, ttl, seconds
      ),
      Violation::MissingRootFallback { distribution } => write!(
        f,
        "distribution '{}' does not answer 404 with 200 and the root document",
        distribution
      ),
    }
  }
}

/// Check every invariant and return all violations found.
pub fn validate(template: &Template) -> Vec<Violation> {
  let mut violations = Vec::new();
  check_buckets(template, &mut violations);
  check_bucket_policies(template, &mut violations);
  check_cache_policies(template, &mut violations);
  check_distributions(template, &mut violations);
  check_deploy_policies(template, &mut violations);
  violations
}

fn check_buckets(template: &Template, violations: &mut Vec<Violation>) {
  for (id, bucket) in template.resources_of(ResourceKind::Bucket) {
    let block = &bucket.properties["PublicAccessBlockConfiguration"];
    for flag in PUBLIC_ACCESS_FLAGS {
      if block.get(flag).and_then(Value::as_bool) != Some(true) {
        violations.push(Violation::PublicAccessNotBlocked {
          bucket: id.clone(),
          flag,
        });
      }
    }
  }
}

fn check_bucket_policies(template: &Template, violations: &mut Vec<Violation>) {
  for (id, policy) in template.resources_of(ResourceKind::BucketPolicy) {
    let bucket = match Intrinsic::parse(&policy.properties["Bucket"]) {
      Some(Intrinsic::Ref(target)) => Some(target),
      _ => None,
    };

    for statement in statements(&policy.properties["PolicyDocument"]) {
      if statement["Effect"] != "Allow" {
        continue;
      }

      let principal = &statement["Principal"];
      if is_public_principal(principal) {
        violations.push(Violation::PublicPrincipal { policy: id.clone() });
        continue;
      }

      let mut is_cdn = false;
      let reads_objects = string_list(&statement["Action"])
        .iter()
        .any(|action| grants_object_read(action));
      for (kind, value) in principal_entries(principal) {
        if kind == "Service" && value.as_str() == Some(CLOUDFRONT_SERVICE) {
          is_cdn = true;
        } else if reads_objects {
          let name = value.as_str().map_or_else(|| value.to_string(), str::to_string);
          violations.push(Violation::ForeignReader {
            policy: id.clone(),
            principal: format!("{}:{}", kind, name),
          });
        }
      }
      if !is_cdn {
        continue;
      }

      let unscoped = |reason: &str| Violation::UnscopedOriginRead {
        policy: id.clone(),
        reason: reason.to_string(),
      };

      if string_list(&statement["Action"]) != ["s3:GetObject"] {
        violations.push(unscoped("CDN may only read objects"));
      }

      let resources = as_list(&statement["Resource"]);
      let scoped_to_bucket = bucket.is_some_and(|b| {
        !resources.is_empty()
          && resources
            .iter()
            .all(|r| bucket_arn_target(template, r) == Some((b, true)))
      });
      if !scoped_to_bucket {
        violations.push(unscoped("resource must be this bucket's objects"));
      }

      match statement["Condition"]["StringEquals"].get(SOURCE_ARN_KEY) {
        Some(arn) if distribution_arn_target(template, arn).is_some() => {}
        Some(_) => violations.push(unscoped(
          "source ARN is not bound to a distribution in this stack",
        )),
        None => violations.push(unscoped("missing StringEquals AWS:SourceArn condition")),
      }
    }
  }
}

fn check_cache_policies(template: &Template, violations: &mut Vec<Violation>) {
  for (id, policy) in template.resources_of(ResourceKind::CachePolicy) {
    let config = &policy.properties["CachePolicyConfig"];
    for ttl in ["MinTTL", "DefaultTTL", "MaxTTL"] {
      let seconds = config[ttl].as_u64().unwrap_or(0);
      if seconds != 0 {
        violations.push(Violation::CachingEnabled {
          cache_policy: id.clone(),
          ttl,
          seconds,
        });
      }
    }
  }
}

fn check_distributions(template: &Template, violations: &mut Vec<Violation>) {
  let mut seen_access_controls = BTreeSet::new();

  for (id, distribution) in template.resources_of(ResourceKind::Distribution) {
    let config = &distribution.properties["DistributionConfig"];

    let root_page = config["DefaultRootObject"]
      .as_str()
      .map(|root| format!("/{}", root));
    let falls_back = as_list(&config["CustomErrorResponses"]).iter().any(|r| {
      r["ErrorCode"].as_u64() == Some(404)
        && r["ResponseCode"].as_u64() == Some(200)
        && root_page.is_some()
        && r["ResponsePagePath"].as_str() == root_page.as_deref()
        && r["ErrorCachingMinTTL"].as_u64() == Some(0)
    });
    if !falls_back {
      violations.push(Violation::MissingRootFallback {
        distribution: id.clone(),
      });
    }

    let viewer = config["DefaultCacheBehavior"]["ViewerProtocolPolicy"]
      .as_str()
      .unwrap_or("allow-all");
    if viewer != "redirect-to-https" && viewer != "https-only" {
      violations.push(Violation::InsecureViewerProtocol {
        distribution: id.clone(),
        policy: viewer.to_string(),
      });
    }

    for origin in as_list(&config["Origins"]) {
      let Some(s3) = origin.get("S3OriginConfig") else {
        continue;
      };

      if s3
        .get("OriginAccessIdentity")
        .is_some_and(|v| v.as_str() != Some(""))
      {
        violations.push(Violation::LegacyOriginIdentity {
          distribution: id.clone(),
        });
      }

      match origin.get("OriginAccessControlId").map(Intrinsic::parse) {
        Some(Some(Intrinsic::GetAtt(target, _) | Intrinsic::Ref(target))) => {
          if !seen_access_controls.insert(target.to_string()) {
            violations.push(Violation::SharedOriginAccessControl {
              access_control: target.to_string(),
            });
          }
        }
        Some(_) => {}
        None => violations.push(Violation::MissingOriginAccessControl {
          distribution: id.clone(),
        }),
      }
    }
  }
}

fn check_deploy_policies(template: &Template, violations: &mut Vec<Violation>) {
  let bucket_actions: BTreeSet<&str> = DEPLOY_BUCKET_ACTIONS.into_iter().collect();
  let distribution_actions: BTreeSet<&str> = DEPLOY_DISTRIBUTION_ACTIONS.into_iter().collect();

  for (id, policy) in template.resources_of(ResourceKind::Policy) {
    let too_broad = |detail: String| Violation::DeployPolicyTooBroad {
      policy: id.clone(),
      detail,
    };
    let mut granted = BTreeSet::new();

    for statement in statements(&policy.properties["PolicyDocument"]) {
      if statement["Effect"] != "Allow" {
        continue;
      }

      let actions = string_list(&statement["Action"]);
      let resources = as_list(&statement["Resource"]);

      for action in &actions {
        if bucket_actions.contains(action.as_str()) {
          for resource in &resources {
            if bucket_arn_target(template, resource).is_none() {
              violations.push(too_broad(format!(
                "{} granted on a resource outside the bucket: {}",
                action, resource
              )));
            }
          }
        } else if distribution_actions.contains(action.as_str()) {
          for resource in &resources {
            if distribution_arn_target(template, resource).is_none() {
              violations.push(too_broad(format!(
                "{} granted on a resource other than the distribution: {}",
                action, resource
              )));
            }
          }
        } else {
          violations.push(too_broad(format!("action {} is not allowed", action)));
          continue;
        }
        granted.insert(action.clone());
      }
    }

    for action in bucket_actions.iter().chain(distribution_actions.iter()) {
      if !granted.contains(*action) {
        violations.push(Violation::DeployPolicyIncomplete {
          policy: id.clone(),
          action: action.to_string(),
        });
      }
    }
  }
}

fn statements(document: &Value) -> Vec<&Value> {
  as_list(&document["Statement"])
}

fn as_list(value: &Value) -> Vec<&Value> {
  match value {
    Value::Array(items) => items.iter().collect(),
    Value::Null => Vec::new(),
    other => vec![other],
  }
}

/// True if granting `action` lets the holder read objects. IAM action names
/// are case-insensitive and may end in a `*` wildcard.
fn grants_object_read(action: &str) -> bool {
  let action = action.to_ascii_lowercase();
  match action.strip_suffix('*') {
    Some(prefix) => "s3:getobject".starts_with(prefix),
    None => action == "s3:getobject",
  }
}

fn string_list(value: &Value) -> Vec<String> {
  as_list(value)
    .into_iter()
    .map(|v| match v.as_str() {
      Some(s) => s.to_string(),
      None => v.to_string(),
    })
    .collect()
}

/// `GetAtt(bucket, Arn)` → `(bucket, false)`, `Join[GetAtt(bucket, Arn), "/*"]` → `(bucket, true)`.
fn bucket_arn_target<'a>(template: &Template, value: &'a Value) -> Option<(&'a str, bool)> {
  let is_bucket_arn = |v: &'a Value| match Intrinsic::parse(v) {
    Some(Intrinsic::GetAtt(target, "Arn"))
      if template
        .resource(target)
        .is_some_and(|r| r.kind == ResourceKind::Bucket) =>
    {
      Some(target)
    }
    _ => None,
  };

  if let Some(target) = is_bucket_arn(value) {
    return Some((target, false));
  }

  match Intrinsic::parse(value) {
    Some(Intrinsic::Join("", [arn, Value::String(suffix)])) if suffix == "/*" => {
      is_bucket_arn(arn).map(|target| (target, true))
    }
    _ => None,
  }
}

/// `Join["arn:aws:cloudfront::<account>:distribution/", Ref(distribution)]` → distribution.
fn distribution_arn_target<'a>(template: &Template, value: &'a Value) -> Option<&'a str> {
  match Intrinsic::parse(value) {
    Some(Intrinsic::Join("", [Value::String(prefix), reference]))
      if prefix.starts_with("arn:aws:cloudfront::") && prefix.ends_with(":distribution/") =>
    {
      match Intrinsic::parse(reference) {
        Some(Intrinsic::Ref(target))
          if template
            .resource(target)
            .is_some_and(|r| r.kind == ResourceKind::Distribution) =>
        {
          Some(target)
        }
        _ => None,
      }
    }
    _ => None,
  }
}
