//! Policy documents and their evaluation.
//!
//! Evaluation follows the usual order: an explicit deny wins, otherwise some
//! statement must allow, otherwise the request is implicitly denied.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tk_farm_stack::is_public_principal;

/// Who is making a data-plane call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
  /// An IAM user of the account, by user name.
  User(String),
  /// A service principal acting for a specific resource.
  Service { service: String, source_arn: String },
  /// An unauthenticated request.
  Anonymous,
}

impl Caller {
  pub fn user(name: impl Into<String>) -> Self {
    Caller::User(name.into())
  }

  fn source_arn(&self) -> Option<&str> {
    match self {
      Caller::Service { source_arn, .. } => Some(source_arn),
      _ => None,
    }
  }
}

impl fmt::Display for Caller {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Caller::User(name) => write!(f, "user/{}", name),
      Caller::Service { service, .. } => f.write_str(service),
      Caller::Anonymous => f.write_str("anonymous"),
    }
  }
}

/// A string or a list of strings, as policy grammar allows either.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
  One(String),
  Many(Vec<String>),
}

impl Default for OneOrMany {
  fn default() -> Self {
    OneOrMany::Many(Vec::new())
  }
}

impl OneOrMany {
  pub fn values(&self) -> &[String] {
    match self {
      OneOrMany::One(value) => std::slice::from_ref(value),
      OneOrMany::Many(values) => values,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
  Allow,
  Deny,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
  pub effect: Effect,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub principal: Option<Value>,
  #[serde(default)]
  pub action: OneOrMany,
  #[serde(default)]
  pub resource: OneOrMany,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub condition: BTreeMap<String, BTreeMap<String, OneOrMany>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub version: Option<String>,
  pub statement: Vec<Statement>,
}

/// One authorization question.
#[derive(Debug, Clone)]
pub struct AccessRequest<'a> {
  pub caller: &'a Caller,
  pub action: &'a str,
  pub resource: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
  Allow,
  ExplicitDeny,
  ImplicitDeny,
}

impl PolicyDocument {
  pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
    serde_json::from_value(value.clone())
  }

  /// True if any allow statement names an anonymous principal.
  pub fn grants_public_access(&self) -> bool {
    self
      .statement
      .iter()
      .any(|s| s.effect == Effect::Allow && s.principal.as_ref().is_some_and(is_public_principal))
  }

  /// Evaluate as a resource policy: principals must match the caller.
  pub fn evaluate_resource(&self, request: &AccessRequest<'_>, account_id: &str) -> Decision {
    self.evaluate(request, |statement| {
      statement
        .principal
        .as_ref()
        .is_some_and(|p| principal_matches(p, request.caller, account_id))
    })
  }

  /// Evaluate as an identity policy attached to the caller.
  pub fn evaluate_identity(&self, request: &AccessRequest<'_>) -> Decision {
    self.evaluate(request, |_| true)
  }

  fn evaluate(
    &self,
    request: &AccessRequest<'_>,
    principal_matches: impl Fn(&Statement) -> bool,
  ) -> Decision {
    let mut decision = Decision::ImplicitDeny;
    for statement in &self.statement {
      let applies = principal_matches(statement)
        && statement
          .action
          .values()
          .iter()
          .any(|a| wildcard_match(&a.to_ascii_lowercase(), &request.action.to_ascii_lowercase()))
        && statement
          .resource
          .values()
          .iter()
          .any(|r| wildcard_match(r, request.resource))
        && conditions_hold(&statement.condition, request.caller);

      if !applies {
        continue;
      }
      match statement.effect {
        Effect::Deny => return Decision::ExplicitDeny,
        Effect::Allow => decision = Decision::Allow,
      }
    }
    decision
  }
}

/// Combine the decisions of every policy that applies to one request.
pub fn combine(decisions: impl IntoIterator<Item = Decision>) -> Decision {
  let mut combined = Decision::ImplicitDeny;
  for decision in decisions {
    match decision {
      Decision::ExplicitDeny => return Decision::ExplicitDeny,
      Decision::Allow => combined = Decision::Allow,
      Decision::ImplicitDeny => {}
    }
  }
  combined
}

fn principal_matches(principal: &Value, caller: &Caller, account_id: &str) -> bool {
  if principal == "*" {
    return true;
  }
  let Value::Object(map) = principal else {
    return false;
  };

  match caller {
    Caller::Service { service, .. } => map
      .get("Service")
      .is_some_and(|v| principal_values(v).iter().any(|p| p == service)),
    Caller::User(name) => map.get("AWS").is_some_and(|v| {
      let user_arn = format!("arn:aws:iam::{}:user/{}", account_id, name);
      let root_arn = format!("arn:aws:iam::{}:root", account_id);
      principal_values(v)
        .iter()
        .any(|p| p == "*" || *p == user_arn || *p == root_arn || p == account_id)
    }),
    Caller::Anonymous => map
      .get("AWS")
      .is_some_and(|v| principal_values(v).iter().any(|p| p == "*")),
  }
}

fn principal_values(value: &Value) -> Vec<String> {
  match value {
    Value::String(s) => vec![s.clone()],
    Value::Array(items) => items
      .iter()
      .filter_map(|v| v.as_str().map(str::to_string))
      .collect(),
    _ => Vec::new(),
  }
}

/// Every condition block must hold. Only `AWS:SourceArn` is known; a
/// condition on any other key never holds.
fn conditions_hold(conditions: &BTreeMap<String, BTreeMap<String, OneOrMany>>, caller: &Caller) -> bool {
  conditions.iter().all(|(operator, entries)| {
    entries.iter().all(|(key, expected)| {
      let actual = if key.eq_ignore_ascii_case("aws:SourceArn") {
        caller.source_arn()
      } else {
        None
      };
      let Some(actual) = actual else {
        return false;
      };
      let expected = expected.values();
      match operator.as_str() {
        "StringEquals" | "ArnEquals" => expected.iter().any(|e| e == actual),
        "StringLike" | "ArnLike" => expected.iter().any(|e| wildcard_match(e, actual)),
        "StringNotEquals" => expected.iter().all(|e| e != actual),
        _ => false,
      }
    })
  })
}

/// Glob match where `*` spans any run of characters and `?` exactly one.
pub fn wildcard_match(pattern: &str, value: &str) -> bool {
  let pattern: Vec<char> = pattern.chars().collect();
  let value: Vec<char> = value.chars().collect();

  let (mut p, mut v) = (0, 0);
  let mut backtrack: Option<(usize, usize)> = None;

  while v < value.len() {
    if p < pattern.len() && (pattern[p] == '?' || pattern[p] == value[v]) {
      p += 1;
      v += 1;
    } else if p < pattern.len() && pattern[p] == '*' {
      backtrack = Some((p, v));
      p += 1;
    } else if let Some((star, matched)) = backtrack {
      p = star + 1;
      v = matched + 1;
      backtrack = Some((star, matched + 1));
    } else {
      return false;
    }
  }

  pattern[p..].iter().all(|c| *c == '*')
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  const ACCOUNT: &str = "123456789012";
  const DIST_ARN: &str = "arn:aws:cloudfront::123456789012:distribution/E2QWRUHAPOMQZL";

  fn bucket_policy(source_arn: &str) -> PolicyDocument {
    PolicyDocument::from_value(&json!({
      "Version": "2012-10-17",
      "Statement": [{
        "Effect": "Allow",
        "Principal": { "Service": "cloudfront.amazonaws.com" },
        "Action": ["s3:GetObject"],
        "Resource": ["arn:aws:s3:::site/*"],
        "Condition": { "StringEquals": { "AWS:SourceArn": source_arn } }
      }]
    }))
    .unwrap()
  }

  fn cdn(source_arn: &str) -> Caller {
    Caller::Service {
      service: "cloudfront.amazonaws.com".to_string(),
      source_arn: source_arn.to_string(),
    }
  }

  fn get(caller: &Caller) -> AccessRequest<'_> {
    AccessRequest {
      caller,
      action: "s3:GetObject",
      resource: "arn:aws:s3:::site/index.html",
    }
  }

  #[test]
  fn test_bound_distribution_may_read() {
    let policy = bucket_policy(DIST_ARN);
    assert_eq!(
      policy.evaluate_resource(&get(&cdn(DIST_ARN)), ACCOUNT),
      Decision::Allow
    );
  }

  #[test]
  fn test_other_distribution_is_denied() {
    let policy = bucket_policy(DIST_ARN);
    let other = cdn("arn:aws:cloudfront::123456789012:distribution/EOTHER0000000");
    assert_eq!(
      policy.evaluate_resource(&get(&other), ACCOUNT),
      Decision::ImplicitDeny
    );
    assert_eq!(
      policy.evaluate_resource(&get(&Caller::Anonymous), ACCOUNT),
      Decision::ImplicitDeny
    );
  }

  #[test]
  fn test_like_operator_accepts_wildcards() {
    let mut policy = bucket_policy(DIST_ARN);
    policy.statement[0].condition = [(
      "ArnLike".to_string(),
      [(
        "AWS:SourceArn".to_string(),
        OneOrMany::One("arn:aws:cloudfront::123456789012:distribution/*".to_string()),
      )]
      .into_iter()
      .collect(),
    )]
    .into_iter()
    .collect();

    let other = cdn("arn:aws:cloudfront::123456789012:distribution/EOTHER0000000");
    assert_eq!(policy.evaluate_resource(&get(&other), ACCOUNT), Decision::Allow);
  }

  #[test]
  fn test_explicit_deny_wins() {
    let policy = PolicyDocument::from_value(&json!({
      "Statement": [
        { "Effect": "Allow", "Action": "s3:*", "Resource": "*" },
        { "Effect": "Deny", "Action": "s3:DeleteObject", "Resource": "arn:aws:s3:::site/*" }
      ]
    }))
    .unwrap();
    let caller = Caller::user("deploy");

    let delete = AccessRequest {
      caller: &caller,
      action: "s3:DeleteObject",
      resource: "arn:aws:s3:::site/a.js",
    };
    assert_eq!(policy.evaluate_identity(&delete), Decision::ExplicitDeny);
    assert_eq!(policy.evaluate_identity(&get(&caller)), Decision::Allow);
  }

  #[test]
  fn test_public_principals_are_detected() {
    let public = PolicyDocument::from_value(&json!({
      "Statement": [{ "Effect": "Allow", "Principal": "*", "Action": "s3:GetObject", "Resource": "*" }]
    }))
    .unwrap();
    assert!(public.grants_public_access());
    assert!(!bucket_policy(DIST_ARN).grants_public_access());
  }

  #[test]
  fn test_combine() {
    assert_eq!(
      combine([Decision::ImplicitDeny, Decision::Allow]),
      Decision::Allow
    );
    assert_eq!(
      combine([Decision::Allow, Decision::ExplicitDeny]),
      Decision::ExplicitDeny
    );
    assert_eq!(combine([]), Decision::ImplicitDeny);
  }

  #[test]
  fn test_wildcard_match() {
    assert!(wildcard_match("arn:aws:s3:::site/*", "arn:aws:s3:::site/a/b.js"));
    assert!(!wildcard_match("arn:aws:s3:::site/*", "arn:aws:s3:::site"));
    assert!(wildcard_match("s3:Put*", "s3:PutObjectAcl"));
    assert!(wildcard_match("a?c", "abc"));
    assert!(wildcard_match("*", ""));
    assert!(!wildcard_match("abc", "abcd"));
  }
}
