//! IAM-style policy documents used by bucket policies and user policies.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::expr::Expr;

pub const POLICY_VERSION: &str = "2012-10-17";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Effect {
  Allow,
  Deny,
}

/// The principal a resource policy statement applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Principal {
  /// A service principal such as `cloudfront.amazonaws.com`.
  Service(String),
  /// An account, user or role ARN.
  #[serde(rename = "AWS")]
  Aws(Expr),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyStatement {
  pub effect: Effect,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub principal: Option<Principal>,
  pub action: Vec<String>,
  pub resource: Vec<Expr>,
  /// operator -> condition key -> value
  #[serde(skip_serializing_if = "BTreeMap::is_empty")]
  pub condition: BTreeMap<String, BTreeMap<String, Expr>>,
}

impl PolicyStatement {
  /// An allow statement over the given actions and resources.
  pub fn allow<A, R>(actions: A, resources: R) -> Self
  where
    A: IntoIterator,
    A::Item: Into<String>,
    R: IntoIterator<Item = Expr>,
  {
    Self {
      effect: Effect::Allow,
      principal: None,
      action: actions.into_iter().map(Into::into).collect(),
      resource: resources.into_iter().collect(),
      condition: BTreeMap::new(),
    }
  }

  pub fn with_principal(mut self, principal: Principal) -> Self {
    self.principal = Some(principal);
    self
  }

  pub fn with_condition(
    mut self,
    operator: impl Into<String>,
    key: impl Into<String>,
    value: Expr,
  ) -> Self {
    self
      .condition
      .entry(operator.into())
      .or_default()
      .insert(key.into(), value);
    self
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
  pub version: String,
  pub statement: Vec<PolicyStatement>,
}

impl PolicyDocument {
  pub fn new(statements: Vec<PolicyStatement>) -> Self {
    Self {
      version: POLICY_VERSION.to_string(),
      statement: statements,
    }
  }
}

/// Every `(kind, value)` pair a JSON principal names, with list values
/// flattened. A bare `"*"` is read as `("AWS", "*")`.
pub fn principal_entries(principal: &Value) -> Vec<(&str, &Value)> {
  match principal {
    Value::String(_) => vec![("AWS", principal)],
    Value::Object(map) => map
      .iter()
      .flat_map(|(kind, value)| match value {
        Value::Array(items) => items.iter().map(|v| (kind.as_str(), v)).collect::<Vec<_>>(),
        other => vec![(kind.as_str(), other)],
      })
      .collect(),
    _ => Vec::new(),
  }
}

/// True if the principal admits everyone, in any of its spellings.
pub fn is_public_principal(principal: &Value) -> bool {
  principal_entries(principal)
    .into_iter()
    .any(|(kind, value)| kind == "AWS" && value.as_str() == Some("*"))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::expr::Attribute;
  use serde_json::json;

  #[test]
  fn test_statement_shape() {
    let statement = PolicyStatement::allow(
      ["s3:GetObject"],
      [Expr::join([
        Expr::GetAtt("Bucket".to_string(), Attribute::Arn),
        "/*".into(),
      ])],
    )
    .with_principal(Principal::Service("cloudfront.amazonaws.com".to_string()))
    .with_condition(
      "StringEquals",
      "AWS:SourceArn",
      Expr::Ref("Dist".to_string()),
    );

    let doc = serde_json::to_value(PolicyDocument::new(vec![statement])).unwrap();
    assert_eq!(
      doc,
      json!({
        "Version": "2012-10-17",
        "Statement": [{
          "Effect": "Allow",
          "Principal": { "Service": "cloudfront.amazonaws.com" },
          "Action": ["s3:GetObject"],
          "Resource": [{ "Fn::Join": ["", [{ "Fn::GetAtt": ["Bucket", "Arn"] }, "/*"]] }],
          "Condition": { "StringEquals": { "AWS:SourceArn": { "Ref": "Dist" } } }
        }]
      })
    );
  }

  #[test]
  fn test_public_principal_spellings() {
    assert!(is_public_principal(&json!("*")));
    assert!(is_public_principal(&json!({ "AWS": "*" })));
    assert!(is_public_principal(&json!({ "AWS": ["arn:aws:iam::999999999999:root", "*"] })));
    assert!(!is_public_principal(&json!({ "Service": "cloudfront.amazonaws.com" })));
    assert!(!is_public_principal(&json!({ "AWS": ["arn:aws:iam::999999999999:root"] })));
  }

  #[test]
  fn test_principal_entries_flatten_lists() {
    let principal = json!({ "AWS": ["a", "b"], "Service": "cloudfront.amazonaws.com" });
    let entries: Vec<(&str, &str)> = principal_entries(&principal)
      .into_iter()
      .map(|(kind, value)| (kind, value.as_str().unwrap()))
      .collect();
    assert_eq!(
      entries,
      vec![("AWS", "a"), ("AWS", "b"), ("Service", "cloudfront.amazonaws.com")]
    );
  }

  #[test]
  fn test_statement_without_principal_or_condition() {
    let statement = PolicyStatement::allow(["s3:ListBucket"], [Expr::from("arn:aws:s3:::b")]);
    let value = serde_json::to_value(&statement).unwrap();
    assert!(value.get("Principal").is_none());
    assert!(value.get("Condition").is_none());
  }
}
