use serde::{Deserialize, Serialize};

use crate::enums::RemovalPolicy;
use crate::error::ConfigError;

/// Configuration for the frontend stack.
///
/// Caching and the single-page fallback are not configurable: the edge
/// never keeps content and a missing path always serves the root document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StackConfig {
  /// Application prefix every resource name starts with.
  pub prefix: String,
  /// 12-digit account the stack is deployed into.
  pub account_id: String,
  pub region: String,
  pub removal_policy: RemovalPolicy,
  /// Empty the bucket before deleting it on teardown.
  pub auto_delete_objects: bool,
  /// Object served for `/` and for paths the origin does not have.
  pub default_root_object: String,
}

impl Default for StackConfig {
  fn default() -> Self {
    Self {
      prefix: "tk-farm".to_string(),
      account_id: "123456789012".to_string(),
      region: "ap-northeast-1".to_string(),
      removal_policy: RemovalPolicy::Destroy,
      auto_delete_objects: true,
      default_root_object: "index.html".to_string(),
    }
  }
}

impl StackConfig {
  /// Parse and validate a config from JSON. Missing fields take defaults.
  pub fn from_json(content: &str) -> Result<Self, ConfigError> {
    let config: StackConfig = serde_json::from_str(content)?;
    config.validate()?;
    Ok(config)
  }

  /// Check that the config can produce a well-formed stack.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.prefix.is_empty()
      || !self
        .prefix
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
      return Err(ConfigError::InvalidField {
        field: "prefix",
        message: format!(
          "'{}' must be non-empty lowercase letters, digits or '-'",
          self.prefix
        ),
      });
    }

    if self.account_id.len() != 12 || !self.account_id.chars().all(|c| c.is_ascii_digit()) {
      return Err(ConfigError::InvalidField {
        field: "account_id",
        message: format!("'{}' is not a 12-digit account id", self.account_id),
      });
    }

    if self.region.is_empty() {
      return Err(ConfigError::InvalidField {
        field: "region",
        message: "region must not be empty".to_string(),
      });
    }

    let bucket = self.bucket_name();
    if !(3..=63).contains(&bucket.len()) {
      return Err(ConfigError::InvalidField {
        field: "prefix",
        message: format!("derived bucket name '{}' must be 3-63 characters", bucket),
      });
    }

    if self.auto_delete_objects && self.removal_policy == RemovalPolicy::Retain {
      return Err(ConfigError::AutoDeleteWithRetain);
    }

    if self.default_root_object.starts_with('/') || self.default_root_object.is_empty() {
      return Err(ConfigError::InvalidField {
        field: "default_root_object",
        message: "must be an object key without a leading '/'".to_string(),
      });
    }

    Ok(())
  }

  pub fn bucket_name(&self) -> String {
    format!("{}-frontend-{}", self.prefix, self.account_id)
  }

  pub fn origin_access_control_name(&self) -> String {
    format!("{}-frontend-oac", self.prefix)
  }

  pub fn cache_policy_name(&self) -> String {
    format!("{}-no-cache", self.prefix)
  }

  pub fn deploy_user_name(&self) -> String {
    format!("{}-deploy-user", self.prefix)
  }

  pub fn deploy_policy_name(&self) -> String {
    format!("{}-deploy-policy", self.prefix)
  }

  /// Viewer path of the root document, e.g. `/index.html`.
  pub fn root_document_path(&self) -> String {
    format!("/{}", self.default_root_object)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_match_hosted_stack() {
    let config = StackConfig::default();
    config.validate().unwrap();

    assert_eq!(config.bucket_name(), "tk-farm-frontend-123456789012");
    assert_eq!(config.origin_access_control_name(), "tk-farm-frontend-oac");
    assert_eq!(config.cache_policy_name(), "tk-farm-no-cache");
    assert_eq!(config.deploy_user_name(), "tk-farm-deploy-user");
    assert_eq!(config.deploy_policy_name(), "tk-farm-deploy-policy");
    assert_eq!(config.root_document_path(), "/index.html");
  }

  #[test]
  fn test_names_are_a_function_of_prefix_and_account() {
    let a = StackConfig {
      account_id: "111111111111".to_string(),
      ..Default::default()
    };
    let b = a.clone();
    assert_eq!(a.bucket_name(), b.bucket_name());
    assert_eq!(a.bucket_name(), "tk-farm-frontend-111111111111");
  }

  #[test]
  fn test_from_json_fills_defaults() {
    let config = StackConfig::from_json(r#"{ "account_id": "210987654321" }"#).unwrap();
    assert_eq!(config.account_id, "210987654321");
    assert_eq!(config.prefix, "tk-farm");
    assert_eq!(config.removal_policy, RemovalPolicy::Destroy);
    assert!(config.auto_delete_objects);
  }

  #[test]
  fn test_retain_with_auto_delete_is_rejected() {
    let result = StackConfig::from_json(r#"{ "removal_policy": "retain" }"#);
    assert!(matches!(result, Err(ConfigError::AutoDeleteWithRetain)));

    let config = StackConfig::from_json(
      r#"{ "removal_policy": "retain", "auto_delete_objects": false }"#,
    )
    .unwrap();
    assert_eq!(config.removal_policy, RemovalPolicy::Retain);
  }

  #[test]
  fn test_rejects_bad_account() {
    let result = StackConfig::from_json(r#"{ "account_id": "abc" }"#);
    assert!(matches!(
      result,
      Err(ConfigError::InvalidField {
        field: "account_id",
        ..
      })
    ));
  }

  #[test]
  fn test_caching_and_fallback_cannot_be_configured() {
    let result = StackConfig::from_json(
      r#"{ "cache": { "min_ttl": 60, "default_ttl": 300, "max_ttl": 3600 } }"#,
    );
    assert!(matches!(result, Err(ConfigError::Parse(_))));

    let result = StackConfig::from_json(r#"{ "error_responses": [] }"#);
    assert!(matches!(result, Err(ConfigError::Parse(_))));
  }

  #[test]
  fn test_rejects_absolute_root_object() {
    let result = StackConfig::from_json(r#"{ "default_root_object": "/index.html" }"#);
    assert!(matches!(
      result,
      Err(ConfigError::InvalidField {
        field: "default_root_object",
        ..
      })
    ));
  }

  #[test]
  fn test_invalid_json() {
    let result = StackConfig::from_json("{ not json");
    assert!(matches!(result, Err(ConfigError::Parse(_))));
  }
}
