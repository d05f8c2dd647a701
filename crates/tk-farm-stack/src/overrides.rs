//! Raw property overrides applied after a resource is synthesized.
//!
//! Paths are dot-separated property names; purely numeric segments index
//! into arrays, e.g. `DistributionConfig.Origins.0.OriginAccessControlId`.

use serde_json::{Map, Value};

/// A patch to a resource's synthesized properties.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyOverride {
  /// Set the value at `path`, creating intermediate objects as needed.
  Set { path: String, value: Value },
  /// Remove the value at `path`. Absent paths are left alone.
  Delete { path: String },
}

impl PropertyOverride {
  pub fn path(&self) -> &str {
    match self {
      PropertyOverride::Set { path, .. } | PropertyOverride::Delete { path } => path,
    }
  }

  /// Apply the override in place. Errors carry a human-readable reason.
  pub fn apply(&self, properties: &mut Value) -> Result<(), String> {
    let segments: Vec<&str> = self.path().split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
      return Err("empty path segment".to_string());
    }
    let (last, parents) = segments
      .split_last()
      .ok_or_else(|| "empty path".to_string())?;

    match self {
      PropertyOverride::Set { value, .. } => {
        let mut current = properties;
        for segment in parents {
          current = step_or_create(current, segment)?;
        }
        insert(current, last, value.clone())
      }
      PropertyOverride::Delete { .. } => {
        let mut current = properties;
        for segment in parents {
          match step(current, segment)? {
            Some(next) => current = next,
            None => return Ok(()),
          }
        }
        remove(current, last)
      }
    }
  }
}

fn step<'a>(value: &'a mut Value, segment: &str) -> Result<Option<&'a mut Value>, String> {
  match value {
    Value::Object(map) => Ok(map.get_mut(segment)),
    Value::Array(items) => {
      let index = parse_index(segment)?;
      Ok(items.get_mut(index))
    }
    other => Err(format!("cannot descend into {} at '{}'", kind(other), segment)),
  }
}

fn step_or_create<'a>(value: &'a mut Value, segment: &str) -> Result<&'a mut Value, String> {
  match value {
    Value::Object(map) => Ok(
      map
        .entry(segment.to_string())
        .or_insert_with(|| Value::Object(Map::new())),
    ),
    Value::Array(items) => {
      let index = parse_index(segment)?;
      let len = items.len();
      items
        .get_mut(index)
        .ok_or_else(|| format!("index {} out of bounds (len {})", index, len))
    }
    other => Err(format!("cannot descend into {} at '{}'", kind(other), segment)),
  }
}

fn insert(target: &mut Value, segment: &str, value: Value) -> Result<(), String> {
  match target {
    Value::Object(map) => {
      map.insert(segment.to_string(), value);
      Ok(())
    }
    Value::Array(items) => {
      let index = parse_index(segment)?;
      let len = items.len();
      let slot = items
        .get_mut(index)
        .ok_or_else(|| format!("index {} out of bounds (len {})", index, len))?;
      *slot = value;
      Ok(())
    }
    other => Err(format!("cannot set a field on {}", kind(other))),
  }
}

fn remove(target: &mut Value, segment: &str) -> Result<(), String> {
  match target {
    Value::Object(map) => {
      map.remove(segment);
      Ok(())
    }
    Value::Array(items) => {
      let index = parse_index(segment)?;
      if index < items.len() {
        items.remove(index);
      }
      Ok(())
    }
    other => Err(format!("cannot delete a field of {}", kind(other))),
  }
}

fn parse_index(segment: &str) -> Result<usize, String> {
  segment
    .parse()
    .map_err(|_| format!("'{}' is not an array index", segment))
}

fn kind(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "a boolean",
    Value::Number(_) => "a number",
    Value::String(_) => "a string",
    Value::Array(_) => "an array",
    Value::Object(_) => "an object",
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn distribution_properties() -> Value {
    json!({
      "DistributionConfig": {
        "Origins": [{
          "Id": "origin1",
          "S3OriginConfig": { "OriginAccessIdentity": "legacy" }
        }]
      }
    })
  }

  #[test]
  fn test_set_then_delete_replaces_legacy_identity() {
    let mut props = distribution_properties();

    PropertyOverride::Set {
      path: "DistributionConfig.Origins.0.OriginAccessControlId".to_string(),
      value: json!({ "Fn::GetAtt": ["OAC", "Id"] }),
    }
    .apply(&mut props)
    .unwrap();
    PropertyOverride::Delete {
      path: "DistributionConfig.Origins.0.S3OriginConfig.OriginAccessIdentity".to_string(),
    }
    .apply(&mut props)
    .unwrap();

    let origin = &props["DistributionConfig"]["Origins"][0];
    assert_eq!(
      origin["OriginAccessControlId"],
      json!({ "Fn::GetAtt": ["OAC", "Id"] })
    );
    assert_eq!(origin["S3OriginConfig"], json!({}));
  }

  #[test]
  fn test_set_creates_intermediate_objects() {
    let mut props = json!({});
    PropertyOverride::Set {
      path: "A.B.C".to_string(),
      value: json!(1),
    }
    .apply(&mut props)
    .unwrap();
    assert_eq!(props, json!({ "A": { "B": { "C": 1 } } }));
  }

  #[test]
  fn test_delete_of_absent_path_is_a_no_op() {
    let mut props = distribution_properties();
    let before = props.clone();
    PropertyOverride::Delete {
      path: "DistributionConfig.Logging.Bucket".to_string(),
    }
    .apply(&mut props)
    .unwrap();
    assert_eq!(props, before);
  }

  #[test]
  fn test_set_out_of_bounds_index_fails() {
    let mut props = distribution_properties();
    let result = PropertyOverride::Set {
      path: "DistributionConfig.Origins.3.Id".to_string(),
      value: json!("x"),
    }
    .apply(&mut props);
    assert!(result.unwrap_err().contains("out of bounds"));
  }

  #[test]
  fn test_cannot_descend_into_scalar() {
    let mut props = distribution_properties();
    let result = PropertyOverride::Set {
      path: "DistributionConfig.Origins.0.Id.Nested".to_string(),
      value: json!("x"),
    }
    .apply(&mut props);
    assert!(result.is_err());
  }
}
