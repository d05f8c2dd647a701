//! Intrinsic resolution against provisioned resources.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tk_farm_stack::Intrinsic;

use crate::error::ApplyError;
use crate::state::DeployedResource;

/// Replace every intrinsic in `value` with the value it stands for.
///
/// `Ref` yields the physical id, `Fn::GetAtt` a provider-reported attribute,
/// and `Fn::Join` the concatenation of its resolved string parts.
pub fn resolve(
  from: &str,
  value: &Value,
  resources: &BTreeMap<String, DeployedResource>,
) -> Result<Value, ApplyError> {
  match Intrinsic::parse(value) {
    Some(Intrinsic::Ref(target)) => resources
      .get(target)
      .map(|r| Value::String(r.physical_id().to_string()))
      .ok_or_else(|| ApplyError::UnresolvedReference {
        from: from.to_string(),
        to: target.to_string(),
        attribute: None,
      }),
    Some(Intrinsic::GetAtt(target, attribute)) => resources
      .get(target)
      .and_then(|r| r.provisioned.attributes.get(attribute))
      .map(|v| Value::String(v.clone()))
      .ok_or_else(|| ApplyError::UnresolvedReference {
        from: from.to_string(),
        to: target.to_string(),
        attribute: Some(attribute.to_string()),
      }),
    Some(Intrinsic::Join(separator, parts)) => {
      let mut joined = Vec::with_capacity(parts.len());
      for part in parts {
        match resolve(from, part, resources)? {
          Value::String(s) => joined.push(s),
          _ => {
            return Err(ApplyError::InvalidJoin {
              from: from.to_string(),
            });
          }
        }
      }
      Ok(Value::String(joined.join(separator)))
    }
    None => match value {
      Value::Object(map) => {
        let mut resolved = Map::with_capacity(map.len());
        for (key, v) in map {
          resolved.insert(key.clone(), resolve(from, v, resources)?);
        }
        Ok(Value::Object(resolved))
      }
      Value::Array(items) => items
        .iter()
        .map(|v| resolve(from, v, resources))
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array),
      other => Ok(other.clone()),
    },
  }
}

/// Look up a dotted property path, e.g. `OriginAccessControlConfig.Name`.
pub fn property_at<'a>(properties: &'a Value, path: &str) -> Option<&'a Value> {
  path
    .split('.')
    .try_fold(properties, |current, segment| match current {
      Value::Object(map) => map.get(segment),
      Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
      _ => None,
    })
}
