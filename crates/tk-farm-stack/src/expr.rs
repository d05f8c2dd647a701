//! Intrinsic expressions.
//!
//! Resource properties never embed another resource's identifier as a plain
//! string. Instead they hold an [`Expr`] that names the target by logical id
//! and, for attributes, by a typed [`Attribute`]. Expressions serialize to the
//! familiar template intrinsics:
//!
//! ```json
//! { "Ref": "FrontendBucket" }
//! { "Fn::GetAtt": ["FrontendBucket", "Arn"] }
//! { "Fn::Join": ["", [{ "Fn::GetAtt": ["FrontendBucket", "Arn"] }, "/*"]] }
//! ```
//!
//! The same shapes are parsed back by [`Intrinsic::parse`] when the graph is
//! built and when the engine resolves a template against provisioned state.

use std::fmt;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::Value;

/// Attributes a resource can expose through `Fn::GetAtt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Attribute {
  Arn,
  DomainName,
  RegionalDomainName,
  Id,
}

impl Attribute {
  pub fn as_str(&self) -> &'static str {
    match self {
      Attribute::Arn => "Arn",
      Attribute::DomainName => "DomainName",
      Attribute::RegionalDomainName => "RegionalDomainName",
      Attribute::Id => "Id",
    }
  }

  pub fn parse(name: &str) -> Option<Self> {
    match name {
      "Arn" => Some(Attribute::Arn),
      "DomainName" => Some(Attribute::DomainName),
      "RegionalDomainName" => Some(Attribute::RegionalDomainName),
      "Id" => Some(Attribute::Id),
      _ => None,
    }
  }
}

impl fmt::Display for Attribute {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A string-valued expression inside resource properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
  /// A literal string.
  Str(String),
  /// The primary identifier of another resource.
  Ref(String),
  /// A named attribute of another resource.
  GetAtt(String, Attribute),
  /// Concatenation of the parts with no separator.
  Join(Vec<Expr>),
}

impl Expr {
  pub fn join(parts: impl IntoIterator<Item = Expr>) -> Self {
    Expr::Join(parts.into_iter().collect())
  }

  /// Logical ids this expression depends on.
  pub fn targets(&self) -> Vec<&str> {
    match self {
      Expr::Str(_) => Vec::new(),
      Expr::Ref(id) | Expr::GetAtt(id, _) => vec![id.as_str()],
      Expr::Join(parts) => parts.iter().flat_map(|p| p.targets()).collect(),
    }
  }
}

impl From<&str> for Expr {
  fn from(s: &str) -> Self {
    Expr::Str(s.to_string())
  }
}

impl From<String> for Expr {
  fn from(s: String) -> Self {
    Expr::Str(s)
  }
}

impl Serialize for Expr {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    match self {
      Expr::Str(s) => serializer.serialize_str(s),
      Expr::Ref(id) => {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("Ref", id)?;
        map.end()
      }
      Expr::GetAtt(id, attribute) => {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("Fn::GetAtt", &[id.as_str(), attribute.as_str()])?;
        map.end()
      }
      Expr::Join(parts) => {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("Fn::Join", &JoinArgs(parts))?;
        map.end()
      }
    }
  }
}

struct JoinArgs<'a>(&'a [Expr]);

impl Serialize for JoinArgs<'_> {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut seq = serializer.serialize_seq(Some(2))?;
    seq.serialize_element("")?;
    seq.serialize_element(self.0)?;
    seq.end()
  }
}

/// A parsed intrinsic found in synthesized JSON.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Intrinsic<'a> {
  Ref(&'a str),
  GetAtt(&'a str, &'a str),
  Join(&'a str, &'a [Value]),
}

impl<'a> Intrinsic<'a> {
  /// Recognise a single-key intrinsic object. Anything else is plain data.
  pub fn parse(value: &'a Value) -> Option<Self> {
    let map = value.as_object()?;
    if map.len() != 1 {
      return None;
    }
    let (key, arg) = map.iter().next()?;
    match key.as_str() {
      "Ref" => arg.as_str().map(Intrinsic::Ref),
      "Fn::GetAtt" => {
        let pair = arg.as_array()?;
        match pair.as_slice() {
          [Value::String(id), Value::String(attr)] => Some(Intrinsic::GetAtt(id, attr)),
          _ => None,
        }
      }
      "Fn::Join" => {
        let args = arg.as_array()?;
        match args.as_slice() {
          [Value::String(sep), Value::Array(parts)] => Some(Intrinsic::Join(sep, parts)),
          _ => None,
        }
      }
      _ => None,
    }
  }
}

/// A reference from one resource to another found in its properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
  pub target: String,
  /// `None` for `Ref`, the attribute name for `Fn::GetAtt`.
  pub attribute: Option<String>,
}

/// Collect every `Ref` / `Fn::GetAtt` in a JSON tree, in document order.
pub fn references(value: &Value) -> Vec<Reference> {
  let mut found = Vec::new();
  collect_references(value, &mut found);
  found
}

fn collect_references(value: &Value, found: &mut Vec<Reference>) {
  match Intrinsic::parse(value) {
    Some(Intrinsic::Ref(id)) => found.push(Reference {
      target: id.to_string(),
      attribute: None,
    }),
    Some(Intrinsic::GetAtt(id, attr)) => found.push(Reference {
      target: id.to_string(),
      attribute: Some(attr.to_string()),
    }),
    Some(Intrinsic::Join(_, parts)) => {
      for part in parts {
        collect_references(part, found);
      }
    }
    None => match value {
      Value::Array(items) => items.iter().for_each(|v| collect_references(v, found)),
      Value::Object(map) => map.values().for_each(|v| collect_references(v, found)),
      _ => {}
    },
  }
}
