//! Generated identifiers, ARNs and endpoint names.

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// `prefix` followed by `len` upper-case alphanumerics, e.g. `E2QWRUHAPOMQZL`.
pub fn short_id(prefix: char, len: usize) -> String {
  let mut seed = uuid::Uuid::new_v4().as_u128();
  let mut id = String::with_capacity(len + 1);
  id.push(prefix);
  for _ in 0..len {
    let index = (seed % ALPHABET.len() as u128) as usize;
    seed /= ALPHABET.len() as u128;
    id.push(ALPHABET[index] as char);
  }
  id
}

pub fn distribution_id() -> String {
  short_id('E', 13)
}

pub fn invalidation_id() -> String {
  short_id('I', 13)
}

pub fn distribution_domain_name(id: &str) -> String {
  format!("{}.cloudfront.net", id.to_ascii_lowercase())
}

pub fn distribution_arn(account_id: &str, id: &str) -> String {
  format!("arn:aws:cloudfront::{}:distribution/{}", account_id, id)
}

pub fn bucket_arn(name: &str) -> String {
  format!("arn:aws:s3:::{}", name)
}

pub fn object_arn(bucket: &str, key: &str) -> String {
  format!("arn:aws:s3:::{}/{}", bucket, key)
}

pub fn bucket_domain_name(name: &str) -> String {
  format!("{}.s3.amazonaws.com", name)
}

pub fn bucket_regional_domain_name(name: &str, region: &str) -> String {
  format!("{}.s3.{}.amazonaws.com", name, region)
}

pub fn user_arn(account_id: &str, name: &str) -> String {
  format!("arn:aws:iam::{}:user/{}", account_id, name)
}

/// S3 naming rules: 3 to 63 characters of lower-case letters, digits, dots
/// and hyphens, starting and ending with a letter or digit.
pub fn is_valid_bucket_name(name: &str) -> bool {
  let bytes = name.as_bytes();
  (3..=63).contains(&bytes.len())
    && bytes
      .iter()
      .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-' || *b == b'.')
    && bytes.first().is_some_and(u8::is_ascii_alphanumeric)
    && bytes.last().is_some_and(u8::is_ascii_alphanumeric)
    && !name.contains("..")
}

/// Object keys must be non-empty, relative, printable, and free of `..`.
pub fn is_valid_object_key(key: &str) -> bool {
  !key.is_empty()
    && key.len() <= 1024
    && !key.starts_with('/')
    && !key.split('/').any(|segment| segment == "..")
    && !key.bytes().any(|b| b.is_ascii_control() || b == b'\\')
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_distribution_ids_and_domains() {
    let id = distribution_id();
    assert_eq!(id.len(), 14);
    assert!(id.starts_with('E'));
    assert!(id.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));

    let domain = distribution_domain_name(&id);
    assert_eq!(domain, format!("{}.cloudfront.net", id.to_lowercase()));
    assert_ne!(distribution_id(), id);
  }

  #[test]
  fn test_bucket_names() {
    assert!(is_valid_bucket_name("tk-farm-frontend-123456789012"));
    assert!(!is_valid_bucket_name("Tk-Farm"));
    assert!(!is_valid_bucket_name("ab"));
    assert!(!is_valid_bucket_name("-leading"));
    assert!(!is_valid_bucket_name("a..b"));
  }

  #[test]
  fn test_object_keys() {
    assert!(is_valid_object_key("assets/app.js"));
    assert!(is_valid_object_key("index.html"));
    assert!(!is_valid_object_key(""));
    assert!(!is_valid_object_key("/index.html"));
    assert!(!is_valid_object_key("assets/../secret"));
    assert!(!is_valid_object_key("a\\b"));
  }
}
