//! CDN edge: viewer requests, caching and error remapping.
//!
//! A request is routed by the distribution's domain name. Cache entries are
//! keyed by distribution and path and expire on the tokio clock, so tests can
//! drive TTLs with paused time.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::debug;

use crate::access::Caller;
use crate::cloud::LocalCloud;
use crate::error::CloudError;
use crate::naming;
use crate::state::{CloudState, DistributionRecord, ViewerProtocolPolicy};

/// How long error responses stay cached when the distribution says nothing.
pub const DEFAULT_ERROR_CACHING_MIN_TTL: u64 = 10;

const CLOUDFRONT_SERVICE: &str = "cloudfront.amazonaws.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
  Http,
  Https,
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
  Hit,
  Miss,
  /// Answered by the edge itself without consulting cache or origin.
  Edge,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EdgeResponse {
  pub status: u16,
  pub body: Bytes,
  pub content_type: Option<String>,
  /// Set on redirects.
  pub location: Option<String>,
  pub cache: CacheStatus,
}

impl EdgeResponse {
  fn edge(status: u16) -> Self {
    Self {
      status,
      body: Bytes::new(),
      content_type: None,
      location: None,
      cache: CacheStatus::Edge,
    }
  }

  fn redirect(location: String) -> Self {
    Self {
      location: Some(location),
      ..Self::edge(301)
    }
  }

  fn from_origin(status: u16, body: Bytes, content_type: Option<String>) -> Self {
    Self {
      status,
      body,
      content_type,
      location: None,
      cache: CacheStatus::Miss,
    }
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

struct CachedEntry {
  response: EdgeResponse,
  expires_at: Instant,
}

/// Cached responses of every distribution.
#[derive(Default)]
pub(crate) struct EdgeCache {
  entries: HashMap<(String, String), CachedEntry>,
}

impl EdgeCache {
  fn get(&mut self, distribution_id: &str, path: &str, now: Instant) -> Option<EdgeResponse> {
    let key = (distribution_id.to_string(), path.to_string());
    match self.entries.get(&key) {
      Some(entry) if entry.expires_at > now => Some(EdgeResponse {
        cache: CacheStatus::Hit,
        ..entry.response.clone()
      }),
      Some(_) => {
        self.entries.remove(&key);
        None
      }
      None => None,
    }
  }

  fn put(&mut self, distribution_id: &str, path: &str, response: &EdgeResponse, ttl: u64, now: Instant) {
    if ttl == 0 {
      return;
    }
    self.entries.insert(
      (distribution_id.to_string(), path.to_string()),
      CachedEntry {
        response: response.clone(),
        expires_at: now + Duration::from_secs(ttl),
      },
    );
  }

  /// Drop entries matching any of `paths`. Returns how many were dropped.
  pub(crate) fn invalidate(&mut self, distribution_id: &str, paths: &[String]) -> usize {
    let before = self.entries.len();
    self.entries.retain(|(id, path), _| {
      id != distribution_id
        || !paths.iter().any(|pattern| match pattern.strip_suffix('*') {
          Some(prefix) => path.starts_with(prefix),
          None => path == pattern,
        })
    });
    before - self.entries.len()
  }

  /// Drop every entry of a distribution.
  pub(crate) fn flush(&mut self, distribution_id: &str) {
    self.entries.retain(|(id, _), _| id != distribution_id);
  }
}

impl LocalCloud {
  /// Serve a viewer request for `path` on `domain`.
  pub async fn request(&self, domain: &str, scheme: Scheme, path: &str) -> Result<EdgeResponse, CloudError> {
    let state = self.state.read().await;
    let distribution = state
      .distribution_by_domain(domain)
      .ok_or_else(|| CloudError::UnknownDomain {
        domain: domain.to_string(),
      })?;

    if !distribution.enabled {
      return Ok(EdgeResponse::edge(403));
    }
    match (scheme, distribution.viewer_protocol_policy) {
      (Scheme::Http, ViewerProtocolPolicy::RedirectToHttps) => {
        return Ok(EdgeResponse::redirect(format!("https://{}{}", domain, path)));
      }
      (Scheme::Http, ViewerProtocolPolicy::HttpsOnly) => return Ok(EdgeResponse::edge(403)),
      _ => {}
    }

    let path = path.split(['?', '#']).next().unwrap_or_default();
    let path = match (path, &distribution.default_root_object) {
      ("" | "/", Some(root)) => format!("/{}", root),
      ("", None) => "/".to_string(),
      (path, _) => path.to_string(),
    };

    let now = Instant::now();
    if let Some(hit) = self.edge.lock().await.get(&distribution.id, &path, now) {
      debug!(distribution_id = %distribution.id, path = %path, "edge cache hit");
      return Ok(hit);
    }

    let (response, ttl) = self.fetch(&state, distribution, &path);
    self.edge.lock().await.put(&distribution.id, &path, &response, ttl, now);
    debug!(
      distribution_id = %distribution.id,
      path = %path,
      status = response.status,
      ttl,
      "edge cache miss"
    );
    Ok(response)
  }

  /// Fetch from the origin, applying custom error responses. Returns the
  /// response and how long it may be cached.
  fn fetch(&self, state: &CloudState, distribution: &DistributionRecord, path: &str) -> (EdgeResponse, u64) {
    let response = self.fetch_origin(state, distribution, path);
    if response.status < 400 {
      let ttl = state
        .cache_policies
        .get(&distribution.cache_policy_id)
        .map(|p| p.effective_ttl())
        .unwrap_or_default();
      return (response, ttl);
    }

    let Some(custom) = distribution.error_response(response.status) else {
      return (response, DEFAULT_ERROR_CACHING_MIN_TTL);
    };
    let ttl = custom
      .error_caching_min_ttl
      .unwrap_or(DEFAULT_ERROR_CACHING_MIN_TTL);
    if custom.response_page_path.is_empty() {
      return (
        EdgeResponse {
          status: custom.response_code,
          ..response
        },
        ttl,
      );
    }

    let page = self.fetch_origin(state, distribution, &custom.response_page_path);
    if page.status >= 400 {
      return (page, ttl);
    }
    (
      EdgeResponse {
        status: custom.response_code,
        ..page
      },
      ttl,
    )
  }

  fn fetch_origin(&self, state: &CloudState, distribution: &DistributionRecord, path: &str) -> EdgeResponse {
    self.origin_hits.fetch_add(1, Ordering::SeqCst);

    let Some(origin) = distribution.target_origin() else {
      return EdgeResponse::from_origin(502, Bytes::new(), None);
    };
    let Some(bucket) = state.bucket_by_domain(&origin.domain_name) else {
      return EdgeResponse::from_origin(502, Bytes::new(), None);
    };

    let signs = origin
      .origin_access_control_id
      .as_ref()
      .and_then(|id| state.origin_access_controls.get(id))
      .is_some_and(|oac| oac.signing_behavior != "never");
    let caller = if signs {
      Caller::Service {
        service: CLOUDFRONT_SERVICE.to_string(),
        source_arn: naming::distribution_arn(&state.account_id, &distribution.id),
      }
    } else {
      Caller::Anonymous
    };

    let key = path.trim_start_matches('/');
    match state.read_object(&caller, &bucket.name, key) {
      Ok((info, body)) => EdgeResponse::from_origin(200, body, info.content_type),
      Err(e) => {
        debug!(bucket = %bucket.name, key = %key, error = %e, "origin error");
        EdgeResponse::from_origin(e.status(), Bytes::new(), None)
      }
    }
  }
}
