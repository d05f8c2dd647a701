//! The local cloud handle.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::edge::EdgeCache;
use crate::error::CloudError;
use crate::state::{BucketRecord, CloudState, DistributionRecord, InlinePolicyRecord, UserRecord};

/// One account in one region: a control plane, object storage and a CDN edge.
///
/// Shared across tasks behind an `Arc`; every call takes `&self`. The state
/// lock is always taken before the edge cache lock.
pub struct LocalCloud {
  account_id: String,
  region: String,
  pub(crate) state: RwLock<CloudState>,
  pub(crate) edge: Mutex<EdgeCache>,
  pub(crate) origin_hits: AtomicU64,
}

impl LocalCloud {
  pub fn new(account_id: impl Into<String>, region: impl Into<String>) -> Self {
    Self::from_state(CloudState::new(account_id, region))
  }

  pub fn from_state(state: CloudState) -> Self {
    Self {
      account_id: state.account_id.clone(),
      region: state.region.clone(),
      state: RwLock::new(state),
      edge: Mutex::new(EdgeCache::default()),
      origin_hits: AtomicU64::new(0),
    }
  }

  pub fn account_id(&self) -> &str {
    &self.account_id
  }

  pub fn region(&self) -> &str {
    &self.region
  }

  /// Number of requests the edge has forwarded to an origin.
  pub fn origin_hits(&self) -> u64 {
    self.origin_hits.load(Ordering::SeqCst)
  }

  /// A copy of the whole control-plane state.
  pub async fn snapshot(&self) -> CloudState {
    self.state.read().await.clone()
  }

  /// Load a snapshot written by [`save`](Self::save). Returns `None` if the
  /// file does not exist.
  pub async fn load(path: &Path) -> Result<Option<Self>, CloudError> {
    let content = match fs::read_to_string(path).await {
      Ok(content) => content,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(e.into()),
    };
    let state: CloudState = serde_json::from_str(&content)?;
    info!(path = %path.display(), account_id = %state.account_id, "loaded cloud snapshot");
    Ok(Some(Self::from_state(state)))
  }

  /// Write the control-plane state and all objects to `path`.
  pub async fn save(&self, path: &Path) -> Result<(), CloudError> {
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).await?;
    }
    let content = serde_json::to_string_pretty(&*self.state.read().await)?;

    let staging = path.with_extension("json.tmp");
    fs::write(&staging, content).await?;
    fs::rename(&staging, path).await?;
    Ok(())
  }

  pub async fn bucket(&self, name: &str) -> Option<BucketRecord> {
    self.state.read().await.buckets.get(name).cloned()
  }

  pub async fn distribution(&self, id: &str) -> Option<DistributionRecord> {
    self.state.read().await.distributions.get(id).cloned()
  }

  pub async fn user(&self, name: &str) -> Option<UserRecord> {
    self.state.read().await.users.get(name).cloned()
  }

  /// Inline policies attached to `user`.
  pub async fn user_policies(&self, user: &str) -> Vec<InlinePolicyRecord> {
    self
      .state
      .read()
      .await
      .user_policies(user)
      .cloned()
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_snapshot_round_trip_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cloud.json");

    assert!(LocalCloud::load(&path).await.unwrap().is_none());

    let cloud = LocalCloud::new("123456789012", "us-east-1");
    cloud.save(&path).await.unwrap();

    let loaded = LocalCloud::load(&path).await.unwrap().unwrap();
    assert_eq!(loaded.account_id(), "123456789012");
    assert_eq!(loaded.region(), "us-east-1");
    assert_eq!(loaded.snapshot().await, cloud.snapshot().await);
  }

  #[tokio::test]
  async fn test_corrupt_snapshot_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cloud.json");
    tokio::fs::write(&path, "not json").await.unwrap();

    assert!(matches!(LocalCloud::load(&path).await, Err(CloudError::Json(_))));
  }
}
