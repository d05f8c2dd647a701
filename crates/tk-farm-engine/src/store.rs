//! Deployment state storage.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;

use crate::state::Deployment;

/// Error type for state storage.
#[derive(Debug, Error)]
pub enum StoreError {
  /// Reading or writing the state file failed.
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  /// The state file is not a valid deployment.
  #[error("corrupt state: {0}")]
  Json(#[from] serde_json::Error),
}

/// Storage for the last successful deployment of each stack.
#[async_trait]
pub trait StateStore: Send + Sync {
  /// Load a stack's deployment, if it was ever applied.
  async fn load(&self, stack_name: &str) -> Result<Option<Deployment>, StoreError>;

  /// Persist a deployment, replacing any previous one for the stack.
  async fn save(&self, deployment: &Deployment) -> Result<(), StoreError>;

  /// Forget a stack entirely.
  async fn remove(&self, stack_name: &str) -> Result<(), StoreError>;
}

/// Filesystem-backed state store.
///
/// Each stack is one JSON file:
/// ```text
/// {root}/
/// └── tk-farm-frontend.json
/// ```
pub struct FsStateStore {
  root: PathBuf,
}

impl FsStateStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn path(&self, stack_name: &str) -> PathBuf {
    self.root.join(format!("{}.json", stack_name))
  }
}

#[async_trait]
impl StateStore for FsStateStore {
  async fn load(&self, stack_name: &str) -> Result<Option<Deployment>, StoreError> {
    let path = self.path(stack_name);
    let content = match fs::read_to_string(&path).await {
      Ok(content) => content,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_str(&content)?))
  }

  async fn save(&self, deployment: &Deployment) -> Result<(), StoreError> {
    fs::create_dir_all(&self.root).await?;
    let content = serde_json::to_string_pretty(deployment)?;

    // Write then rename so a crash never leaves a half-written state file.
    let path = self.path(&deployment.stack_name);
    let staging = path.with_extension("json.tmp");
    fs::write(&staging, content).await?;
    fs::rename(&staging, &path).await?;
    Ok(())
  }

  async fn remove(&self, stack_name: &str) -> Result<(), StoreError> {
    match fs::remove_file(self.path(stack_name)).await {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(e.into()),
    }
  }
}

/// In-memory state store for tests.
#[derive(Default)]
pub struct MemoryStateStore {
  deployments: Mutex<HashMap<String, Deployment>>,
}

impl MemoryStateStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl StateStore for MemoryStateStore {
  async fn load(&self, stack_name: &str) -> Result<Option<Deployment>, StoreError> {
    Ok(self.deployments.lock().await.get(stack_name).cloned())
  }

  async fn save(&self, deployment: &Deployment) -> Result<(), StoreError> {
    self
      .deployments
      .lock()
      .await
      .insert(deployment.stack_name.clone(), deployment.clone());
    Ok(())
  }

  async fn remove(&self, stack_name: &str) -> Result<(), StoreError> {
    self.deployments.lock().await.remove(stack_name);
    Ok(())
  }
}
