//! Site publishing as the deploy user.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use mime::Mime;
use tk_farm_emulator::{Caller, LocalCloud};
use tracing::info;

/// What a publish changed.
#[derive(Debug, Default)]
pub struct PublishReport {
  pub uploaded: Vec<String>,
  pub deleted: Vec<String>,
  pub invalidation_id: String,
}

/// Where a publish goes, taken from the stack outputs.
pub struct PublishTarget<'a> {
  pub bucket: &'a str,
  pub distribution_id: &'a str,
  pub deploy_user: &'a str,
}

/// Content type served for a key, by extension.
pub fn content_type(key: &str) -> Mime {
  let extension = key
    .rsplit_once('.')
    .map(|(_, ext)| ext.to_ascii_lowercase())
    .unwrap_or_default();

  match extension.as_str() {
    "html" | "htm" => mime::TEXT_HTML_UTF_8,
    "css" => mime::TEXT_CSS_UTF_8,
    "js" | "mjs" => mime::TEXT_JAVASCRIPT,
    "json" | "map" => mime::APPLICATION_JSON,
    "txt" => mime::TEXT_PLAIN_UTF_8,
    "xml" => mime::TEXT_XML,
    "svg" => mime::IMAGE_SVG,
    "png" => mime::IMAGE_PNG,
    "jpg" | "jpeg" => mime::IMAGE_JPEG,
    "gif" => mime::IMAGE_GIF,
    "woff" => mime::FONT_WOFF,
    "woff2" => mime::FONT_WOFF2,
    "pdf" => mime::APPLICATION_PDF,
    other => unlisted_content_type(other),
  }
}

/// Types `mime` has no constant for.
fn unlisted_content_type(extension: &str) -> Mime {
  let essence = match extension {
    "webp" => "image/webp",
    "avif" => "image/avif",
    "ico" => "image/x-icon",
    "ttf" => "font/ttf",
    "wasm" => "application/wasm",
    "webmanifest" => "application/manifest+json",
    _ => return mime::APPLICATION_OCTET_STREAM,
  };
  essence.parse().unwrap_or(mime::APPLICATION_OCTET_STREAM)
}

/// Every regular file under `dir` as `(key, path)`, keys `/`-separated and
/// sorted.
pub async fn collect_files(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
  let mut files = Vec::new();
  let mut pending = vec![dir.to_path_buf()];

  while let Some(current) = pending.pop() {
    let mut entries = tokio::fs::read_dir(&current)
      .await
      .with_context(|| format!("failed to read directory: {}", current.display()))?;

    while let Some(entry) = entries.next_entry().await? {
      let path = entry.path();
      let file_type = entry.file_type().await?;
      if file_type.is_dir() {
        pending.push(path);
      } else if file_type.is_file() {
        let relative = path
          .strip_prefix(dir)
          .with_context(|| format!("{} is outside {}", path.display(), dir.display()))?;
        let key = relative
          .components()
          .map(|c| c.as_os_str().to_string_lossy())
          .collect::<Vec<_>>()
          .join("/");
        files.push((key, path));
      }
    }
  }

  files.sort();
  Ok(files)
}

/// Mirror `dir` into the bucket and invalidate the whole distribution.
///
/// Objects whose keys no longer exist locally are deleted. Every call is
/// made as the deploy user, so it only succeeds if the deploy policy allows
/// it.
pub async fn publish(cloud: &LocalCloud, target: &PublishTarget<'_>, dir: &Path) -> Result<PublishReport> {
  let files = collect_files(dir).await?;
  if files.is_empty() {
    bail!("nothing to publish in {}", dir.display());
  }

  let caller = Caller::user(target.deploy_user);
  let existing: BTreeSet<String> = cloud
    .list_objects(&caller, target.bucket, None)
    .await
    .context("failed to list bucket")?
    .into_iter()
    .map(|o| o.key)
    .collect();

  let mut report = PublishReport::default();
  for (key, path) in &files {
    let body = tokio::fs::read(path)
      .await
      .with_context(|| format!("failed to read {}", path.display()))?;
    let media_type = content_type(key);
    cloud
      .put_object(&caller, target.bucket, key, body, Some(media_type.as_ref()))
      .await
      .with_context(|| format!("failed to upload {}", key))?;
    report.uploaded.push(key.clone());
  }

  let local: BTreeSet<&str> = files.iter().map(|(key, _)| key.as_str()).collect();
  for key in existing.iter().filter(|k| !local.contains(k.as_str())) {
    cloud
      .delete_object(&caller, target.bucket, key)
      .await
      .with_context(|| format!("failed to delete {}", key))?;
    report.deleted.push(key.clone());
  }

  let invalidation = cloud
    .create_invalidation(&caller, target.distribution_id, &["/*"])
    .await
    .context("failed to invalidate distribution")?;
  report.invalidation_id = invalidation.id;

  info!(
    bucket = %target.bucket,
    uploaded = report.uploaded.len(),
    deleted = report.deleted.len(),
    invalidation_id = %report.invalidation_id,
    "published"
  );
  Ok(report)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_content_types() {
    assert_eq!(content_type("index.html"), mime::TEXT_HTML_UTF_8);
    assert_eq!(content_type("assets/APP.JS").as_ref(), "text/javascript");
    assert_eq!(content_type("fonts/a.woff2"), mime::FONT_WOFF2);
    assert_eq!(content_type("favicon.ico").as_ref(), "image/x-icon");
    assert_eq!(content_type("LICENSE"), mime::APPLICATION_OCTET_STREAM);
  }

  #[tokio::test]
  async fn test_collect_files_walks_subdirectories() {
    let dir = tempfile::tempdir().unwrap();
    tokio::fs::create_dir_all(dir.path().join("assets/img")).await.unwrap();
    tokio::fs::write(dir.path().join("index.html"), "<h1>hi</h1>").await.unwrap();
    tokio::fs::write(dir.path().join("assets/app.js"), "1").await.unwrap();
    tokio::fs::write(dir.path().join("assets/img/logo.svg"), "<svg/>").await.unwrap();

    let keys: Vec<String> = collect_files(dir.path())
      .await
      .unwrap()
      .into_iter()
      .map(|(key, _)| key)
      .collect();
    assert_eq!(keys, vec!["assets/app.js", "assets/img/logo.svg", "index.html"]);
  }
}
