//! On-disk mirror of article attachments.
//!
//! Layout is `<root>/<article id>/<token>`. Files are only ever added; a file
//! already present is never downloaded again.

use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, error};

use super::rewrite::AttachmentRef;
use super::source::AttachmentFetcher;

/// Outcome of mirroring the attachments of one article.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorStats {
  pub downloaded: usize,
  /// Already on disk, skipped
  pub cached: usize,
  pub failed: usize,
}

impl std::ops::AddAssign for MirrorStats {
  fn add_assign(&mut self, other: Self) {
    self.downloaded += other.downloaded;
    self.cached += other.cached;
    self.failed += other.failed;
  }
}

#[derive(Debug, Clone)]
pub struct AttachmentMirror {
  root: PathBuf,
}

impl AttachmentMirror {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  /// Create the mirror root if it does not exist yet.
  pub async fn ensure_root(&self) -> Result<()> {
    create_dir(&self.root).await
  }

  /// Local path of an attachment, refusing names that would escape the
  /// article directory.
  pub fn path_for(&self, id: &str, token: &str) -> Result<PathBuf> {
    if !is_plain_name(id) {
      return Err(eyre!("Unsafe article id for attachment directory: {:?}", id));
    }
    if !is_plain_name(token) {
      return Err(eyre!("Unsafe attachment name: {:?}", token));
    }
    Ok(self.root.join(id).join(token))
  }

  /// Download the attachments of article `id` that are not on disk yet.
  ///
  /// Failures are logged and counted, never returned.
  pub async fn mirror<F: AttachmentFetcher>(
    &self,
    fetcher: &F,
    id: &str,
    attachments: &[AttachmentRef],
  ) -> MirrorStats {
    let mut stats = MirrorStats::default();
    if attachments.is_empty() {
      return stats;
    }

    let dir = self.root.join(id);
    if let Err(e) = create_dir(&dir).await {
      error!(id, error = %e, "Error creating article attachment directory");
      stats.failed = attachments.len();
      return stats;
    }

    for attachment in attachments {
      let path = match self.path_for(id, &attachment.token) {
        Ok(path) => path,
        Err(e) => {
          error!(id, error = %e, "Refusing to mirror attachment");
          stats.failed += 1;
          continue;
        }
      };

      if tokio::fs::try_exists(&path).await.unwrap_or(false) {
        stats.cached += 1;
        continue;
      }

      let data = match fetcher.fetch(&attachment.url).await {
        Ok(data) => data,
        Err(e) => {
          error!(id, url = %attachment.url, error = %e, "Error downloading blog attachment");
          stats.failed += 1;
          continue;
        }
      };

      match write_file(&path, &data).await {
        Ok(()) => {
          debug!(id, token = %attachment.token, bytes = data.len(), "Attachment saved");
          stats.downloaded += 1;
        }
        Err(e) => {
          error!(id, error = %e, "Error saving blog attachment on disk");
          stats.failed += 1;
        }
      }
    }

    stats
  }
}

fn is_plain_name(name: &str) -> bool {
  !name.is_empty()
    && name != "."
    && name != ".."
    && !name.contains(['/', '\\', '\0'])
}

async fn create_dir(path: &Path) -> Result<()> {
  let mut builder = tokio::fs::DirBuilder::new();
  builder.recursive(true);
  #[cfg(unix)]
  builder.mode(0o755);

  builder
    .create(path)
    .await
    .map_err(|e| eyre!("Failed to create directory {}: {}", path.display(), e))
}

/// Write through a temporary file so an interrupted download never looks cached.
async fn write_file(path: &Path, data: &[u8]) -> Result<()> {
  let mut tmp = path.as_os_str().to_owned();
  tmp.push(".part");
  let tmp = PathBuf::from(tmp);

  tokio::fs::write(&tmp, data)
    .await
    .map_err(|e| eyre!("Failed to write {}: {}", tmp.display(), e))?;
  tokio::fs::rename(&tmp, path)
    .await
    .map_err(|e| eyre!("Failed to move {} into place: {}", path.display(), e))
}
