use crate::{RegistryError, Result};
use fs2::FileExt;
use std::path::{Path, PathBuf};

/// Cross-process advisory lock held while a snapshot file is replaced.
pub(crate) struct SnapshotFileLock {
    file: std::fs::File,
}

impl Drop for SnapshotFileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

pub(crate) fn lock_path_for_snapshot(snapshot: &Path) -> PathBuf {
    let mut name = snapshot
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    snapshot.with_file_name(name)
}

pub(crate) async fn acquire_snapshot_lock(snapshot: &Path) -> Result<SnapshotFileLock> {
    let path = lock_path_for_snapshot(snapshot);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    tokio::task::spawn_blocking(move || -> Result<SnapshotFileLock> {
        use std::fs::OpenOptions;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| {
                RegistryError::Persistence(format!("open snapshot lock {}: {err}", path.display()))
            })?;

        file.lock_exclusive().map_err(|err| {
            RegistryError::Persistence(format!("acquire snapshot lock {}: {err}", path.display()))
        })?;

        Ok(SnapshotFileLock { file })
    })
    .await
    .map_err(|err| RegistryError::Other(format!("join snapshot lock task: {err}")))?
}
