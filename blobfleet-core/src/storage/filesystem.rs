use super::{BlobStorage, StoredBlob};
use crate::{BlobId, BlobMetadata, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// FilesystemStorage keeps one file per blob directly under the base directory:
/// `{base}/{id}` holds the content and `{base}/{id}.json` the optional metadata.
///
/// Stores and reads of one id are serialised, so content and sidecar always belong to
/// the same write.
pub struct FilesystemStorage {
    base_path: PathBuf,
    id_locks: StdMutex<HashMap<BlobId, Arc<Mutex<()>>>>,
}

impl FilesystemStorage {
    pub fn new(base_path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&base_path)?;
        Ok(Self {
            base_path,
            id_locks: StdMutex::new(HashMap::new()),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn blob_path(&self, id: &BlobId) -> PathBuf {
        self.base_path.join(id.as_str())
    }

    fn metadata_path(&self, id: &BlobId) -> PathBuf {
        self.base_path.join(format!("{}.json", id))
    }

    fn id_lock(&self, id: &BlobId) -> Arc<Mutex<()>> {
        let mut locks = self
            .id_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(id.clone()).or_default().clone()
    }

    fn release_id_lock(&self, id: &BlobId, lock: Arc<Mutex<()>>) {
        let mut locks = self
            .id_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // One reference in the map, one held here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(id);
        }
    }

    /// Writes `data` to a uniquely named, fsynced temporary file next to `target`.
    async fn stage(&self, target: &Path, data: &[u8]) -> Result<PathBuf> {
        let file_name = target
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let temp_path = self
            .base_path
            .join(format!(".{}.{}.tmp", file_name, ulid::Ulid::new()));

        let written: std::io::Result<()> = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(data).await?;
            file.sync_all().await
        }
        .await;

        if let Err(error) = written {
            discard(&temp_path).await;
            return Err(error.into());
        }

        Ok(temp_path)
    }

    async fn write_atomically(&self, target: &Path, data: &[u8]) -> Result<()> {
        let temp_path = self.stage(target, data).await?;
        if let Err(error) = fs::rename(&temp_path, target).await {
            discard(&temp_path).await;
            return Err(error.into());
        }
        Ok(())
    }

    /// Swaps staged files into place: sidecar first, content last. Must run under the
    /// id lock.
    async fn commit(
        &self,
        id: &BlobId,
        content_temp: &Path,
        metadata_temp: Option<&Path>,
    ) -> Result<()> {
        let blob_path = self.blob_path(id);
        let metadata_path = self.metadata_path(id);

        let previous_metadata = match fs::read(&metadata_path).await {
            Ok(raw) => Some(raw),
            Err(error) if error.kind() == ErrorKind::NotFound => None,
            Err(error) => return Err(error.into()),
        };

        match metadata_temp {
            Some(temp) => fs::rename(temp, &metadata_path).await?,
            None if previous_metadata.is_some() => fs::remove_file(&metadata_path).await?,
            None => {}
        }

        if let Err(error) = fs::rename(content_temp, &blob_path).await {
            let restored = match previous_metadata {
                Some(raw) => self.write_atomically(&metadata_path, &raw).await,
                None => match fs::remove_file(&metadata_path).await {
                    Err(error) if error.kind() != ErrorKind::NotFound => Err(error.into()),
                    _ => Ok(()),
                },
            };
            if let Err(restore_error) = restored {
                tracing::warn!("Failed to restore metadata of {}: {}", id, restore_error);
            }
            return Err(error.into());
        }

        Ok(())
    }

    async fn read(&self, id: &BlobId) -> Result<Option<StoredBlob>> {
        let data = match fs::read(self.blob_path(id)).await {
            Ok(data) => Bytes::from(data),
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };

        let metadata = match fs::read(self.metadata_path(id)).await {
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(error) if error.kind() == ErrorKind::NotFound => BlobMetadata::new(),
            Err(error) => return Err(error.into()),
        };

        Ok(Some(StoredBlob { data, metadata }))
    }
}

async fn discard(temp_path: &Path) {
    let _ = fs::remove_file(temp_path).await;
}

#[async_trait]
impl BlobStorage for FilesystemStorage {
    async fn exists(&self, id: &BlobId) -> Result<bool> {
        match fs::metadata(self.blob_path(id)).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(false),
            Err(error) => Err(error.into()),
        }
    }

    async fn get(&self, id: &BlobId) -> Result<Option<StoredBlob>> {
        let lock = self.id_lock(id);
        let read = {
            let _guard = lock.lock().await;
            self.read(id).await
        };
        self.release_id_lock(id, lock);
        read
    }

    /// Either the new content and metadata both become visible, or the previous
    /// version stays untouched.
    async fn store(&self, id: &BlobId, data: Bytes, metadata: &BlobMetadata) -> Result<()> {
        let encoded = if metadata.is_empty() {
            None
        } else {
            Some(serde_json::to_vec(metadata)?)
        };

        let content_temp = self.stage(&self.blob_path(id), &data).await?;
        let metadata_temp = match &encoded {
            Some(encoded) => match self.stage(&self.metadata_path(id), encoded).await {
                Ok(temp) => Some(temp),
                Err(error) => {
                    discard(&content_temp).await;
                    return Err(error);
                }
            },
            None => None,
        };

        let lock = self.id_lock(id);
        let committed = {
            let _guard = lock.lock().await;
            self.commit(id, &content_temp, metadata_temp.as_deref()).await
        };
        self.release_id_lock(id, lock);

        if let Err(error) = committed {
            discard(&content_temp).await;
            if let Some(temp) = &metadata_temp {
                discard(temp).await;
            }
            return Err(error);
        }

        tracing::debug!("Stored blob {} ({} bytes)", id, data.len());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<BlobId>> {
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.base_path).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            // Sidecars and temporary files contain a '.', which no valid id does.
            if let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| BlobId::parse(name).ok())
            {
                ids.push(id);
            }
        }

        ids.sort();
        Ok(ids)
    }
}
