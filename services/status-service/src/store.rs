//! File-backed JSON slots with crash-safe replacement.
//!
//! Every write lands in a uniquely named temporary file next to its target,
//! is synced, and is then renamed over the target. Readers therefore see
//! either the previous document or the new one, never a partial file.

use serde::Serialize;
use serde_json::Value;
use std::{
    io,
    path::{Path, PathBuf},
};
use tokio::{fs, io::AsyncWriteExt};

/// Errors from slot operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The slot has never been written.
    #[error("slot not found: {0}")]
    NotFound(String),

    /// The slot name is not a plain file name.
    #[error("invalid slot name: {0}")]
    InvalidSlot(String),

    /// I/O failure while touching a slot or the store directory.
    #[error("I/O error on {slot}: {source}")]
    Io {
        slot: String,
        #[source]
        source: io::Error,
    },

    /// Every history key after the last issued one is out of range.
    #[error("history keys exhausted after {0}")]
    KeysExhausted(u64),

    /// The document could not be encoded, or the stored bytes are not JSON.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    fn io(slot: &str, source: io::Error) -> Self {
        StoreError::Io {
            slot: slot.to_string(),
            source,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AtomicStore {
    root: PathBuf,
}

impl AtomicStore {
    /// Opens the store, creating the directory hierarchy when absent.
    pub async fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|err| StoreError::io(&root.display().to_string(), err))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn write<T: Serialize + ?Sized>(&self, slot: &str, document: &T) -> StoreResult<()> {
        let target = self.slot_path(slot)?;
        let bytes = serde_json::to_vec_pretty(document)?;
        let tmp = self
            .root
            .join(format!(".{slot}.{}.tmp", uuid::Uuid::new_v4().simple()));

        if let Err(err) = write_synced(&tmp, &bytes).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(StoreError::io(slot, err));
        }
        if let Err(err) = fs::rename(&tmp, &target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(StoreError::io(slot, err));
        }
        self.sync_dir().await.map_err(|err| StoreError::io(slot, err))?;

        tracing::debug!(slot, bytes = bytes.len(), "slot written");
        Ok(())
    }

    pub async fn read(&self, slot: &str) -> StoreResult<Value> {
        let path = self.slot_path(slot)?;
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(slot.to_string()))
            }
            Err(err) => return Err(StoreError::io(slot, err)),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Deletes a slot. A slot that does not exist is not an error.
    pub async fn remove(&self, slot: &str) -> StoreResult<()> {
        let path = self.slot_path(slot)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(slot, "slot removed");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::io(slot, err)),
        }
    }

    /// Names of the regular files currently in the store, in directory order.
    pub async fn list(&self) -> StoreResult<Vec<String>> {
        let root_name = self.root.display().to_string();
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|err| StoreError::io(&root_name, err))?;
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| StoreError::io(&root_name, err))?
        {
            let is_file = entry
                .file_type()
                .await
                .map(|kind| kind.is_file())
                .unwrap_or(false);
            if !is_file {
                continue;
            }
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
        Ok(names)
    }

    fn slot_path(&self, slot: &str) -> StoreResult<PathBuf> {
        if !is_safe_filename(slot) {
            return Err(StoreError::InvalidSlot(slot.to_string()));
        }
        Ok(self.root.join(slot))
    }

    #[cfg(unix)]
    async fn sync_dir(&self) -> io::Result<()> {
        // Persist the rename itself.
        fs::File::open(&self.root).await?.sync_all().await
    }

    #[cfg(not(unix))]
    async fn sync_dir(&self) -> io::Result<()> {
        Ok(())
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

fn is_safe_filename(name: &str) -> bool {
    if name.is_empty() || name.contains("..") || name.contains('/') || name.contains('\\') {
        return false;
    }
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}
