//! Thread checkpoints on disk
//!
//! One pretty-printed JSON file per thread, named by the base64url form of
//! the thread id. Writes go to a temporary file first and are renamed into
//! place, so a crash never leaves half a file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chatbot_agent::{Checkpoint, CheckpointStore, Error, Result};
use tokio::fs;

/// [`CheckpointStore`] backed by a directory
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Get the default threads directory
    pub fn default_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("chatbot")
            .join("threads")
    }

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File for a thread. The encoding is reversible and only uses
    /// `[A-Za-z0-9_-]`, so distinct ids never share a file or leave the directory.
    fn path_for(&self, thread_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", URL_SAFE_NO_PAD.encode(thread_id)))
    }
}

fn store_error(context: &str, path: &Path, e: impl std::fmt::Display) -> Error {
    Error::Store(format!("{} {}: {}", context, path.display(), e))
}

#[async_trait]
impl CheckpointStore for FileStore {
    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let path = self.path_for(thread_id);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(store_error("failed to read", &path, e)),
        };
        let checkpoint: Checkpoint = serde_json::from_str(&content)
            .map_err(|e| store_error("corrupt checkpoint", &path, e))?;
        if checkpoint.thread_id != thread_id {
            return Err(store_error(
                "checkpoint belongs to another thread",
                &path,
                &checkpoint.thread_id,
            ));
        }
        Ok(Some(checkpoint))
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| store_error("failed to create", &self.dir, e))?;

        let path = self.path_for(&checkpoint.thread_id);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(checkpoint)
            .map_err(|e| store_error("failed to serialize", &path, e))?;

        fs::write(&tmp, content)
            .await
            .map_err(|e| store_error("failed to write", &tmp, e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| store_error("failed to replace", &path, e))?;
        tracing::debug!(path = %path.display(), "checkpoint saved");
        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> Result<bool> {
        let path = self.path_for(thread_id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(store_error("failed to delete", &path, e)),
        }
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(store_error("failed to list", &self.dir, e)),
        };

        let mut ids = vec![];
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| store_error("failed to list", &self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            // The checkpoint holds the real id; the name is only its encoding.
            match self.read_thread_id(&path).await {
                Some(id) => ids.push(id),
                None => tracing::warn!(path = %path.display(), "skipping unreadable checkpoint"),
            }
        }
        ids.sort();
        Ok(ids)
    }
}

impl FileStore {
    async fn read_thread_id(&self, path: &Path) -> Option<String> {
        let content = fs::read_to_string(path).await.ok()?;
        let checkpoint: Checkpoint = serde_json::from_str(&content).ok()?;
        Some(checkpoint.thread_id)
    }
}
