//! Durable report artifact storage.
//!
//! Artifacts land in a date-keyed object directory and are referenced by a
//! public URL recorded on the job, so the storage backing can move without
//! touching stored job records.

use std::path::PathBuf;

use chrono::{Datelike, Utc};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("artifact io: {0}")]
    Io(#[from] std::io::Error),
    #[error("artifact url invalid: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    public_base: Url,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>, mut public_base: Url) -> Self {
        // Url::join drops the last path segment unless the base ends in '/'.
        if !public_base.path().ends_with('/') {
            let path = format!("{}/", public_base.path());
            public_base.set_path(&path);
        }
        Self {
            root: root.into(),
            public_base,
        }
    }

    /// Store one artifact and return its durable public URL.
    pub async fn put(&self, name: &str, bytes: &[u8]) -> Result<String, StorageError> {
        let key = self.object_key(name);
        let path = self.root.join(&key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;

        let url = self.public_base.join(&key)?;
        Ok(url.to_string())
    }

    fn object_key(&self, name: &str) -> String {
        let now = Utc::now();
        format!("{:04}/{:02}/{}", now.year(), now.month(), name)
    }
}
