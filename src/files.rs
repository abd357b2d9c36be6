//! File storage collaborator: writes uploads under `DATA_DIR` and hands back
//! the URL they are served from (`/content/...`).

use std::path::PathBuf;
use uuid::Uuid;

use crate::error::{LmsError, LmsResult};

pub const CONTENT_PREFIX: &str = "/content";

#[derive(Debug, Clone)]
pub struct LocalFiles {
    root: PathBuf,
}

impl LocalFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// Stores `bytes` under `folder` with a fresh name and returns its URL.
    pub async fn save(&self, folder: &str, original_name: &str, bytes: &[u8]) -> LmsResult<String> {
        if bytes.is_empty() {
            return Err(LmsError::Validation("file is empty".into()));
        }
        let name = match extension(original_name) {
            Some(ext) => format!("{}.{ext}", Uuid::new_v4()),
            None => Uuid::new_v4().to_string(),
        };
        let dir = self.root.join(folder);
        tokio::fs::create_dir_all(&dir).await.map_err(io_err)?;
        tokio::fs::write(dir.join(&name), bytes).await.map_err(io_err)?;
        tracing::debug!(folder, name = %name, size = bytes.len(), "stored upload");
        Ok(format!("{CONTENT_PREFIX}/{folder}/{name}"))
    }
}

fn io_err(e: std::io::Error) -> LmsError {
    LmsError::Storage(e.to_string())
}

// Only short alphanumeric extensions survive; anything else is dropped.
fn extension(name: &str) -> Option<String> {
    let (_, ext) = name.rsplit_once('.')?;
    let ok = !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric());
    ok.then(|| ext.to_ascii_lowercase())
}
