//! On-disk pointer to the summary message
//!
//! A single JSON record `{ "messageId": "..." }`, read once at startup and
//! overwritten after each new summary message is created.

use crate::error::{Result, WardenError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedPointer {
    pub message_id: String,
}

#[derive(Debug, Clone)]
pub struct PointerStore {
    path: PathBuf,
}

impl PointerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when no pointer was ever written
    pub async fn load(&self) -> Result<Option<PersistedPointer>> {
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            debug!(path = %self.path.display(), "No pointer file, starting fresh");
            return Ok(None);
        }

        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| WardenError::Persistence(format!("read {}: {e}", self.path.display())))?;
        let pointer: PersistedPointer = serde_json::from_str(&content)
            .map_err(|e| WardenError::Persistence(format!("parse {}: {e}", self.path.display())))?;

        if pointer.message_id.trim().is_empty() {
            return Ok(None);
        }

        info!(path = %self.path.display(), message_id = %pointer.message_id, "Loaded message pointer");
        Ok(Some(pointer))
    }

    pub async fn save(&self, message_id: &str) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| WardenError::Persistence(format!("create {}: {e}", parent.display())))?;
        }

        let pointer = PersistedPointer {
            message_id: message_id.to_string(),
        };
        let content = serde_json::to_string_pretty(&pointer)?;
        tokio::fs::write(&self.path, content)
            .await
            .map_err(|e| WardenError::Persistence(format!("write {}: {e}", self.path.display())))?;

        debug!(path = %self.path.display(), message_id, "Saved message pointer");
        Ok(())
    }
}
