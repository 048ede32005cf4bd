use crate::selection::SelectionStore;
use crate::session::QuestionOutcome;
use crate::shuffle::DisplayMapping;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Everything needed to resume a paused session with the same display order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub quiz_id: String,
    pub active_display_index: Option<usize>,
    pub selections: SelectionStore,
    /// Keyed by canonical question index.
    pub outcomes: BTreeMap<usize, QuestionOutcome>,
    pub mapping: DisplayMapping,
    pub saved_at: DateTime<Utc>,
}

/// Best-effort persistence hooks, used only at pause/resume boundaries.
pub trait SnapshotStore: Send + Sync {
    fn save(&self, snapshot: SessionSnapshot) -> BoxFuture<'static, anyhow::Result<()>>;
    fn restore(&self) -> BoxFuture<'static, anyhow::Result<Option<SessionSnapshot>>>;
}

#[derive(Debug, Clone)]
pub struct JsonFileSnapshotStore {
    path: PathBuf,
}

impl JsonFileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for JsonFileSnapshotStore {
    fn save(&self, snapshot: SessionSnapshot) -> BoxFuture<'static, anyhow::Result<()>> {
        let path = self.path.clone();
        Box::pin(async move {
            let serialized = serde_json::to_vec_pretty(&snapshot)?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, serialized).await?;
            Ok(())
        })
    }

    fn restore(&self) -> BoxFuture<'static, anyhow::Result<Option<SessionSnapshot>>> {
        let path = self.path.clone();
        Box::pin(async move {
            let raw = match tokio::fs::read(&path).await {
                Ok(raw) => raw,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(err) => return Err(err.into()),
            };
            Ok(Some(serde_json::from_slice(&raw)?))
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemorySnapshotStore {
    slot: Arc<Mutex<Option<SessionSnapshot>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn latest(&self) -> Option<SessionSnapshot> {
        self.slot.lock().await.clone()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn save(&self, snapshot: SessionSnapshot) -> BoxFuture<'static, anyhow::Result<()>> {
        let slot = self.slot.clone();
        Box::pin(async move {
            *slot.lock().await = Some(snapshot);
            Ok(())
        })
    }

    fn restore(&self) -> BoxFuture<'static, anyhow::Result<Option<SessionSnapshot>>> {
        let slot = self.slot.clone();
        Box::pin(async move { Ok(slot.lock().await.clone()) })
    }
}
