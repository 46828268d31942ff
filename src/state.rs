//! Cursor and dedup store
//!
//! Two JSON files: the per-chain scan cursors and the sorted set of settled
//! event ids. Both are replaced atomically (temp file in the same directory,
//! fsync, rename) so a crash leaves either the old or the new content. File
//! I/O runs on the blocking pool.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{RelayError, RelayResult};
use crate::types::{ChainRole, EventId};

/// Durable scan cursors and processed-event set
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Last fully scanned height for a chain; 0 means no cursor yet
    async fn load_cursor(&self, role: ChainRole) -> RelayResult<u64>;

    /// Persist a cursor, never lowering it. Returns the stored value.
    async fn save_cursor(&self, role: ChainRole, height: u64) -> RelayResult<u64>;

    async fn is_processed(&self, event_id: &EventId) -> RelayResult<bool>;

    /// Record a settled event; a repeated id is a no-op
    async fn mark_processed(&self, event_id: &EventId) -> RelayResult<()>;

    async fn processed_count(&self) -> RelayResult<usize>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Cursors {
    #[serde(default)]
    source_last: u64,
    #[serde(default)]
    destination_last: u64,
}

impl Cursors {
    fn get(&self, role: ChainRole) -> u64 {
        match role {
            ChainRole::Source => self.source_last,
            ChainRole::Destination => self.destination_last,
        }
    }

    fn set(&mut self, role: ChainRole, height: u64) {
        match role {
            ChainRole::Source => self.source_last = height,
            ChainRole::Destination => self.destination_last = height,
        }
    }
}

/// File-backed [`StateStore`]
pub struct JsonStateStore {
    state_path: PathBuf,
    processed_path: PathBuf,
    cursor_lock: Mutex<()>,
    processed: Mutex<BTreeSet<String>>,
}

impl JsonStateStore {
    /// Open the store, loading the processed set into memory.
    ///
    /// Missing files are empty state. A processed file that does not parse is
    /// an error: treating it as empty would settle old events again.
    pub fn open(state_path: impl Into<PathBuf>, processed_path: impl Into<PathBuf>) -> RelayResult<Self> {
        let state_path = state_path.into();
        let processed_path = processed_path.into();

        let processed: BTreeSet<String> = match std::fs::read_to_string(&processed_path) {
            Ok(json) => serde_json::from_str::<Vec<String>>(&json)
                .map_err(|e| {
                    RelayError::StatePersistence(format!(
                        "processed events file {} is corrupt: {}",
                        processed_path.display(),
                        e
                    ))
                })?
                .into_iter()
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeSet::new(),
            Err(e) => {
                return Err(RelayError::StatePersistence(format!(
                    "failed to read {}: {}",
                    processed_path.display(),
                    e
                )))
            }
        };

        info!(
            state_file = %state_path.display(),
            processed_file = %processed_path.display(),
            processed = processed.len(),
            "State store opened"
        );

        Ok(Self {
            state_path,
            processed_path,
            cursor_lock: Mutex::new(()),
            processed: Mutex::new(processed),
        })
    }
}

/// Read the cursor file; an unparsable file is logged and treated as empty
fn read_cursors(path: &Path) -> RelayResult<Cursors> {
    match std::fs::read_to_string(path) {
        Ok(json) => Ok(serde_json::from_str(&json).unwrap_or_else(|e| {
            warn!(
                file = %path.display(),
                error = %e,
                "Cursor file unreadable, starting without cursors"
            );
            Cursors::default()
        })),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Cursors::default()),
        Err(e) => Err(RelayError::StatePersistence(format!(
            "failed to read {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Run file I/O on the blocking pool
async fn blocking_io<T, F>(f: F) -> RelayResult<T>
where
    F: FnOnce() -> RelayResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RelayError::StatePersistence(format!("state file task failed: {}", e)))?
}

/// Replace `path` with `contents` via a synced temp file in the same directory
fn write_atomic(path: &Path, contents: &[u8]) -> RelayResult<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let persist_err = |e: std::io::Error| {
        RelayError::StatePersistence(format!("failed to write {}: {}", path.display(), e))
    };

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(persist_err)?;
    tmp.write_all(contents).map_err(persist_err)?;
    tmp.as_file().sync_all().map_err(persist_err)?;
    tmp.persist(path).map_err(|e| persist_err(e.error))?;
    Ok(())
}

#[async_trait]
impl StateStore for JsonStateStore {
    async fn load_cursor(&self, role: ChainRole) -> RelayResult<u64> {
        let _guard = self.cursor_lock.lock().await;
        let path = self.state_path.clone();
        Ok(blocking_io(move || read_cursors(&path)).await?.get(role))
    }

    async fn save_cursor(&self, role: ChainRole, height: u64) -> RelayResult<u64> {
        let _guard = self.cursor_lock.lock().await;

        let path = self.state_path.clone();
        let (previous, stored) = blocking_io(move || {
            let mut cursors = read_cursors(&path)?;
            let previous = cursors.get(role);
            if height <= previous {
                return Ok((previous, previous));
            }

            cursors.set(role, height);
            let json = serde_json::to_vec(&cursors)
                .map_err(|e| RelayError::StatePersistence(e.to_string()))?;
            write_atomic(&path, &json)?;
            Ok((previous, height))
        })
        .await?;

        if stored > previous {
            debug!(role = %role, from = previous, to = stored, "Cursor saved");
        }
        Ok(stored)
    }

    async fn is_processed(&self, event_id: &EventId) -> RelayResult<bool> {
        Ok(self.processed.lock().await.contains(event_id.as_str()))
    }

    async fn mark_processed(&self, event_id: &EventId) -> RelayResult<()> {
        let mut processed = self.processed.lock().await;
        if !processed.insert(event_id.as_str().to_string()) {
            return Ok(());
        }

        // BTreeSet iterates sorted
        let json = serde_json::to_vec(&*processed)
            .map_err(|e| RelayError::StatePersistence(e.to_string()));
        let path = self.processed_path.clone();
        let written = match json {
            Ok(json) => blocking_io(move || write_atomic(&path, &json)).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            // Keep memory and disk in agreement
            processed.remove(event_id.as_str());
            return Err(e);
        }

        debug!(event_id = %event_id, "Event marked processed");
        Ok(())
    }

    async fn processed_count(&self) -> RelayResult<usize> {
        Ok(self.processed.lock().await.len())
    }
}
