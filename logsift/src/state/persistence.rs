// logsift/src/state/persistence.rs
//
// Analysis state snapshots on local disk.
//
// Each buffer owns one JSON file named after a 32-bit FNV-1a hash of its log
// source path: {state_dir}/{hash:x}.json
//
// Writes are asynchronous. The buffer bumps a watch-channel version after
// every state mutation; a background task serialises whatever state is current
// when it wakes, so bursts of mutations collapse into one write. Closing the
// writer flushes the latest version before the task exits.
//
// Nothing here is fatal. Load failures fall back to an empty state, save
// failures are logged and retried on the next mutation.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::analysis::AnalysisState;
use crate::error::StateError;
use crate::state::buffer::StateSlot;

// ── File naming ───────────────────────────────────────────────────────────────

const FNV32_OFFSET: u32 = 0x811c_9dc5;
const FNV32_PRIME:  u32 = 0x0100_0193;

pub fn fnv1a_32(data: &[u8]) -> u32 {
    data.iter().fold(FNV32_OFFSET, |h, b| (h ^ *b as u32).wrapping_mul(FNV32_PRIME))
}

// ── State file ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn for_source(state_dir: &Path, src_path: &Path) -> Self {
        let hash = fnv1a_32(src_path.to_string_lossy().as_bytes());
        Self { path: state_dir.join(format!("{:x}.json", hash)) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw snapshot, or `None` when no snapshot exists yet.
    pub fn load(&self) -> Result<Option<String>, StateError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw)                                   => Ok(Some(raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source)                               => Err(self.io_err(source)),
        }
    }

    /// Snapshot decoded into the same state variant as `template`.
    pub fn load_state(&self, template: &AnalysisState) -> Result<Option<AnalysisState>, StateError> {
        let Some(raw) = self.load()? else { return Ok(None) };
        template
            .decode_as(&raw)
            .map(Some)
            .map_err(|source| StateError::Decode { path: self.path.clone(), source })
    }

    /// Write via a temp file and rename so a crash never leaves half a snapshot.
    pub async fn store(&self, json: &str) -> Result<(), StateError> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| self.io_err(e))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json.as_bytes()).await.map_err(|e| self.io_err(e))?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| self.io_err(e))?;
        Ok(())
    }

    /// Delete the snapshot (worklog reset). Returns whether a file existed.
    pub fn remove(&self) -> Result<bool, StateError> {
        match std::fs::remove_file(&self.path) {
            Ok(())                                    => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(source)                               => Err(self.io_err(source)),
        }
    }

    fn io_err(&self, source: std::io::Error) -> StateError {
        StateError::Io { path: self.path.clone(), source }
    }
}

// ── Background writer ─────────────────────────────────────────────────────────

pub struct StateWriter {
    file:   StateFile,
    tx:     Mutex<Option<watch::Sender<u64>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl StateWriter {
    /// Must be called from within a tokio runtime.
    pub fn spawn(file: StateFile, slot: Arc<Mutex<StateSlot>>) -> Self {
        let (tx, rx) = watch::channel(0u64);
        let handle   = tokio::spawn(write_loop(file.clone(), slot, rx));
        Self {
            file,
            tx:     Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn file(&self) -> &StateFile {
        &self.file
    }

    pub fn mark_dirty(&self) {
        if let Some(tx) = self.tx.lock().as_ref() {
            tx.send_modify(|v| *v = v.wrapping_add(1));
        }
    }

    /// Flush the pending snapshot and stop the writer task.
    pub async fn close(&self) {
        drop(self.tx.lock().take());
        let handle = self.handle.lock().take();
        if let Some(h) = handle {
            if let Err(e) = h.await {
                error!("state writer for {} panicked: {}", self.file.path().display(), e);
            }
        }
    }
}

async fn write_loop(file: StateFile, slot: Arc<Mutex<StateSlot>>, mut rx: watch::Receiver<u64>) {
    // changed() still reports a pending version after the sender is dropped,
    // so the final snapshot is written before the loop ends.
    while rx.changed().await.is_ok() {
        let json = slot.lock().encode();
        match json {
            Ok(json) => {
                if let Err(e) = file.store(&json).await {
                    error!("state save failed: {}", e);
                } else {
                    debug!("state saved to {}", file.path().display());
                }
            }
            Err(e) => error!("{}", e),
        }
    }
    info!("state writer for {} stopped", file.path().display());
}
