// logsift/src/state/registry.rs
//
// Buffers keyed by `buffer.id`, so several log files of one logical service
// (e.g. rotated per-node logs) feed the same window and analysis state.
// Log files without an id get a private buffer.
//
// The state file of a shared buffer is named after the first log file that
// registered it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::analysis::AnalysisState;
use crate::config::BufferConf;
use crate::record::InputRecord;
use crate::state::buffer::RecentRecords;
use crate::state::persistence::StateFile;

pub struct BufferRegistry<R> {
    state_dir: Option<PathBuf>,
    by_id:     HashMap<String, Arc<RecentRecords<R>>>,
    all:       Vec<Arc<RecentRecords<R>>>,
}

impl<R: InputRecord> BufferRegistry<R> {
    /// `state_dir = None` keeps every buffer in memory only.
    pub fn new(state_dir: Option<PathBuf>) -> Self {
        Self { state_dir, by_id: HashMap::new(), all: Vec::new() }
    }

    pub fn state_file(&self, src_path: &Path) -> Option<StateFile> {
        self.state_dir
            .as_deref()
            .map(|dir| StateFile::for_source(dir, src_path))
    }

    pub fn get_or_create(&mut self, conf: &BufferConf, src_path: &Path, empty_state: AnalysisState) -> Arc<RecentRecords<R>> {
        if let Some(id) = &conf.id {
            if let Some(buf) = self.by_id.get(id) {
                if buf.conf() != conf {
                    warn!(id = %id, src = %src_path.display(), "shared buffer config differs, using the first one");
                }
                info!(id = %id, src = %src_path.display(), "sharing buffer");
                return buf.clone();
            }
        }
        let buf = Arc::new(match self.state_file(src_path) {
            Some(file) => RecentRecords::with_persistence(conf.clone(), empty_state, file),
            None       => RecentRecords::new(conf.clone(), empty_state),
        });
        if let Some(id) = &conf.id {
            self.by_id.insert(id.clone(), buf.clone());
        }
        self.all.push(buf.clone());
        buf
    }

    pub fn buffers(&self) -> &[Arc<RecentRecords<R>>] {
        &self.all
    }

    /// Flush and stop every state writer.
    pub async fn close_all(&self) {
        for buf in &self.all {
            buf.close().await;
        }
    }
}
