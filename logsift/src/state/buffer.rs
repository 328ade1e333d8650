// logsift/src/state/buffer.rs
//
// RecentRecords: bounded, time-ordered window of recent input records.
//
// Layout:
//   per_key       cluster key → VecDeque<BufferEntry>, non-decreasing in time,
//                 at most history_lookup_items long (oldest evicted)
//   last_checks   cluster key → time the analyser last ran on that key
//   state         opaque analysis state, lazily loaded from disk on first use
//
// DashMap shards the per-key maps so readers (stats loop) never stall the
// pipeline worker. The analysis state sits behind one parking_lot mutex that
// is shared with the background state writer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::analysis::AnalysisState;
use crate::config::BufferConf;
use crate::error::StateError;
use crate::record::InputRecord;
use crate::state::persistence::{StateFile, StateWriter};

// ── Entries ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BufferEntry<R> {
    /// Global insertion sequence; breaks ties between equal timestamps.
    pub seq:    u64,
    pub time:   DateTime<Utc>,
    pub record: R,
}

// ── Analysis state slot ───────────────────────────────────────────────────────

#[derive(Debug)]
pub struct StateSlot {
    data:   AnalysisState,
    loaded: bool,
}

impl StateSlot {
    fn new(empty: AnalysisState) -> Self {
        Self { data: empty, loaded: false }
    }

    pub(crate) fn encode(&self) -> Result<String, StateError> {
        Ok(self.data.to_json()?)
    }
}

// ── Buffer ────────────────────────────────────────────────────────────────────

pub struct RecentRecords<R> {
    conf:        BufferConf,
    per_key:     DashMap<String, VecDeque<BufferEntry<R>>>,
    last_checks: DashMap<String, DateTime<Utc>>,
    state:       Arc<Mutex<StateSlot>>,
    writer:      Option<StateWriter>,
    next_seq:    AtomicU64,
    pub total_added:   AtomicU64,
    pub total_evicted: AtomicU64,
}

impl<R: InputRecord> RecentRecords<R> {
    /// In-memory buffer; analysis state is never persisted.
    pub fn new(conf: BufferConf, empty_state: AnalysisState) -> Self {
        Self {
            conf,
            per_key:       DashMap::new(),
            last_checks:   DashMap::new(),
            state:         Arc::new(Mutex::new(StateSlot::new(empty_state))),
            writer:        None,
            next_seq:      AtomicU64::new(0),
            total_added:   AtomicU64::new(0),
            total_evicted: AtomicU64::new(0),
        }
    }

    /// Buffer whose analysis state is snapshotted to `file`.
    /// Spawns the writer task, so a tokio runtime must be running.
    pub fn with_persistence(conf: BufferConf, empty_state: AnalysisState, file: StateFile) -> Self {
        let mut buf = Self::new(conf, empty_state);
        buf.writer  = Some(StateWriter::spawn(file, buf.state.clone()));
        buf
    }

    pub fn conf(&self) -> &BufferConf {
        &self.conf
    }

    // ── Records ───────────────────────────────────────────────────────────────

    /// Insert under the record's cluster key and return its sequence number.
    /// Late records are placed after every entry with time ≤ theirs.
    pub fn add_record(&self, rec: R) -> u64 {
        let seq  = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let time = rec.time();
        let key  = rec.clustering_client_id().to_string();
        let cap  = self.conf.history_lookup_items;

        let mut list = self.per_key.entry(key).or_default();
        let entry    = BufferEntry { seq, time, record: rec };
        match list.back() {
            Some(last) if last.time > time => {
                let at = list.partition_point(|e| e.time <= time);
                list.insert(at, entry);
            }
            _ => list.push_back(entry),
        }
        while list.len() > cap {
            list.pop_front();
            self.total_evicted.fetch_add(1, Ordering::Relaxed);
        }
        self.total_added.fetch_add(1, Ordering::Relaxed);
        seq
    }

    pub fn for_each(&self, key: &str, mut f: impl FnMut(&BufferEntry<R>)) {
        if let Some(list) = self.per_key.get(key) {
            list.iter().for_each(|e| f(e));
        }
    }

    /// Visits every key's entries in time order. No ordering across keys.
    pub fn total_for_each(&self, mut f: impl FnMut(&BufferEntry<R>)) {
        for list in self.per_key.iter() {
            list.value().iter().for_each(|e| f(e));
        }
    }

    /// Owned copy of one key's entries, oldest first.
    pub fn entries(&self, key: &str) -> Vec<BufferEntry<R>> {
        self.per_key
            .get(key)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn num_of_records(&self, key: &str) -> usize {
        self.per_key.get(key).map(|l| l.len()).unwrap_or(0)
    }

    /// Entries with time ≥ `since`, over all keys.
    pub fn total_num_of_records_since(&self, since: DateTime<Utc>) -> usize {
        self.per_key
            .iter()
            .map(|l| l.len() - l.partition_point(|e| e.time < since))
            .sum()
    }

    pub fn num_keys(&self) -> usize {
        self.per_key.len()
    }

    pub fn total_len(&self) -> usize {
        self.per_key.iter().map(|l| l.len()).sum()
    }

    // ── Per-key analysis bookkeeping ──────────────────────────────────────────

    pub fn get_last_check(&self, key: &str) -> Option<DateTime<Utc>> {
        self.last_checks.get(key).map(|t| *t)
    }

    /// Record that the key was analysed at the record's time. Never moves
    /// a key's last check backwards.
    pub fn confirm_record_check(&self, rec: &R) {
        let time = rec.time();
        self.last_checks
            .entry(rec.clustering_client_id().to_string())
            .and_modify(|t| if time > *t { *t = time })
            .or_insert(time);
    }

    /// Drop entries with time ≤ cutoff under `key`.
    pub fn remove_analyzed_records(&self, key: &str, cutoff: DateTime<Utc>) {
        let mut emptied = false;
        if let Some(mut list) = self.per_key.get_mut(key) {
            while list.front().map_or(false, |e| e.time <= cutoff) {
                list.pop_front();
            }
            emptied = list.is_empty();
        }
        if emptied {
            self.per_key.remove_if(key, |_, l| l.is_empty());
        }
    }

    /// Drop entries with time < cutoff across all keys; returns how many went.
    /// Last checks are kept, a key seen once is never primed again.
    pub fn clear_old_records(&self, cutoff: DateTime<Utc>) -> usize {
        let mut removed = 0;
        for mut list in self.per_key.iter_mut() {
            let n = list.partition_point(|e| e.time < cutoff);
            list.drain(..n);
            removed += n;
        }
        self.per_key.retain(|_, l| !l.is_empty());
        debug!(removed, cutoff = %cutoff, keys_checked = self.last_checks.len(), "buffer cleanup");
        removed
    }

    // ── Analysis state ────────────────────────────────────────────────────────

    /// Copy of the current analysis state. The first call loads the snapshot
    /// (if any) and normalises it against `now` and the buffer config.
    pub fn get_state_data(&self, now: DateTime<Utc>) -> AnalysisState {
        let mut slot = self.state.lock();
        self.ensure_loaded(&mut slot, now);
        slot.data.clone()
    }

    pub fn set_state_data(&self, state: AnalysisState) {
        {
            let mut slot = self.state.lock();
            slot.data    = state;
            slot.loaded  = true;
        }
        self.mark_dirty();
    }

    /// Mutate the state in place and schedule a snapshot.
    pub fn update_state_data<T>(&self, now: DateTime<Utc>, f: impl FnOnce(&mut AnalysisState) -> T) -> T {
        let out = {
            let mut slot = self.state.lock();
            self.ensure_loaded(&mut slot, now);
            f(&mut slot.data)
        };
        self.mark_dirty();
        out
    }

    /// Flush the last snapshot and stop the writer.
    pub async fn close(&self) {
        if let Some(w) = &self.writer {
            w.close().await;
        }
    }

    fn ensure_loaded(&self, slot: &mut StateSlot, now: DateTime<Utc>) {
        if slot.loaded {
            return;
        }
        if let Some(w) = &self.writer {
            match w.file().load_state(&slot.data) {
                Ok(Some(state)) => slot.data = state,
                Ok(None)        => debug!("no state snapshot at {}", w.file().path().display()),
                Err(e)          => warn!("{}, starting empty", e),
            }
        }
        slot.data.after_load_normalize(now, &self.conf);
        // Also after a failed load, so a broken file is not re-read per record.
        slot.loaded = true;
    }

    fn mark_dirty(&self) {
        if let Some(w) = &self.writer {
            w.mark_dirty();
        }
    }
}
