// logsift/src/engine/pipeline.rs
//
// One pipeline per configured log file, driven by a single worker task:
//
//   source ──mpsc──► worker: exclude → preprocess(buffer) → transform ──mpsc──► sink
//
// Records are handled strictly one after another, so outputs leave in the
// order their input records arrived (cluster fan-out stays together).
// On shutdown the worker finishes the record in hand and stops; buffers are
// flushed by the registry once every worker is done.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::analysis::{AnalysisState, Preprocessor};
use crate::config::LogFileConf;
use crate::record::{AppType, InputRecord};
use crate::services::{ServiceOutput, ServiceRecord, Transformer};
use crate::state::buffer::RecentRecords;

#[derive(Debug, Default)]
pub struct PipelineStats {
    pub accepted:         AtomicU64,
    pub unprocessable:    AtomicU64,
    pub excluded:         AtomicU64,
    pub emitted:          AtomicU64,
    pub transform_errors: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub accepted:         u64,
    pub unprocessable:    u64,
    pub excluded:         u64,
    pub emitted:          u64,
    pub transform_errors: u64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted:         self.accepted.load(Ordering::Relaxed),
            unprocessable:    self.unprocessable.load(Ordering::Relaxed),
            excluded:         self.excluded.load(Ordering::Relaxed),
            emitted:          self.emitted.load(Ordering::Relaxed),
            transform_errors: self.transform_errors.load(Ordering::Relaxed),
        }
    }
}

pub struct ServicePipeline {
    app_type:     AppType,
    src:          String,
    buffer:       Arc<RecentRecords<ServiceRecord>>,
    preprocessor: Box<dyn Preprocessor<ServiceRecord>>,
    transformer:  Transformer,
    excluded:     HashSet<IpAddr>,
    pub stats:    PipelineStats,
}

impl ServicePipeline {
    pub fn new(
        conf:         &LogFileConf,
        buffer:       Arc<RecentRecords<ServiceRecord>>,
        preprocessor: Box<dyn Preprocessor<ServiceRecord>>,
    ) -> Self {
        if let AnalysisState::Bot(st) = preprocessor.empty_state() {
            let buffer_size = buffer.conf().prev_nums_sample_size();
            if st.prev_nums.cap() != buffer_size {
                warn!(
                    src = %conf.src_label(), analyser = st.prev_nums.cap(), buffer = buffer_size,
                    "bot analyser and buffer disagree on prevNumReqsSampleSize, buffer wins after load"
                );
            }
        }
        Self {
            app_type:    conf.app_type,
            src:         conf.src_label(),
            buffer,
            preprocessor,
            transformer: Transformer::from_conf(conf),
            excluded:    conf.excluded_ips(),
            stats:       PipelineStats::default(),
        }
    }

    pub fn app_type(&self) -> AppType {
        self.app_type
    }

    pub fn src(&self) -> &str {
        &self.src
    }

    pub fn buffer(&self) -> &Arc<RecentRecords<ServiceRecord>> {
        &self.buffer
    }

    pub fn analyser(&self) -> &'static str {
        self.preprocessor.name()
    }

    /// Everything one input record turns into, in emission order.
    pub fn process(&self, rec: ServiceRecord) -> Vec<ServiceOutput> {
        if !rec.is_processable() {
            self.stats.unprocessable.fetch_add(1, Ordering::Relaxed);
            return Vec::new();
        }
        if rec.client_ip().map_or(false, |ip| self.excluded.contains(&ip)) {
            self.stats.excluded.fetch_add(1, Ordering::Relaxed);
            return Vec::new();
        }
        self.stats.accepted.fetch_add(1, Ordering::Relaxed);

        let mut out = Vec::new();
        for r in self.preprocessor.preprocess(rec, &self.buffer) {
            match self.transformer.transform(&r) {
                Ok(o)  => out.push(o),
                Err(e) => {
                    self.stats.transform_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(src = %self.src, "transform failed: {}", e);
                }
            }
        }
        self.stats.emitted.fetch_add(out.len() as u64, Ordering::Relaxed);
        out
    }

    /// Worker loop. Ends when the source closes, the sink goes away, or
    /// shutdown is signalled.
    pub async fn run(
        self: Arc<Self>,
        mut rx:       mpsc::Receiver<ServiceRecord>,
        out:          mpsc::Sender<ServiceOutput>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            app_type = %self.app_type, src = %self.src, analyser = self.analyser(),
            "pipeline started"
        );
        'records: loop {
            let rec = tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    info!(src = %self.src, "pipeline shutdown requested");
                    break;
                }
                msg = rx.recv() => match msg {
                    Some(rec) => rec,
                    None      => break,
                },
            };
            for o in self.process(rec) {
                if out.send(o).await.is_err() {
                    warn!(src = %self.src, "output sink closed");
                    break 'records;
                }
            }
        }
        let s = self.stats.snapshot();
        debug!(src = %self.src, ?s, "pipeline stats");
        info!(
            src = %self.src, accepted = s.accepted, emitted = s.emitted,
            "pipeline stopped"
        );
    }
}
