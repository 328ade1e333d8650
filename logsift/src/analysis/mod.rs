// logsift/src/analysis/mod.rs
//
// Analysers sit between parsing and transformation. Each one feeds the
// record into the service's buffer and decides which records move on:
//
//   NullAnalyzer         passthrough, buffer untouched
//   ClusteringAnalyzer   may replace a record with cluster representatives
//   BotAnalyzer          passthrough, emits notifications on the side
//
// The buffer stores one AnalysisState whose shape depends on the analyser.

pub mod botdetect;
pub mod clustering;
pub mod dbscan;
pub mod freq;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::config::BufferConf;
use crate::notify::NotificationQueue;
use crate::record::{AppType, InputRecord};
use crate::state::buffer::RecentRecords;

pub use botdetect::{BotAnalysisState, BotAnalyzer, IpProps, ReqCalcItem};
pub use clustering::{ClusteringAnalyzer, SimpleAnalysisState};

pub trait Preprocessor<R: InputRecord>: Send + Sync {
    /// Zero or more records to transform in place of `rec`.
    fn preprocess(&self, rec: R, buffer: &RecentRecords<R>) -> Vec<R>;

    /// State a fresh buffer starts with.
    fn empty_state(&self) -> AnalysisState;

    fn name(&self) -> &'static str;
}

/// Pick the analyser a buffer config enables. At most one of
/// clusteringDbScan / botDetection is set (checked by config validation).
pub fn build_preprocessor<R: InputRecord>(
    app_type:       AppType,
    conf:           Option<&BufferConf>,
    notifications:  NotificationQueue,
    realtime_clock: bool,
) -> Box<dyn Preprocessor<R>> {
    let Some(conf) = conf else {
        return Box::new(NullAnalyzer);
    };
    if let Some(db) = &conf.clustering_db_scan {
        return Box::new(ClusteringAnalyzer::new(
            app_type, db.clone(), conf.analysis_interval(), realtime_clock,
        ));
    }
    if let Some(bd) = &conf.bot_detection {
        return Box::new(BotAnalyzer::new(
            app_type, bd.clone(), conf.analysis_interval(), notifications, realtime_clock,
        ));
    }
    Box::new(NullAnalyzer)
}

/// "Now" for an analyser: record time, or the wall clock in realtime mode.
pub(crate) fn current_time(rec_time: DateTime<Utc>, realtime_clock: bool) -> DateTime<Utc> {
    if realtime_clock { Utc::now() } else { rec_time }
}

// ── Null analyser ─────────────────────────────────────────────────────────────

pub struct NullAnalyzer;

impl<R: InputRecord> Preprocessor<R> for NullAnalyzer {
    fn preprocess(&self, rec: R, _buffer: &RecentRecords<R>) -> Vec<R> {
        vec![rec]
    }

    fn empty_state(&self) -> AnalysisState {
        AnalysisState::Null
    }

    fn name(&self) -> &'static str {
        "null"
    }
}

// ── Opaque state ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisState {
    Null,
    Simple(SimpleAnalysisState),
    Bot(BotAnalysisState),
}

impl AnalysisState {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Null      => Ok("{}".to_string()),
            Self::Simple(s) => serde_json::to_string(s),
            Self::Bot(s)    => serde_json::to_string(s),
        }
    }

    /// Decode a snapshot into the same variant as `self`. Unknown fields are
    /// ignored, missing ones defaulted.
    pub fn decode_as(&self, raw: &str) -> Result<Self, serde_json::Error> {
        Ok(match self {
            Self::Null      => Self::Null,
            Self::Simple(_) => Self::Simple(serde_json::from_str(raw)?),
            Self::Bot(_)    => Self::Bot(serde_json::from_str(raw)?),
        })
    }

    pub fn after_load_normalize(&mut self, now: DateTime<Utc>, conf: &BufferConf) {
        match self {
            Self::Null      => {}
            Self::Simple(s) => s.after_load_normalize(now),
            Self::Bot(s)    => s.after_load_normalize(now, conf.prev_nums_sample_size()),
        }
    }

    pub fn last_check(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Null      => None,
            Self::Simple(s) => s.last_check,
            Self::Bot(s)    => s.last_check,
        }
    }

    /// Diagnostic summary for the stats loop.
    pub fn report(&self) -> Value {
        match self {
            Self::Null      => Value::Object(Default::default()),
            Self::Simple(s) => s.report(),
            Self::Bot(s)    => s.report(),
        }
    }
}
