// logsift/src/analysis/clustering.rs
//
// Collapses bursts of near-simultaneous requests by one session/user into a
// single representative record.
//
// Per record (key k = clustering client id):
//   1. buffer the record
//   2. k never analysed        → remember the record time as k's last check
//   3. within the interval     → passthrough
//   4. interval elapsed        → DBSCAN over k's buffered records
//        clusters found → drop k's records up to now, confirm the check,
//                         emit one representative per cluster (carrying the
//                         cluster size), then the record itself unless a
//                         cluster absorbed it
//        no clusters    → passthrough, k stays due for analysis

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::analysis::dbscan::cluster_by_time;
use crate::analysis::{current_time, AnalysisState, Preprocessor};
use crate::config::ClusteringDbScanConf;
use crate::record::{AppType, InputRecord};
use crate::state::buffer::RecentRecords;

/// Sweep records older than the cleanup age every this many records.
pub const CLEANUP_EVERY_RECORDS: u64 = 1000;
pub const CLEANUP_MAX_AGE_SECS:  i64 = 6 * 60 * 60;

// ── State ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleAnalysisState {
    #[serde(rename = "timestamp", default)]
    pub last_check:      Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_processed: u64,
    #[serde(default)]
    pub total_ignored:   u64,
}

impl SimpleAnalysisState {
    pub fn after_load_normalize(&mut self, now: DateTime<Utc>) {
        if self.last_check.is_none() && self.total_processed > 0 {
            self.last_check = Some(now);
        }
    }

    pub fn report(&self) -> Value {
        json!({
            "lastCheck":      self.last_check,
            "totalProcessed": self.total_processed,
            "totalIgnored":   self.total_ignored,
        })
    }
}

// ── Analyser ──────────────────────────────────────────────────────────────────

pub struct ClusteringAnalyzer {
    app_type:       AppType,
    conf:           ClusteringDbScanConf,
    interval:       Duration,
    realtime_clock: bool,
}

impl ClusteringAnalyzer {
    pub fn new(app_type: AppType, conf: ClusteringDbScanConf, interval: Duration, realtime_clock: bool) -> Self {
        Self { app_type, conf, interval, realtime_clock }
    }

    fn touch_state<R: InputRecord>(&self, buffer: &RecentRecords<R>, now: DateTime<Utc>, ignored: bool) -> u64 {
        buffer.update_state_data(now, |st| match st {
            AnalysisState::Simple(s) => {
                s.last_check = Some(now);
                if ignored {
                    s.total_ignored += 1;
                } else {
                    s.total_processed += 1;
                }
                s.total_processed
            }
            _ => 0,
        })
    }
}

impl<R: InputRecord> Preprocessor<R> for ClusteringAnalyzer {
    fn preprocess(&self, rec: R, buffer: &RecentRecords<R>) -> Vec<R> {
        let now = current_time(rec.time(), self.realtime_clock);
        if rec.app_type() != self.app_type {
            warn!(
                expected = %self.app_type, got = %rec.app_type(),
                "clustering analyser received a foreign record, passing through"
            );
            self.touch_state(buffer, now, true);
            return vec![rec];
        }

        let key = rec.clustering_client_id().to_string();
        let seq = buffer.add_record(rec.clone());

        let processed = self.touch_state(buffer, now, false);
        if processed > 0 && processed % CLEANUP_EVERY_RECORDS == 0 {
            buffer.clear_old_records(now - Duration::seconds(CLEANUP_MAX_AGE_SECS));
        }

        let last_check = match buffer.get_last_check(&key) {
            Some(t) => t,
            None => {
                buffer.confirm_record_check(&rec);
                return vec![rec];
            }
        };
        if rec.time() - last_check <= self.interval {
            return vec![rec];
        }

        let entries  = buffer.entries(&key);
        let times: Vec<_> = entries.iter().map(|e| e.time).collect();
        let clusters = cluster_by_time(&times, &self.conf);
        if clusters.is_empty() {
            return vec![rec];
        }

        buffer.remove_analyzed_records(&key, rec.time());
        buffer.confirm_record_check(&rec);

        let absorbed = clusters
            .iter()
            .any(|c| c.members.iter().any(|&m| entries[m].seq == seq));
        let mut out: Vec<R> = clusters
            .iter()
            .map(|c| {
                let mut r = entries[c.representative].record.clone();
                r.set_cluster(c.size());
                r
            })
            .collect();
        debug!(
            key = %key, clusters = out.len(), analysed = entries.len(), absorbed,
            "clustering pass"
        );
        if !absorbed {
            out.push(rec);
        }
        out
    }

    fn empty_state(&self) -> AnalysisState {
        AnalysisState::Simple(SimpleAnalysisState::default())
    }

    fn name(&self) -> &'static str {
        "clustering"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BufferConf;
    use crate::testutil::{at, TestRecord};

    fn setup() -> (ClusteringAnalyzer, RecentRecords<TestRecord>) {
        let db   = ClusteringDbScanConf { min_density: 3, epsilon: 2.0 };
        let an   = ClusteringAnalyzer::new(AppType::Wag, db, Duration::seconds(10), false);
        let conf = BufferConf { history_lookup_items: 100, ..Default::default() };
        let buf  = RecentRecords::new(conf, Preprocessor::<TestRecord>::empty_state(&an));
        (an, buf)
    }

    #[test]
    fn test_burst_collapses_after_interval() {
        let (an, buf) = setup();
        for t in 0..5 {
            let out = an.preprocess(TestRecord::new("u1", t), &buf);
            assert_eq!(out.len(), 1);
            assert_eq!(out[0].cluster_size(), 0);
        }
        assert_eq!(buf.get_last_check("u1"), Some(at(0)));

        let out = an.preprocess(TestRecord::new("u1", 11), &buf);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].time(), at(0));
        assert_eq!(out[0].cluster_size(), 5);
        assert_eq!(out[1].time(), at(11));
        assert_eq!(out[1].cluster_size(), 0);

        assert_eq!(buf.num_of_records("u1"), 0);
        assert_eq!(buf.get_last_check("u1"), Some(at(11)));
    }

    #[test]
    fn test_current_record_absorbed_by_cluster() {
        let (an, buf) = setup();
        an.preprocess(TestRecord::new("u1", 0), &buf);
        for t in [20, 21] {
            an.preprocess(TestRecord::new("u1", t), &buf);
        }
        // 20, 21 and 22 form a cluster, 22 is inside it
        let out = an.preprocess(TestRecord::new("u1", 22), &buf);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].time(), at(20));
        assert_eq!(out[0].cluster_size(), 3);
    }

    #[test]
    fn test_no_cluster_keeps_key_due() {
        let (an, buf) = setup();
        an.preprocess(TestRecord::new("u1", 0), &buf);
        let out = an.preprocess(TestRecord::new("u1", 30), &buf);
        assert_eq!(out.len(), 1);
        assert_eq!(buf.get_last_check("u1"), Some(at(0)));
        assert_eq!(buf.num_of_records("u1"), 2);
    }

    #[test]
    fn test_keys_are_independent() {
        let (an, buf) = setup();
        for t in 0..4 {
            an.preprocess(TestRecord::new("a", t), &buf);
        }
        let out = an.preprocess(TestRecord::new("b", 15), &buf);
        assert_eq!(out.len(), 1);
        assert_eq!(buf.num_of_records("a"), 4);
    }

    #[test]
    fn test_sweep_keeps_known_keys() {
        let (an, buf) = setup();
        an.preprocess(TestRecord::new("old", 0), &buf);
        let later = 8 * 3600;
        for _ in 1..CLEANUP_EVERY_RECORDS {
            an.preprocess(TestRecord::new("new", later), &buf);
        }
        // the 1000th record triggered the sweep
        assert_eq!(buf.num_of_records("old"), 0);
        assert_eq!(buf.get_last_check("old"), Some(at(0)));

        // still known: analysed against t=0, not primed again
        let out = an.preprocess(TestRecord::new("old", later + 1), &buf);
        assert_eq!(out.len(), 1);
        assert_eq!(buf.get_last_check("old"), Some(at(0)));
    }

    #[test]
    fn test_foreign_record_passes_through() {
        let (an, buf) = setup();
        let rec = TestRecord::new("u1", 1).with_app(AppType::Mapka);
        let out = an.preprocess(rec, &buf);
        assert_eq!(out.len(), 1);
        assert_eq!(buf.total_len(), 0);
        match buf.get_state_data(at(1)) {
            AnalysisState::Simple(s) => assert_eq!(s.total_ignored, 1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_state_counts_processed() {
        let (an, buf) = setup();
        for t in 0..3 {
            an.preprocess(TestRecord::new("u1", t), &buf);
        }
        let st = buf.get_state_data(at(3));
        assert_eq!(st.last_check(), Some(at(2)));
        assert_eq!(st.report()["totalProcessed"], 3);
    }

    #[test]
    fn test_normalize_sets_missing_last_check() {
        let mut s = SimpleAnalysisState { last_check: None, total_processed: 4, total_ignored: 0 };
        s.after_load_normalize(at(9));
        assert_eq!(s.last_check, Some(at(9)));

        let mut fresh = SimpleAnalysisState::default();
        fresh.after_load_normalize(at(9));
        assert_eq!(fresh.last_check, None);
    }
}
