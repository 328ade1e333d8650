// logsift/src/analysis/botdetect.rs
//
// Statistical bot detection over the whole service buffer.
//
// Runs once per analysis interval (service-wide, not per key):
//
//   traffic spike    records since the last check vs. the reservoir mean of
//                    past intervals; ≥ trafficReportingThreshold → notify
//   suspicious IPs   long-horizon share of suspicious requests ≥ 0.6 and
//                    enough requests in this interval → notify
//   IP outliers      per-IP counts above max(minFreq, ⌊Q3 + c·IQR⌋) → notify,
//                    blocklisted IPs tagged as known
//
// Detections are advisory. Records always pass through unchanged.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::analysis::freq::{FreqInfo, OrderedFreqSeq, Quartiles};
use crate::analysis::{current_time, AnalysisState, Preprocessor};
use crate::config::BotDetectionConf;
use crate::notify::{Notification, NotificationKind, NotificationQueue};
use crate::record::{AppType, InputRecord};
use crate::state::buffer::RecentRecords;
use crate::state::reservoir::SampleReservoir;

// ── Constants ─────────────────────────────────────────────────────────────────

pub const MIN_PREV_NUM_REQUESTS_SAMPLE_SIZE: usize = 10;
/// Buffer sweep on every 10th full analysis pass (average rate 0.1).
pub const BUFFER_CLEANUP_EVERY_PASSES:       u64   = 10;
pub const BUFFER_CLEANUP_MAX_AGE_SECS:       i64   = 6 * 60 * 60;
pub const SUSPICIOUS_RECORDS_THRESHOLD:      f64   = 0.6;
pub const SUSPICIOUS_RECORDS_MIN_REQUESTS:   u64   = 10;
pub const FULL_BUFFER_MAX_AGE_SECS:          i64   = 5 * 60 * 60;

// ── State ─────────────────────────────────────────────────────────────────────

/// Long-horizon request counters for one IP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpProps {
    pub num_any:    u64,
    pub num_suspic: u64,
    pub last_upd:   DateTime<Utc>,
}

impl IpProps {
    pub fn ratio(&self) -> f64 {
        if self.num_any == 0 {
            return 0.0;
        }
        self.num_suspic as f64 / self.num_any as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotAnalysisState {
    #[serde(default)]
    pub prev_nums:            SampleReservoir<u64>,
    #[serde(rename = "timestamp", default)]
    pub last_check:           Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_processed:      u64,
    #[serde(rename = "fullBufferIPProps", default)]
    pub full_buffer_ip_props: HashMap<IpAddr, IpProps>,
}

impl BotAnalysisState {
    pub fn new(sample_size: usize) -> Self {
        Self { prev_nums: SampleReservoir::new(sample_size), ..Default::default() }
    }

    pub fn after_load_normalize(&mut self, now: DateTime<Utc>, sample_size: usize) {
        if self.last_check.is_none() && !self.prev_nums.is_empty() {
            self.last_check = Some(now);
        }
        if self.prev_nums.cap() == 0 {
            self.prev_nums = SampleReservoir::new(sample_size);
        } else if self.prev_nums.cap() != sample_size {
            self.prev_nums.resize(sample_size);
        }
    }

    pub fn report(&self) -> Value {
        json!({
            "prevNumsMean":   self.prev_nums.mean(),
            "prevNumsLen":    self.prev_nums.len(),
            "lastCheck":      self.last_check,
            "totalProcessed": self.total_processed,
            "trackedIps":     self.full_buffer_ip_props.len(),
        })
    }
}

// ── Per-interval counting ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReqCalcItem {
    pub ip:    IpAddr,
    pub count: u64,
    pub known: bool,
}

impl FreqInfo for ReqCalcItem {
    fn freq(&self) -> u64 {
        self.count
    }
}

fn is_ignored_ip(ip: &IpAddr) -> bool {
    ip.is_loopback() || ip.is_unspecified()
}

/// What one analysis pass found, before it is turned into notifications.
#[derive(Debug, Default)]
struct PassFindings {
    spike:      Option<f64>,
    suspicious: Vec<(ReqCalcItem, IpProps)>,
    outliers:   Vec<ReqCalcItem>,
    quartiles:  Option<(Quartiles, u64)>,
    min_reqs:   f64,
}

// ── Analyser ──────────────────────────────────────────────────────────────────

pub struct BotAnalyzer {
    app_type:       AppType,
    conf:           BotDetectionConf,
    interval:       Duration,
    notifications:  NotificationQueue,
    realtime_clock: bool,
    passes:         AtomicU64,
}

impl BotAnalyzer {
    pub fn new(
        app_type:       AppType,
        conf:           BotDetectionConf,
        interval:       Duration,
        notifications:  NotificationQueue,
        realtime_clock: bool,
    ) -> Self {
        Self { app_type, conf, interval, notifications, realtime_clock, passes: AtomicU64::new(0) }
    }

    /// One step of the state machine. Returns true when a buffer sweep is due.
    fn analyse<R: InputRecord>(
        &self,
        rec:    &R,
        now:    DateTime<Utc>,
        st:     &mut BotAnalysisState,
        buffer: &RecentRecords<R>,
    ) -> bool {
        st.total_processed += 1;

        let last_check = match st.last_check {
            Some(t) => t,
            None => {
                st.last_check = Some(rec.time());
                return false;
            }
        };
        if rec.time() - last_check < self.interval {
            return false;
        }
        st.last_check = Some(now);

        let num_rec     = buffer.total_num_of_records_since(last_check) as u64;
        let sample_size = st.prev_nums.add(num_rec);
        if sample_size < MIN_PREV_NUM_REQUESTS_SAMPLE_SIZE {
            debug!(app_type = %self.app_type, sample_size, num_rec, "bot analysis warming up");
            return false;
        }

        let mut found = PassFindings::default();

        // traffic spike
        let mean     = st.prev_nums.mean().unwrap_or(0.0);
        let increase = if mean > 0.0 { num_rec as f64 / mean } else { 0.0 };
        if mean > 0.0 && increase >= self.conf.traffic_reporting_threshold {
            found.spike = Some(increase);
            self.notifications.push(self.spike_notification(mean, num_rec, increase, last_check));
        }

        // per-IP counts for this interval, long-horizon counters alongside
        let mut last_period: HashMap<IpAddr, ReqCalcItem> = HashMap::new();
        let props = &mut st.full_buffer_ip_props;
        buffer.total_for_each(|e| {
            if e.time <= last_check {
                return;
            }
            let Some(ip) = e.record.client_ip() else { return };
            if is_ignored_ip(&ip) {
                return;
            }
            last_period
                .entry(ip)
                .or_insert(ReqCalcItem { ip, count: 0, known: false })
                .count += 1;
            let p = props
                .entry(ip)
                .or_insert(IpProps { num_any: 0, num_suspic: 0, last_upd: now });
            p.num_any += 1;
            if e.record.is_suspicious() {
                p.num_suspic += 1;
            }
            p.last_upd = now;
        });

        // suspicious share
        if !last_period.is_empty() {
            let total: u64 = last_period.values().map(|i| i.count).sum();
            let avg        = total as f64 / last_period.len() as f64;
            found.min_reqs = avg.max(SUSPICIOUS_RECORDS_MIN_REQUESTS as f64);
            for item in last_period.values() {
                if let Some(p) = props.get(&item.ip) {
                    if p.ratio() >= SUSPICIOUS_RECORDS_THRESHOLD && item.count as f64 >= found.min_reqs {
                        found.suspicious.push((item.clone(), p.clone()));
                    }
                }
            }
            found.suspicious.sort_by(|a, b| b.0.count.cmp(&a.0.count).then(a.0.ip.cmp(&b.0.ip)));
            if !found.suspicious.is_empty() {
                self.notifications.push(self.suspicious_notification(&found, last_check));
            }
        }

        // outliers
        let seq: OrderedFreqSeq<ReqCalcItem> = last_period.into_values().collect();
        match seq.quartiles() {
            None => debug!(ips = seq.len(), "too few IPs for outlier detection"),
            Some(q) => {
                let fence     = (q.q3 + self.conf.ip_outlier_coeff * q.iqr()).floor().max(0.0) as u64;
                let threshold = fence.max(self.conf.ip_outlier_min_freq);
                found.outliers = seq
                    .iter()
                    .filter(|i| i.count > threshold)
                    .map(|i| ReqCalcItem { known: self.conf.is_blocklisted(&i.ip), ..i.clone() })
                    .collect();
                found.outliers.sort_by(|a, b| b.count.cmp(&a.count).then(a.ip.cmp(&b.ip)));
                found.quartiles = Some((q, threshold));
                if !found.outliers.is_empty() {
                    self.notifications.push(self.outlier_notification(&found, last_check));
                }
            }
        }

        let cutoff = now - Duration::seconds(FULL_BUFFER_MAX_AGE_SECS);
        props.retain(|_, p| p.last_upd >= cutoff);

        info!(
            app_type = %self.app_type, num_rec, mean,
            spike = found.spike.is_some(), suspicious = found.suspicious.len(),
            outliers = found.outliers.len(), "bot analysis pass"
        );

        let pass = self.passes.fetch_add(1, Ordering::Relaxed) + 1;
        pass % BUFFER_CLEANUP_EVERY_PASSES == 0
    }

    // ── Notifications ─────────────────────────────────────────────────────────

    fn spike_notification(&self, mean: f64, num_rec: u64, increase: f64, last_check: DateTime<Utc>) -> Notification {
        Notification::new(
            self.app_type,
            NotificationKind::TrafficSpike,
            format!("{}: traffic spike detected", self.app_type),
        )
        .meta("mean", mean)
        .meta("numRec", num_rec)
        .meta("increase", increase)
        .meta("interval", self.interval.num_seconds())
        .meta("lastCheck", last_check.to_rfc3339())
        .paragraph(format!(
            "{} requests since {}, {:.2} times the long-term mean of {:.2} requests per interval.",
            num_rec, last_check.to_rfc3339(), increase, mean
        ))
        .paragraph(format!(
            "Analysis interval: {}s, reporting threshold: {:.2}.",
            self.interval.num_seconds(), self.conf.traffic_reporting_threshold
        ))
    }

    fn suspicious_notification(&self, found: &PassFindings, last_check: DateTime<Utc>) -> Notification {
        let ips: Vec<Value> = found
            .suspicious
            .iter()
            .map(|(item, p)| json!({
                "ip":        item.ip.to_string(),
                "count":     item.count,
                "numAny":    p.num_any,
                "numSuspic": p.num_suspic,
                "ratio":     p.ratio(),
            }))
            .collect();
        let mut n = Notification::new(
            self.app_type,
            NotificationKind::SuspiciousIps,
            format!("{}: suspicious IP addresses", self.app_type),
        )
        .meta("ips", ips)
        .meta("minRequests", found.min_reqs)
        .meta("lastCheck", last_check.to_rfc3339())
        .paragraph(format!(
            "IP addresses with a long-term suspicious request share of at least {:.0} % \
             and at least {:.0} requests since {}:",
            SUSPICIOUS_RECORDS_THRESHOLD * 100.0, found.min_reqs, last_check.to_rfc3339()
        ));
        for (item, p) in &found.suspicious {
            n = n.paragraph(format!(
                "{}: {} requests, suspicious ratio {:.2} ({} of {})",
                item.ip, item.count, p.ratio(), p.num_suspic, p.num_any
            ));
        }
        n
    }

    fn outlier_notification(&self, found: &PassFindings, last_check: DateTime<Utc>) -> Notification {
        let Some((q, threshold)) = found.quartiles else {
            return Notification::new(self.app_type, NotificationKind::IpOutliers, "IP outliers");
        };
        let rows: Vec<Value> = found
            .outliers
            .iter()
            .map(|i| json!({ "ip": i.ip.to_string(), "count": i.count, "known": i.known }))
            .collect();
        let mut n = Notification::new(
            self.app_type,
            NotificationKind::IpOutliers,
            format!("{}: IP request outliers", self.app_type),
        )
        .meta("outliers", rows)
        .meta("threshold", threshold)
        .meta("q1", q.q1)
        .meta("q3", q.q3)
        .meta("lastCheck", last_check.to_rfc3339())
        .paragraph(format!(
            "IP addresses with more than {} requests since {} (Q1 {:.1}, Q3 {:.1}, IQR {:.1}):",
            threshold, last_check.to_rfc3339(), q.q1, q.q3, q.iqr()
        ));
        for i in &found.outliers {
            let tag = if i.known { "  [blocklisted]" } else { "" };
            n = n.paragraph(format!("{:<40} {:>8}{}", i.ip, i.count, tag));
        }
        if let Some(increase) = found.spike {
            n = n
                .meta("increase", increase)
                .paragraph(format!("supported with suspicious increase of traffic ({:.2})", increase));
        }
        n
    }
}

impl<R: InputRecord> Preprocessor<R> for BotAnalyzer {
    fn preprocess(&self, rec: R, buffer: &RecentRecords<R>) -> Vec<R> {
        if rec.app_type() != self.app_type {
            warn!(
                expected = %self.app_type, got = %rec.app_type(),
                "bot analyser received a foreign record, passing through"
            );
            return vec![rec];
        }
        buffer.add_record(rec.clone());
        if !rec.should_be_analyzed() {
            return vec![rec];
        }

        let now   = current_time(rec.time(), self.realtime_clock);
        let sweep = buffer.update_state_data(now, |st| match st {
            AnalysisState::Bot(s) => self.analyse(&rec, now, s, buffer),
            other => {
                warn!("bot analyser found unexpected state {:?}", other.report());
                false
            }
        });
        if sweep {
            let removed = buffer.clear_old_records(now - Duration::seconds(BUFFER_CLEANUP_MAX_AGE_SECS));
            debug!(removed, "bot analyser buffer maintenance");
        }
        vec![rec]
    }

    fn empty_state(&self) -> AnalysisState {
        AnalysisState::Bot(BotAnalysisState::new(self.conf.prev_num_reqs_sample_size))
    }

    fn name(&self) -> &'static str {
        "bot"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BufferConf;
    use crate::notify::Notification;
    use crate::testutil::{at, TestRecord};
    use tokio::sync::mpsc::Receiver;

    const INTERVAL: i64 = 60;

    struct Rig {
        an:  BotAnalyzer,
        buf: RecentRecords<TestRecord>,
        rx:  Receiver<Notification>,
    }

    fn rig(conf: BotDetectionConf) -> Rig {
        let (queue, rx) = NotificationQueue::channel(64);
        let buf_conf = BufferConf {
            history_lookup_items:   100_000,
            analysis_interval_secs: INTERVAL as u64,
            bot_detection:          Some(conf.clone()),
            ..Default::default()
        };
        let an  = BotAnalyzer::new(AppType::Wag, conf, Duration::seconds(INTERVAL), queue, false);
        let buf = RecentRecords::new(buf_conf, Preprocessor::<TestRecord>::empty_state(&an));
        Rig { an, buf, rx }
    }

    impl Rig {
        fn send(&self, rec: TestRecord) {
            let out = self.an.preprocess(rec, &self.buf);
            assert_eq!(out.len(), 1);
        }

        fn burst(&self, ip: &str, t: i64, n: usize, suspicious: usize) {
            for i in 0..n {
                self.send(TestRecord::from_ip(ip, t).suspicious(i < suspicious));
            }
        }

        /// Pretend ten past intervals of `per_interval` requests each.
        fn seed(&self, per_interval: u64, last_check: i64) {
            let mut st = BotAnalysisState::new(20);
            for _ in 0..10 {
                st.prev_nums.add(per_interval);
            }
            st.last_check = Some(at(last_check));
            self.buf.set_state_data(AnalysisState::Bot(st));
        }

        fn state(&self) -> BotAnalysisState {
            match self.buf.get_state_data(at(0)) {
                AnalysisState::Bot(s) => s,
                other => panic!("unexpected {:?}", other),
            }
        }

        fn drain(&mut self) -> Vec<Notification> {
            let mut out = Vec::new();
            while let Ok(n) = self.rx.try_recv() {
                out.push(n);
            }
            out
        }
    }

    #[test]
    fn test_priming() {
        let mut r = rig(BotDetectionConf::default());
        r.send(TestRecord::from_ip("1.1.1.1", 0));
        let st = r.state();
        assert_eq!(st.last_check, Some(at(0)));
        assert_eq!(st.total_processed, 1);
        assert_eq!(r.buf.total_len(), 1);
        assert!(r.drain().is_empty());
    }

    #[test]
    fn test_warm_up_is_silent() {
        let mut r = rig(BotDetectionConf { traffic_reporting_threshold: 1.1, ..Default::default() });
        r.send(TestRecord::from_ip("1.1.1.1", 0));
        // nine intervals, the last one very loud
        for i in 1..=9 {
            let n = if i == 9 { 500 } else { 5 };
            r.burst("2.2.2.2", i * INTERVAL - 10, n, 0);
            r.send(TestRecord::from_ip("3.3.3.3", i * INTERVAL));
        }
        let st = r.state();
        assert_eq!(st.prev_nums.cap(), 20);
        assert_eq!(st.prev_nums.len(), 9);
        assert_eq!(st.last_check, Some(at(9 * INTERVAL)));
        assert!(r.drain().is_empty());
    }

    #[test]
    fn test_tenth_interval_reports() {
        let mut r = rig(BotDetectionConf { traffic_reporting_threshold: 1.1, ..Default::default() });
        r.send(TestRecord::from_ip("1.1.1.1", 0));
        for i in 1..=10 {
            let n = if i == 10 { 500 } else { 5 };
            r.burst("2.2.2.2", i * INTERVAL - 10, n, 0);
            r.send(TestRecord::from_ip("3.3.3.3", i * INTERVAL));
        }
        assert_eq!(r.state().prev_nums.len(), 10);

        let notes = r.drain();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].kind, NotificationKind::TrafficSpike);
        // previous marker + burst + current marker
        assert_eq!(notes[0].metadata["numRec"], 502);
        assert!((notes[0].metadata["mean"].as_f64().unwrap() - 56.5).abs() < 1e-9);
    }

    #[test]
    fn test_within_interval_no_pass() {
        let r = rig(BotDetectionConf::default());
        r.send(TestRecord::from_ip("1.1.1.1", 0));
        r.burst("1.1.1.1", 59, 3, 0);
        let st = r.state();
        assert_eq!(st.prev_nums.len(), 0);
        assert_eq!(st.last_check, Some(at(0)));
        assert_eq!(st.total_processed, 4);
    }

    #[test]
    fn test_spike_notification() {
        let mut r = rig(BotDetectionConf::default());
        r.seed(100, 0);
        for i in 0..400 {
            r.send(TestRecord::from_ip(&format!("10.0.{}.{}", i / 200, i % 200), 30));
        }
        r.send(TestRecord::from_ip("127.0.0.1", 60));

        let got: Vec<_> = r.drain().into_iter().filter(|n| n.kind == NotificationKind::TrafficSpike).collect();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].metadata["numRec"], 401);
        assert!(got[0].metadata["increase"].as_f64().unwrap() >= 3.0);
        assert!((got[0].metadata["mean"].as_f64().unwrap() - 1401.0 / 11.0).abs() < 1e-6);
    }

    #[test]
    fn test_outlier_and_blocklist() {
        let conf = BotDetectionConf {
            blocklist_ip: vec!["9.9.9.9".parse().unwrap()],
            ..Default::default()
        };
        let mut r = rig(conf);
        r.seed(100, 0);
        for i in 0..19 {
            r.send(TestRecord::from_ip(&format!("10.1.1.{}", i), 30));
        }
        r.burst("9.9.9.9", 30, 50, 0);
        r.send(TestRecord::from_ip("127.0.0.1", 60));

        let notes = r.drain();
        assert_eq!(notes.len(), 1);
        let n = &notes[0];
        assert_eq!(n.kind, NotificationKind::IpOutliers);
        assert_eq!(n.metadata["threshold"], 10);
        let rows = n.metadata["outliers"].as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["ip"], "9.9.9.9");
        assert_eq!(rows[0]["count"], 50);
        assert_eq!(rows[0]["known"], true);
    }

    #[test]
    fn test_outlier_note_mentions_spike() {
        let mut r = rig(BotDetectionConf::default());
        r.seed(10, 0);
        for i in 0..19 {
            r.send(TestRecord::from_ip(&format!("10.1.1.{}", i), 30));
        }
        r.burst("8.8.8.8", 30, 50, 0);
        r.send(TestRecord::from_ip("127.0.0.1", 60));

        let notes = r.drain();
        let outl  = notes.iter().find(|n| n.kind == NotificationKind::IpOutliers).unwrap();
        assert!(notes.iter().any(|n| n.kind == NotificationKind::TrafficSpike));
        assert!(outl.paragraphs.last().unwrap().starts_with("supported with suspicious increase of traffic"));
    }

    #[test]
    fn test_suspicious_ratio() {
        let mut r = rig(BotDetectionConf { ip_outlier_min_freq: 1000, ..Default::default() });
        r.seed(100, 0);
        r.burst("5.5.5.5", 30, 20, 13);
        for ip in ["6.6.6.1", "6.6.6.2", "6.6.6.3"] {
            r.send(TestRecord::from_ip(ip, 30).suspicious(true));
        }
        r.send(TestRecord::from_ip("127.0.0.1", 60));

        let notes = r.drain();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].kind, NotificationKind::SuspiciousIps);
        let ips = notes[0].metadata["ips"].as_array().unwrap();
        assert_eq!(ips.len(), 1);
        assert_eq!(ips[0]["ip"], "5.5.5.5");
        assert_eq!(ips[0]["numSuspic"], 13);

        let st = r.state();
        let y  = &st.full_buffer_ip_props[&"5.5.5.5".parse::<IpAddr>().unwrap()];
        assert_eq!((y.num_any, y.num_suspic), (20, 13));
        assert!(!st.full_buffer_ip_props.contains_key(&"127.0.0.1".parse::<IpAddr>().unwrap()));
    }

    #[test]
    fn test_full_buffer_props_expire() {
        let r = rig(BotDetectionConf::default());
        r.seed(100, 0);
        r.burst("4.4.4.4", 30, 2, 0);
        r.send(TestRecord::from_ip("127.0.0.1", 60));
        assert_eq!(r.state().full_buffer_ip_props.len(), 1);

        // next pass six hours later sees no traffic from 4.4.4.4
        r.send(TestRecord::from_ip("127.0.0.1", 6 * 3600));
        assert!(r.state().full_buffer_ip_props.is_empty());
    }

    #[test]
    fn test_periodic_buffer_sweep() {
        let r = rig(BotDetectionConf::default());
        r.seed(100, 0);
        r.burst("4.4.4.4", 1, 5, 0);
        // ten full passes, far enough apart that t=1 is older than six hours
        for i in 1..=10 {
            r.send(TestRecord::from_ip("127.0.0.1", 7 * 3600 + i * INTERVAL));
        }
        let mut oldest = None;
        r.buf.total_for_each(|e| {
            oldest = Some(oldest.map_or(e.time, |o: DateTime<Utc>| o.min(e.time)));
        });
        assert!(oldest.unwrap() > at(1));
    }

    #[test]
    fn test_foreign_and_unanalysed_records() {
        let r = rig(BotDetectionConf::default());
        r.send(TestRecord::from_ip("1.1.1.1", 0).with_app(AppType::Mapka));
        assert_eq!(r.buf.total_len(), 0);

        r.send(TestRecord::from_ip("1.1.1.1", 0).analysed(false));
        assert_eq!(r.buf.total_len(), 1);
        assert_eq!(r.state().last_check, None);
    }

    #[test]
    fn test_normalize_resizes_reservoir() {
        let mut st = BotAnalysisState::new(20);
        for v in 0..15 {
            st.prev_nums.add(v);
        }
        st.after_load_normalize(at(100), 10);
        assert_eq!(st.prev_nums.cap(), 10);
        assert_eq!(st.prev_nums.len(), 10);
        assert_eq!(st.last_check, Some(at(100)));

        let mut empty = BotAnalysisState::default();
        empty.after_load_normalize(at(100), 20);
        assert_eq!(empty.prev_nums.cap(), 20);
        assert_eq!(empty.last_check, None);
    }

    #[test]
    fn test_state_json_layout() {
        let mut st = BotAnalysisState::new(3);
        st.prev_nums.add(7);
        st.last_check = Some(at(0));
        st.full_buffer_ip_props.insert(
            "1.2.3.4".parse().unwrap(),
            IpProps { num_any: 2, num_suspic: 1, last_upd: at(0) },
        );
        let v = serde_json::to_value(&st).unwrap();
        assert_eq!(v["prevNums"]["cap"], 3);
        assert_eq!(v["fullBufferIPProps"]["1.2.3.4"]["numSuspic"], 1);
        assert!(v.get("timestamp").is_some());

        let back: BotAnalysisState = serde_json::from_value(v).unwrap();
        assert_eq!(back, st);
    }
}
