// logsift/src/testutil.rs
//
// Minimal InputRecord for unit tests.

use std::net::IpAddr;

use chrono::{DateTime, TimeZone, Utc};

use crate::record::{AppType, InputRecord};

pub const BASE_TS: i64 = 1_700_000_000;

/// Test clock: `secs` after a fixed base instant.
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(BASE_TS + secs, 0).unwrap()
}

#[derive(Debug, Clone)]
pub struct TestRecord {
    pub key:          String,
    pub time:         DateTime<Utc>,
    pub ip:           Option<IpAddr>,
    pub suspicious:   bool,
    pub analysed:     bool,
    pub app:          AppType,
    pub cluster_size: usize,
}

impl TestRecord {
    pub fn new(key: &str, secs: i64) -> Self {
        Self {
            key:          key.to_string(),
            time:         at(secs),
            ip:           None,
            suspicious:   false,
            analysed:     true,
            app:          AppType::Wag,
            cluster_size: 0,
        }
    }

    /// Keyed by its own address, the way IP-keyed services buffer.
    pub fn from_ip(ip: &str, secs: i64) -> Self {
        let mut r = Self::new(ip, secs);
        r.ip = ip.parse().ok();
        r
    }

    pub fn suspicious(mut self, v: bool) -> Self {
        self.suspicious = v;
        self
    }

    pub fn analysed(mut self, v: bool) -> Self {
        self.analysed = v;
        self
    }

    pub fn with_app(mut self, app: AppType) -> Self {
        self.app = app;
        self
    }
}

impl InputRecord for TestRecord {
    fn app_type(&self) -> AppType { self.app }
    fn time(&self) -> DateTime<Utc> { self.time }
    fn client_ip(&self) -> Option<IpAddr> { self.ip }
    fn user_agent(&self) -> &str { "" }
    fn clustering_client_id(&self) -> &str { &self.key }
    fn is_processable(&self) -> bool { true }
    fn is_suspicious(&self) -> bool { self.suspicious }
    fn should_be_analyzed(&self) -> bool { self.analysed }
    fn cluster_size(&self) -> usize { self.cluster_size }
    fn set_cluster(&mut self, size: usize) { self.cluster_size = size; }
}
