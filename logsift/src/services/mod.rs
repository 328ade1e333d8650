// logsift/src/services/mod.rs
//
// Service adapters. Each service brings a line parser, an InputRecord, an
// OutputRecord and a transform. The pipeline only sees the two sum types
// below, so adding a service means adding one variant to each.

pub mod mapka;
pub mod ua;
pub mod wag;

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Serialize;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::config::LogFileConf;
use crate::error::{ParseError, TransformError};
use crate::record::{AppType, InputRecord, OutputRecord};

use self::mapka::{MapkaOutput, MapkaRecord};
use self::ua::BotMatcher;
use self::wag::{WagOutput, WagRecord};

// ── Shared helpers ────────────────────────────────────────────────────────────

/// Buffer key from identifying fields. With nothing to identify the client a
/// random UUID is hashed instead, which gives the record a key of its own.
pub fn cluster_key(parts: &[&str]) -> String {
    let mut h = Sha256::new();
    if parts.iter().any(|p| !p.is_empty()) {
        h.update(parts.join("#").as_bytes());
    } else {
        h.update(uuid::Uuid::new_v4().to_string().as_bytes());
    }
    hex::encode(&h.finalize()[..16])
}

/// Lowercase SHA-1 hex over the concatenated canonical fields.
pub fn sha1_hex(fields: &[&str]) -> String {
    let mut h = Sha1::new();
    for f in fields {
        h.update(f.as_bytes());
    }
    hex::encode(h.finalize())
}

/// RFC 3339 at second precision, shifted by `tz_shift_min`, "+00:00" offset.
pub fn format_datetime(t: DateTime<Utc>, tz_shift_min: i32) -> String {
    (t + Duration::minutes(tz_shift_min as i64)).to_rfc3339_opts(SecondsFormat::Secs, false)
}

// ── Input sum type ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum ServiceRecord {
    Mapka(MapkaRecord),
    Wag(WagRecord),
}

macro_rules! each_record {
    ($self:expr, $r:ident => $body:expr) => {
        match $self {
            ServiceRecord::Mapka($r) => $body,
            ServiceRecord::Wag($r)   => $body,
        }
    };
}

impl InputRecord for ServiceRecord {
    fn app_type(&self) -> AppType {
        each_record!(self, r => r.app_type())
    }

    fn time(&self) -> DateTime<Utc> {
        each_record!(self, r => r.time())
    }

    fn client_ip(&self) -> Option<IpAddr> {
        each_record!(self, r => r.client_ip())
    }

    fn user_agent(&self) -> &str {
        each_record!(self, r => r.user_agent())
    }

    fn clustering_client_id(&self) -> &str {
        each_record!(self, r => r.clustering_client_id())
    }

    fn is_processable(&self) -> bool {
        each_record!(self, r => r.is_processable())
    }

    fn is_suspicious(&self) -> bool {
        each_record!(self, r => r.is_suspicious())
    }

    fn should_be_analyzed(&self) -> bool {
        each_record!(self, r => r.should_be_analyzed())
    }

    fn cluster_size(&self) -> usize {
        each_record!(self, r => r.cluster_size())
    }

    fn set_cluster(&mut self, size: usize) {
        each_record!(self, r => r.set_cluster(size))
    }
}

// ── Output sum type ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ServiceOutput {
    Mapka(MapkaOutput),
    Wag(WagOutput),
}

impl OutputRecord for ServiceOutput {
    fn id(&self) -> &str {
        match self {
            Self::Mapka(o) => o.id(),
            Self::Wag(o)   => o.id(),
        }
    }

    fn record_type(&self) -> &str {
        match self {
            Self::Mapka(o) => o.record_type(),
            Self::Wag(o)   => o.record_type(),
        }
    }

    fn time(&self) -> DateTime<Utc> {
        match self {
            Self::Mapka(o) => o.time(),
            Self::Wag(o)   => o.time(),
        }
    }

    fn set_location(&mut self, country: &str, lat: f64, lon: f64, tz: &str) {
        match self {
            Self::Mapka(o) => o.set_location(country, lat, lon, tz),
            Self::Wag(o)   => o.set_location(country, lat, lon, tz),
        }
    }
}

// ── Parser ────────────────────────────────────────────────────────────────────

pub struct LineParser {
    app_type: AppType,
    bots:     Arc<BotMatcher>,
}

impl LineParser {
    pub fn new(app_type: AppType, bots: Arc<BotMatcher>) -> Self {
        Self { app_type, bots }
    }

    pub fn app_type(&self) -> AppType {
        self.app_type
    }

    pub fn parse(&self, line_no: u64, line: &str) -> Result<ServiceRecord, ParseError> {
        match self.app_type {
            AppType::Mapka => mapka::parse_line(line_no, line).map(ServiceRecord::Mapka),
            AppType::Wag   => wag::parse_line(line_no, line, &self.bots).map(ServiceRecord::Wag),
        }
    }
}

// ── Transformer ───────────────────────────────────────────────────────────────

pub struct Transformer {
    app_type:        AppType,
    tz_shift_min:    i32,
    anonymous_users: HashSet<String>,
}

impl Transformer {
    pub fn new(app_type: AppType, tz_shift_min: i32, anonymous_users: HashSet<String>) -> Self {
        Self { app_type, tz_shift_min, anonymous_users }
    }

    pub fn from_conf(conf: &LogFileConf) -> Self {
        Self::new(
            conf.app_type,
            conf.tz_shift,
            conf.anonymous_users.iter().cloned().collect(),
        )
    }

    pub fn transform(&self, rec: &ServiceRecord) -> Result<ServiceOutput, TransformError> {
        match (self.app_type, rec) {
            (AppType::Mapka, ServiceRecord::Mapka(r)) => Ok(ServiceOutput::Mapka(
                mapka::transform(r, self.tz_shift_min, &self.anonymous_users),
            )),
            (AppType::Wag, ServiceRecord::Wag(r)) => Ok(ServiceOutput::Wag(
                wag::transform(r, self.tz_shift_min, &self.anonymous_users),
            )),
            (expected, got) => Err(TransformError::WrongRecordType {
                expected: expected.as_str(),
                got:      got.app_type().as_str(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_cluster_key() {
        assert_eq!(cluster_key(&["s", "u", "1.2.3.4"]), cluster_key(&["s", "u", "1.2.3.4"]));
        assert_ne!(cluster_key(&["s", "u", ""]), cluster_key(&["", "su", ""]));
        // nothing to go on: every call is its own key
        assert_ne!(cluster_key(&["", "", ""]), cluster_key(&["", "", ""]));
        assert_eq!(cluster_key(&["x"]).len(), 32);
    }

    #[test]
    fn test_sha1_hex() {
        assert_eq!(sha1_hex(&["abc"]), "a9993e364706816aba3e25717850c26c9cd0d89d");
        assert_eq!(sha1_hex(&["a", "bc"]), sha1_hex(&["abc"]));
    }

    #[test]
    fn test_format_datetime() {
        let t = Utc.with_ymd_and_hms(2024, 1, 31, 23, 30, 0).unwrap();
        assert_eq!(format_datetime(t, 0), "2024-01-31T23:30:00+00:00");
        assert_eq!(format_datetime(t, 60), "2024-02-01T00:30:00+00:00");
    }

    #[test]
    fn test_parser_and_transformer_dispatch() {
        let parser = LineParser::new(AppType::Mapka, Arc::new(BotMatcher::new::<&str>(&[]).unwrap()));
        let line   = r#"{"datetime":"2024-01-01T00:00:00+00:00","extra":{"user_id":"7","url":"/a","ip":"1.2.3.4"}}"#;
        let rec    = parser.parse(1, line).unwrap();
        assert_eq!(rec.app_type(), AppType::Mapka);

        let ok = Transformer::new(AppType::Mapka, 0, HashSet::new()).transform(&rec).unwrap();
        assert_eq!(ok.record_type(), "mapka");
        assert_eq!(ok.time(), rec.time());

        let err = Transformer::new(AppType::Wag, 0, HashSet::new()).transform(&rec);
        assert!(matches!(err, Err(TransformError::WrongRecordType { expected: "wag", got: "mapka" })));
    }
}
