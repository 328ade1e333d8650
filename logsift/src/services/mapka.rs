// logsift/src/services/mapka.rs
//
// Map application access log. One JSON object per line:
//
//   {"message":"Marker","level":200,"level_name":"INFO","channel":"access",
//    "datetime":"2023-07-04T17:18:22.294828+02:00",
//    "extra":{"session_selector":"aa7e3e2a322a","user_id":"4321","url":"/markers",
//             "ip":"::1","http_method":"POST","server":"localhost",
//             "referrer":"http://localhost:8083/"}}
//
// Every line is one UI interaction, so the service is meant to run with the
// clustering analyser: bursts from one session collapse into one query.

use std::collections::HashSet;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::record::{parse_ip, AppType, GeoData, InputRecord, OutputRecord};
use crate::services::{cluster_key, format_datetime, sha1_hex};

// ── Input ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
struct RawExtra {
    #[serde(default)]
    session_selector: String,
    #[serde(default)]
    user_id:          String,
    #[serde(default)]
    url:              String,
    #[serde(default)]
    ip:               String,
    #[serde(default)]
    forwarded_for:    String,
    #[serde(default)]
    http_method:      String,
    #[serde(default)]
    referrer:         String,
    #[serde(default)]
    user_agent:       String,
}

#[derive(Debug, Clone, Deserialize)]
struct RawLine {
    datetime: String,
    #[serde(default)]
    extra:    RawExtra,
}

#[derive(Debug, Clone)]
pub struct MapkaRecord {
    pub time:             DateTime<Utc>,
    pub ip:               Option<IpAddr>,
    pub raw_ip:           String,
    pub session_selector: String,
    pub user_id:          String,
    pub url:              String,
    pub http_method:      String,
    pub referrer:         String,
    pub user_agent:       String,
    cluster_key:          String,
    cluster_size:         usize,
}

pub fn parse_line(line_no: u64, line: &str) -> Result<MapkaRecord, ParseError> {
    let raw: RawLine = serde_json::from_str(line)
        .map_err(|e| ParseError::line(line_no, e.to_string()))?;
    let time = DateTime::parse_from_rfc3339(raw.datetime.trim())
        .map_err(|e| ParseError::line(line_no, format!("bad datetime '{}': {}", raw.datetime, e)))?
        .with_timezone(&Utc);
    let x = raw.extra;
    if x.url.is_empty() {
        return Err(ParseError::minor(line_no, "no URL, not an interaction record"));
    }
    // proxies put the client into forwarded_for
    let raw_ip = if x.forwarded_for.trim().is_empty() { x.ip } else { x.forwarded_for };
    let ip     = parse_ip(&raw_ip);
    let key    = cluster_key(&[&x.session_selector, &x.user_id, &raw_ip]);
    Ok(MapkaRecord {
        time,
        ip,
        raw_ip,
        session_selector: x.session_selector,
        user_id:          x.user_id,
        url:              x.url,
        http_method:      x.http_method,
        referrer:         x.referrer,
        user_agent:       x.user_agent,
        cluster_key:      key,
        cluster_size:     0,
    })
}

impl InputRecord for MapkaRecord {
    fn app_type(&self) -> AppType {
        AppType::Mapka
    }

    fn time(&self) -> DateTime<Utc> {
        self.time
    }

    fn client_ip(&self) -> Option<IpAddr> {
        self.ip
    }

    fn user_agent(&self) -> &str {
        &self.user_agent
    }

    fn clustering_client_id(&self) -> &str {
        &self.cluster_key
    }

    fn is_processable(&self) -> bool {
        true
    }

    fn is_suspicious(&self) -> bool {
        false
    }

    fn cluster_size(&self) -> usize {
        self.cluster_size
    }

    fn set_cluster(&mut self, size: usize) {
        self.cluster_size = size;
    }
}

// ── Output ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapkaOutput {
    pub id:           String,
    #[serde(skip)]
    pub time:         DateTime<Utc>,
    #[serde(rename = "type")]
    pub rec_type:     String,
    pub action:       String,
    pub path:         String,
    pub datetime:     String,
    pub ip_address:   String,
    pub user_agent:   String,
    pub user_id:      String,
    pub is_anonymous: bool,
    pub is_query:     bool,
    pub cluster_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geoip:        Option<GeoData>,
}

impl MapkaOutput {
    fn compute_id(&self) -> String {
        sha1_hex(&[&self.rec_type, &self.path, &self.datetime, &self.ip_address, &self.user_id])
    }
}

pub fn transform(rec: &MapkaRecord, tz_shift_min: i32, anonymous_users: &HashSet<String>) -> MapkaOutput {
    let mut out = MapkaOutput {
        id:           String::new(),
        time:         rec.time,
        rec_type:     AppType::Mapka.as_str().to_string(),
        action:       "interaction".to_string(),
        path:         rec.url.clone(),
        datetime:     format_datetime(rec.time, tz_shift_min),
        ip_address:   rec.ip.map(|ip| ip.to_string()).unwrap_or_default(),
        user_agent:   rec.user_agent.clone(),
        user_id:      rec.user_id.clone(),
        is_anonymous: rec.user_id.is_empty() || anonymous_users.contains(&rec.user_id),
        is_query:     rec.cluster_size > 0,
        cluster_size: rec.cluster_size,
        geoip:        None,
    };
    out.id = out.compute_id();
    out
}

impl OutputRecord for MapkaOutput {
    fn id(&self) -> &str {
        &self.id
    }

    fn record_type(&self) -> &str {
        &self.rec_type
    }

    fn time(&self) -> DateTime<Utc> {
        self.time
    }

    fn set_location(&mut self, country: &str, lat: f64, lon: f64, tz: &str) {
        self.geoip = Some(GeoData::new(&self.ip_address, country, lat, lon, tz));
    }
}
