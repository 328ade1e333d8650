// logsift/src/services/wag.rs
//
// Word-at-a-glance application log. One JSON object per line:
//
//   {"level":"info","message":"","userId":42,"action":"search","queryType":"lemma",
//    "request":{"httpForwardedFor":"","userAgent":"Mozilla/5.0 ...","origin":"81.2.3.4",
//               "referer":""},
//    "lang1":"cs","lang2":"","timestamp":"2024-03-01T10:00:00.123+01:00",
//    "isMobileClient":false,"hasMatch":true,"isQuery":true,"hasPosSpecification":false}
//
// Buffered by client IP for the bot analyser. A record is suspicious when it
// is a query that matched nothing, or when its user agent hits a bot rule.

use std::collections::HashSet;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::record::{parse_ip, AppType, GeoData, InputRecord, OutputRecord};
use crate::services::ua::BotMatcher;
use crate::services::{cluster_key, format_datetime, sha1_hex};

/// Actions the bot analyser looks at.
const ANALYSED_ACTIONS: &[&str] = &["search", "compare", "translate"];

// ── Input ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRequest {
    #[serde(default)]
    http_forwarded_for: String,
    #[serde(default)]
    user_agent:         String,
    #[serde(default)]
    origin:             String,
    #[serde(default)]
    referer:            String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLine {
    #[serde(default)]
    level:                 String,
    #[serde(default)]
    message:               String,
    #[serde(default)]
    user_id:               Option<i64>,
    #[serde(default)]
    action:                String,
    #[serde(default)]
    query_type:            String,
    #[serde(default)]
    request:               RawRequest,
    #[serde(default)]
    lang1:                 String,
    #[serde(default)]
    lang2:                 String,
    timestamp:             String,
    #[serde(default)]
    is_mobile_client:      bool,
    #[serde(default)]
    has_match:             bool,
    #[serde(default)]
    is_query:              bool,
    #[serde(default)]
    has_pos_specification: bool,
}

#[derive(Debug, Clone)]
pub struct WagRecord {
    pub time:                  DateTime<Utc>,
    pub ip:                    Option<IpAddr>,
    pub user_id:               Option<i64>,
    pub action:                String,
    pub query_type:            String,
    pub user_agent:            String,
    pub referer:               String,
    pub lang1:                 String,
    pub lang2:                 String,
    pub is_mobile_client:      bool,
    pub has_match:             bool,
    pub is_query:              bool,
    pub has_pos_specification: bool,
    /// User agent matched a bot rule at parse time.
    pub bot_agent:             bool,
    cluster_key:               String,
    cluster_size:              usize,
}

pub fn parse_line(line_no: u64, line: &str, bots: &BotMatcher) -> Result<WagRecord, ParseError> {
    let raw: RawLine = serde_json::from_str(line)
        .map_err(|e| ParseError::line(line_no, e.to_string()))?;
    if raw.action.is_empty() {
        // service messages (startup, errors) share the log with requests
        let what = if raw.message.is_empty() { raw.level } else { raw.message };
        return Err(ParseError::minor(line_no, format!("non-request line: {}", what)));
    }
    let time = DateTime::parse_from_rfc3339(raw.timestamp.trim())
        .map_err(|e| ParseError::line(line_no, format!("bad timestamp '{}': {}", raw.timestamp, e)))?
        .with_timezone(&Utc);
    let req = raw.request;
    let ip  = parse_ip(&req.http_forwarded_for).or_else(|| parse_ip(&req.origin));
    let key = match ip {
        Some(ip) => ip.to_string(),
        None     => cluster_key(&[]),
    };
    Ok(WagRecord {
        time,
        ip,
        user_id:               raw.user_id,
        bot_agent:             bots.is_bot(&req.user_agent),
        action:                raw.action,
        query_type:            raw.query_type,
        user_agent:            req.user_agent,
        referer:               req.referer,
        lang1:                 raw.lang1,
        lang2:                 raw.lang2,
        is_mobile_client:      raw.is_mobile_client,
        has_match:             raw.has_match,
        is_query:              raw.is_query,
        has_pos_specification: raw.has_pos_specification,
        cluster_key:           key,
        cluster_size:          0,
    })
}

impl InputRecord for WagRecord {
    fn app_type(&self) -> AppType {
        AppType::Wag
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
        !self.action.is_empty()
    }

    fn is_suspicious(&self) -> bool {
        (self.is_query && !self.has_match) || self.bot_agent
    }

    fn should_be_analyzed(&self) -> bool {
        ANALYSED_ACTIONS.contains(&self.action.as_str())
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
pub struct WagOutput {
    pub id:                    String,
    #[serde(skip)]
    pub time:                  DateTime<Utc>,
    #[serde(rename = "type")]
    pub rec_type:              String,
    pub action:                String,
    pub datetime:              String,
    pub ip_address:            String,
    pub user_agent:            String,
    pub referring_domain:      String,
    pub user_id:               String,
    pub is_anonymous:          bool,
    pub is_query:              bool,
    pub is_mobile_client:      bool,
    pub has_pos_specification: bool,
    pub query_type:            String,
    pub lang1:                 String,
    pub lang2:                 String,
    pub queries:               Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geoip:                 Option<GeoData>,
}

impl WagOutput {
    fn compute_id(&self) -> String {
        let anon    = self.is_anonymous.to_string();
        let queries = self.queries.join("--");
        sha1_hex(&[
            &self.rec_type,
            &self.action,
            &anon,
            &self.datetime,
            &self.ip_address,
            &self.user_id,
            &self.query_type,
            &queries,
            &self.lang1,
            &self.lang2,
        ])
    }
}

/// Referer reduced to its host, which is all the output keeps.
fn referring_domain(referer: &str) -> String {
    let rest = referer.split_once("://").map(|(_, r)| r).unwrap_or(referer);
    rest.split(['/', '?', '#']).next().unwrap_or("").to_string()
}

pub fn transform(rec: &WagRecord, tz_shift_min: i32, anonymous_users: &HashSet<String>) -> WagOutput {
    let user_id = rec.user_id.map(|u| u.to_string()).unwrap_or_default();
    let mut out = WagOutput {
        id:                    String::new(),
        time:                  rec.time,
        rec_type:              AppType::Wag.as_str().to_string(),
        action:                rec.action.clone(),
        datetime:              format_datetime(rec.time, tz_shift_min),
        ip_address:            rec.ip.map(|ip| ip.to_string()).unwrap_or_default(),
        user_agent:            rec.user_agent.clone(),
        referring_domain:      referring_domain(&rec.referer),
        is_anonymous:          user_id.is_empty() || anonymous_users.contains(&user_id),
        user_id,
        is_query:              rec.is_query,
        is_mobile_client:      rec.is_mobile_client,
        has_pos_specification: rec.has_pos_specification,
        query_type:            rec.query_type.clone(),
        lang1:                 rec.lang1.clone(),
        lang2:                 rec.lang2.clone(),
        queries:               Vec::new(),
        geoip:                 None,
    };
    out.id = out.compute_id();
    out
}

impl OutputRecord for WagOutput {
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
