// logsift/src/record.rs
//
// Record capabilities shared by every service adapter.
//
//   InputRecord: what the buffer and the analysers need from a parsed line
//   OutputRecord: the normalised document handed to downstream sinks
//
// Concrete records live in services/. The core only ever talks to them
// through these two traits.

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Service tags ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppType {
    Mapka,
    Wag,
}

impl AppType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mapka => "mapka",
            Self::Wag   => "wag",
        }
    }
}

impl fmt::Display for AppType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Input side ────────────────────────────────────────────────────────────────

pub trait InputRecord: Clone + Send + Sync + 'static {
    /// Service the record was parsed for. Analysers compare it against the
    /// service they were configured for.
    fn app_type(&self) -> AppType;

    fn time(&self) -> DateTime<Utc>;

    /// `None` when the log line carries no usable address.
    fn client_ip(&self) -> Option<IpAddr>;

    fn user_agent(&self) -> &str;

    /// Buffer key. Computed once at parse time so repeated calls agree.
    fn clustering_client_id(&self) -> &str;

    fn is_processable(&self) -> bool;

    /// Adapter hint used by the long-horizon suspicion ratio.
    fn is_suspicious(&self) -> bool;

    /// Whether the bot analyser should run a pass for this record at all.
    fn should_be_analyzed(&self) -> bool {
        true
    }

    fn cluster_size(&self) -> usize;

    fn set_cluster(&mut self, size: usize);
}

// ── Output side ───────────────────────────────────────────────────────────────

/// GeoIP block embedded in output documents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoData {
    pub country_name: String,
    pub ip:           String,
    pub latitude:     f64,
    pub longitude:    f64,
    /// [lon, lat], the order document stores expect for geo points
    pub location:     [f64; 2],
    pub timezone:     String,
}

impl GeoData {
    pub fn new(ip: &str, country: &str, lat: f64, lon: f64, tz: &str) -> Self {
        Self {
            country_name: country.to_string(),
            ip:           ip.to_string(),
            latitude:     lat,
            longitude:    lon,
            location:     [lon, lat],
            timezone:     tz.to_string(),
        }
    }
}

pub trait OutputRecord: Serialize {
    /// Deterministic hex digest over the service's canonical fields.
    fn id(&self) -> &str;

    fn record_type(&self) -> &str;

    fn time(&self) -> DateTime<Utc>;

    fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    fn set_location(&mut self, country: &str, lat: f64, lon: f64, tz: &str);
}

/// Parse a possibly empty address string. Unparseable addresses count as
/// absent rather than as an error.
pub fn parse_ip(raw: &str) -> Option<IpAddr> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    // X-Forwarded-For may carry a chain; the client is the first hop.
    let first = raw.split(',').next().unwrap_or(raw).trim();
    first.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ip_forwarded_chain() {
        assert_eq!(parse_ip("10.0.0.1, 192.168.1.1"), Some("10.0.0.1".parse().unwrap()));
        assert_eq!(parse_ip("  ::1 "), Some("::1".parse().unwrap()));
        assert_eq!(parse_ip(""), None);
        assert_eq!(parse_ip("unknown"), None);
    }

    #[test]
    fn test_geo_location_order() {
        let g = GeoData::new("1.2.3.4", "Czechia", 50.08, 14.42, "Europe/Prague");
        assert_eq!(g.location, [14.42, 50.08]);
    }
}
