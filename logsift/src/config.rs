// logsift/src/config.rs
//
// JSON configuration (camelCase keys):
//
//   {
//     "logBufferStateDir": "/var/lib/logsift",
//     "notifications": { "kind": "jsonl", "path": "...", "queueSize": 64, "timeoutSecs": 10 },
//     "botUserAgents": ["bot", "crawler"],
//     "logFiles": [ { "appType": "wag", "srcPath": "...", "buffer": { ... } } ]
//   }
//
// A log file's `buffer` block enables at most one analyser:
//   clusteringDbScan → temporal clustering
//   botDetection     → traffic spike / IP outlier detection
// Log files declaring the same `buffer.id` share one record buffer.

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::record::AppType;

// ── Analyser blocks ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusteringDbScanConf {
    /// Minimum neighbours (self included) for a core record.
    pub min_density: usize,
    /// Neighbourhood radius in seconds.
    pub epsilon:     f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotDetectionConf {
    pub ip_outlier_coeff:            f64,
    pub ip_outlier_min_freq:         u64,
    #[serde(default)]
    pub blocklist_ip:                Vec<IpAddr>,
    pub traffic_reporting_threshold: f64,
    pub prev_num_reqs_sample_size:   usize,
}

impl Default for BotDetectionConf {
    fn default() -> Self {
        Self {
            ip_outlier_coeff:            1.5,
            ip_outlier_min_freq:         10,
            blocklist_ip:                Vec::new(),
            traffic_reporting_threshold: 3.0,
            prev_num_reqs_sample_size:   20,
        }
    }
}

impl BotDetectionConf {
    pub fn is_blocklisted(&self, ip: &IpAddr) -> bool {
        self.blocklist_ip.contains(ip)
    }
}

// ── Buffer ────────────────────────────────────────────────────────────────────

/// Longest accepted analysis interval and DBSCAN epsilon (one week).
pub const MAX_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferConf {
    #[serde(default)]
    pub id:                     Option<String>,
    pub history_lookup_items:   usize,
    pub analysis_interval_secs: u64,
    #[serde(default)]
    pub clustering_db_scan:     Option<ClusteringDbScanConf>,
    #[serde(default)]
    pub bot_detection:          Option<BotDetectionConf>,
}

impl Default for BufferConf {
    fn default() -> Self {
        Self {
            id:                     None,
            history_lookup_items:   1000,
            analysis_interval_secs: 60,
            clustering_db_scan:     None,
            bot_detection:          None,
        }
    }
}

impl BufferConf {
    pub fn analysis_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.analysis_interval_secs as i64)
    }

    /// Reservoir capacity the bot state must be normalised to.
    pub fn prev_nums_sample_size(&self) -> usize {
        self.bot_detection
            .as_ref()
            .map(|b| b.prev_num_reqs_sample_size)
            .unwrap_or(0)
    }

    pub fn validate(&self, src: &str) -> Result<(), ConfigError> {
        if self.history_lookup_items == 0 {
            return Err(ConfigError::invalid(src, "historyLookupItems must be > 0"));
        }
        if self.analysis_interval_secs == 0 || self.analysis_interval_secs > MAX_INTERVAL_SECS {
            return Err(ConfigError::invalid(
                src,
                format!("analysisIntervalSecs must be in 1..={}", MAX_INTERVAL_SECS),
            ));
        }
        if self.clustering_db_scan.is_some() && self.bot_detection.is_some() {
            return Err(ConfigError::invalid(
                src,
                "clusteringDbScan and botDetection cannot share one buffer",
            ));
        }
        if let Some(c) = &self.clustering_db_scan {
            if c.min_density == 0 {
                return Err(ConfigError::invalid(src, "clusteringDbScan.minDensity must be > 0"));
            }
            if !(c.epsilon > 0.0 && c.epsilon <= MAX_INTERVAL_SECS as f64) {
                return Err(ConfigError::invalid(
                    src,
                    format!("clusteringDbScan.epsilon must be in (0, {}]", MAX_INTERVAL_SECS),
                ));
            }
        }
        if let Some(b) = &self.bot_detection {
            if b.prev_num_reqs_sample_size == 0 {
                return Err(ConfigError::invalid(src, "botDetection.prevNumReqsSampleSize must be > 0"));
            }
            if !(b.traffic_reporting_threshold > 0.0) {
                return Err(ConfigError::invalid(src, "botDetection.trafficReportingThreshold must be > 0"));
            }
            if !(b.ip_outlier_coeff >= 0.0) {
                return Err(ConfigError::invalid(src, "botDetection.ipOutlierCoeff must be >= 0"));
            }
        }
        Ok(())
    }
}

// ── Log files ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFileConf {
    pub app_type:        AppType,
    pub src_path:        PathBuf,
    /// Minutes added to output timestamps.
    #[serde(default)]
    pub tz_shift:        i32,
    #[serde(default)]
    pub anonymous_users: Vec<String>,
    #[serde(default)]
    pub exclude_ip_list: Vec<IpAddr>,
    /// Use the wall clock instead of record time as "now" in analysers.
    #[serde(default)]
    pub realtime_clock:  bool,
    #[serde(default)]
    pub buffer:          Option<BufferConf>,
}

impl LogFileConf {
    pub fn excluded_ips(&self) -> HashSet<IpAddr> {
        self.exclude_ip_list.iter().copied().collect()
    }

    pub fn src_label(&self) -> String {
        self.src_path.display().to_string()
    }
}

// ── Notifications ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierKind {
    Null,
    Jsonl,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationConf {
    pub kind:         NotifierKind,
    #[serde(default)]
    pub path:         Option<PathBuf>,
    #[serde(default = "default_queue_size")]
    pub queue_size:   usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_queue_size() -> usize { 64 }
fn default_timeout_secs() -> u64 { 10 }

impl Default for NotificationConf {
    fn default() -> Self {
        Self {
            kind:         NotifierKind::Null,
            path:         None,
            queue_size:   default_queue_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

// ── Root ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub log_files:            Vec<LogFileConf>,
    #[serde(default = "default_state_dir")]
    pub log_buffer_state_dir: PathBuf,
    #[serde(default)]
    pub notifications:        NotificationConf,
    /// Case-insensitive user-agent substrings marking bots. Empty means the
    /// built-in list.
    #[serde(default)]
    pub bot_user_agents:      Vec<String>,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/tmp/logsift_state")
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let conf: Self = serde_json::from_str(&raw)?;
        conf.validate()?;
        Ok(conf)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_files.is_empty() {
            return Err(ConfigError::NoLogFiles);
        }
        for lf in &self.log_files {
            let src = lf.src_label();
            if let Some(buf) = &lf.buffer {
                buf.validate(&src)?;
            }
        }
        if self.notifications.kind == NotifierKind::Jsonl && self.notifications.path.is_none() {
            return Err(ConfigError::invalid("notifications", "jsonl notifier needs a path"));
        }
        if self.notifications.queue_size == 0 {
            return Err(ConfigError::invalid("notifications", "queueSize must be > 0"));
        }
        Ok(())
    }
}
