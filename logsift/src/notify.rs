// logsift/src/notify.rs
//
// Advisory notifications raised by the analysers.
//
// Analysers never await a transport. They push onto a bounded queue
// (try_send) and one worker task per process delivers through a Notifier
// with a per-send timeout:
//
//   BotAnalyzer ──try_send──► [queue: N] ──► worker ──timeout──► Notifier
//
// A full queue drops the new notification with a warning; a stuck notifier
// only ever holds one message and its own timeout.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{NotificationConf, NotifierKind};
use crate::error::NotifyError;
use crate::record::AppType;

// ── Message ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TrafficSpike,
    SuspiciousIps,
    IpOutliers,
}

/// Self-contained: carries a snapshot of everything it reports on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub app_type:   AppType,
    pub kind:       NotificationKind,
    pub subject:    String,
    pub metadata:   BTreeMap<String, Value>,
    pub paragraphs: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(app_type: AppType, kind: NotificationKind, subject: impl Into<String>) -> Self {
        Self {
            app_type,
            kind,
            subject:    subject.into(),
            metadata:   BTreeMap::new(),
            paragraphs: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn paragraph(mut self, text: impl Into<String>) -> Self {
        self.paragraphs.push(text.into());
        self
    }
}

// ── Notifier contract ─────────────────────────────────────────────────────────

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_notification(&self, msg: &Notification) -> Result<(), NotifyError>;

    fn name(&self) -> &'static str;
}

/// Used when no transport is configured.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn send_notification(&self, msg: &Notification) -> Result<(), NotifyError> {
        warn!(
            app_type = %msg.app_type, subject = %msg.subject,
            "notifier not configured, notification discarded"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "null"
    }
}

/// Appends one JSON object per notification.
pub struct JsonlNotifier {
    path: PathBuf,
}

impl JsonlNotifier {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Notifier for JsonlNotifier {
    async fn send_notification(&self, msg: &Notification) -> Result<(), NotifyError> {
        let mut line = serde_json::to_string(msg)?;
        line.push('\n');
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let mut f = OpenOptions::new().create(true).append(true).open(&self.path).await?;
        f.write_all(line.as_bytes()).await?;
        f.flush().await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "jsonl"
    }
}

pub fn build_notifier(conf: &NotificationConf) -> Arc<dyn Notifier> {
    match (conf.kind, &conf.path) {
        (NotifierKind::Jsonl, Some(path)) => Arc::new(JsonlNotifier::new(path.clone())),
        _                                 => Arc::new(NullNotifier),
    }
}

// ── Queue ─────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct NotificationQueue {
    tx:          mpsc::Sender<Notification>,
    pub dropped: Arc<AtomicU64>,
}

impl NotificationQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, dropped: Arc::new(AtomicU64::new(0)) }, rx)
    }

    /// Never blocks. Returns whether the notification was queued.
    pub fn push(&self, msg: Notification) -> bool {
        match self.tx.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(msg)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(subject = %msg.subject, "notification queue full, dropping");
                false
            }
            Err(TrySendError::Closed(msg)) => {
                warn!(subject = %msg.subject, "notification worker gone, dropping");
                false
            }
        }
    }
}

/// Deliver queued notifications until every queue handle is dropped.
/// Resolves to the number of successful sends.
pub fn spawn_worker(
    mut rx:   mpsc::Receiver<Notification>,
    notifier: Arc<dyn Notifier>,
    timeout:  Duration,
) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut sent = 0u64;
        while let Some(msg) = rx.recv().await {
            match tokio::time::timeout(timeout, notifier.send_notification(&msg)).await {
                Ok(Ok(())) => {
                    sent += 1;
                    debug!(notifier = notifier.name(), subject = %msg.subject, "notification sent");
                }
                Ok(Err(e)) => error!("failed to send notification '{}': {}", msg.subject, e),
                Err(_) => error!(
                    "failed to send notification '{}': {}",
                    msg.subject, NotifyError::Timeout(timeout.as_secs())
                ),
            }
        }
        info!(sent, "notification worker stopped");
        sent
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recording(Mutex<Vec<String>>);

    #[async_trait]
    impl Notifier for Recording {
        async fn send_notification(&self, msg: &Notification) -> Result<(), NotifyError> {
            self.0.lock().push(msg.subject.clone());
            Ok(())
        }
        fn name(&self) -> &'static str { "recording" }
    }

    struct Stuck;

    #[async_trait]
    impl Notifier for Stuck {
        async fn send_notification(&self, _msg: &Notification) -> Result<(), NotifyError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
        fn name(&self) -> &'static str { "stuck" }
    }

    fn msg(subject: &str) -> Notification {
        Notification::new(AppType::Wag, NotificationKind::TrafficSpike, subject)
            .meta("numRec", 400)
            .paragraph("spike")
    }

    #[test]
    fn test_full_queue_drops() {
        let (q, _rx) = NotificationQueue::channel(2);
        assert!(q.push(msg("a")));
        assert!(q.push(msg("b")));
        assert!(!q.push(msg("c")));
        assert_eq!(q.dropped.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_worker_delivers_in_order() {
        let (q, rx) = NotificationQueue::channel(8);
        let rec     = Arc::new(Recording(Mutex::new(Vec::new())));
        let handle  = spawn_worker(rx, rec.clone(), Duration::from_secs(1));
        q.push(msg("one"));
        q.push(msg("two"));
        drop(q);
        assert_eq!(handle.await.unwrap(), 2);
        assert_eq!(*rec.0.lock(), vec!["one".to_string(), "two".to_string()]);
    }

    #[tokio::test]
    async fn test_stuck_notifier_times_out() {
        let (q, rx) = NotificationQueue::channel(8);
        let handle  = spawn_worker(rx, Arc::new(Stuck), Duration::from_millis(20));
        q.push(msg("slow"));
        drop(q);
        assert_eq!(handle.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_jsonl_notifier_appends() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("n/notify.jsonl");
        let n    = JsonlNotifier::new(&path);
        n.send_notification(&msg("x")).await.unwrap();
        n.send_notification(&msg("y")).await.unwrap();

        let body = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<Notification> = body.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].subject, "y");
        assert_eq!(lines[0].metadata["numRec"], 400);
        assert_eq!(lines[0].kind, NotificationKind::TrafficSpike);
    }
}
