// logsift/src/engine/source.rs
//
// Line source for one log file. Batch mode reads to EOF and stops; tail mode
// skips what is already there and then polls for appended lines.
//
// Unparseable lines never stop the source: minor ones (a field the service
// needs is missing) are logged at debug, the rest at info.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::services::{LineParser, ServiceRecord};

const TAIL_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    Batch,
    Tail,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SourceStats {
    pub lines:        u64,
    pub records:      u64,
    pub minor_errors: u64,
    pub errors:       u64,
}

/// Feed parsed records into `tx` until EOF (batch), shutdown, or the
/// pipeline hangs up.
pub async fn read_lines(
    path:         PathBuf,
    parser:       LineParser,
    tx:           mpsc::Sender<ServiceRecord>,
    mode:         ReadMode,
    mut shutdown: watch::Receiver<bool>,
) -> Result<SourceStats> {
    let file = File::open(&path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    let mut lines = BufReader::new(file).lines();
    let mut stats = SourceStats::default();

    if mode == ReadMode::Tail {
        while lines.next_line().await?.is_some() {
            stats.lines += 1;
        }
        info!(path = %path.display(), skipped = stats.lines, "tailing");
    } else {
        info!(path = %path.display(), app_type = %parser.app_type(), "reading");
    }

    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            line = lines.next_line() => line?,
        };
        let line = match next {
            Some(line) => line,
            None if mode == ReadMode::Batch => break,
            None => {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(TAIL_POLL) => continue,
                }
            }
        };
        stats.lines += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parser.parse(stats.lines, line) {
            Ok(rec) => {
                stats.records += 1;
                if tx.send(rec).await.is_err() {
                    break;
                }
            }
            Err(e) if e.is_minor() => {
                stats.minor_errors += 1;
                debug!(path = %path.display(), "skipping line: {}", e);
            }
            Err(e) => {
                stats.errors += 1;
                info!(path = %path.display(), "unparseable line: {}", e);
            }
        }
    }

    info!(
        path = %path.display(), lines = stats.lines, records = stats.records,
        minor_errors = stats.minor_errors, errors = stats.errors,
        "source finished"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Arc;

    use crate::record::{AppType, InputRecord};
    use crate::services::ua::BotMatcher;

    const MAPKA: &str = r#"{"datetime":"2023-07-04T17:18:22+02:00","extra":{"session_selector":"a","user_id":"1","url":"/m","ip":"1.2.3.4"}}"#;
    const NO_URL: &str = r#"{"datetime":"2023-07-04T17:18:23+02:00","extra":{"session_selector":"a","user_id":"1","ip":"1.2.3.4"}}"#;

    fn parser() -> LineParser {
        LineParser::new(AppType::Mapka, Arc::new(BotMatcher::new::<&str>(&[]).unwrap()))
    }

    #[tokio::test]
    async fn test_batch_reads_to_eof() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "{}", MAPKA).unwrap();
        writeln!(f).unwrap();
        writeln!(f, "{}", NO_URL).unwrap();
        writeln!(f, "garbage").unwrap();
        writeln!(f, "{}", MAPKA).unwrap();
        f.flush().unwrap();

        let (tx, mut rx)  = mpsc::channel(16);
        let (_stop, stop) = watch::channel(false);
        let stats = read_lines(f.path().to_path_buf(), parser(), tx, ReadMode::Batch, stop)
            .await
            .unwrap();

        assert_eq!(stats.lines, 5);
        assert_eq!(stats.records, 2);
        assert_eq!(stats.minor_errors, 1);
        assert_eq!(stats.errors, 1);
        let first = rx.recv().await.unwrap();
        assert_eq!(first.app_type(), AppType::Mapka);
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_tail_skips_existing_and_stops_on_shutdown() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "{}", MAPKA).unwrap();
        f.flush().unwrap();

        let (tx, mut rx)     = mpsc::channel(16);
        let (stop_tx, stop)  = watch::channel(false);
        let path = f.path().to_path_buf();
        let task = tokio::spawn(read_lines(path, parser(), tx, ReadMode::Tail, stop));

        tokio::time::sleep(Duration::from_millis(100)).await;
        writeln!(f, "{}", MAPKA).unwrap();
        f.flush().unwrap();
        let rec = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert!(rec.is_some());

        stop_tx.send(true).unwrap();
        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.records, 1);
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let (tx, _rx)     = mpsc::channel(1);
        let (_stop, stop) = watch::channel(false);
        let res = read_lines("/nonexistent/logsift.log".into(), parser(), tx, ReadMode::Batch, stop).await;
        assert!(res.is_err());
    }
}
