// logsift/src/engine/sink.rs
//
// Output sink: one JSON document per line, appended to a file or written to
// stdout. All pipelines share one sink through an mpsc channel.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::record::OutputRecord;
use crate::services::ServiceOutput;

#[derive(Debug, Clone)]
pub enum OutputSink {
    Stdout,
    File(PathBuf),
}

impl OutputSink {
    pub fn from_arg(path: Option<PathBuf>) -> Self {
        match path {
            Some(p) if p.as_os_str() != "-" => Self::File(p),
            _                                => Self::Stdout,
        }
    }
}

/// Drain `rx` into the sink. Resolves to the number of documents written.
pub async fn write_loop(rx: mpsc::Receiver<ServiceOutput>, sink: OutputSink) -> Result<u64> {
    match sink {
        OutputSink::Stdout => write_all(rx, tokio::io::stdout()).await,
        OutputSink::File(path) => {
            let f = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .with_context(|| format!("opening output {}", path.display()))?;
            info!(path = %path.display(), "writing output");
            write_all(rx, f).await
        }
    }
}

async fn write_all<W: AsyncWrite + Unpin>(mut rx: mpsc::Receiver<ServiceOutput>, mut w: W) -> Result<u64> {
    let mut written = 0u64;
    while let Some(rec) = rx.recv().await {
        let mut doc = match rec.to_json() {
            Ok(doc) => doc,
            Err(e)  => {
                warn!(id = rec.id(), "failed to encode output: {}", e);
                continue;
            }
        };
        doc.push(b'\n');
        w.write_all(&doc).await?;
        w.flush().await?;
        written += 1;
    }
    info!(written, "output sink closed");
    Ok(written)
}
