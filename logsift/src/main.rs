// logsift/src/main.rs
//
// logsift: access-log normaliser with clustering and bot-detection analysers
//
// Two read modes:
//   batch   read every configured log to EOF, flush state, exit
//   tail    skip existing content and follow appended lines until Ctrl+C
//
// Usage:
//   logsift --config logsift.json --mode batch --output out.jsonl
//   logsift --config logsift.json --mode tail
//   logsift --config logsift.json --worklog-reset    # drop persisted analysis state first

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, ValueEnum};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use logsift::analysis::{build_preprocessor, AnalysisState};
use logsift::config::{BufferConf, Config};
use logsift::engine::pipeline::ServicePipeline;
use logsift::engine::sink::{self, OutputSink};
use logsift::engine::source::{self, ReadMode};
use logsift::notify::{build_notifier, spawn_worker, NotificationQueue};
use logsift::services::ua::BotMatcher;
use logsift::services::{LineParser, ServiceRecord};
use logsift::state::buffer::RecentRecords;
use logsift::state::registry::BufferRegistry;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "logsift",
    about   = "Access-log normaliser with clustering and bot-detection analysers",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    #[arg(long, help = "JSON config file")]
    config: PathBuf,

    #[arg(long, value_enum, default_value = "batch")]
    mode: Mode,

    #[arg(long, help = "Remove persisted analysis state before starting")]
    worklog_reset: bool,

    #[arg(long, help = "Output JSONL file (stdout when omitted or '-')")]
    output: Option<PathBuf>,

    #[arg(long, default_value = "30", help = "Stats log interval in seconds")]
    stats_secs: u64,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Batch,  // read to EOF and exit
    Tail,   // follow appended lines
}

impl From<Mode> for ReadMode {
    fn from(m: Mode) -> Self {
        match m {
            Mode::Batch => ReadMode::Batch,
            Mode::Tail  => ReadMode::Tail,
        }
    }
}

// ── Stats ─────────────────────────────────────────────────────────────────────

async fn stats_loop(pipelines: Vec<Arc<ServicePipeline>>, every: Duration, start: Instant) {
    loop {
        tokio::time::sleep(every).await;
        let now = Utc::now();
        for p in &pipelines {
            let s   = p.stats.snapshot();
            let buf = p.buffer();
            info!(
                src       = p.src(),
                uptime_s  = start.elapsed().as_secs(),
                accepted  = s.accepted,
                emitted   = s.emitted,
                excluded  = s.excluded,
                keys      = buf.num_keys(),
                buffered  = buf.total_len(),
                evicted   = buf.total_evicted.load(Ordering::Relaxed),
                state     = %buf.get_state_data(now).report(),
                "stats"
            );
        }
    }
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env()
            .add_directive("logsift=info".parse()?))
        .with_writer(std::io::stderr)
        .compact().init();

    let cli   = Cli::parse();
    let conf  = Config::load(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;
    let start = Instant::now();

    let bots = Arc::new(BotMatcher::from_config(&conf.bot_user_agents)?);

    // Notifications
    let (queue, notif_rx) = NotificationQueue::channel(conf.notifications.queue_size);
    let notifier          = build_notifier(&conf.notifications);
    let notif_worker      = spawn_worker(
        notif_rx, notifier, Duration::from_secs(conf.notifications.timeout_secs),
    );

    // Output
    let (out_tx, out_rx) = mpsc::channel(4096);
    let sink_task        = tokio::spawn(sink::write_loop(out_rx, OutputSink::from_arg(cli.output.clone())));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut registry: BufferRegistry<ServiceRecord> =
        BufferRegistry::new(Some(conf.log_buffer_state_dir.clone()));

    if cli.worklog_reset {
        for lf in conf.log_files.iter().filter(|lf| lf.buffer.is_some()) {
            if let Some(file) = registry.state_file(&lf.src_path) {
                match file.remove() {
                    Ok(true)  => info!(path = %file.path().display(), "analysis state removed"),
                    Ok(false) => {}
                    Err(e)    => warn!("worklog reset: {}", e),
                }
            }
        }
    }

    // One source + pipeline per log file
    let mut pipelines: Vec<Arc<ServicePipeline>>                   = Vec::new();
    let mut workers:   Vec<JoinHandle<()>>                         = Vec::new();
    let mut sources:   Vec<JoinHandle<Result<source::SourceStats>>> = Vec::new();

    for lf in &conf.log_files {
        let pre    = build_preprocessor::<ServiceRecord>(lf.app_type, lf.buffer.as_ref(), queue.clone(), lf.realtime_clock);
        let buffer = match &lf.buffer {
            Some(bc) => registry.get_or_create(bc, &lf.src_path, pre.empty_state()),
            None     => Arc::new(RecentRecords::new(BufferConf::default(), AnalysisState::Null)),
        };
        let pipeline = Arc::new(ServicePipeline::new(lf, buffer, pre));
        pipelines.push(pipeline.clone());

        let (tx, rx) = mpsc::channel::<ServiceRecord>(4096);
        workers.push(tokio::spawn(pipeline.run(rx, out_tx.clone(), shutdown_rx.clone())));
        sources.push(tokio::spawn(source::read_lines(
            lf.src_path.clone(),
            LineParser::new(lf.app_type, bots.clone()),
            tx,
            cli.mode.into(),
            shutdown_rx.clone(),
        )));
    }
    drop(out_tx);
    drop(queue);

    let stats_task = tokio::spawn(stats_loop(
        pipelines.clone(), Duration::from_secs(cli.stats_secs.max(1)), start,
    ));

    // Run until every pipeline drains (batch) or Ctrl+C
    let all_done = join_pipelines(workers);
    tokio::pin!(all_done);
    let interrupted = tokio::select! {
        _ = &mut all_done              => false,
        _ = tokio::signal::ctrl_c()    => true,
    };
    if interrupted {
        info!("Ctrl+C received, shutting down");
        let _ = shutdown_tx.send(true);
        all_done.await;
    }

    for s in sources {
        match s.await {
            Ok(Ok(_))  => {}
            Ok(Err(e)) => error!("source failed: {:#}", e),
            Err(e)     => error!("source task panicked: {}", e),
        }
    }

    stats_task.abort();
    let _ = stats_task.await;
    drop(pipelines);

    registry.close_all().await;

    let sent = notif_worker.await.unwrap_or(0);
    let written = match sink_task.await {
        Ok(Ok(n))  => n,
        Ok(Err(e)) => { error!("output sink failed: {:#}", e); 0 }
        Err(e)     => { error!("output sink panicked: {}", e); 0 }
    };
    info!(
        uptime_s = start.elapsed().as_secs(), written, notifications = sent,
        "logsift stopped"
    );
    Ok(())
}

async fn join_pipelines(handles: Vec<JoinHandle<()>>) {
    for h in handles {
        if let Err(e) = h.await {
            error!("pipeline task panicked: {}", e);
        }
    }
}
