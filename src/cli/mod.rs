//! Command-line interface for medrelay.
//!
//! Provides commands for submitting issue reports, flushing the offline
//! queue, watching connectivity, recording voice memos, and inspecting
//! configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::capture::{CommandRecorder, RecordingSession};
use crate::config;
use crate::domain::Submission;
use crate::net::{
    ConnectivityMonitor, HttpProbe, HttpSubmitClient, ReachabilityProbe, StoredToken, SubmitClient,
};
use crate::store::DurableQueue;
use crate::sync::{FlushOutcome, Notice, Reconciler, SubmitDisposition};

/// medrelay - offline-first issue submission for the patient app
#[derive(Parser, Debug)]
#[command(name = "medrelay")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit an issue report (text and/or audio)
    Submit {
        /// Issue text
        #[arg(short, long)]
        text: Option<String>,

        /// Path to a recorded audio file
        #[arg(short, long)]
        audio: Option<PathBuf>,

        /// Language/locale hint (defaults to the configured one)
        #[arg(short, long)]
        language: Option<String>,
    },

    /// Flush the offline queue once
    Flush,

    /// Show queue contents and connectivity
    Status,

    /// Watch connectivity and flush automatically on reconnect
    Watch,

    /// Record a voice memo, then optionally submit it
    Record {
        /// Stop after this many seconds
        #[arg(short, long, default_value = "10")]
        seconds: u64,

        /// Text to attach alongside the recording
        #[arg(short, long)]
        text: Option<String>,

        /// Submit when recording finishes instead of just printing the path
        #[arg(long)]
        submit: bool,
    },

    /// Show resolved configuration
    Config,
}

impl Cli {
    /// Execute the parsed command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Submit {
                text,
                audio,
                language,
            } => execute_submit(text, audio, language).await,
            Commands::Flush => execute_flush().await,
            Commands::Status => execute_status().await,
            Commands::Watch => execute_watch().await,
            Commands::Record {
                seconds,
                text,
                submit,
            } => execute_record(seconds, text, submit).await,
            Commands::Config => execute_config(),
        }
    }
}

/// Wire the core components from configuration
fn build_core() -> Result<(Arc<DurableQueue>, Arc<dyn SubmitClient>, Arc<ConnectivityMonitor>)> {
    let cfg = config::config()?;

    let queue = Arc::new(DurableQueue::open_default()?);
    let client: Arc<dyn SubmitClient> = Arc::new(HttpSubmitClient::new(
        &cfg.api_base_url,
        cfg.request_timeout,
        Arc::new(StoredToken),
    )?);
    let probe = Arc::new(HttpProbe::new(&cfg.api_base_url, Duration::from_secs(3))?);
    let monitor = Arc::new(ConnectivityMonitor::new(probe, cfg.probe_interval));

    Ok((queue, client, monitor))
}

/// Submit one report, falling back to the queue when offline
async fn execute_submit(
    text: Option<String>,
    audio: Option<PathBuf>,
    language: Option<String>,
) -> Result<()> {
    let cfg = config::config()?;
    let language = language.or_else(|| cfg.language_code.clone());

    let submission =
        Submission::new(text, audio, language).context("Nothing to submit: pass --text and/or --audio")?;

    let (queue, client, monitor) = build_core()?;
    let (reconciler, _notices) =
        Reconciler::new(queue, client, Arc::clone(&monitor), cfg.server_error_policy);

    // Let the first probe land so the direct-online path can be taken
    let (mut events, handle) = monitor.start();
    let _ = tokio::time::timeout(Duration::from_secs(3), events.recv()).await;

    let result = reconciler.submit(submission).await;
    handle.stop().await?;

    match result {
        Ok(SubmitDisposition::Sent(ack)) => {
            println!("Submitted successfully: {}", ack.message);
            Ok(())
        }
        Ok(SubmitDisposition::Queued) => {
            println!("Saved offline. Will submit when online.");
            Ok(())
        }
        Err(e) => Err(anyhow::Error::new(e)),
    }
}

/// Drain the queue once, regardless of the probe state
async fn execute_flush() -> Result<()> {
    let cfg = config::config()?;
    let (queue, client, monitor) = build_core()?;
    let (reconciler, _notices) = Reconciler::new(queue, client, monitor, cfg.server_error_policy);

    match reconciler.flush().await {
        FlushOutcome::Completed(report) => {
            println!(
                "Flush finished: {} sent, {} requeued, {} rejected",
                report.sent, report.requeued, report.rejected
            );
        }
        FlushOutcome::AlreadyFlushing => {
            println!("A flush is already in progress.");
        }
    }
    Ok(())
}

/// Show the pending queue and a one-shot reachability probe
async fn execute_status() -> Result<()> {
    let cfg = config::config()?;
    let queue = DurableQueue::open_default()?;
    let pending = queue
        .pending()
        .await
        .context("Failed to read the offline queue")?;

    let probe = HttpProbe::new(&cfg.api_base_url, Duration::from_secs(3))?;
    let status = probe.probe().await;

    println!();
    println!("Offline Submission Queue");
    println!("══════════════════════════════════════════════════════════════");
    println!();
    println!("API:          {}", cfg.api_base_url);
    println!("Connectivity: {:?}", status);
    println!("Queue file:   {}", queue.path().display());
    println!("Pending:      {}", pending.len());

    if !pending.is_empty() {
        println!();
        for entry in &pending {
            println!(
                "  {}  {}  {}",
                entry.id,
                entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                entry.summary()
            );
        }
    }
    println!();
    Ok(())
}

/// Run the monitor + reconciler until Ctrl-C
async fn execute_watch() -> Result<()> {
    let cfg = config::config()?;
    let (queue, client, monitor) = build_core()?;
    let (reconciler, mut notices) =
        Reconciler::new(queue, client, Arc::clone(&monitor), cfg.server_error_policy);
    let reconciler = Arc::new(reconciler);

    let (events, monitor_handle) = monitor.start();
    let reconciler_handle = reconciler.spawn(events);

    println!("Watching connectivity (Ctrl-C to stop)...");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            notice = notices.recv() => match notice {
                Some(notice) => print_notice(&notice),
                None => break,
            }
        }
    }

    reconciler_handle.stop().await?;
    monitor_handle.stop().await?;
    println!("Stopped.");
    Ok(())
}

/// Record for a fixed duration, then print or submit the artifact
async fn execute_record(seconds: u64, text: Option<String>, submit: bool) -> Result<()> {
    let recorder = Arc::new(CommandRecorder::new(config::recordings_dir()?));
    let mut session = RecordingSession::new(recorder);

    session.start().await.context("Could not start recording")?;
    println!("Recording for {} seconds...", seconds);
    tokio::time::sleep(Duration::from_secs(seconds)).await;

    let artifact = session
        .stop()
        .await
        .context("Could not finalize recording")?
        .context("Recording produced no artifact")?;

    println!(
        "Recorded {}s to {}",
        session.elapsed_secs(),
        artifact.display()
    );

    if submit || text.is_some() {
        execute_submit(text, Some(artifact), None).await?;
    }
    Ok(())
}

/// Print the resolved configuration
fn execute_config() -> Result<()> {
    let cfg = config::config()?;

    println!();
    println!("medrelay configuration");
    println!("══════════════════════════════════════════════════════════════");
    println!();
    println!("Home:                {}", cfg.home.display());
    println!("API base URL:        {}", cfg.api_base_url);
    println!("Request timeout:     {:?}", cfg.request_timeout);
    println!(
        "Language code:       {}",
        cfg.language_code.as_deref().unwrap_or("(none)")
    );
    println!("Probe interval:      {:?}", cfg.probe_interval);
    println!("Server error policy: {:?}", cfg.server_error_policy);
    match &cfg.config_file {
        Some(path) => println!("Config file:         {}", path.display()),
        None => println!("Config file:         (defaults)"),
    }
    println!();
    Ok(())
}

/// Render a reconciler notice for the terminal
fn print_notice(notice: &Notice) {
    match notice {
        Notice::Queued { id } => println!("queued   {}", id),
        Notice::Sent { id, message } => println!("sent     {} ({})", id, message),
        Notice::Rejected { id, reason } => println!("rejected {} : {}", id, reason),
        Notice::NotSaved { id, reason } => println!("NOT SAVED {} : {}", id, reason),
        Notice::Pending { count } => println!("pending  {} submission(s) remain queued", count),
    }
}
