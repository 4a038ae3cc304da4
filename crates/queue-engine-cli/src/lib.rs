//! # Queue Engine CLI
//!
//! Command-line interface for the queue engine.
//!
//! This module provides CLI commands for:
//! - Validating and displaying queue configuration
//! - Running a send/listen workload against an in-memory queue

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use queue_engine::{
    begin_listen, ConfigurationError, Context, MemoryMessageQueue, MessageEnvelope, MessageId,
    MessageQueue, MessageQueueExt, MessageReceiver, QueueConfig, QueueError, QueueStats,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

// ============================================================================
// CLI Structure
// ============================================================================

/// Queue engine CLI - reliable in-process message queue
#[derive(Parser, Debug)]
#[command(name = "queue-engine")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Reliable in-process message queue with visibility-timeout locking")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "QUEUE_ENGINE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging filter (level or EnvFilter directive)
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate configuration
    Config {
        /// Show resolved configuration
        #[arg(short, long)]
        show: bool,

        /// Output format for configuration
        #[arg(short = 'f', long, default_value = "yaml")]
        format: ConfigFormat,
    },

    /// Send messages through a memory queue and consume them with a listener
    Run {
        /// Number of messages to send
        #[arg(short, long, default_value = "10")]
        messages: usize,

        /// Abandon every K-th delivery once before completing it (0 disables)
        #[arg(short, long, default_value = "0")]
        abandon_every: usize,

        /// Give up if the workload has not completed after this many seconds
        #[arg(short, long, default_value = "30")]
        timeout_secs: u64,

        /// Output format for the summary
        #[arg(short = 'f', long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON output
    Json,
}

/// Configuration format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ConfigFormat {
    /// YAML format
    Yaml,
    /// JSON format
    Json,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Command failed: {message}")]
    CommandFailed { message: String },

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("Output error: {message}")]
    Output { message: String },
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Queue(_) => 2,
            Self::CommandFailed { .. } => 3,
            Self::InvalidArgument { .. } => 4,
            Self::Output { .. } => 5,
        }
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::Output {
            message: e.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for CliError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Output {
            message: e.to_string(),
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    initialize_logging(&cli)?;

    let config = load_configuration(cli.config.as_ref())?;

    match cli.command {
        Commands::Config { show, format } => execute_config_command(&config, show, format),
        Commands::Run {
            messages,
            abandon_every,
            timeout_secs,
            format,
        } => {
            let options = RunOptions {
                messages,
                abandon_every,
                timeout: Duration::from_secs(timeout_secs),
            };
            execute_run_command(&config, options, format).await
        }
    }
}

/// Initialize logging based on CLI arguments.
///
/// Log output goes to stderr so command output on stdout stays parseable.
pub fn initialize_logging(cli: &Cli) -> Result<(), CliError> {
    let filter = EnvFilter::try_new(&cli.log_level).map_err(|e| CliError::InvalidArgument {
        arg: "log-level".to_string(),
        message: e.to_string(),
    })?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if cli.json_logs {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| CliError::CommandFailed {
        message: format!("failed to initialize logging: {e}"),
    })
}

/// Load configuration from file and environment
pub fn load_configuration(config_path: Option<&PathBuf>) -> Result<QueueConfig, CliError> {
    let config = QueueConfig::load(config_path.map(PathBuf::as_path))?;

    debug!(
        queue = %config.name,
        path = ?config_path,
        "Loaded queue configuration"
    );
    Ok(config)
}

// ============================================================================
// Config Command
// ============================================================================

/// Render configuration in the requested format; secrets stay redacted
pub fn render_config(config: &QueueConfig, format: ConfigFormat) -> Result<String, CliError> {
    let rendered = match format {
        ConfigFormat::Yaml => serde_yaml::to_string(config)?,
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
    };
    Ok(rendered)
}

fn execute_config_command(
    config: &QueueConfig,
    show: bool,
    format: ConfigFormat,
) -> Result<(), CliError> {
    if show {
        println!("{}", render_config(config, format)?);
    } else {
        println!("Configuration is valid for queue '{}'", config.name);
    }
    Ok(())
}

// ============================================================================
// Run Command
// ============================================================================

/// Parameters of a `run` workload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub messages: usize,
    pub abandon_every: usize,
    pub timeout: Duration,
}

/// Payload sent by the workload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkItem {
    pub sequence: usize,
}

/// Outcome of a completed workload
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub queue: String,
    pub messages: usize,
    pub completed: usize,
    pub redelivered: usize,
    pub elapsed_ms: u64,
    pub stats: QueueStats,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Queue:         {}", self.queue)?;
        writeln!(f, "Messages:      {}", self.messages)?;
        writeln!(f, "Completed:     {}", self.completed)?;
        writeln!(f, "Redelivered:   {}", self.redelivered)?;
        writeln!(f, "Elapsed:       {} ms", self.elapsed_ms)?;
        writeln!(f, "Sent:          {}", self.stats.sent)?;
        writeln!(f, "Received:      {}", self.stats.received)?;
        writeln!(f, "Abandoned:     {}", self.stats.abandoned)?;
        write!(f, "Dead-lettered: {}", self.stats.dead_lettered)
    }
}

/// Receiver that completes work items, abandoning selected first deliveries
#[derive(Debug)]
pub struct WorkloadReceiver {
    expected: usize,
    abandon_every: usize,
    deliveries: AtomicUsize,
    completed: AtomicUsize,
    abandoned: Mutex<HashSet<MessageId>>,
    finished: Notify,
}

impl WorkloadReceiver {
    pub fn new(expected: usize, abandon_every: usize) -> Self {
        Self {
            expected,
            abandon_every,
            deliveries: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            abandoned: Mutex::new(HashSet::new()),
            finished: Notify::new(),
        }
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    /// Number of messages abandoned for redelivery
    pub fn redelivered(&self) -> usize {
        self.abandoned().len()
    }

    /// Wait until every expected message completed; false on timeout
    pub async fn wait_for_completion(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let finished = self.finished.notified();
            tokio::pin!(finished);
            finished.as_mut().enable();

            if self.completed() >= self.expected {
                return true;
            }

            if tokio::time::timeout_at(deadline, finished).await.is_err() {
                return self.completed() >= self.expected;
            }
        }
    }

    /// Record a first delivery selected for abandonment
    fn should_abandon(&self, delivery: usize, message_id: &MessageId) -> bool {
        if self.abandon_every == 0 || delivery % self.abandon_every != 0 {
            return false;
        }

        self.abandoned().insert(message_id.clone())
    }

    fn abandoned(&self) -> MutexGuard<'_, HashSet<MessageId>> {
        self.abandoned.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MessageReceiver for WorkloadReceiver {
    async fn receive_message(
        &self,
        envelope: &mut MessageEnvelope,
        queue: &dyn MessageQueue,
    ) -> anyhow::Result<()> {
        let delivery = self.deliveries.fetch_add(1, Ordering::AcqRel) + 1;
        let item: WorkItem = envelope.as_object()?;

        if self.should_abandon(delivery, envelope.message_id()) {
            debug!(
                sequence = item.sequence,
                message_id = %envelope.message_id(),
                "Abandoning work item for redelivery"
            );
            queue.abandon(envelope).await?;
            return Ok(());
        }

        queue.complete(envelope).await?;
        let completed = self.completed.fetch_add(1, Ordering::AcqRel) + 1;

        debug!(
            sequence = item.sequence,
            completed = completed,
            "Completed work item"
        );

        if completed >= self.expected {
            self.finished.notify_waiters();
        }
        Ok(())
    }
}

/// Send `options.messages` work items through a memory queue and consume
/// them with a background listener
pub async fn run_workload(
    config: &QueueConfig,
    options: RunOptions,
) -> Result<RunSummary, CliError> {
    let started = Instant::now();
    let queue = Arc::new(MemoryMessageQueue::from_config(config));
    let context = Context::with_trace_id(format!("run-{}", MessageId::new()));

    queue.open(&context).await?;

    let receiver = Arc::new(WorkloadReceiver::new(options.messages, options.abandon_every));
    let listener = begin_listen(queue.clone(), context.clone(), receiver.clone());

    info!(
        queue = %queue.name(),
        messages = options.messages,
        abandon_every = options.abandon_every,
        "Starting workload"
    );

    for sequence in 0..options.messages {
        queue
            .send_as_object(&context, "WorkItem", &WorkItem { sequence })
            .await?;
    }

    let finished = receiver.wait_for_completion(options.timeout).await;

    queue.end_listen(&context).await?;
    let abort = listener.abort_handle();
    match tokio::time::timeout(options.timeout, listener).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Listener task did not shut down cleanly"),
        Err(_) => {
            warn!(
                timeout_secs = options.timeout.as_secs(),
                "Listener task did not stop in time, aborting it"
            );
            abort.abort();
        }
    }
    queue.close(&context).await?;

    if !finished {
        return Err(CliError::CommandFailed {
            message: format!(
                "timed out after {}s with {} of {} messages completed",
                options.timeout.as_secs(),
                receiver.completed(),
                options.messages
            ),
        });
    }

    let summary = RunSummary {
        queue: queue.name().to_string(),
        messages: options.messages,
        completed: receiver.completed(),
        redelivered: receiver.redelivered(),
        elapsed_ms: started.elapsed().as_millis() as u64,
        stats: queue.stats(),
    };

    info!(
        queue = %summary.queue,
        completed = summary.completed,
        elapsed_ms = summary.elapsed_ms,
        "Workload finished"
    );
    Ok(summary)
}

async fn execute_run_command(
    config: &QueueConfig,
    options: RunOptions,
    format: OutputFormat,
) -> Result<(), CliError> {
    let summary = run_workload(config, options).await?;

    match format {
        OutputFormat::Text => println!("{summary}"),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
    }
    Ok(())
}
