//! # Queue-Worker CLI
//!
//! Operator tooling for queues consumed by the queue-worker runtime.
//!
//! This module provides CLI commands for:
//! - Creating and dropping queues (together with their dead letter queues)
//! - Sending messages and draining single messages
//! - Inspecting job counts
//! - Listing, requeueing and purging dead letters
//! - Showing and validating the runtime configuration

use clap::{Parser, Subcommand};
use queue_store::{
    Message, MessageId, Payload, PostgresConfig, QueueName, QueueStoreFactory, SharedQueueStore,
    StoreConfig, StoreError,
};
use queue_worker_core::{ConsumerError, DeadLetterRouter, JobCounts, RuntimeConfig};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

// ============================================================================
// CLI Structure
// ============================================================================

/// Queue-Worker CLI - operate lease-based work queues
#[derive(Debug, Parser)]
#[command(name = "qw")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Operate queues consumed by the queue-worker runtime")]
#[command(
    long_about = "Create queues, send messages, inspect job counts and manage dead letters for queues consumed by the queue-worker runtime"
)]
pub struct Cli {
    /// Configuration file path (YAML, TOML or JSON)
    #[arg(short, long, global = true, env = "QW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Postgres connection string; selects the PGMQ store
    #[arg(long, global = true, env = "QW_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Logging level or filter directive
    #[arg(short, long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Queue management commands
    Queue {
        #[command(subcommand)]
        action: QueueCommands,
    },

    /// Send a message, or a batch read from a file
    Send {
        /// Target queue
        queue: QueueName,

        /// JSON payload
        #[arg(required_unless_present = "file", conflicts_with = "file")]
        payload: Option<String>,

        /// Read the payload from a file; a JSON array is sent as a batch
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Show job counts for a queue
    Counts {
        /// Queue to inspect
        queue: QueueName,
    },

    /// Dead letter queue commands
    Dlq {
        #[command(subcommand)]
        action: DlqCommands,
    },

    /// Remove and print the next visible message without processing it
    Pop {
        /// Queue to pop from
        queue: QueueName,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

/// Queue management subcommands
#[derive(Debug, Subcommand)]
pub enum QueueCommands {
    /// Create a queue and its dead letter queue
    Create {
        /// Queue name
        name: QueueName,
    },

    /// Drop a queue and its dead letter queue
    Drop {
        /// Queue name
        name: QueueName,
    },
}

/// Dead letter subcommands
#[derive(Debug, Subcommand)]
pub enum DlqCommands {
    /// List dead letters, oldest first
    List {
        /// Origin queue
        queue: QueueName,

        /// Maximum number of dead letters to show
        #[arg(short = 'n', long, default_value = "100")]
        limit: u32,
    },

    /// Move dead letters back onto their origin queue
    Requeue {
        /// Origin queue
        queue: QueueName,

        /// Dead letter ids to requeue
        #[arg(required = true, num_args = 1..)]
        ids: Vec<MessageId>,
    },

    /// Delete every dead letter of a queue
    Purge {
        /// Origin queue
        queue: QueueName,

        /// Confirm the deletion
        #[arg(short, long)]
        yes: bool,
    },
}

/// Configuration subcommands
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Print the resolved configuration
    Show {
        /// Serialization format; defaults to YAML for text output and JSON for JSON output
        #[arg(long = "as", value_enum)]
        as_format: Option<ConfigFormat>,
    },

    /// Load and validate the configuration
    Validate,
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
    /// TOML format
    Toml,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] queue_worker_core::ConfigurationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Consumer(#[from] ConsumerError),

    #[error("Command failed: {message}")]
    CommandFailed { message: String },

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Configuration(_) => 1,
            CliError::Store(_) => 2,
            CliError::Consumer(_) => 3,
            CliError::CommandFailed { .. } => 4,
            CliError::InvalidArgument { .. } => 5,
            CliError::Io(_) => 6,
            CliError::Serialization { .. } => 7,
        }
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        CliError::Serialization {
            message: err.to_string(),
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

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    execute(cli, &mut out).await
}

/// Run a parsed command, writing its output to `out`
pub async fn execute(cli: Cli, out: &mut dyn Write) -> Result<(), CliError> {
    let config = load_configuration(&cli)?;
    let format = cli.format;

    match cli.command {
        Commands::Config { action } => execute_config_command(action, &config, format, out),
        Commands::Queue { action } => {
            let store = connect_store(&config).await?;
            execute_queue_command(action, &store, format, out).await
        }
        Commands::Send {
            queue,
            payload,
            file,
        } => {
            let payloads = read_payloads(payload, file)?;
            let store = connect_store(&config).await?;
            execute_send_command(&queue, payloads, &store, format, out).await
        }
        Commands::Counts { queue } => {
            let store = connect_store(&config).await?;
            execute_counts_command(&queue, &store, format, out).await
        }
        Commands::Dlq { action } => {
            let store = connect_store(&config).await?;
            execute_dlq_command(action, &store, format, out).await
        }
        Commands::Pop { queue } => {
            let store = connect_store(&config).await?;
            execute_pop_command(&queue, &store, format, out).await
        }
    }
}

/// Initialize logging based on CLI arguments
///
/// Logs go to stderr so command output on stdout stays machine readable.
fn initialize_logging(cli: &Cli) -> Result<(), CliError> {
    let filter = EnvFilter::try_new(&cli.log_level).map_err(|e| CliError::InvalidArgument {
        arg: "--log-level".to_string(),
        message: e.to_string(),
    })?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let result = if cli.json_logs {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    result.map_err(|e| CliError::CommandFailed {
        message: format!("failed to initialize logging: {}", e),
    })
}

/// Load configuration from file and environment, applying CLI overrides
fn load_configuration(cli: &Cli) -> Result<RuntimeConfig, CliError> {
    let mut config = RuntimeConfig::load(cli.config.as_deref())?;

    if let Some(url) = &cli.database_url {
        config.store = StoreConfig::Postgres(PostgresConfig::new(url.clone()));
    }

    Ok(config)
}

async fn connect_store(config: &RuntimeConfig) -> Result<SharedQueueStore, CliError> {
    if config.store == StoreConfig::InMemory {
        info!("Using the in-memory store; state is discarded when the command exits");
    }
    Ok(QueueStoreFactory::connect(&config.store).await?)
}

/// Parse the payloads of a send command
fn read_payloads(payload: Option<String>, file: Option<PathBuf>) -> Result<Vec<Payload>, CliError> {
    match (payload, file) {
        (Some(raw), None) => {
            let value = serde_json::from_str(&raw).map_err(|e| CliError::InvalidArgument {
                arg: "payload".to_string(),
                message: format!("not valid JSON: {}", e),
            })?;
            Ok(vec![value])
        }
        (None, Some(path)) => {
            let raw = std::fs::read_to_string(&path)?;
            let value: Payload =
                serde_json::from_str(&raw).map_err(|e| CliError::InvalidArgument {
                    arg: "--file".to_string(),
                    message: format!("{} is not valid JSON: {}", path.display(), e),
                })?;
            match value {
                Payload::Array(items) if items.is_empty() => Err(CliError::InvalidArgument {
                    arg: "--file".to_string(),
                    message: format!("{} contains an empty array", path.display()),
                }),
                Payload::Array(items) => Ok(items),
                value => Ok(vec![value]),
            }
        }
        _ => Err(CliError::InvalidArgument {
            arg: "payload".to_string(),
            message: "exactly one of <PAYLOAD> or --file is required".to_string(),
        }),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

fn write_json<T: Serialize + ?Sized>(out: &mut dyn Write, value: &T) -> Result<(), CliError> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

/// Execute queue command
async fn execute_queue_command(
    action: QueueCommands,
    store: &SharedQueueStore,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let (name, created) = match action {
        QueueCommands::Create { name } => {
            store.create_queue(&name).await?;
            (name, true)
        }
        QueueCommands::Drop { name } => {
            store.drop_queue(&name).await?;
            (name, false)
        }
    };

    info!(queue = %name, created = created, "Queue command completed");
    match format {
        OutputFormat::Json => write_json(
            out,
            &serde_json::json!({
                "queue": name,
                "dead_letter_queue": name.dead_letter_queue(),
                "action": if created { "created" } else { "dropped" },
            }),
        ),
        OutputFormat::Text => {
            let verb = if created { "Created" } else { "Dropped" };
            writeln!(
                out,
                "{} queue {} and dead letter queue {}",
                verb,
                name,
                name.dead_letter_queue()
            )?;
            Ok(())
        }
    }
}

#[derive(Debug, Serialize)]
struct SentMessages<'a> {
    queue: &'a QueueName,
    message_ids: Vec<MessageId>,
}

/// Execute send command
async fn execute_send_command(
    queue: &QueueName,
    payloads: Vec<Payload>,
    store: &SharedQueueStore,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let message_ids = match payloads.as_slice() {
        [single] => vec![store.send(queue, single).await?],
        batch => store.send_batch(queue, batch).await?,
    };

    info!(queue = %queue, count = message_ids.len(), "Sent messages");
    match format {
        OutputFormat::Json => write_json(out, &SentMessages { queue, message_ids }),
        OutputFormat::Text => {
            for id in &message_ids {
                writeln!(out, "Sent message {} to {}", id, queue)?;
            }
            Ok(())
        }
    }
}

/// Execute counts command
///
/// A CLI process runs no handlers, so `active` is always zero here.
async fn execute_counts_command(
    queue: &QueueName,
    store: &SharedQueueStore,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let counts = JobCounts::collect(store, queue, 0).await?;

    match format {
        OutputFormat::Json => write_json(out, &counts),
        OutputFormat::Text => {
            writeln!(out, "waiting:   {}", counts.waiting)?;
            writeln!(out, "active:    {}", counts.active)?;
            writeln!(out, "completed: {}", counts.completed)?;
            writeln!(out, "failed:    {}", counts.failed)?;
            Ok(())
        }
    }
}

/// Execute dead letter command
async fn execute_dlq_command(
    action: DlqCommands,
    store: &SharedQueueStore,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let router = DeadLetterRouter::new(store.clone());

    match action {
        DlqCommands::List { queue, limit } => {
            let dead_letters = router.get_dead_letters(&queue, limit).await?;
            debug!(queue = %queue, count = dead_letters.len(), "Listed dead letters");

            match format {
                OutputFormat::Json => {
                    let entries: Vec<_> = dead_letters
                        .iter()
                        .map(|d| {
                            serde_json::json!({
                                "id": d.id,
                                "enqueued_at": d.enqueued_at,
                                "envelope": d.envelope,
                            })
                        })
                        .collect();
                    write_json(out, &entries)
                }
                OutputFormat::Text => {
                    if dead_letters.is_empty() {
                        writeln!(out, "No dead letters for {}", queue)?;
                    }
                    for d in &dead_letters {
                        writeln!(
                            out,
                            "{}\t{}\tattempts={}\t{}",
                            d.id, d.enqueued_at, d.envelope.attempts_made, d.envelope.error.message
                        )?;
                    }
                    Ok(())
                }
            }
        }
        DlqCommands::Requeue { queue, ids } => {
            let result = router.requeue_dead_letter_batch(&queue, &ids).await;

            match format {
                OutputFormat::Json => write_json(
                    out,
                    &serde_json::json!({
                        "requeued": result.requeued.iter().map(|r| serde_json::json!({
                            "dead_letter_id": r.dead_letter_id,
                            "message_id": r.message_id,
                        })).collect::<Vec<_>>(),
                        "failed": result.failed.iter().map(|f| serde_json::json!({
                            "dead_letter_id": f.dead_letter_id,
                            "error": f.error.to_string(),
                        })).collect::<Vec<_>>(),
                    }),
                )?,
                OutputFormat::Text => {
                    for r in &result.requeued {
                        writeln!(
                            out,
                            "Requeued dead letter {} as message {}",
                            r.dead_letter_id, r.message_id
                        )?;
                    }
                    for f in &result.failed {
                        writeln!(
                            out,
                            "Failed to requeue dead letter {}: {}",
                            f.dead_letter_id, f.error
                        )?;
                    }
                }
            }

            if result.is_complete_success() {
                Ok(())
            } else {
                Err(CliError::CommandFailed {
                    message: format!(
                        "{} of {} dead letter(s) could not be requeued",
                        result.failed.len(),
                        ids.len()
                    ),
                })
            }
        }
        DlqCommands::Purge { queue, yes } => {
            if !yes {
                return Err(CliError::InvalidArgument {
                    arg: "--yes".to_string(),
                    message: format!(
                        "purging permanently deletes the dead letters of {}; pass --yes to confirm",
                        queue
                    ),
                });
            }

            let purged = router.purge_dead_letters(&queue).await?;
            match format {
                OutputFormat::Json => {
                    write_json(out, &serde_json::json!({ "queue": queue, "purged": purged }))
                }
                OutputFormat::Text => {
                    writeln!(out, "Purged {} dead letter(s) of {}", purged, queue)?;
                    Ok(())
                }
            }
        }
    }
}

/// Execute pop command
async fn execute_pop_command(
    queue: &QueueName,
    store: &SharedQueueStore,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let message: Option<Message> = store.pop(queue).await?;

    match (format, message) {
        (OutputFormat::Json, message) => write_json(out, &message),
        (OutputFormat::Text, None) => {
            writeln!(out, "Queue {} is empty", queue)?;
            Ok(())
        }
        (OutputFormat::Text, Some(message)) => {
            writeln!(out, "Message {} (enqueued {})", message.id, message.enqueued_at)?;
            writeln!(out, "{}", serde_json::to_string_pretty(&message.payload)?)?;
            Ok(())
        }
    }
}

/// Execute config command
fn execute_config_command(
    action: ConfigCommands,
    config: &RuntimeConfig,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    match action {
        ConfigCommands::Show { as_format } => {
            let as_format = as_format.unwrap_or(match format {
                OutputFormat::Text => ConfigFormat::Yaml,
                OutputFormat::Json => ConfigFormat::Json,
            });
            let rendered = render_config(config, as_format)?;
            write!(out, "{}", rendered)?;
            if !rendered.ends_with('\n') {
                writeln!(out)?;
            }
            Ok(())
        }
        // Loading already validated the configuration
        ConfigCommands::Validate => match format {
            OutputFormat::Json => write_json(
                out,
                &serde_json::json!({
                    "valid": true,
                    "queues": config.queues.len(),
                    "provider": config.store.provider_type(),
                }),
            ),
            OutputFormat::Text => {
                writeln!(out, "Configuration is valid")?;
                Ok(())
            }
        },
    }
}

/// Serialize the configuration in the requested format
fn render_config(config: &RuntimeConfig, format: ConfigFormat) -> Result<String, CliError> {
    let serialization = |message: String| CliError::Serialization { message };

    match format {
        ConfigFormat::Yaml => serde_yaml::to_string(config).map_err(|e| serialization(e.to_string())),
        ConfigFormat::Json => Ok(serde_json::to_string_pretty(config)?),
        ConfigFormat::Toml => toml::to_string(config).map_err(|e| serialization(e.to_string())),
    }
}
