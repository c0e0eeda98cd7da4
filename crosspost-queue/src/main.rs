//! crosspost-queue - Inspect and manage the broker
//!
//! Operator tool for the Crosspost queue: lane listings, depth statistics,
//! and dead-letter inspection and recovery.

use chrono::Utc;
use clap::{Parser, Subcommand};
use libcrosspost::broker::{Lane, QueueBroker};
use libcrosspost::{Config, CrosspostError, Database, Result};

#[derive(Parser, Debug)]
#[command(name = "crosspost-queue")]
#[command(version)]
#[command(about = "Inspect and manage the Crosspost queue")]
#[command(long_about = "\
crosspost-queue - Inspect and manage the broker

DESCRIPTION:
    crosspost-queue is an operator tool for the Crosspost broker. Use it to
    list messages per lane, view lane depth statistics, and inspect or
    requeue dead-lettered messages.

COMMANDS:
    list        List messages in a lane
    stats       Show per-lane depth statistics
    dead        Inspect and recover dead-lettered messages

USAGE EXAMPLES:
    # List everything waiting in the retry lane
    crosspost-queue list retry

    # Lane depths in JSON
    crosspost-queue stats --format json

    # Inspect dead letters, then put one back
    crosspost-queue dead list
    crosspost-queue dead requeue 3f6e...

CONFIGURATION:
    Configuration file: ~/.config/crosspost/config.toml
    Database location: ~/.local/share/crosspost/crosspost.db

    Override with environment variables:
        CROSSPOST_CONFIG    - Path to config file
        CROSSPOST_DB_PATH   - Path to database file

EXIT CODES:
    0 - Success
    1 - Operation failed
    2 - Database or configuration error
    3 - Invalid input (bad lane name, bad format, etc.)
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    #[arg(help = "Enable verbose logging to stderr (useful for debugging)")]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List messages in a lane
    List {
        /// Lane to list: high, normal, low, or retry
        lane: String,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show per-lane depth statistics
    Stats {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Inspect and recover dead-lettered messages
    Dead {
        #[command(subcommand)]
        command: DeadCommands,
    },
}

#[derive(Subcommand, Debug)]
enum DeadCommands {
    /// List dead-lettered messages, newest first
    List {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Move a dead letter back into its lane
    Requeue {
        /// Dead letter ID to requeue
        id: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    libcrosspost::logging::init_from_env(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db = Database::new(&config.database.path).await?;
    let broker = QueueBroker::from_config(db, &config);

    match cli.command {
        Commands::List { lane, format } => {
            validate_format(&format)?;
            cmd_list(&broker, &lane, &format).await?;
        }
        Commands::Stats { format } => {
            validate_format(&format)?;
            cmd_stats(&broker, &format).await?;
        }
        Commands::Dead { command } => match command {
            DeadCommands::List { format } => {
                validate_format(&format)?;
                cmd_dead_list(&broker, &format).await?;
            }
            DeadCommands::Requeue { id } => {
                cmd_dead_requeue(&broker, &id).await?;
            }
        },
    }

    Ok(())
}

fn validate_format(format: &str) -> Result<()> {
    if format != "text" && format != "json" {
        return Err(CrosspostError::InvalidInput(format!(
            "Invalid format '{}'. Must be 'text' or 'json'",
            format
        )));
    }
    Ok(())
}

/// List messages in one lane, FIFO order
async fn cmd_list(broker: &QueueBroker, lane: &str, format: &str) -> Result<()> {
    let lane: Lane = lane.parse()?;
    let messages = broker.list_lane(lane).await?;

    if format == "json" {
        let json: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "id": m.message_id,
                    "content_ref": m.content_ref,
                    "lane": m.lane.as_str(),
                    "platform": m.routing_platform.as_str(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&json).unwrap());
        return Ok(());
    }

    for message in &messages {
        println!(
            "{} | {} | {}",
            message.message_id, message.routing_platform, message.content_ref
        );
    }

    Ok(())
}

/// Per-lane depths plus the dead-letter count
async fn cmd_stats(broker: &QueueBroker, format: &str) -> Result<()> {
    let now = Utc::now().timestamp();
    let stats = broker.lane_stats(now).await?;
    let dead = broker.dead_letters().await?.len();

    if format == "json" {
        let json = serde_json::json!({
            "lanes": stats,
            "dead_letters": dead,
        });
        println!("{}", serde_json::to_string_pretty(&json).unwrap());
        return Ok(());
    }

    println!("{:<8} {:>8} {:>8} {:>10}", "lane", "ready", "delayed", "in_flight");
    for lane in &stats {
        println!(
            "{:<8} {:>8} {:>8} {:>10}",
            lane.lane, lane.ready, lane.delayed, lane.in_flight
        );
    }
    println!("dead letters: {}", dead);

    Ok(())
}

/// Dead letters, newest first, with their reasons
async fn cmd_dead_list(broker: &QueueBroker, format: &str) -> Result<()> {
    let dead = broker.dead_letters().await?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&dead).unwrap());
        return Ok(());
    }

    for letter in &dead {
        println!(
            "{} | {} | {} | {}",
            letter.id,
            letter.platform,
            letter.content_ref.as_deref().unwrap_or("-"),
            letter.reason
        );
    }

    Ok(())
}

/// Put a dead letter back into its lane
async fn cmd_dead_requeue(broker: &QueueBroker, id: &str) -> Result<()> {
    broker.requeue_dead_letter(id).await?;
    println!("Requeued {}", id);
    Ok(())
}
