//! crosspost-dispatch - Run the scheduled publishing pipeline
//!
//! Executes discovery-and-publish cycles: admits due content into the
//! broker, then drains it through per-platform worker pools.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use libcrosspost::dispatcher::DispatchCounts;
use libcrosspost::platforms::mock::MockAdapter;
use libcrosspost::platforms::AdapterRegistry;
use libcrosspost::scheduler::AdmissionReport;
use libcrosspost::{Config, CrosspostError, Database, Dispatcher, Result, Scheduler};
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "crosspost-dispatch")]
#[command(version)]
#[command(about = "Run the scheduled publishing pipeline")]
#[command(long_about = "\
crosspost-dispatch - Run the scheduled publishing pipeline

DESCRIPTION:
    crosspost-dispatch runs discovery-and-publish cycles over the Crosspost
    store. Each cycle sweeps expired queue messages, admits content whose
    schedule (resolved in the owner's timezone) has come due, then drains
    the broker through per-platform worker pools with rate limiting and
    retry/backoff.

    By default it runs a single cycle and exits; with --interval it keeps
    cycling until a shutdown signal arrives.

    Real platform adapters are linked in by embedders of libcrosspost; this
    binary wires the built-in mock adapters, which makes it a dry-run
    pipeline exerciser against a real store.

USAGE:
    # One cycle, then exit
    crosspost-dispatch

    # Keep cycling every 30 seconds
    crosspost-dispatch --interval 30

    # One cycle with a machine-readable summary
    crosspost-dispatch --format json

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (in-flight publishes finish)

CONFIGURATION:
    Configuration file: ~/.config/crosspost/config.toml
    Database location: ~/.local/share/crosspost/crosspost.db

    Override with environment variables:
        CROSSPOST_CONFIG    - Path to config file
        CROSSPOST_DB_PATH   - Path to database file

EXIT CODES:
    0 - Clean run / clean shutdown
    1 - Runtime error
    2 - Configuration error
")]
struct Cli {
    /// Keep cycling with this many seconds between cycles
    #[arg(long, value_name = "SECONDS")]
    #[arg(help = "Run continuously, sleeping this long between cycles")]
    interval: Option<u64>,

    /// Stop after this many seconds in continuous mode
    #[arg(long, value_name = "SECONDS", requires = "interval")]
    #[arg(help = "Bound a continuous run to a total duration")]
    duration: Option<u64>,

    /// Output format for the per-run summary: text or json
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    #[arg(help = "Enable verbose logging (useful for debugging)")]
    verbose: bool,
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
    if cli.format != "text" && cli.format != "json" {
        return Err(CrosspostError::InvalidInput(format!(
            "Invalid format '{}'. Must be 'text' or 'json'",
            cli.format
        )));
    }

    let config = Config::load()?;
    let db = Database::new(&config.database.path).await?;

    let registry = build_registry(&config);
    if registry.is_empty() {
        warn!("No platforms configured; nothing will be dispatched");
    }

    let scheduler = Scheduler::new(db.clone(), &config);
    let dispatcher = Dispatcher::new(db, &config, registry);

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    match cli.interval {
        None => {
            let (report, counts) = run_cycle(&scheduler, &dispatcher).await?;
            print_summary(&cli.format, &report, &counts);
        }
        Some(interval) => {
            info!(interval, "Starting continuous dispatch");
            let deadline = cli
                .duration
                .map(|d| std::time::Instant::now() + std::time::Duration::from_secs(d));

            loop {
                if shutdown.load(Ordering::Relaxed) {
                    info!("Shutdown requested, stopping");
                    break;
                }
                if let Some(deadline) = deadline {
                    if std::time::Instant::now() >= deadline {
                        info!("Duration elapsed, stopping");
                        break;
                    }
                }

                match run_cycle(&scheduler, &dispatcher).await {
                    Ok((report, counts)) => print_summary(&cli.format, &report, &counts),
                    Err(e) => error!("Cycle failed: {}", e),
                }

                // Check the shutdown flag every second while sleeping
                for _ in 0..interval {
                    if shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    Ok(())
}

async fn run_cycle(
    scheduler: &Scheduler,
    dispatcher: &Dispatcher,
) -> Result<(AdmissionReport, DispatchCounts)> {
    let report = scheduler.run_once(Utc::now()).await?;
    let counts = dispatcher.drain().await?;
    Ok((report, counts))
}

/// One adapter per configured platform. Unparseable platform names in the
/// config are skipped with a warning rather than refusing to start.
fn build_registry(config: &Config) -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();
    for name in config.platforms.keys() {
        match name.parse::<libcrosspost::Platform>() {
            Ok(_) => registry.register(Arc::new(MockAdapter::success(name))),
            Err(_) => warn!(platform = %name, "Ignoring unknown platform in config"),
        }
    }
    if !registry.is_empty() {
        warn!("Built-in mock adapters wired; publishes are a dry run");
    }
    registry
}

fn print_summary(format: &str, report: &AdmissionReport, counts: &DispatchCounts) {
    if format == "json" {
        let summary = serde_json::json!({
            "mode": "dry-run",
            "admission": report,
            "dispatch": counts,
        });
        println!("{}", serde_json::to_string(&summary).unwrap());
        return;
    }

    // Every summary names the mode so mock publishes cannot be mistaken
    // for real ones
    println!("mode=dry-run");
    println!(
        "admitted={} not_due={} over_budget={} contended={} invalid_schedule={} expired={}",
        report.admitted,
        report.not_due,
        report.over_budget,
        report.contended,
        report.invalid_schedule,
        report.expired
    );
    println!(
        "published={} retried={} failed={} dead_lettered={} rate_deferred={} duplicates_skipped={} redirected={} error_deferred={}",
        counts.published,
        counts.retried,
        counts.failed,
        counts.dead_lettered,
        counts.rate_deferred,
        counts.duplicates_skipped,
        counts.redirected,
        counts.error_deferred
    );
}

/// Set up signal handlers for graceful shutdown
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])
        .map_err(|e| CrosspostError::InvalidInput(format!("Signal setup failed: {}", e)))?;

    let shutdown_clone = shutdown.clone();
    std::thread::spawn(move || {
        for sig in signals.forever() {
            match sig {
                SIGTERM | SIGINT => {
                    info!("Received shutdown signal, stopping gracefully...");
                    shutdown_clone.store(true, Ordering::Relaxed);
                    break;
                }
                _ => {}
            }
        }
    });

    Ok(())
}
