//! mprobe - scheduled UDP ping, traceroute and SNMP discovery
//!
//! This is the command-line interface for the mprobe library.

#![allow(clippy::uninlined_format_args)]

use anyhow::{Context as _, Result};
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use mprobe::measurement::traceroute::TracerouteReport;
use mprobe::measurement::udpping::PingReport;
use mprobe::measurement::{TracerouteDefinition, UdpPingDefinition};
use mprobe::result::{target_label, ResultEvent, TaskLookup};
use mprobe::scheduler::parse_tasks;
use mprobe::{
    AgentConfig, Context, MeasurementDefinition, MeasurementResult, NetworkClock, ResultStore,
    Scheduler, SystemClock, TaskSpec,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Get the version string for mprobe
fn get_version() -> &'static str {
    if cfg!(debug_assertions) {
        concat!(env!("CARGO_PKG_VERSION"), "-UNRELEASED")
    } else {
        env!("CARGO_PKG_VERSION")
    }
}

/// Command-line arguments
#[derive(Parser, Debug)]
#[clap(author, version = get_version(), about = "Scheduled UDP ping, traceroute and SNMP discovery", long_about = None)]
struct Args {
    /// Agent configuration file (TOML)
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output (use -vv for trace logging)
    #[clap(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler over a task file until interrupted
    Run {
        /// JSON file holding an array of tasks
        #[clap(long)]
        tasks: PathBuf,

        /// Print reports as JSON lines
        #[clap(long)]
        json: bool,
    },

    /// Send a one-shot UDP ping
    Ping {
        /// Target hostname or IPv4 address
        host: String,

        /// Number of probes
        #[clap(short, long, default_value_t = 3)]
        count: u32,

        /// TTL of the probes (0 keeps the system default)
        #[clap(long, default_value_t = 0)]
        ttl: u8,

        /// Receive timeout per probe in milliseconds
        #[clap(long, default_value_t = 1000)]
        timeout_ms: u64,

        /// Interval between probes in milliseconds
        #[clap(short, long, default_value_t = 200)]
        interval_ms: u64,

        /// Destination UDP port
        #[clap(short, long, default_value_t = 33434)]
        port: u16,

        /// Output the report in JSON format
        #[clap(long)]
        json: bool,
    },

    /// Run a one-shot UDP traceroute
    Trace {
        /// Target hostname or IPv4 address
        host: String,

        /// Probes per hop
        #[clap(short, long, default_value_t = 3)]
        count: u32,

        /// Receive timeout per probe in milliseconds
        #[clap(long, default_value_t = 1000)]
        timeout_ms: u64,

        /// Output the report in JSON format
        #[clap(long)]
        json: bool,
    },

    /// Show upcoming run times of every task in a task file
    NextRun {
        /// JSON file holding an array of tasks
        #[clap(long)]
        tasks: PathBuf,

        /// Reference time, e.g. 2024-01-15T08:30:00 (defaults to now)
        #[clap(long)]
        from: Option<NaiveDateTime>,

        /// Number of runs to show per task
        #[clap(short, default_value_t = 5)]
        n: usize,
    },
}

fn main() {
    let args = Args::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: Failed to create Tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(async_main(args)) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn async_main(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => AgentConfig::load(path)?,
        None => AgentConfig::default(),
    };
    init_logging(&config, args.verbose)?;

    if mprobe::config::timing::set_config(config.timing()).is_err() {
        warn!("Timing configuration was already set");
    }

    match args.command {
        Command::Run { tasks, json } => run_scheduler(&config, &tasks, json).await,
        Command::Ping {
            host,
            count,
            ttl,
            timeout_ms,
            interval_ms,
            port,
            json,
        } => {
            let mut definition = UdpPingDefinition::new(host);
            definition.count = count;
            definition.ttl = ttl;
            definition.receive_timeout = Duration::from_millis(timeout_ms);
            definition.interval = Duration::from_millis(interval_ms);
            definition.destination_port = port;
            let result = run_once(&config, MeasurementDefinition::UdpPing(definition)).await?;
            print_result(&result, json)
        }
        Command::Trace {
            host,
            count,
            timeout_ms,
            json,
        } => {
            let mut definition = TracerouteDefinition::new(host);
            definition.count = count;
            definition.receive_timeout = Duration::from_millis(timeout_ms);
            let result = run_once(&config, MeasurementDefinition::Traceroute(definition)).await?;
            print_result(&result, json)
        }
        Command::NextRun { tasks, from, n } => {
            let from = from.unwrap_or_else(|| {
                SystemClock::with_offset_ms(config.clock.offset_ms).current_date_time()
            });
            for line in preview(&load_tasks(&tasks)?, from, n) {
                println!("{}", line);
            }
            Ok(())
        }
    }
}

fn init_logging(config: &AgentConfig, verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => config
            .logging
            .level
            .parse::<tracing::Level>()
            .with_context(|| format!("Invalid log level: {}", config.logging.level))?,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn load_tasks(path: &Path) -> Result<Vec<TaskSpec>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read task file: {:?}", path))?;
    parse_tasks(&contents).with_context(|| format!("Failed to parse task file: {:?}", path))
}

/// Upcoming run times of each task, one line per run
fn preview(tasks: &[TaskSpec], from: NaiveDateTime, runs: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for task in tasks {
        lines.push(format!(
            "task {} ({}, {}):",
            task.task_id,
            task.method,
            task.timing.type_name()
        ));

        let mut timing = task.timing.clone();
        let mut reference = from;
        let mut shown = 0;
        while shown < runs {
            let Some(next) = timing.next_run_from(reference) else {
                break;
            };
            lines.push(format!("  {}", next.format("%Y-%m-%d %H:%M:%S %a")));
            timing.reset_at(next);
            reference = next;
            shown += 1;
        }
        if shown < runs {
            lines.push("  (no further runs)".to_string());
        }
    }
    lines
}

/// Run one measurement on the blocking pool, cancelling it on Ctrl-C
async fn run_once(config: &AgentConfig, definition: MeasurementDefinition) -> Result<MeasurementResult> {
    let context = Context::system(config);
    let env = context.measurement_env();
    let cancel = env.cancel.clone();
    let mut measurement = context.registry.create_measurement(definition.method(), env)?;

    let mut job = tokio::task::spawn_blocking(move || {
        measurement.prepare(&definition)?;
        measurement.start()?;
        Ok::<_, mprobe::MeasurementError>(measurement.result())
    });

    let outcome = tokio::select! {
        outcome = &mut job => outcome,
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            job.await
        }
    };

    outcome
        .context("Measurement thread failed")??
        .context("Measurement produced no result")
}

async fn run_scheduler(config: &AgentConfig, tasks: &Path, json: bool) -> Result<()> {
    let tasks = load_tasks(tasks)?;
    let results = Arc::new(ResultStore::new(config.scheduler.results_per_task));
    let scheduler = Scheduler::new(
        Context::system(config),
        results.clone(),
        config.scheduler.max_concurrent_tasks,
    );

    for task in tasks {
        let task_id = task.task_id;
        scheduler
            .enqueue(task)
            .with_context(|| format!("Failed to schedule task {}", task_id))?;
    }

    let mut events = results.subscribe();
    let printer = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => print_event(&scheduler, &event, json),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Report printer fell behind");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    };

    let shutdown = CancellationToken::new();
    let runner = {
        let scheduler = scheduler.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { scheduler.run(shutdown).await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");
    shutdown.cancel();
    runner.await.context("Scheduler task failed")?;
    printer.abort();
    Ok(())
}

fn print_event(scheduler: &Scheduler, event: &ResultEvent, json: bool) {
    let report = event.report();
    if json {
        match serde_json::to_string(report) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!(error = %e, "Failed to serialize report"),
        }
        return;
    }

    let kind = match event {
        ResultEvent::Added { .. } => "added",
        ResultEvent::Modified { .. } => "modified",
    };
    let (method, target) = scheduler
        .task_by_task_id(report.task_id)
        .map(|task| {
            (
                task.method.to_uppercase(),
                task.target().map(target_label).unwrap_or_default(),
            )
        })
        .unwrap_or_default();
    println!(
        "{} task {} {} {} at {} ({} results)",
        kind,
        report.task_id,
        method,
        target,
        report.report_time.format("%Y-%m-%d %H:%M:%S"),
        report.results.len()
    );
}

fn print_result(result: &MeasurementResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }
    match result {
        MeasurementResult::Ping(report) => print_ping(report),
        MeasurementResult::Traceroute(report) => print_traceroute(report),
        MeasurementResult::Snmp(report) => {
            for device in &report.devices {
                println!("{} {} {:.3} ms", device.address, device.community, ms(device.rtt));
            }
        }
    }
    Ok(())
}

fn ms(us: u64) -> f64 {
    us as f64 / 1000.0
}

fn print_ping(report: &PingReport) {
    for (seq, probe) in report.probes.iter().enumerate() {
        match probe.rtt_us() {
            Some(rtt) => println!("seq={} {:?} time={:.3} ms", seq, probe.response, ms(rtt)),
            None => match &probe.error {
                Some(error) => println!("seq={} error: {}", seq, error),
                None => println!("seq={} {:?}", seq, probe.response),
            },
        }
    }
    let stats = &report.statistics;
    println!(
        "{} probes, {} answered, rtt min/avg/max/stdev = {:.3}/{:.3}/{:.3}/{:.3} ms",
        report.probes.len(),
        stats.count,
        ms(stats.min),
        stats.avg / 1000.0,
        ms(stats.max),
        stats.stdev / 1000.0
    );
}

fn print_traceroute(report: &TracerouteReport) {
    for hop in &report.results {
        let address = hop
            .address
            .map(|a| a.to_string())
            .unwrap_or_else(|| "*".to_string());
        if hop.rtt_count == 0 {
            println!("{:2} {}", hop.ttl, address);
        } else {
            println!(
                "{:2} {} {:.3} ms ({}/{} answered)",
                hop.ttl,
                address,
                hop.rtt_avg / 1000.0,
                hop.rtt_count,
                hop.pings.len()
            );
        }
    }
}
