//! Relay CLI - Command-line interface for Synheart Relay
//!
//! Commands:
//! - simulate: Run a paired Recorder/Monitor in-process and print the events
//! - history: Aggregate heart-rate samples into daily averages
//! - decode: Validate and normalize link payloads
//! - config: Print or validate a sync configuration

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::runtime::Runtime;

use synheart_relay::config::SyncConfig;
use synheart_relay::coordinator::SyncCoordinator;
use synheart_relay::history::{most_recent_first, HistoryAggregator, InMemorySource};
use synheart_relay::link::{LinkMessage, MemoryLink, Payload};
use synheart_relay::runtime::{spawn_endpoint, EndpointHandle};
use synheart_relay::sampler::ManualSampler;
use synheart_relay::types::{AlertEvent, DailyAverage, DisplayState, Role, Sample, UiIntent};
use synheart_relay::{SyncError, PRODUCER_NAME, RELAY_VERSION};

/// Relay - Workout heart-rate sync between a wrist Recorder and a handheld Monitor
#[derive(Parser)]
#[command(name = "relay")]
#[command(author = "Synheart AI Inc")]
#[command(version = RELAY_VERSION)]
#[command(about = "Simulate and inspect workout heart-rate sync", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a paired Recorder/Monitor in-process and print NDJSON events
    Simulate {
        /// NDJSON samples to feed the Recorder (use - for stdin); synthetic when omitted
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Number of synthetic samples
        #[arg(long, default_value = "30")]
        count: usize,

        /// Sync configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Extra copies of every payload delivered by the link
        #[arg(long, default_value = "0")]
        redeliveries: usize,

        /// Which endpoint starts and stops the workout
        #[arg(long, value_enum, default_value = "monitor")]
        driver: Driver,
    },

    /// Aggregate NDJSON heart-rate samples into daily averages
    History {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Sync configuration file supplying the window and day offset
        #[arg(long)]
        config: Option<PathBuf>,

        /// Trailing window in days (overrides the configuration)
        #[arg(long)]
        window_days: Option<u32>,

        /// End of the window (RFC 3339); defaults to now
        #[arg(long)]
        now: Option<DateTime<Utc>>,

        /// Fixed offset from UTC used to assign calendar days (overrides the configuration)
        #[arg(long, allow_negative_numbers = true)]
        day_offset_minutes: Option<i32>,

        /// Newest day first
        #[arg(long)]
        most_recent_first: bool,

        /// Output format
        #[arg(long, value_enum, default_value = "ndjson")]
        output_format: OutputFormat,
    },

    /// Validate link payloads (one JSON object per line)
    Decode {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output a validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the default configuration, or validate a configuration file
    Config {
        /// Configuration file to validate
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Driver {
    /// Taps happen on the handheld
    Monitor,
    /// Taps happen on the wrist
    Recorder,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one day per line)
    Ndjson,
    /// Pretty-printed JSON array
    JsonPretty,
    /// Aligned text table
    Table,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), RelayCliError> {
    match cli.command {
        Commands::Simulate {
            input,
            count,
            config,
            redeliveries,
            driver,
        } => cmd_simulate(input.as_deref(), count, config.as_deref(), redeliveries, driver),
        Commands::History {
            input,
            config,
            window_days,
            now,
            day_offset_minutes,
            most_recent_first,
            output_format,
        } => cmd_history(
            &input,
            config.as_deref(),
            window_days,
            now,
            day_offset_minutes,
            most_recent_first,
            output_format,
        ),
        Commands::Decode { input, json } => cmd_decode(&input, json),
        Commands::Config { input } => cmd_config(input.as_deref()),
    }
}

fn read_input(input: &Path) -> Result<String, RelayCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn load_config(path: Option<&Path>) -> Result<SyncConfig, RelayCliError> {
    match path {
        Some(path) => Ok(SyncConfig::from_json(&fs::read_to_string(path)?)?),
        None => Ok(SyncConfig::default()),
    }
}

// ============================================================================
// simulate
// ============================================================================

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum SimulationRecord {
    Display {
        endpoint: Role,
        display: DisplayState,
    },
    Alert {
        endpoint: Role,
        alert: AlertEvent,
    },
    Summary {
        producer: &'static str,
        samples_fed: usize,
        alerts: usize,
        recorder_subscriptions: usize,
    },
}

/// Prints display changes and alerts as they happen
struct Transcript {
    last_recorder: DisplayState,
    last_monitor: DisplayState,
    alerts: usize,
}

impl Transcript {
    fn new() -> Self {
        Self {
            last_recorder: DisplayState::default(),
            last_monitor: DisplayState::default(),
            alerts: 0,
        }
    }

    fn emit(record: &SimulationRecord) -> Result<(), RelayCliError> {
        println!("{}", serde_json::to_string(record)?);
        Ok(())
    }

    async fn observe(
        &mut self,
        recorder: &EndpointHandle,
        monitor: &EndpointHandle,
        alerts: &mut tokio::sync::broadcast::Receiver<AlertEvent>,
    ) -> Result<(), RelayCliError> {
        // Samples reach the Monitor only after the Recorder handled them
        recorder.barrier().await?;
        monitor.barrier().await?;

        let shown = recorder.display().borrow().clone();
        if shown != self.last_recorder {
            Self::emit(&SimulationRecord::Display {
                endpoint: Role::Recorder,
                display: shown.clone(),
            })?;
            self.last_recorder = shown;
        }

        while let Ok(alert) = alerts.try_recv() {
            self.alerts += 1;
            Self::emit(&SimulationRecord::Alert {
                endpoint: Role::Recorder,
                alert,
            })?;
        }

        let shown = monitor.display().borrow().clone();
        if shown != self.last_monitor {
            Self::emit(&SimulationRecord::Display {
                endpoint: Role::Monitor,
                display: shown.clone(),
            })?;
            self.last_monitor = shown;
        }
        Ok(())
    }
}

/// Rise from rest past the alert threshold and back down
fn synthetic_samples(count: usize) -> Vec<Sample> {
    let start = Utc::now();
    (0..count)
        .map(|i| {
            let phase = i as f64 / count.max(1) as f64 * std::f64::consts::PI;
            let bpm = 90.0 + 115.0 * phase.sin();
            Sample::new(start + Duration::seconds(i as i64), (bpm * 10.0).round() / 10.0)
        })
        .collect()
}

fn cmd_simulate(
    input: Option<&Path>,
    count: usize,
    config: Option<&Path>,
    redeliveries: usize,
    driver: Driver,
) -> Result<(), RelayCliError> {
    let config = load_config(config)?;
    let samples = match input {
        Some(path) => {
            let source = InMemorySource::from_ndjson(&read_input(path)?)?;
            source.samples().to_vec()
        }
        None => synthetic_samples(count),
    };
    if samples.is_empty() {
        return Err(RelayCliError::NoSamples);
    }

    let runtime = Runtime::new()?;
    runtime.block_on(async move {
        let (recorder_link, monitor_link) = MemoryLink::pair();
        recorder_link.set_redeliveries(redeliveries);
        let sampler = ManualSampler::new();

        let recorder = spawn_endpoint(SyncCoordinator::recorder(
            config.clone(),
            Arc::new(recorder_link.clone()),
            Box::new(sampler.clone()),
        )?);
        let monitor = spawn_endpoint(SyncCoordinator::monitor(
            config,
            Arc::new(monitor_link.clone()),
        )?);
        let mut alerts = recorder.subscribe_alerts();
        let mut observer = Transcript::new();

        recorder_link.activate();
        monitor_link.activate();

        let tapping = match driver {
            Driver::Monitor => &monitor,
            Driver::Recorder => &recorder,
        };

        tapping.intent(UiIntent::Start).await?;
        observer.observe(&recorder, &monitor, &mut alerts).await?;

        let mut fed = 0;
        for sample in &samples {
            if sampler.feed(*sample) {
                fed += 1;
            }
            observer.observe(&recorder, &monitor, &mut alerts).await?;
        }

        tapping.intent(UiIntent::Stop).await?;
        observer.observe(&recorder, &monitor, &mut alerts).await?;

        Transcript::emit(&SimulationRecord::Summary {
            producer: PRODUCER_NAME,
            samples_fed: fed,
            alerts: observer.alerts,
            recorder_subscriptions: sampler.subscribe_count(),
        })?;

        recorder.shutdown().await?;
        monitor.shutdown().await?;
        Ok::<(), RelayCliError>(())
    })
}

// ============================================================================
// history
// ============================================================================

fn cmd_history(
    input: &Path,
    config: Option<&Path>,
    window_days: Option<u32>,
    now: Option<DateTime<Utc>>,
    day_offset_minutes: Option<i32>,
    newest_first: bool,
    output_format: OutputFormat,
) -> Result<(), RelayCliError> {
    let config = load_config(config)?;
    let source = InMemorySource::from_ndjson(&read_input(input)?)?;
    if source.is_empty() {
        return Err(RelayCliError::NoSamples);
    }

    let mut aggregator = HistoryAggregator::from_config(source, &config)?;
    if let Some(minutes) = day_offset_minutes {
        aggregator = aggregator.with_day_offset_minutes(minutes)?;
    }
    let mut averages = aggregator.compute_daily_averages_at(
        window_days.unwrap_or(config.history_window_days),
        now.unwrap_or_else(Utc::now),
    )?;
    if newest_first {
        averages = most_recent_first(&averages);
    }

    print!("{}", format_history(&averages, output_format)?);
    Ok(())
}

fn format_history(
    averages: &[DailyAverage],
    output_format: OutputFormat,
) -> Result<String, RelayCliError> {
    let mut out = String::new();
    match output_format {
        OutputFormat::Ndjson => {
            for average in averages {
                out.push_str(&serde_json::to_string(average)?);
                out.push('\n');
            }
        }
        OutputFormat::JsonPretty => {
            out.push_str(&serde_json::to_string_pretty(averages)?);
            out.push('\n');
        }
        OutputFormat::Table => {
            for average in averages {
                out.push_str(&format!("{}  {:.3}\n", average.day.format("%b %-d, %Y"), average.bpm));
            }
        }
    }
    Ok(out)
}

// ============================================================================
// decode
// ============================================================================

#[derive(Serialize)]
struct DecodeReport {
    total_payloads: usize,
    valid_payloads: usize,
    invalid_payloads: usize,
    errors: Vec<DecodeErrorDetail>,
}

#[derive(Serialize)]
struct DecodeErrorDetail {
    line: usize,
    error: String,
}

fn cmd_decode(input: &Path, json: bool) -> Result<(), RelayCliError> {
    let data = read_input(input)?;

    let mut report = DecodeReport {
        total_payloads: 0,
        valid_payloads: 0,
        invalid_payloads: 0,
        errors: Vec::new(),
    };
    let mut decoded: Vec<LinkMessage> = Vec::new();

    for (index, line) in data.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        report.total_payloads += 1;

        let result = serde_json::from_str::<Payload>(line)
            .map_err(SyncError::from)
            .and_then(|payload| LinkMessage::from_payload(&payload));
        match result {
            Ok(message) => {
                report.valid_payloads += 1;
                decoded.push(message);
            }
            Err(e) => {
                report.invalid_payloads += 1;
                report.errors.push(DecodeErrorDetail {
                    line: index + 1,
                    error: e.to_string(),
                });
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for message in &decoded {
            println!("{}", serde_json::to_string(message)?);
        }
        for error in &report.errors {
            eprintln!("line {}: {}", error.line, error.error);
        }
    }

    if report.invalid_payloads > 0 {
        Err(RelayCliError::InvalidPayloads(report.invalid_payloads))
    } else {
        Ok(())
    }
}

// ============================================================================
// config
// ============================================================================

fn cmd_config(input: Option<&Path>) -> Result<(), RelayCliError> {
    let config = load_config(input)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
enum RelayCliError {
    Io(io::Error),
    Sync(SyncError),
    Json(serde_json::Error),
    NoSamples,
    InvalidPayloads(usize),
}

impl From<io::Error> for RelayCliError {
    fn from(e: io::Error) -> Self {
        RelayCliError::Io(e)
    }
}

impl From<SyncError> for RelayCliError {
    fn from(e: SyncError) -> Self {
        RelayCliError::Sync(e)
    }
}

impl From<serde_json::Error> for RelayCliError {
    fn from(e: serde_json::Error) -> Self {
        RelayCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<RelayCliError> for CliError {
    fn from(e: RelayCliError) -> Self {
        match e {
            RelayCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            RelayCliError::Sync(e) => {
                let hint = match &e {
                    SyncError::ConfigError(_) => "Run 'relay config' to see valid defaults",
                    SyncError::SourceError(_) => {
                        "Each line must be {\"timestamp\": RFC 3339, \"bpm\": number}"
                    }
                    SyncError::AuthorizationError(_) => "Grant heart rate access and retry",
                    _ => "Re-run with RUST_LOG=debug for details",
                };
                CliError {
                    code: "SYNC_ERROR".to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            RelayCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            RelayCliError::NoSamples => CliError {
                code: "NO_SAMPLES".to_string(),
                message: "No heart rate samples found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            RelayCliError::InvalidPayloads(count) => CliError {
                code: "INVALID_PAYLOADS".to_string(),
                message: format!("{} payloads failed to decode", count),
                hint: Some("Run 'relay decode --json' for details".to_string()),
            },
        }
    }
}
