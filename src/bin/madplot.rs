//! madplot CLI - Batch driver for FlyMAD analysis
//!
//! Commands:
//! - load: Load (and optionally merge) experiment logs, print a JSON summary
//! - cache: Report the state of an input's cache file

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use flymad_analysis::area::total_pct_in_area;
use flymad_analysis::cache::{CacheKey, ResultCache, CACHE_FORMAT_VERSION};
use flymad_analysis::pipeline::{calibration_path, LoadedSession};
use flymad_analysis::schema::{JsonLogReader, LogFormat};
use flymad_analysis::types::TrackLength;
use flymad_analysis::{
    merge_sessions, AnalysisError, Arena, ArenaConfig, Calibration, ExtraTopics, LoadOptions,
    Session, SessionLoader, TimezonePolicy, Unit, MADPLOT_VERSION,
};

/// madplot - Offline analysis of FlyMAD experiment logs
#[derive(Parser)]
#[command(name = "madplot")]
#[command(version = MADPLOT_VERSION)]
#[command(about = "Load, smooth and cache FlyMAD experiment logs", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error); defaults to RUST_LOG or info
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load experiment logs and print a summary
    Load {
        /// Input logs, named by their start time (e.g. 2013-10-07-16-59-29.bag)
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output unit of positions and velocities
        #[arg(long, default_value = "px")]
        unit: String,

        /// Arena configuration JSON overriding the defaults
        #[arg(long)]
        arena_config: Option<PathBuf>,

        /// Minimum track length in samples
        #[arg(long, default_value = "100")]
        filter_short: usize,

        /// Minimum track length as a percentage of all samples (wins when > 0)
        #[arg(long, default_value = "0")]
        filter_short_pct: f64,

        /// Kalman-smooth positions before deriving velocities
        #[arg(long)]
        smooth: bool,

        /// Extra topic field to collect, as topic:field:kind (repeatable)
        #[arg(long = "extra")]
        extra: Vec<String>,

        /// Target timezone (e.g. "CET", "Europe/Vienna")
        #[arg(long)]
        timezone: Option<String>,

        /// Merge all loaded sessions into one
        #[arg(long)]
        merge: bool,

        /// Only warn when merged sessions have non-intersecting arena geometry
        #[arg(long)]
        allow_geometry_mismatch: bool,

        /// Write the full processed sessions as JSON to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Report the cache state of an input log
    Cache {
        /// Input log
        input: PathBuf,

        /// Check the cache against these load parameters
        #[arg(long, default_value = "px")]
        unit: String,

        #[arg(long, default_value = "100")]
        filter_short: usize,

        #[arg(long, default_value = "0")]
        filter_short_pct: f64,

        #[arg(long)]
        smooth: bool,

        #[arg(long)]
        timezone: Option<String>,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one event per line)
    Ndjson,
    /// JSON array of events
    Json,
}

impl From<InputFormat> for LogFormat {
    fn from(format: InputFormat) -> Self {
        match format {
            InputFormat::Ndjson => LogFormat::Ndjson,
            InputFormat::Json => LogFormat::JsonArray,
        }
    }
}

fn init_logging(level: Option<&str>) {
    let level = level
        .map(str::to_string)
        .or_else(|| std::env::var("RUST_LOG").ok())
        .and_then(|l| l.parse::<tracing_subscriber::filter::LevelFilter>().ok())
        .unwrap_or(tracing_subscriber::filter::LevelFilter::INFO);

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), MadplotCliError> {
    match cli.command {
        Commands::Load {
            inputs,
            input_format,
            unit,
            arena_config,
            filter_short,
            filter_short_pct,
            smooth,
            extra,
            timezone,
            merge,
            allow_geometry_mismatch,
            output,
        } => {
            let mut extra_topics = ExtraTopics::new();
            for declaration in &extra {
                extra_topics.add_declaration(declaration)?;
            }
            let mut options = LoadOptions::default()
                .with_filter_short(filter_short)
                .with_filter_short_pct(filter_short_pct)
                .with_smoothing(smooth)
                .with_extra_topics(extra_topics);
            if let Some(tz) = timezone {
                options = options.with_timezone(tz);
            }
            let arena = build_arena(&unit, arena_config.as_deref())?;

            cmd_load(
                &inputs,
                input_format,
                &arena,
                &options,
                merge,
                !allow_geometry_mismatch,
                output.as_deref(),
            )
        }

        Commands::Cache {
            input,
            unit,
            filter_short,
            filter_short_pct,
            smooth,
            timezone,
        } => {
            let mut options = LoadOptions::default()
                .with_filter_short(filter_short)
                .with_filter_short_pct(filter_short_pct)
                .with_smoothing(smooth);
            if let Some(tz) = timezone {
                options = options.with_timezone(tz);
            }
            let arena = build_arena(&unit, None)?;
            cmd_cache(&input, &arena, &options)
        }
    }
}

fn build_arena(unit: &str, config: Option<&Path>) -> Result<Arena, MadplotCliError> {
    let unit: Unit = unit.parse()?;
    match config {
        Some(path) => {
            let json = fs::read_to_string(path)?;
            Ok(Arena::from_config(unit, &ArenaConfig::from_json(&json)?))
        }
        None => Ok(Arena::new(unit)),
    }
}

#[derive(Serialize)]
struct SessionSummary {
    path: Option<PathBuf>,
    start: Option<String>,
    timezone: String,
    targeted: usize,
    tracked: usize,
    head: usize,
    extra: usize,
    obj_ids: Vec<u32>,
    track_lengths: Vec<TrackLength>,
    pct_in_area: Vec<(u32, f64)>,
}

impl SessionSummary {
    fn new(session: &Session, loaded: Option<&LoadedSession>) -> Self {
        Self {
            path: loaded.map(|l| l.path.clone()),
            start: loaded.map(|l| l.start.to_string()),
            timezone: session.timezone.clone(),
            targeted: session.targeted.len(),
            tracked: session.tracked.len(),
            head: session.head.len(),
            extra: session.extra.as_ref().map_or(0, |e| e.rows.len()),
            obj_ids: session.obj_ids(),
            track_lengths: session.track_lengths.clone(),
            pct_in_area: total_pct_in_area(&session.tracked),
        }
    }
}

#[derive(Serialize)]
struct LoadReport {
    version: &'static str,
    sessions: Vec<SessionSummary>,
    merged: Option<SessionSummary>,
}

fn cmd_load(
    inputs: &[PathBuf],
    input_format: InputFormat,
    arena: &Arena,
    options: &LoadOptions,
    merge: bool,
    geom_must_intersect: bool,
    output: Option<&Path>,
) -> Result<(), MadplotCliError> {
    let mut loader = SessionLoader::with_reader(JsonLogReader::new(input_format.into()));
    let loaded = loader.load_many(inputs, arena, options)?;
    if loaded.is_empty() {
        return Err(MadplotCliError::NoSessions);
    }

    let sessions: Vec<SessionSummary> = loaded
        .iter()
        .map(|l| SessionSummary::new(&l.session, Some(l)))
        .collect();

    let merged = if merge {
        let all: Vec<Session> = loaded.iter().map(|l| l.session.clone()).collect();
        Some(merge_sessions(all, geom_must_intersect)?)
    } else {
        None
    };

    if let Some(path) = output {
        let json = match &merged {
            Some(session) => serde_json::to_string(session)?,
            None => {
                let all: Vec<&Session> = loaded.iter().map(|l| &l.session).collect();
                serde_json::to_string(&all)?
            }
        };
        fs::write(path, json)?;
    }

    let report = LoadReport {
        version: MADPLOT_VERSION,
        sessions,
        merged: merged.as_ref().map(|s| SessionSummary::new(s, None)),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[derive(Serialize)]
struct CacheReport {
    path: PathBuf,
    exists: bool,
    version: Option<u32>,
    current_version: u32,
    /// Stored fingerprint matches the given parameters
    valid: bool,
    key: Option<serde_json::Value>,
}

fn cmd_cache(input: &Path, arena: &Arena, options: &LoadOptions) -> Result<(), MadplotCliError> {
    let arena = match Calibration::load(&calibration_path(input)) {
        Some(calibration) => arena.clone().with_calibration(calibration)?,
        None => arena.clone(),
    };
    let (timezone, _) = TimezonePolicy::from_env().resolve(options.tzname.as_deref())?;
    let expected = CacheKey::new(input, &arena, options, &timezone);

    let cache = ResultCache::for_input(input);
    let header = cache.header()?;
    let valid = header.as_ref().map_or(false, |h| {
        h.version == CACHE_FORMAT_VERSION
            && serde_json::from_value::<CacheKey>(h.key.clone()).map_or(false, |k| k == expected)
    });

    let report = CacheReport {
        path: cache.path().to_path_buf(),
        exists: header.is_some(),
        version: header.as_ref().map(|h| h.version),
        current_version: CACHE_FORMAT_VERSION,
        valid,
        key: header.map(|h| h.key),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

// Error types

#[derive(Debug)]
enum MadplotCliError {
    Io(io::Error),
    Analysis(AnalysisError),
    Json(serde_json::Error),
    NoSessions,
}

impl From<io::Error> for MadplotCliError {
    fn from(e: io::Error) -> Self {
        MadplotCliError::Io(e)
    }
}

impl From<AnalysisError> for MadplotCliError {
    fn from(e: AnalysisError) -> Self {
        MadplotCliError::Analysis(e)
    }
}

impl From<serde_json::Error> for MadplotCliError {
    fn from(e: serde_json::Error) -> Self {
        MadplotCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<MadplotCliError> for CliError {
    fn from(e: MadplotCliError) -> Self {
        match e {
            MadplotCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            MadplotCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            MadplotCliError::Analysis(e) => {
                let (code, hint) = match &e {
                    AnalysisError::MissingTimezone => (
                        "MISSING_TIMEZONE",
                        Some("Pass --timezone or unset MADPLOT_FORCE_USER_TZNAME"),
                    ),
                    AnalysisError::InvalidTimezone(_) => {
                        ("INVALID_TIMEZONE", Some("Use an IANA zone name such as Europe/Vienna"))
                    }
                    AnalysisError::GeometryMismatch(_) => (
                        "GEOMETRY_MISMATCH",
                        Some("Pass --allow-geometry-mismatch to merge anyway"),
                    ),
                    AnalysisError::ConflictingCalibration(_) => {
                        ("CONFLICTING_CALIBRATION", Some("Check the calibration sidecar files"))
                    }
                    AnalysisError::ParseError(_) | AnalysisError::JsonError(_) => {
                        ("PARSE_ERROR", Some("Check the input format (--input-format)"))
                    }
                    AnalysisError::InvalidOptions(_) => ("INVALID_OPTIONS", None),
                    _ => ("ANALYSIS_ERROR", None),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: hint.map(str::to_string),
                }
            }
            MadplotCliError::NoSessions => CliError {
                code: "NO_SESSIONS".to_string(),
                message: "No input could be loaded".to_string(),
                hint: Some("Log file names must start with %Y-%m-%d-%H-%M-%S".to_string()),
            },
        }
    }
}
