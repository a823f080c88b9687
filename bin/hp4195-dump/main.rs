mod config;

use chrono::Local;
use clap::Parser;
use env_logger::Env;
use hp4195_dump::{
    CaptureSequencer, ConversionOutcome, DumpError, ExternalConverter, OutputSink,
    ScriptedTransport, open_resource, run_interactive,
};
use log::{LevelFilter, error, info};
use std::io;
use std::path::PathBuf;

use crate::config::{AppConfig, load_config};

/// HP 4195A screenshot tool
#[derive(Parser, Debug)]
#[command(name = "hp4195-dump")]
#[command(about = "Save a screen plot from an HP 4195A", long_about = None)]
struct Args {
    /// Full VISA resource string like TCPIP::x.y.z.w::5025::SOCKET
    #[arg(short, long, value_name = "RESOURCE")]
    res: Option<String>,

    /// Plot top comment (ASCII, max 26 chars)
    #[arg(short, long, value_name = "TEXT")]
    cmt: Option<String>,

    /// Output file basename, no extension (default: timestamped)
    #[arg(short, long, value_name = "NAME")]
    file: Option<String>,

    /// Prompt for comment and filename repeatedly; ignores --cmt and --file
    #[arg(short, long)]
    interactive: bool,

    /// Skip the external rasterizer
    #[arg(long)]
    no_convert: bool,

    /// Run the capture against a simulated instrument and print the bus
    /// traffic; nothing is opened or written
    #[arg(long, conflicts_with = "interactive")]
    dry_run: bool,

    /// Path to configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let mut config = load_config(args.config.as_deref())?;

    let log_level = args
        .log_level
        .clone()
        .unwrap_or(config.console.verbosity.clone());
    initialize_logging(&log_level)?;

    if let Some(res) = &args.res {
        config.instrument.resource = res.clone();
        config.instrument.validate()?;
    }
    if args.no_convert {
        config.converter.enabled = false;
    }

    let sink = build_sink(&config);

    if args.interactive {
        if args.cmt.is_some() || args.file.is_some() {
            info!("Interactive mode: ignoring --cmt/--file");
        }
        return run_session(&config, &sink);
    }

    let base = args.file.clone().unwrap_or_else(default_base_name);
    // usage errors before any bus traffic
    OutputSink::validate_base_name(&base)?;

    if args.dry_run {
        let (commands, path) = dry_run(&sink, args.cmt.as_deref(), &base)?;
        for command in &commands {
            println!("-> {command}");
        }
        println!("would write {}", path.display());
        return Ok(());
    }

    run_once(&config, &sink, args.cmt.as_deref(), &base)
}

/// Instrument stand-in answering the capture sequence with an HPGL plot.
fn simulated_instrument() -> ScriptedTransport {
    ScriptedTransport::new()
        .with_text("HP4195A")
        .with_raw(b"")
        .with_raw(b"IN;SP1;PU0,0;PD4000,0,4000,3000;PU;")
}

/// Walk the capture sequence without hardware. Returns the commands that
/// would go on the bus and the file that would be written.
fn dry_run(
    sink: &OutputSink,
    comment: Option<&str>,
    base: &str,
) -> Result<(Vec<String>, PathBuf), DumpError> {
    let mut transport = simulated_instrument();
    let capture = CaptureSequencer::new().acquire(&mut transport, comment)?;
    let commands = transport.commands().into_iter().map(String::from).collect();
    Ok((commands, sink.artifact_path(base, capture.format())))
}

fn build_sink(config: &AppConfig) -> OutputSink {
    let sink = OutputSink::new(config.sink_config());
    match config.converter_config() {
        Some(converter) => sink.with_converter(Box::new(ExternalConverter::new(converter))),
        None => sink,
    }
}

fn run_once(
    config: &AppConfig,
    sink: &OutputSink,
    comment: Option<&str>,
    base: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Opening {}", config.instrument.resource);
    let mut transport = open_resource(
        &config.instrument.resource,
        &config.instrument.connection(),
    )?;

    let capture = CaptureSequencer::new()
        .acquire(&mut transport, comment)
        .inspect_err(|e| error!("Capture failed: {e}"))?;
    let saved = sink.persist(base, &capture)?;

    println!("{}", saved.path.display());
    if let ConversionOutcome::Converted { program } = &saved.conversion {
        info!("Raster image written by {program}");
    }
    Ok(())
}

fn run_session(config: &AppConfig, sink: &OutputSink) -> Result<(), Box<dyn std::error::Error>> {
    info!("Opening {}", config.instrument.resource);
    let mut transport = open_resource(
        &config.instrument.resource,
        &config.instrument.connection(),
    )?;
    let mut sequencer = CaptureSequencer::new();

    let stdin = io::stdin();
    let summary = run_interactive(
        &mut transport,
        &mut sequencer,
        sink,
        stdin.lock(),
        io::stdout(),
    )?;

    if summary.failures > 0 {
        error!("{} of {} captures failed", summary.failures, summary.captures + summary.failures);
    }
    Ok(())
}

fn default_base_name() -> String {
    format!("hp4195_{}", Local::now().format("%Y%m%d_%H%M%S"))
}

/// Initialize logging with configurable level
fn initialize_logging(log_level: &str) -> Result<(), Box<dyn std::error::Error>> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => {
            eprintln!("Warning: Invalid log level '{}', using 'info'", log_level);
            LevelFilter::Info
        }
    };

    env_logger::Builder::from_env(Env::default())
        .filter_level(level)
        .format_timestamp_millis()
        .init();

    Ok(())
}
