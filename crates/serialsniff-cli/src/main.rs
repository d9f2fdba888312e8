use std::fs::{self, File};
use std::io::{self, BufRead, BufWriter};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use crossbeam_channel::{Receiver, never, select, tick};
use glob::glob;
use serialsniff_core::capture::{CaptureBackend, CaptureError, ReplayBackend};
use serialsniff_core::config::SnifferConfig;
use serialsniff_core::pool::WorkerPool;
use serialsniff_core::sink::{AnalysisFormat, AnalysisWriter, RawPacketWriter, Sink};
use serialsniff_core::sniffer::{Sniffer, SnifferError};

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\ncommit: ",
    env!("SERIALSNIFF_BUILD_COMMIT"),
    "\ndate: ",
    env!("SERIALSNIFF_BUILD_DATE")
);

const EXAMPLES: &str = "Examples:\n  serialsniff capture --device eth0 --filter \"tcp port 1099\" --analysis-out analysis.txt\n  serialsniff replay capture.pcapng --raw-out packets.txt --analysis-out analysis.jsonl --json\n  serialsniff devices";

#[derive(Parser, Debug)]
#[command(name = "serialsniff")]
#[command(version, long_version = LONG_VERSION)]
#[command(
    about = "Packet sniffer that looks for serialized objects inside captured payloads.",
    long_about = None,
    after_help = EXAMPLES
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Capture live traffic from a network device until Enter is pressed.
    #[cfg(feature = "live")]
    Capture {
        /// Device to open (see `serialsniff devices`)
        #[arg(short = 'd', long)]
        device: String,

        /// BPF filter expression
        #[arg(short = 'f', long)]
        filter: Option<String>,

        /// IPv4 netmask of the capture network, used with --filter
        #[arg(long, requires = "filter")]
        netmask: Option<Ipv4Addr>,

        /// Stop automatically after this many seconds
        #[arg(long, value_name = "SECS")]
        duration: Option<u64>,

        #[command(flatten)]
        outputs: OutputArgs,
    },
    /// Replay a .pcap or .pcapng file through the sinks.
    Replay {
        /// Path (or glob matching a single file) of a .pcap or .pcapng file
        input: PathBuf,

        /// BPF filter expression
        #[arg(short = 'f', long)]
        filter: Option<String>,

        #[command(flatten)]
        outputs: OutputArgs,
    },
    /// List capture devices and their addresses.
    #[cfg(feature = "live")]
    Devices,
}

impl Commands {
    fn quiet(&self) -> bool {
        match self {
            #[cfg(feature = "live")]
            Commands::Capture { outputs, .. } => outputs.quiet,
            Commands::Replay { outputs, .. } => outputs.quiet,
            #[cfg(feature = "live")]
            Commands::Devices => false,
        }
    }
}

#[derive(Args, Debug)]
struct OutputArgs {
    /// Write a layer dump of every packet to PATH
    #[arg(long, value_name = "PATH")]
    raw_out: Option<PathBuf>,

    /// Write scanner results and the closing histogram to PATH
    #[arg(long, value_name = "PATH")]
    analysis_out: Option<PathBuf>,

    /// Write analysis output as JSON Lines
    #[arg(long, requires = "analysis_out")]
    json: bool,

    /// Sniffer configuration file (JSON)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Suppress the summary and lower the default log level to warn
    #[arg(long)]
    quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let default_level = if cli.command.quiet() { "warn" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let result = match cli.command {
        #[cfg(feature = "live")]
        Commands::Capture {
            device,
            filter,
            netmask,
            duration,
            outputs,
        } => cmd_capture(device, filter, netmask, duration, outputs),
        Commands::Replay {
            input,
            filter,
            outputs,
        } => cmd_replay(input, filter, outputs),
        #[cfg(feature = "live")]
        Commands::Devices => cmd_devices(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err.message);
            if let Some(hint) = err.hint {
                eprintln!("hint: {}", hint);
            }
            ExitCode::from(2)
        }
    }
}

#[derive(Debug)]
struct CliError {
    message: String,
    hint: Option<String>,
}

impl CliError {
    fn new(message: impl Into<String>, hint: Option<String>) -> Self {
        Self {
            message: message.into(),
            hint,
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        CliError::new(format!("{:#}", err), None)
    }
}

impl From<SnifferError> for CliError {
    fn from(err: SnifferError) -> Self {
        let hint = match &err {
            SnifferError::Capture(CaptureError::Open { .. }) => {
                Some("check the device name with `serialsniff devices`; live capture usually needs root or CAP_NET_RAW")
            }
            SnifferError::Capture(CaptureError::Filter { .. }) => {
                Some("check the BPF expression, e.g. \"tcp port 1099\"")
            }
            SnifferError::Capture(CaptureError::Unsupported(_)) => {
                Some("rebuild with the `live` feature enabled")
            }
            SnifferError::Config(_) => Some("fix the configuration file passed with --config"),
            SnifferError::Pool(_) => Some("raise pool.max_threads in the configuration"),
            _ => None,
        };
        CliError::new(err.to_string(), hint.map(str::to_string))
    }
}

#[cfg(feature = "live")]
fn cmd_capture(
    device: String,
    filter: Option<String>,
    netmask: Option<Ipv4Addr>,
    duration: Option<u64>,
    outputs: OutputArgs,
) -> Result<(), CliError> {
    let quiet = outputs.quiet;
    let wait = Wait {
        interactive: true,
        duration: duration.map(Duration::from_secs),
    };
    if !quiet {
        match duration {
            Some(secs) => eprintln!("capturing on {device} for {secs}s, press Enter to stop early"),
            None => eprintln!("capturing on {device}, press Enter to stop"),
        }
    }
    let backend = Arc::new(serialsniff_core::capture::PcapBackend);
    run_pipeline(&device, backend, filter, netmask, wait, &outputs, None)
}

fn cmd_replay(input: PathBuf, filter: Option<String>, outputs: OutputArgs) -> Result<(), CliError> {
    let resolved_input = resolve_input_path(&input)?;
    validate_input_file(&resolved_input)?;
    let input_abs = fs::canonicalize(&resolved_input)
        .with_context(|| format!("Failed to resolve input path: {}", resolved_input.display()))?;

    let wait = Wait {
        interactive: false,
        duration: None,
    };
    run_pipeline(
        &resolved_input.to_string_lossy(),
        Arc::new(ReplayBackend),
        filter,
        None,
        wait,
        &outputs,
        Some(&input_abs),
    )
}

#[cfg(feature = "live")]
fn cmd_devices() -> Result<(), CliError> {
    let devices = serialsniff_core::capture::list_devices().map_err(|err| {
        CliError::new(
            err.to_string(),
            Some("device listing usually needs root or CAP_NET_RAW".to_string()),
        )
    })?;
    if devices.is_empty() {
        return Err(CliError::new(
            "no capture devices found",
            Some("check libpcap permissions".to_string()),
        ));
    }
    for device in devices {
        let mut line = device.name.clone();
        if let Some(description) = &device.description {
            line.push_str(&format!(" ({description})"));
        }
        if device.loopback {
            line.push_str(" [loopback]");
        }
        println!("{line}");
        for address in &device.addresses {
            println!("    {address}");
        }
    }
    Ok(())
}

/// When to stop a running session besides the feed ending on its own.
struct Wait {
    interactive: bool,
    duration: Option<Duration>,
}

fn run_pipeline(
    device: &str,
    backend: Arc<dyn CaptureBackend>,
    filter: Option<String>,
    netmask: Option<Ipv4Addr>,
    wait: Wait,
    args: &OutputArgs,
    input: Option<&Path>,
) -> Result<(), CliError> {
    if args.raw_out.is_none() && args.analysis_out.is_none() {
        return Err(CliError::new(
            "no output selected",
            Some("use --raw-out and/or --analysis-out".to_string()),
        ));
    }
    let config = match &args.config {
        Some(path) => SnifferConfig::from_path(path).map_err(|err| {
            CliError::new(
                format!("invalid configuration {}: {}", path.display(), err),
                Some("every key is optional; see the README for the accepted fields".to_string()),
            )
        })?,
        None => SnifferConfig::default(),
    };

    let pool = WorkerPool::new(config.pool.clone());
    let outputs = Outputs::open(args, &config, input)?;
    outputs.spawn(&pool)?;

    let sniffer = match Sniffer::new(device, backend, config, pool) {
        Ok(sniffer) => sniffer,
        Err(err) => {
            outputs.close();
            return Err(err.into());
        }
    };
    outputs.attach(&sniffer);
    if let Some(expression) = filter {
        sniffer.set_filter(expression, netmask);
    }

    if let Err(err) = sniffer.start() {
        outputs.close();
        return Err(err.into());
    }
    wait_for_end(&sniffer, &wait);
    let outcome = sniffer.stop();
    outputs.close();
    outcome?;

    if !args.quiet {
        let stats = sniffer.stats();
        eprintln!(
            "OK: {} packets captured, {} dispatched, {} dropped",
            stats.captured, stats.dispatched, stats.dropped
        );
        outputs.report();
    }
    Ok(())
}

fn wait_for_end(sniffer: &Sniffer, wait: &Wait) {
    let mut enter = if wait.interactive {
        watch_stdin(wait.duration.is_none())
    } else {
        never()
    };
    let deadline = wait
        .duration
        .map(crossbeam_channel::after)
        .unwrap_or_else(never);
    let poll = tick(Duration::from_millis(100));

    loop {
        let mut stdin_closed = false;
        select! {
            recv(enter) -> line => match line {
                Ok(()) => {
                    log::info!("stop requested from stdin");
                    break;
                }
                Err(_) => stdin_closed = true,
            },
            recv(deadline) -> _ => {
                log::info!("capture duration elapsed");
                break;
            }
            recv(poll) -> _ => {
                if !sniffer.is_running() {
                    break;
                }
            }
        }
        if stdin_closed {
            enter = never();
        }
    }
}

/// Signals once a line is read from stdin. End of input counts as a line
/// only when nothing else will end the session.
fn watch_stdin(stop_on_eof: bool) -> Receiver<()> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    thread::spawn(move || {
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) if !stop_on_eof => {}
            _ => {
                let _ = tx.send(());
            }
        }
    });
    rx
}

type FileOut = BufWriter<File>;

struct Outputs {
    raw: Option<(PathBuf, Arc<Sink<RawPacketWriter<FileOut>>>)>,
    analysis: Option<(PathBuf, Arc<Sink<AnalysisWriter<FileOut>>>)>,
}

impl Outputs {
    fn open(args: &OutputArgs, config: &SnifferConfig, input: Option<&Path>) -> Result<Self, CliError> {
        let raw = match &args.raw_out {
            Some(path) => {
                let file = create_output(path, input)?;
                let sink = Sink::new("raw", config.sink_queue_capacity, RawPacketWriter::new(file));
                Some((path.clone(), sink))
            }
            None => None,
        };
        let analysis = match &args.analysis_out {
            Some(path) => {
                let file = create_output(path, input)?;
                let format = if args.json {
                    AnalysisFormat::JsonLines
                } else {
                    AnalysisFormat::Text
                };
                let sink = Sink::new(
                    "analysis",
                    config.sink_queue_capacity,
                    AnalysisWriter::new(file, format),
                );
                Some((path.clone(), sink))
            }
            None => None,
        };
        Ok(Self { raw, analysis })
    }

    fn spawn(&self, pool: &WorkerPool) -> Result<(), CliError> {
        let spawned = self
            .raw
            .as_ref()
            .map_or(Ok(()), |(_, sink)| sink.spawn(pool))
            .and_then(|()| {
                self.analysis
                    .as_ref()
                    .map_or(Ok(()), |(_, sink)| sink.spawn(pool))
            });
        spawned.map_err(|err| {
            self.close();
            CliError::new(
                err.to_string(),
                Some("raise pool.max_threads in the configuration".to_string()),
            )
        })
    }

    fn attach(&self, sniffer: &Sniffer) {
        if let Some((_, sink)) = &self.raw {
            sniffer.add_sink(sink.clone());
        }
        if let Some((_, sink)) = &self.analysis {
            sniffer.add_sink(sink.clone());
        }
    }

    /// Shut the sinks down; the analysis histogram is written here.
    fn close(&self) {
        if let Some((_, sink)) = &self.raw {
            sink.cancel();
        }
        if let Some((_, sink)) = &self.analysis {
            sink.cancel();
        }
    }

    fn report(&self) {
        if let Some((path, sink)) = &self.raw {
            report_sink("raw packets", path, sink.dropped());
        }
        if let Some((path, sink)) = &self.analysis {
            report_sink("analysis", path, sink.dropped());
        }
    }
}

fn report_sink(label: &str, path: &Path, dropped: u64) {
    if dropped > 0 {
        eprintln!(
            "OK: {label} written -> {} ({dropped} packets dropped)",
            path.display()
        );
    } else {
        eprintln!("OK: {label} written -> {}", path.display());
    }
}

fn create_output(path: &Path, input: Option<&Path>) -> Result<FileOut, CliError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create output directory: {}", parent.display())
            })?;
        }
    }
    if let Some(input) = input {
        if fs::canonicalize(path).is_ok_and(|target| target == input) {
            return Err(CliError::new(
                format!("output path must differ from input: {}", path.display()),
                Some("choose a different output path".to_string()),
            ));
        }
    }
    let file = File::create(path)
        .with_context(|| format!("Failed to create output file: {}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn validate_input_file(input: &Path) -> Result<(), CliError> {
    if !input.exists() {
        return Err(CliError::new(
            format!("input file not found: {}", input.display()),
            Some("use a .pcap or .pcapng file".to_string()),
        ));
    }
    if !input.is_file() {
        return Err(CliError::new(
            format!("input is not a file: {}", input.display()),
            Some("use a .pcap or .pcapng file".to_string()),
        ));
    }
    let ext = input
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    if ext != "pcap" && ext != "pcapng" {
        return Err(CliError::new(
            format!("unsupported input format '{}'", input.display()),
            Some("expected a .pcap or .pcapng file".to_string()),
        ));
    }
    Ok(())
}

fn resolve_input_path(input: &Path) -> Result<PathBuf, CliError> {
    let pattern = input.to_string_lossy();
    if !is_glob_pattern(&pattern) {
        return Ok(input.to_path_buf());
    }

    let mut matches = Vec::new();
    let paths = glob(&pattern).map_err(|err| {
        CliError::new(
            format!("invalid input pattern '{}'", pattern),
            Some(format!("pattern error: {}", err.msg)),
        )
    })?;
    for entry in paths {
        let path = entry.map_err(|err| {
            CliError::new(
                format!("invalid input pattern '{}'", pattern),
                Some(format!("pattern error: {}", err)),
            )
        })?;
        if path.is_file() {
            matches.push(path);
        }
    }

    if matches.is_empty() {
        return Err(CliError::new(
            format!("no files match pattern '{}'", pattern),
            Some("check the path or quote the pattern; expected .pcap or .pcapng".to_string()),
        ));
    }
    if matches.len() > 1 {
        let listed = matches
            .iter()
            .take(3)
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let more = if matches.len() > 3 { ", ..." } else { "" };
        return Err(CliError::new(
            format!(
                "multiple files match pattern '{}' ({} matches); matches: {}{}",
                pattern,
                matches.len(),
                listed,
                more
            ),
            Some("pass a single capture file, or run once per file".to_string()),
        ));
    }

    Ok(matches.remove(0))
}

fn is_glob_pattern(input: &str) -> bool {
    input.contains('*') || input.contains('?') || input.contains('[')
}
