//! circuit-librarian: back up, restore and inspect Circuit Tracks synth patches
//!
//! - `ports`: List MIDI ports, best device match first
//! - `fetch`: Download a synth bank to a `.syx` file
//! - `send`: Upload a `.syx` bank to the device
//! - `current`: Show the patch loaded on a synth track
//! - `inspect`: List the patches in a `.syx` file (no device needed)
//! - `monitor`: Print session events as they arrive

mod files;

use anyhow::{Context, Result, bail};
use chrono::Local;
use circuit::{BankStore, BatchSummary, MidirBackend, SessionConfig, SessionEvent, Track, TransportSession};
use circuit_core::layout::{mod_destination_name, mod_source_name};
use circuit_core::sysex::{self, BANK_SIZE, ParsedFrame};
use circuit_core::{PatchParams, parse_frame, parse_syx_file};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const FILTER_TYPES: [&str; 6] = ["LP12", "LP24", "HP12", "HP24", "BP12", "BP24"];
const WAVE_NAMES: [&str; 4] = ["Sine", "Tri", "Saw", "Square"];

/// Patch librarian for the Novation Circuit Tracks
#[derive(Parser)]
#[command(name = "circuit-librarian")]
#[command(about = "Back up, restore and inspect Circuit Tracks synth patches")]
#[command(version)]
struct Cli {
    /// Path to a JSON session config (default: $CIRCUIT_CONFIG or the data dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// MIDI port to use instead of auto-detecting the device
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Output format
    #[arg(long, global = true, default_value = "table")]
    format: OutputFormat,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// List bidirectional MIDI ports
    Ports,

    /// Download a synth bank into a .syx file
    Fetch {
        /// Synth track (1 or 2)
        #[arg(short, long, default_value = "1", value_parser = clap::value_parser!(u8).range(1..=2))]
        track: u8,

        /// Output file (default: circuit_tracks_synth<N>_bank.syx)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// After a failed or cancelled fetch, save only the patches that arrived
        #[arg(long)]
        partial: bool,
    },

    /// Upload every patch in a .syx file to a synth bank
    Send {
        /// Bank file to upload
        file: PathBuf,

        /// Synth track (1 or 2)
        #[arg(short, long, default_value = "1", value_parser = clap::value_parser!(u8).range(1..=2))]
        track: u8,
    },

    /// Show the patch currently loaded on a synth track
    Current {
        /// Synth track (1 or 2)
        #[arg(short, long, default_value = "1", value_parser = clap::value_parser!(u8).range(1..=2))]
        track: u8,
    },

    /// List the patches in a .syx file
    Inspect {
        file: PathBuf,
    },

    /// Print session events until Ctrl-C
    Monitor,
}

fn track_arg(number: u8) -> Result<Track> {
    match Track::from_number(number) {
        Some(track) => Ok(track),
        None => bail!("Track must be 1 or 2, got {}", number),
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn format_timestamp() -> String {
    Local::now().format("%H:%M:%S%.3f").to_string()
}

fn open_session(config: SessionConfig) -> TransportSession {
    let backend = Arc::new(MidirBackend::new(config.client_name.clone()));
    TransportSession::open(backend, config)
}

/// Connect to `--port` or the best matching device port.
fn connect(session: &TransportSession, port: Option<&str>) -> Result<String> {
    match port {
        Some(port) => {
            session
                .connect(port)
                .with_context(|| format!("Failed to connect to {}", port))?;
            Ok(port.to_string())
        }
        None => session
            .connect_device()
            .context("No Circuit Tracks found; pass --port to choose one"),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}

fn print_summary(action: &str, summary: &BatchSummary, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(summary);
    }
    for item in &summary.items {
        if let Some(error) = &item.error {
            println!("  {:>2} {}", item.index + 1, error.red());
        }
    }
    let line = format!(
        "{} {} of {} patches ({} failed)",
        action, summary.succeeded, summary.attempted, summary.failed
    );
    if summary.failed > 0 {
        println!("{}", line.yellow());
    } else {
        println!("{}", line.green());
    }
    if summary.cancelled {
        println!("{}", "Cancelled".yellow());
    }
    Ok(())
}

fn wave_name(wave: u8) -> String {
    WAVE_NAMES
        .get(wave as usize)
        .map(|name| name.to_string())
        .unwrap_or_else(|| format!("Wave {}", wave))
}

fn filter_name(filter_type: u8) -> &'static str {
    FILTER_TYPES.get(filter_type as usize).copied().unwrap_or("?")
}

fn print_params_table(params: &PatchParams) {
    println!("{}", params.name.bold());
    println!(
        "  osc A   {:<8} coarse={:<3} fine={:<3} mix={}",
        wave_name(params.osc_a.wave).cyan(),
        params.osc_a.coarse,
        params.osc_a.fine,
        params.osc_a.mix
    );
    println!(
        "  osc B   {:<8} coarse={:<3} fine={:<3} mix={}",
        wave_name(params.osc_b.wave).cyan(),
        params.osc_b.coarse,
        params.osc_b.fine,
        params.osc_b.mix
    );
    println!(
        "  filter  {:<8} cutoff={:<3} res={:<3} drive={}",
        filter_name(params.filter.filter_type).cyan(),
        params.filter.cutoff,
        params.filter.resonance,
        params.filter.drive
    );
    let env = params.amp_env;
    println!(
        "  amp env A={} D={} S={} R={}",
        env.attack, env.decay, env.sustain, env.release
    );
    for (slot, route) in params.mod_matrix.iter().enumerate() {
        // Depth 64 is the centre, i.e. no modulation
        if route.depth == 64 {
            continue;
        }
        println!(
            "  mod {:>2}  {} -> {} depth={}",
            slot + 1,
            mod_source_name(route.source).unwrap_or("?").yellow(),
            mod_destination_name(route.destination).unwrap_or("?").yellow(),
            route.depth as i16 - 64
        );
    }
}

// ─── Commands ─────────────────────────────────────────────────────────────────

fn cmd_ports(config: SessionConfig, format: OutputFormat) -> Result<()> {
    let session = open_session(config);
    let ports = session.ports();
    let best = session.find_device_port();
    session.close();

    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({ "ports": ports, "device": best }));
    }
    if ports.is_empty() {
        println!("{}", "No bidirectional MIDI ports found".dimmed());
    }
    for port in &ports {
        if Some(port) == best.as_ref() {
            println!("{} {}", "*".green(), port.green().bold());
        } else {
            println!("  {}", port);
        }
    }
    Ok(())
}

async fn cmd_fetch(
    config: SessionConfig,
    port: Option<&str>,
    track: Track,
    out: Option<PathBuf>,
    partial: bool,
    format: OutputFormat,
) -> Result<()> {
    let session = open_session(config);
    let connected = connect(&session, port)?;
    println!("Connected to {}", connected.green());

    let store = Arc::new(BankStore::new(session.clone()));
    let canceller = Arc::clone(&store);
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            canceller.cancel();
        }
    });

    println!("Fetching {} bank...", track);
    let summary = store.fetch_all(track).await;
    ctrl_c.abort();
    session.close();
    print_summary("Fetched", &summary, format)?;

    let bytes = fetch_output(&store, track, &summary, partial)?;
    let path = out.unwrap_or_else(|| PathBuf::from(BankStore::export_file_name(track)));
    files::write_syx(&path, &bytes)?;
    println!("Wrote {}", path.display());
    Ok(())
}

/// File contents after a bank fetch. An incomplete fetch is refused unless
/// `partial` is set, and then holds only the slots that were fetched.
fn fetch_output(store: &BankStore, track: Track, summary: &BatchSummary, partial: bool) -> Result<Vec<u8>> {
    if summary.is_complete() {
        return Ok(store.export_bank(track));
    }
    if !partial {
        bail!(
            "Fetch incomplete ({} of {} patches), nothing written; pass --partial to save the fetched patches",
            summary.succeeded,
            BANK_SIZE
        );
    }
    Ok(store.export_populated(track))
}

async fn cmd_send(
    config: SessionConfig,
    port: Option<&str>,
    track: Track,
    file: PathBuf,
    format: OutputFormat,
) -> Result<()> {
    let bytes = files::read_syx(&file)?;
    let session = open_session(config);
    let store = BankStore::new(session.clone());
    let imported = store.import_file(track, &bytes);
    if imported.count == 0 {
        bail!("No patch dumps found in {}", file.display());
    }
    println!("Loaded {} patches from {}", imported.count, file.display());

    let connected = connect(&session, port)?;
    println!("Connected to {}", connected.green());
    let summary = store.send_all(track).await;
    print_summary("Sent", &summary, format)?;
    session.close();
    Ok(())
}

async fn cmd_current(
    config: SessionConfig,
    port: Option<&str>,
    track: Track,
    format: OutputFormat,
) -> Result<()> {
    let session = open_session(config);
    connect(&session, port)?;
    let store = BankStore::new(session.clone());
    let current = store
        .fetch_current(track)
        .await
        .with_context(|| format!("Failed to read the current patch of {}", track))?;
    session.close();

    match format {
        OutputFormat::Json => print_json(&current.params),
        OutputFormat::Table => {
            print_params_table(&current.params);
            Ok(())
        }
    }
}

fn cmd_inspect(file: PathBuf, format: OutputFormat) -> Result<()> {
    let bytes = files::read_syx(&file)?;
    let patches = parse_syx_file(&bytes);

    if format == OutputFormat::Json {
        let entries: Vec<_> = patches
            .iter()
            .map(|patch| {
                serde_json::json!({
                    "bank": patch.bank,
                    "index": patch.index,
                    "params": patch.raw.params(),
                })
            })
            .collect();
        return print_json(&entries);
    }

    println!(
        "{:>4} {:<16} {:<8} {:<8} {:<6} {:>6}",
        "IDX", "NAME", "OSC A", "OSC B", "FILTER", "CUTOFF"
    );
    println!("{}", "-".repeat(54));
    for patch in &patches {
        let params = patch.raw.params();
        println!(
            "{:>4} {:<16} {:<8} {:<8} {:<6} {:>6}",
            patch.index as usize + 1,
            params.name.white().bold(),
            wave_name(params.osc_a.wave),
            wave_name(params.osc_b.wave),
            filter_name(params.filter.filter_type),
            params.filter.cutoff
        );
    }
    println!("{}", format!("{} patches", patches.len()).dimmed());
    Ok(())
}

fn describe_frame(bytes: &[u8]) -> String {
    match parse_frame(bytes) {
        Some(ParsedFrame::PatchDump { index, params, .. }) => {
            format!("patch dump {} \"{}\"", index as usize + 1, params.name)
        }
        Some(ParsedFrame::CurrentPatchDump { params, .. }) => {
            format!("current patch \"{}\"", params.name)
        }
        Some(ParsedFrame::Unknown { command, data }) => {
            format!("command 0x{:02X} ({} bytes)", command, data.len())
        }
        None => match sysex::command_byte(bytes) {
            Some(command) => format!("foreign SysEx 0x{:02X} ({} bytes)", command, bytes.len()),
            None => format!("SysEx ({} bytes)", bytes.len()),
        },
    }
}

fn print_event(event: &SessionEvent, format: OutputFormat) {
    let time = format_timestamp();
    if format == OutputFormat::Json {
        let line = serde_json::json!({ "time": time, "event": event });
        println!("{}", line);
        return;
    }

    let (kind, detail) = match event {
        SessionEvent::Connected(port) => ("connected".green(), port.clone()),
        SessionEvent::Disconnected => ("disconnected".red(), String::new()),
        SessionEvent::PortsChanged(ports) => ("ports".cyan(), ports.join(", ")),
        SessionEvent::FrameReceived(bytes) => ("sysex".magenta(), describe_frame(bytes)),
        SessionEvent::CcReceived(cc) => (
            "cc".yellow(),
            format!("ch={} cc={} value={}", cc.channel + 1, cc.controller, cc.value),
        ),
        SessionEvent::NoteOn {
            channel,
            note,
            velocity,
        } => (
            "note on".blue(),
            format!("ch={} note={} vel={}", channel + 1, note, velocity),
        ),
        SessionEvent::NoteOff { channel, note, .. } => {
            ("note off".blue(), format!("ch={} note={}", channel + 1, note))
        }
        SessionEvent::TransportStateChanged(state) => ("transport".white(), format!("{:?}", state)),
    };
    println!("{} {:>12} {}", time.dimmed(), kind, detail);
}

async fn cmd_monitor(config: SessionConfig, port: Option<&str>, format: OutputFormat) -> Result<()> {
    let session = open_session(config);
    let mut events = session.subscribe();
    match connect(&session, port) {
        Ok(connected) => println!("Monitoring {} (Ctrl-C to stop)", connected.green()),
        Err(err) => println!("{} {:#}; waiting for ports to change", "Not connected:".yellow(), err),
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => print_event(&event, format),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    session.close();
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = files::load_config(cli.config.as_deref())?;
    let port = cli.port.as_deref();

    match cli.command {
        Commands::Ports => cmd_ports(config, cli.format),
        Commands::Fetch { track, out, partial } => {
            cmd_fetch(config, port, track_arg(track)?, out, partial, cli.format).await
        }
        Commands::Send { file, track } => cmd_send(config, port, track_arg(track)?, file, cli.format).await,
        Commands::Current { track } => cmd_current(config, port, track_arg(track)?, cli.format).await,
        Commands::Inspect { file } => cmd_inspect(file, cli.format),
        Commands::Monitor => cmd_monitor(config, port, cli.format).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = run(cli).await {
        eprintln!("{} {:#}", "error:".red().bold(), err);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use circuit_core::RawPatch;

    #[test]
    fn test_cli_parses_fetch() {
        let cli = Cli::try_parse_from(["circuit-librarian", "fetch", "--track", "2", "--format", "json"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Commands::Fetch { track, out, partial } => {
                assert_eq!(track_arg(track).unwrap(), Track::Synth2);
                assert!(out.is_none());
                assert!(!partial);
            }
            _ => panic!("expected fetch"),
        }
    }

    fn store_with_two_patches() -> BankStore {
        let session = TransportSession::open(Arc::new(circuit::NullBackend), SessionConfig::default());
        let store = BankStore::new(session);
        for index in [0, 1] {
            store.set_raw(Track::Synth1, index, RawPatch::init(index).as_bytes()).unwrap();
        }
        store
    }

    #[test]
    fn test_incomplete_fetch_is_not_written() {
        let store = store_with_two_patches();
        let summary = BatchSummary {
            attempted: 3,
            succeeded: 2,
            failed: 1,
            ..BatchSummary::default()
        };
        assert!(fetch_output(&store, Track::Synth1, &summary, false).is_err());

        let cancelled = BatchSummary {
            attempted: 2,
            succeeded: 2,
            cancelled: true,
            ..BatchSummary::default()
        };
        assert!(fetch_output(&store, Track::Synth1, &cancelled, false).is_err());
    }

    #[test]
    fn test_partial_fetch_writes_only_fetched_slots() {
        let store = store_with_two_patches();
        let summary = BatchSummary {
            attempted: 3,
            succeeded: 2,
            failed: 1,
            ..BatchSummary::default()
        };
        let bytes = fetch_output(&store, Track::Synth1, &summary, true).unwrap();
        let indices: Vec<u8> = parse_syx_file(&bytes).iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![0, 1]);

        let complete = BatchSummary {
            attempted: BANK_SIZE,
            succeeded: BANK_SIZE,
            ..BatchSummary::default()
        };
        let bytes = fetch_output(&store, Track::Synth1, &complete, false).unwrap();
        assert_eq!(parse_syx_file(&bytes).len(), BANK_SIZE);
    }

    #[test]
    fn test_cli_parses_partial_flag() {
        let cli = Cli::try_parse_from(["circuit-librarian", "fetch", "--partial"]).unwrap();
        assert!(matches!(cli.command, Commands::Fetch { partial: true, .. }));
    }

    #[test]
    fn test_cli_rejects_track_three() {
        assert!(Cli::try_parse_from(["circuit-librarian", "current", "--track", "3"]).is_err());
    }

    #[test]
    fn test_describe_frames() {
        let dump = sysex::patch_dump_message(&circuit_core::encode_name("Wobble", &RawPatch::init(0)), 4, 0);
        assert_eq!(describe_frame(&dump), "patch dump 5 \"Wobble\"");
        assert_eq!(describe_frame(&[0xF0, 0x7E, 0x7F, 0x06, 0x01, 0x00, 0x02, 0xF7]), "foreign SysEx 0x02 (8 bytes)");
        assert_eq!(describe_frame(&[0xF0, 0xF7]), "SysEx (2 bytes)");
    }

    #[test]
    fn test_display_names() {
        assert_eq!(wave_name(2), "Saw");
        assert_eq!(wave_name(30), "Wave 30");
        assert_eq!(filter_name(1), "LP24");
        assert_eq!(filter_name(9), "?");
    }
}
