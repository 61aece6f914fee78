//! GlassToKey CLI
//!
//! Flat gesture keyboard engine: run, record, replay and inspect sessions.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::bounded;
use glasstokey::{
    collector::{
        types::AxisExtents, Collector, CollectorConfig, DeviceDescriptor, FrameSource, NoopSource,
        Side, SOURCE_TICK_FREQUENCY,
    },
    config::Config,
    core::{ChannelSink, DispatchEvent, KeyLayout, Session},
    error::SourceError,
    replay::{
        format::decode_frame_payload, replay, run_selftest, Capture, CaptureWriter, MetaRecord,
        ReplayExpectations,
    },
    transparency::{diagnostics::hex_u64, Diagnostics},
    BindingIndex, VERSION,
};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "glasstokey")]
#[command(version = VERSION)]
#[command(about = "Flat gesture keyboard engine for multitouch trackpads", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the live pipeline until Ctrl+C
    Run {
        /// Also record every processed frame to this capture file
        #[arg(long)]
        record: Option<PathBuf>,
    },

    /// Replay a capture and print its summary
    Replay {
        /// Capture file (.atpcap)
        path: PathBuf,

        /// Layout file to replay against instead of the configured one
        #[arg(long)]
        layout: Option<PathBuf>,

        /// Fail unless the session fingerprint matches (hex)
        #[arg(long, value_parser = hex_u64::parse)]
        expect: Option<u64>,

        /// Fail unless this many lifecycle skips were observed
        #[arg(long)]
        expect_skips: Option<u64>,

        /// Fail unless this many backward lifecycle jumps were observed
        #[arg(long)]
        expect_backward: Option<u64>,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the records of a capture
    Inspect {
        /// Capture file (.atpcap)
        path: PathBuf,
    },

    /// Replay the built-in two-frame scenario and check its counters
    Selftest,

    /// Show configuration and the last session summary
    Status,

    /// Show configuration
    Config,

    /// Suppress dispatch in a running session
    Pause,

    /// Resume dispatch in a running session
    Resume,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("glasstokey=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run { record } => cmd_run(record),
        Commands::Replay {
            path,
            layout,
            expect,
            expect_skips,
            expect_backward,
            json,
        } => cmd_replay(
            &path,
            layout,
            ReplayExpectations {
                fingerprint: expect,
                lifecycle_skips: expect_skips,
                lifecycle_backward: expect_backward,
            },
            json,
        ),
        Commands::Inspect { path } => cmd_inspect(&path),
        Commands::Selftest => cmd_selftest(),
        Commands::Status => cmd_status(),
        Commands::Config => cmd_config(),
        Commands::Pause => cmd_set_paused(true),
        Commands::Resume => cmd_set_paused(false),
    }
}

fn cmd_run(record: Option<PathBuf>) -> Result<()> {
    println!("GlassToKey v{VERSION}");
    println!();

    let config = Config::load().context("loading configuration")?;
    if let Err(e) = config.ensure_directories() {
        warn!("Could not create directories: {}", e);
    }
    let index = Arc::new(config.binding_index().context("loading layout")?);
    let diagnostics = Arc::new(
        Diagnostics::open(config.diagnostics_path()).context("opening diagnostics")?,
    );

    println!("Layout: {} ({} bindings)", index.name(), index.len());
    println!("Queue capacity: {} frames per device", config.queue_capacity);

    let mut collector = Collector::new(
        CollectorConfig {
            queue_capacity: config.queue_capacity,
            read_timeout: config.read_timeout,
        },
        diagnostics.clone(),
    );
    collector
        .start(platform_sources())
        .context("starting device readers")?;

    // Injection is platform-specific; this build logs what it would inject.
    let (event_tx, event_rx) = bounded::<DispatchEvent>(1024);
    let injector = thread::Builder::new()
        .name("glasstokey-injector".to_string())
        .spawn(move || {
            for event in event_rx {
                debug!(sequence = event.sequence, action = ?event.action, "dispatch");
            }
        })
        .context("spawning injector thread")?;

    let mut session = Session::new(
        &config.engine,
        index,
        SOURCE_TICK_FREQUENCY,
        ChannelSink::new(event_tx),
        diagnostics.clone(),
    );
    for descriptor in collector.descriptors() {
        session.register(descriptor.clone());
    }
    session.set_paused(config.paused);

    if let Some(path) = record {
        let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
        let sink: Box<dyn Write + Send> = Box::new(BufWriter::new(file));
        let mut writer = CaptureWriter::new(sink, SOURCE_TICK_FREQUENCY)?;
        writer.write_meta(&MetaRecord::for_this_host(0))?;
        session.set_recorder(writer);
        println!("Recording to {}", path.display());
    }

    let running = collector.running_flag();
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("setting Ctrl+C handler")?;

    let watcher = spawn_pause_watcher(running.clone(), session.pause_flag());

    println!();
    println!("Press Ctrl+C to stop");
    println!();
    info!(session = %diagnostics.session_id(), "session started");

    session.drain(collector.receivers(), &running, config.read_timeout);

    println!();
    println!("Stopping...");
    running.store(false, Ordering::SeqCst);
    collector.stop();
    if watcher.join().is_err() {
        warn!("Pause watcher panicked");
    }

    if let Some(result) = session.finish_recording() {
        match result {
            Ok(frames) => println!("Recorded {frames} frames"),
            Err(e) => eprintln!("Error finishing recording: {e}"),
        }
    }

    let summary = session.summary();
    drop(session);
    if injector.join().is_err() {
        warn!("Injector thread panicked");
    }
    if let Err(e) = diagnostics.flush(&summary) {
        eprintln!("Error saving diagnostics: {e}");
    }

    println!();
    println!("{}", summary.render());
    Ok(())
}

/// Touchpad sources for this build. No platform backend ships here, so both
/// sides are idle sources that keep the pipeline alive.
fn platform_sources() -> Vec<Result<Box<dyn FrameSource>, SourceError>> {
    [(0, Side::Left), (1, Side::Right)]
        .into_iter()
        .map(|(index, side)| {
            let descriptor = DeviceDescriptor::touchpad(index, side, AxisExtents::NORMALIZED);
            let source: Box<dyn FrameSource> = Box::new(NoopSource::new(descriptor));
            Ok(source)
        })
        .collect()
}

/// Poll the config file so `glasstokey pause/resume` can control a running
/// session.
fn spawn_pause_watcher(running: Arc<AtomicBool>, paused: Arc<AtomicBool>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while running.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(250));
            if let Ok(cfg) = Config::load() {
                if paused.swap(cfg.paused, Ordering::SeqCst) != cfg.paused {
                    info!(paused = cfg.paused, "dispatch pause changed");
                }
            }
        }
    })
}

fn cmd_replay(
    path: &Path,
    layout: Option<PathBuf>,
    expectations: ReplayExpectations,
    json: bool,
) -> Result<()> {
    let mut config = Config::load().unwrap_or_default();
    if layout.is_some() {
        config.layout_path = layout;
    }
    let index = Arc::new(config.binding_index().context("loading layout")?);
    let capture =
        Capture::load(path).with_context(|| format!("loading capture {}", path.display()))?;

    let report = replay(&capture, &config.engine, index);
    if json {
        println!("{}", serde_json::to_string_pretty(&report.summary)?);
    } else {
        println!("{}", report.summary.render());
    }

    let mismatches = expectations.check(&report.summary);
    if !mismatches.is_empty() {
        for mismatch in &mismatches {
            eprintln!("Mismatch: {mismatch}");
        }
        bail!("replay did not match {} expectation(s)", mismatches.len());
    }
    Ok(())
}

fn cmd_inspect(path: &Path) -> Result<()> {
    let capture =
        Capture::load(path).with_context(|| format!("loading capture {}", path.display()))?;

    println!("Capture {}", path.display());
    println!("  Version: {}", capture.header.version);
    println!("  Tick frequency: {} Hz", capture.header.tick_frequency);
    if let Some(meta) = &capture.meta {
        println!(
            "  Captured: {} on {} ({}), {} frames declared",
            meta.captured_at.format("%Y-%m-%d %H:%M:%S"),
            meta.source,
            meta.platform,
            meta.frame_count
        );
    }
    println!("  Records: {}", capture.records.len());
    println!();

    let frame_flags = capture.frame_flags();
    for (i, record) in capture.records.iter().enumerate() {
        let h = &record.header;
        if h.is_meta() {
            println!("#{i:<6} meta      {} bytes", h.payload_len);
            continue;
        }
        let detail = match decode_frame_payload(h, &record.payload, frame_flags) {
            Ok(frame) => format!(
                "seq {:<6} contacts {:<2} button {}",
                frame.sequence,
                frame.contacts.len(),
                frame.button_pressed
            ),
            Err(reason) => format!("undecodable ({reason})"),
        };
        println!(
            "#{i:<6} device {:<2} {:<7} usage {:#06X}/{:#06X} ticks {:<10} {detail}",
            h.device_index,
            format!("{:?}", h.side()).to_lowercase(),
            h.usage_page,
            h.usage,
            h.arrival_ticks,
        );
    }
    Ok(())
}

fn cmd_selftest() -> Result<()> {
    let index = Arc::new(BindingIndex::build(&KeyLayout::builtin())?);
    let config = Config::default();
    let report = run_selftest(&config.engine, index)?;

    println!("{}", report.first.render());
    println!();
    if report.passed {
        println!("Self-test passed");
        Ok(())
    } else {
        for failure in &report.failures {
            eprintln!("Failure: {failure}");
        }
        bail!("self-test failed");
    }
}

fn cmd_status() -> Result<()> {
    let config = Config::load().unwrap_or_default();
    println!("GlassToKey Status");
    println!("=================");
    println!();

    println!("Configuration:");
    match &config.layout_path {
        Some(path) => println!("  Layout: {}", path.display()),
        None => println!("  Layout: built-in"),
    }
    println!("  Dwell: {}ms", config.engine.dwell_ms);
    println!("  Default key policy: {:?}", config.engine.default_policy);
    println!("  Paused: {}", config.paused);
    println!();

    let path = config.diagnostics_path();
    if path.exists() {
        let summary = Diagnostics::load_summary(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        println!("Last session:");
        println!("{}", summary.render());
    } else {
        println!("No previous session data found.");
    }
    Ok(())
}

fn cmd_config() -> Result<()> {
    let config = Config::load().unwrap_or_default();
    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn cmd_set_paused(paused: bool) -> Result<()> {
    let mut config = Config::load().unwrap_or_default();
    config.paused = paused;
    config.save().context("saving configuration")?;
    if paused {
        println!("Dispatch paused. Use 'glasstokey resume' to continue.");
    } else {
        println!("Dispatch resumed.");
    }
    Ok(())
}
