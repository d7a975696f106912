//! Headless session runner
//!
//! This binary:
//! 1. Opens (or creates) a timeline file and restores the toy machine to its
//!    current node
//! 2. Plays a short scripted session through the engine: run, bookmark,
//!    reverse, jump back and branch off
//! 3. Compacts the file and logs a summary
//!
//! Environment:
//! - `REWIND_FILE` - timeline file (default `session.rwd`)
//! - `REWIND_RUN_TICKS` - ticks to run per leg of the script (default 200000)
//! - `REWIND_FRAME_TICKS` - ticks per idle frame (default 1000)
//! - engine, store and recorder knobs (`REWIND_SNAPSHOT_INTERVAL`,
//!   `REWIND_COMPRESSION_LEVEL`, `REWIND_BOOKMARK_INTERVAL`, ...)

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use eyre::{WrapErr, bail, eyre};
use parking_lot::Mutex;
use rewind_blob::StoreConfig;
use rewind_core::toy::ToyMachine;
use rewind_core::{Auditor, Command, Decode, Device, Event, Outcome, VsyncSupplier};
use rewind_engine::{Engine, EngineConfig, EventMirror};
use rewind_timeline::{Recorder, RecorderConfig, Timeline};
use tracing::{info, warn};

const STEP_TIMEOUT: Duration = Duration::from_secs(30);

struct Settings {
    file: PathBuf,
    run_ticks: u64,
    frame_ticks: u64,
}

impl Settings {
    fn from_env() -> Self {
        let file = std::env::var("REWIND_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("session.rwd"));

        let run_ticks: u64 = std::env::var("REWIND_RUN_TICKS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(200_000);

        let frame_ticks: u64 = std::env::var("REWIND_FRAME_TICKS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1_000);

        Self {
            file,
            run_ticks: run_ticks.max(2),
            frame_ticks: frame_ticks.max(1),
        }
    }
}

type Machine = ToyMachine;

fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rewind_runner=info".parse()?)
                .add_directive("rewind_timeline=info".parse()?),
        )
        .init();

    let settings = Settings::from_env();
    let store_config = StoreConfig::from_env();
    let machine = Machine::default();

    let timeline = if settings.file.exists() {
        Timeline::open(&settings.file, store_config)
    } else {
        Timeline::create(&settings.file, store_config, &machine.export_state())
    }
    .wrap_err_with(|| format!("failed to open timeline {}", settings.file.display()))?;
    let timeline = Arc::new(Mutex::new(timeline));

    let engine = Engine::with_config(machine, EngineConfig::from_env());
    let recorder = Arc::new(Recorder::new(
        Arc::clone(&timeline),
        &engine,
        RecorderConfig::from_env(),
    ));

    // Pick up where the previous session stopped.
    let current = timeline.lock().current();
    recorder
        .jump_to(current)
        .wrap_err("failed to restore the machine from the timeline")?;
    info!("Resuming at {current}, tick {}", engine.tick());

    engine.subscribe_shared(Arc::clone(&recorder) as Arc<dyn Auditor>);

    let (mirror, frames) = EventMirror::channel();
    engine.subscribe(mirror.recordable_only());
    let mirror_thread = thread::Builder::new()
        .name("rewind-mirror".to_owned())
        .spawn(move || {
            let mut events = 0u64;
            let mut bytes = 0usize;
            for frame in frames {
                match Event::from_bytes(&frame) {
                    Ok(_) => {
                        events += 1;
                        bytes += frame.len();
                    }
                    Err(e) => warn!("Mirror received an undecodable frame: {e}"),
                }
            }
            (events, bytes)
        })?;

    engine.set_idle_supplier(VsyncSupplier::new(settings.frame_ticks));
    engine.start()?;
    let session = run_session(&engine, &recorder, &settings);
    engine.stop()?;
    drop(engine);

    let (events, bytes) = mirror_thread
        .join()
        .map_err(|_| eyre!("mirror thread panicked"))?;
    session?;
    info!("Mirrored {events} events ({bytes} bytes)");

    let mut timeline = timeline.lock();
    timeline.compact()?;
    timeline.sync()?;
    info!(
        "Timeline {}: {} nodes, {} bookmarks, {} bytes",
        settings.file.display(),
        timeline.len(),
        timeline.bookmarks().len(),
        timeline.store().len()
    );

    Ok(())
}

/// Scripted session: run, bookmark, run on, reverse, then branch off from
/// the bookmark.
fn run_session(
    engine: &Engine<Machine>,
    recorder: &Recorder<Machine>,
    settings: &Settings,
) -> eyre::Result<()> {
    let start = engine.tick();
    if start == 0 {
        apply(engine, Command::Reset)?;
    }

    apply(engine, Command::KeyPress {
        code: 0x20,
        down: true,
    })?;
    wait_for_tick(engine, start + settings.run_ticks / 2)?;

    apply(engine, Command::Pause)?;
    let bookmark = recorder.bookmark()?;
    info!("Bookmarked {bookmark} at tick {}", engine.tick());
    apply(engine, Command::Resume)?;

    apply(engine, Command::KeyPress {
        code: 0x20,
        down: false,
    })?;
    wait_for_tick(engine, start + settings.run_ticks)?;

    // Rewind a few frames through the automatic snapshot ring.
    apply(engine, Command::Reverse)?;
    thread::sleep(engine.config().idle_wait * 4);
    apply(engine, Command::Pause)?;
    info!("Reversed to tick {}", engine.tick());

    recorder.jump_to(bookmark)?;
    let branch_start = engine.tick();
    info!("Jumped back to {bookmark}, tick {branch_start}");
    apply(engine, Command::Resume)?;
    apply(engine, Command::KeyPress {
        code: 0x41,
        down: true,
    })?;
    wait_for_tick(engine, branch_start + settings.run_ticks / 2)?;
    apply(engine, Command::Pause)?;

    Ok(())
}

fn apply(engine: &Engine<Machine>, command: Command) -> eyre::Result<()> {
    let name = command.name();
    match engine.enqueue(command).wait_timeout(STEP_TIMEOUT) {
        Some(Outcome::Applied) => Ok(()),
        Some(Outcome::Rejected(reason)) => bail!("{name} rejected: {reason}"),
        None => bail!("{name} not processed within {STEP_TIMEOUT:?}"),
    }
}

fn wait_for_tick(engine: &Engine<Machine>, tick: u64) -> eyre::Result<()> {
    let deadline = Instant::now() + STEP_TIMEOUT;
    while engine.tick() < tick {
        if Instant::now() > deadline {
            bail!("machine stuck at tick {} (waiting for {tick})", engine.tick());
        }
        thread::sleep(engine.config().idle_wait);
    }
    Ok(())
}
