//! Integration tests for timeline persistence and the recorder pipeline.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rewind_blob::StoreConfig;
use rewind_core::toy::ToyMachine;
use rewind_core::{Auditor, Command, Device, Event, EventKind, Outcome};
use rewind_engine::{Engine, EngineConfig, RunMode};
use rewind_timeline::{NodeId, Payload, Recorder, RecorderConfig, Timeline, TimelineError};

const TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Helpers
// ============================================================================

fn create(path: &Path, machine: &ToyMachine) -> Timeline {
    Timeline::create(path, StoreConfig::default(), &machine.export_state()).unwrap()
}

fn step(timeline: &mut Timeline, machine: &mut ToyMachine, command: &Command) -> NodeId {
    let event = machine.apply(command).unwrap().unwrap();
    timeline.add(event).unwrap()
}

fn run(timeline: &mut Timeline, machine: &mut ToyMachine, stop_tick: u64) -> NodeId {
    step(timeline, machine, &Command::RunUntil { stop_tick })
}

fn press(timeline: &mut Timeline, machine: &mut ToyMachine, code: u8) -> NodeId {
    step(timeline, machine, &Command::KeyPress { code, down: true })
}

/// Every node as `(id, parent, children, tick, payload)`, sorted by id.
fn shape(timeline: &Timeline) -> Vec<(NodeId, Option<NodeId>, Vec<NodeId>, u64, Payload)> {
    let mut nodes: Vec<_> = timeline
        .iter()
        .map(|node| {
            (
                node.id(),
                node.parent(),
                node.children().to_vec(),
                node.tick(),
                node.payload().clone(),
            )
        })
        .collect();
    nodes.sort_by_key(|node| node.0);
    nodes
}

/// Payloads with blob handles replaced, for comparing across compaction.
fn structure(timeline: &Timeline) -> Vec<(NodeId, Option<NodeId>, Vec<NodeId>, u64, bool)> {
    shape(timeline)
        .into_iter()
        .map(|(id, parent, children, tick, payload)| {
            let bookmark = matches!(payload, Payload::Bookmark { .. });
            (id, parent, children, tick, bookmark)
        })
        .collect()
}

/// A tree with two branches, bookmarks on both and a deleted third branch.
fn build_history(timeline: &mut Timeline, machine: &mut ToyMachine) -> Vec<NodeId> {
    let a1 = run(timeline, machine, 1_000);
    press(timeline, machine, 7);
    let b1 = run(timeline, machine, 2_000);
    timeline.add_bookmark(false, machine).unwrap();
    run(timeline, machine, 3_000);
    let doomed = run(timeline, machine, 4_000);
    run(timeline, machine, 5_000);

    timeline.set_current(b1, machine).unwrap();
    press(timeline, machine, 9);
    run(timeline, machine, 3_500);
    let b2 = timeline.add_bookmark(true, machine).unwrap();
    run(timeline, machine, 4_500);

    timeline.set_current(b2, machine).unwrap();
    timeline.delete_branch(doomed).unwrap();
    vec![a1, b1, b2]
}

// ============================================================================
// Time travel
// ============================================================================

#[test]
fn test_jump_to_bookmark_restores_state() {
    let dir = tempfile::tempdir().unwrap();
    let mut machine = ToyMachine::default();
    let mut timeline = create(&dir.path().join("t.rwd"), &machine);

    run(&mut timeline, &mut machine, 500);
    let bookmark = timeline.add_bookmark(false, &machine).unwrap();
    let bookmarked = machine.export_state();

    let mut midway = None;
    for i in 1..=10u64 {
        let node = if i % 3 == 0 {
            press(&mut timeline, &mut machine, i as u8)
        } else {
            run(&mut timeline, &mut machine, 500 + i * 700)
        };
        if i == 5 {
            midway = Some((node, machine.export_state()));
        }
    }
    let latest = machine.export_state();
    let latest_node = timeline.current();

    timeline.set_current(bookmark, &mut machine).unwrap();
    assert_eq!(machine.export_state(), bookmarked);

    let (midway, midway_state) = midway.unwrap();
    timeline.set_current(midway, &mut machine).unwrap();
    assert_eq!(machine.export_state(), midway_state);

    timeline.set_current(latest_node, &mut machine).unwrap();
    assert_eq!(machine.export_state(), latest);
}

#[test]
fn test_jump_to_root_restores_initial_state() {
    let dir = tempfile::tempdir().unwrap();
    let mut machine = ToyMachine::default();
    let initial = machine.export_state();
    let mut timeline = create(&dir.path().join("t.rwd"), &machine);

    run(&mut timeline, &mut machine, 2_000);
    press(&mut timeline, &mut machine, 1);
    timeline.set_current(NodeId::ROOT, &mut machine).unwrap();

    assert_eq!(machine.export_state(), initial);
    assert_eq!(timeline.initial_state().unwrap(), initial);
}

#[test]
fn test_tree_invariants_hold() {
    let dir = tempfile::tempdir().unwrap();
    let mut machine = ToyMachine::default();
    let mut timeline = create(&dir.path().join("t.rwd"), &machine);
    build_history(&mut timeline, &mut machine);

    for node in timeline.iter() {
        for child in node.children() {
            let child = timeline.node(*child).unwrap();
            assert_eq!(child.parent(), Some(node.id()));
            assert!(child.tick() >= node.tick());
        }
        if let Some(parent) = node.parent() {
            assert!(timeline.children(parent).contains(&node.id()));
        }
    }
    let current = timeline.current();
    assert_eq!(timeline.path_from_root(current).unwrap()[0], timeline.root());
}

// ============================================================================
// Persistence
// ============================================================================

#[test]
fn test_reopen_rebuilds_tree() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.rwd");
    let mut machine = ToyMachine::default();

    let (expected, current, bookmarks) = {
        let mut timeline = create(&path, &machine);
        build_history(&mut timeline, &mut machine);
        timeline.sync().unwrap();
        let states: Vec<_> = timeline
            .bookmarks()
            .into_iter()
            .map(|id| (id, timeline.bookmark_state(id).unwrap()))
            .collect();
        (shape(&timeline), timeline.current(), states)
    };

    let mut reopened = Timeline::open(&path, StoreConfig::default()).unwrap();
    assert_eq!(shape(&reopened), expected);
    assert_eq!(reopened.current(), current);
    for (id, state) in bookmarks {
        assert_eq!(reopened.bookmark_state(id).unwrap(), state);
    }

    // New ids keep counting past the deleted ones.
    let next = run(&mut reopened, &mut machine, 9_000);
    assert!(expected.iter().all(|node| node.0 < next));
}

#[test]
fn test_torn_tail_is_truncated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.rwd");
    let mut machine = ToyMachine::default();

    let (intact, intact_len) = {
        let mut timeline = create(&path, &machine);
        run(&mut timeline, &mut machine, 1_000);
        press(&mut timeline, &mut machine, 4);
        let intact = shape(&timeline);
        let intact_len = timeline.store().len();
        run(&mut timeline, &mut machine, 2_000);
        timeline.add_bookmark(false, &machine).unwrap();
        timeline.sync().unwrap();
        (intact, intact_len)
    };

    // Cut inside the frame that follows the intact prefix.
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(intact_len + 5).unwrap();
    drop(file);

    let timeline = Timeline::open(&path, StoreConfig::default()).unwrap();
    assert_eq!(shape(&timeline), intact);
    assert_eq!(timeline.store().len(), intact_len);
}

#[test]
fn test_bookmark_without_blobs_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.rwd");
    let mut machine = ToyMachine::default();

    let (intact, bookmark_start) = {
        let mut timeline = create(&path, &machine);
        run(&mut timeline, &mut machine, 1_000);
        let intact = shape(&timeline);
        let start = timeline.store().len();
        timeline.add_bookmark(false, &machine).unwrap();
        timeline.sync().unwrap();
        (intact, start)
    };

    // Keep the ConvertToBookmark frame (tag, length, id, flag) but lose the
    // state blob behind it.
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(bookmark_start + 5 + 9 + 3).unwrap();
    drop(file);

    let timeline = Timeline::open(&path, StoreConfig::default()).unwrap();
    assert_eq!(shape(&timeline), intact);
    assert!(timeline.bookmarks().is_empty());
}

#[test]
fn test_spliced_children_survive_reopen_and_compaction() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.rwd");
    let mut machine = ToyMachine::default();
    let mut timeline = create(&path, &machine);

    let a1 = run(&mut timeline, &mut machine, 1_000);
    let bookmark = run(&mut timeline, &mut machine, 2_000);
    timeline.add_bookmark(false, &machine).unwrap();
    let child = press(&mut timeline, &mut machine, 3);
    let leaf = run(&mut timeline, &mut machine, 2_500);
    let recorded = machine.export_state();
    timeline.set_current(a1, &mut machine).unwrap();
    timeline.delete_bookmark(bookmark).unwrap();
    timeline.sync().unwrap();
    drop(timeline);

    let mut reopened = Timeline::open(&path, StoreConfig::default()).unwrap();
    assert_eq!(reopened.node(child).unwrap().prelude().len(), 1);
    reopened.set_current(leaf, &mut machine).unwrap();
    assert_eq!(machine.export_state(), recorded);

    reopened.compact().unwrap();
    drop(reopened);
    let mut compacted = Timeline::open(&path, StoreConfig::default()).unwrap();
    assert_eq!(compacted.node(child).unwrap().prelude().len(), 1);
    assert!(compacted.node(leaf).unwrap().prelude().is_empty());
    compacted.set_current(a1, &mut machine).unwrap();
    compacted.set_current(leaf, &mut machine).unwrap();
    assert_eq!(machine.export_state(), recorded);
}

#[test]
fn test_open_rejects_foreign_and_empty_files() {
    let dir = tempfile::tempdir().unwrap();
    let foreign = dir.path().join("foreign.rwd");
    std::fs::write(&foreign, b"definitely not a timeline").unwrap();
    assert!(Timeline::open(&foreign, StoreConfig::default()).is_err());

    let empty = dir.path().join("empty.rwd");
    let err = Timeline::open(&empty, StoreConfig::default()).unwrap_err();
    assert!(matches!(err, TimelineError::Journal { .. }));
}

// ============================================================================
// Compaction
// ============================================================================

#[test]
fn test_compaction_keeps_live_tree() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.rwd");
    let mut machine = ToyMachine::default();
    let mut timeline = create(&path, &machine);

    let kept = build_history(&mut timeline, &mut machine);
    // A large branch that is deleted before compacting.
    timeline.set_current(kept[0], &mut machine).unwrap();
    for i in 0..20u64 {
        run(&mut timeline, &mut machine, 1_000 + (i + 1) * 5_000);
        timeline.add_bookmark(true, &machine).unwrap();
    }
    let waste = timeline.children(kept[0])[1];
    timeline.set_current(kept[2], &mut machine).unwrap();
    timeline.delete_branch(waste).unwrap();

    let before = timeline.store().len();
    let expected = structure(&timeline);
    let states: Vec<_> = timeline
        .bookmarks()
        .into_iter()
        .map(|id| (id, timeline.bookmark_state(id).unwrap()))
        .collect();
    let current = timeline.current();

    timeline.compact().unwrap();
    assert!(timeline.store().len() < before);
    assert_eq!(structure(&timeline), expected);
    assert_eq!(timeline.current(), current);
    for (id, state) in &states {
        assert_eq!(&timeline.bookmark_state(*id).unwrap(), state);
    }

    // The compacted file replays to the same tree and still time travels.
    drop(timeline);
    let mut reopened = Timeline::open(&path, StoreConfig::default()).unwrap();
    assert_eq!(structure(&reopened), expected);
    reopened.set_current(kept[1], &mut machine).unwrap();
    assert_eq!(machine.export_state(), states[0].1);
    assert!(!path.with_extension("rwd.old").exists());
}

// ============================================================================
// Engine pipeline
// ============================================================================

#[test]
fn test_engine_events_become_nodes() {
    let dir = tempfile::tempdir().unwrap();
    let machine = ToyMachine::default();
    let timeline = Arc::new(Mutex::new(create(&dir.path().join("t.rwd"), &machine)));

    let engine = Engine::with_config(machine, EngineConfig::default());
    let recorder = Recorder::new(
        Arc::clone(&timeline),
        &engine,
        RecorderConfig {
            bookmark_interval: Some(10_000),
        },
    );
    engine.subscribe(recorder);
    engine.start().unwrap();

    let completions = [
        engine.enqueue(Command::Reset),
        engine.enqueue(Command::KeyPress {
            code: 42,
            down: true,
        }),
        engine.enqueue(Command::CreateSnapshot { id: 1 }),
        engine.enqueue(Command::RunUntil { stop_tick: 20_000 }),
    ];
    for completion in &completions {
        assert_eq!(completion.wait_timeout(TIMEOUT), Some(Outcome::Applied));
    }
    engine.stop().unwrap();

    let timeline = timeline.lock();
    // Root, Reset, KeyPress, RunUntil; the snapshot command is not history.
    assert_eq!(timeline.len(), 4);
    let path = timeline.path_from_root(timeline.current()).unwrap();
    let ticks: Vec<u64> = path
        .iter()
        .map(|id| timeline.node(*id).unwrap().tick())
        .collect();
    assert_eq!(ticks, vec![0, 0, 0, 20_000]);
    // The run crossed the bookmark interval and was converted in place.
    assert_eq!(timeline.bookmarks(), vec![timeline.current()]);
    assert_eq!(
        timeline.bookmark_state(timeline.current()).unwrap(),
        engine.with_device(ToyMachine::export_state)
    );
}

#[test]
fn test_reverse_after_jump_stays_on_new_branch() {
    let dir = tempfile::tempdir().unwrap();
    let machine = ToyMachine::default();
    let timeline = Arc::new(Mutex::new(create(&dir.path().join("t.rwd"), &machine)));

    let engine = Engine::with_config(machine, EngineConfig {
        snapshot_interval: 1_000,
        ..EngineConfig::default()
    });
    let recorder = Arc::new(Recorder::new(
        Arc::clone(&timeline),
        &engine,
        RecorderConfig::default(),
    ));
    engine.subscribe_shared(Arc::clone(&recorder) as Arc<dyn Auditor>);
    let reverts: Arc<Mutex<Vec<u64>>> = Arc::default();
    let sink = Arc::clone(&reverts);
    engine.subscribe(move |_: &Command, event: &Event| {
        if matches!(event.kind, EventKind::RevertToSnapshot { .. }) {
            sink.lock().push(event.tick);
        }
    });
    engine.start().unwrap();

    let apply = |command: Command| {
        assert_eq!(
            engine.enqueue(command).wait_timeout(TIMEOUT),
            Some(Outcome::Applied)
        );
    };
    // Old branch: snapshots every 1000 ticks up to 8000.
    apply(Command::RunUntil { stop_tick: 1_000 });
    apply(Command::Pause);
    let bookmark = recorder.bookmark().unwrap();
    for stop_tick in (2_000..=8_000).step_by(1_000) {
        apply(Command::RunUntil { stop_tick });
    }
    assert!(engine.reverse_history().len() > 1);

    recorder.jump_to(bookmark).unwrap();
    assert!(engine.reverse_history().is_empty());
    apply(Command::KeyPress { code: 9, down: true });
    let pressed = timeline.lock().current();
    let pressed_state = engine.with_device(ToyMachine::export_state);
    apply(Command::RunUntil { stop_tick: 2_500 });

    apply(Command::Reverse);
    // Reverse ends by pausing once the ring is empty.
    let deadline = std::time::Instant::now() + TIMEOUT;
    while engine.status().mode != RunMode::Paused {
        assert!(std::time::Instant::now() < deadline, "reverse never finished");
        std::thread::sleep(Duration::from_millis(5));
    }
    engine.stop().unwrap();

    // Only the snapshot taken on the new branch was replayed.
    assert_eq!(*reverts.lock(), vec![1_000]);
    assert_eq!(engine.with_device(ToyMachine::export_state), pressed_state);
    let timeline = timeline.lock();
    assert_eq!(timeline.current(), pressed);
    assert_eq!(timeline.parent(pressed), Some(bookmark));
}
